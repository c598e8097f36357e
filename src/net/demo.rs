//! Session recording.
//!
//! A demo is the live wire stream captured to disk: a synthetic header
//! (server data, persistent strings, baselines) followed by every raw
//! per-tick message exactly as sent, each prefixed by its `i32`
//! little-endian length, terminated by a negative length. Playback feeds
//! the chunks straight back through [`crate::net::delta::ClientWorld`] —
//! format identity with the live path is the recorder's entire purpose.

use std::io::{self, Read, Write};

use tracing::debug;

use crate::game::entity::{BaselineTable, EntityState};
use crate::net::delta::write_delta_entity;
use crate::net::protocol::{ServerInfo, ServerOp, MAX_MESSAGE_SIZE};
use crate::net::wire::MessageWriter;

/// Stream terminator chunk length
const END_OF_DEMO: i32 = -1;

/// Recording failures terminate the recording session only, never the
/// connection that was being recorded.
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("recording I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid chunk length {0}")]
    BadChunkLength(i32),
}

/// Everything the lazy header needs from the surrounding server
pub struct DemoContext<'a> {
    pub server: &'a ServerInfo,
    /// Externally-owned persistent string table; only non-empty entries
    /// are recorded
    pub config_strings: &'a [String],
    pub baselines: &'a BaselineTable,
}

/// Length-prefixed writer for one recording session
pub struct DemoRecorder<W: Write> {
    sink: W,
    chunk_cap: usize,
    wrote_header: bool,
}

impl<W: Write> DemoRecorder<W> {
    /// Begin a recording session over `sink`. `chunk_cap` bounds each
    /// written chunk and is clamped to the protocol's message ceiling.
    pub fn begin(sink: W, chunk_cap: usize) -> Self {
        Self {
            sink,
            chunk_cap: chunk_cap.min(MAX_MESSAGE_SIZE),
            wrote_header: false,
        }
    }

    /// Whether the startup header has been written yet. Deliberately a
    /// flag of this recorder, not a file-position probe: "start of a
    /// recording" is a demo concern, independent of the client's
    /// "no valid delta base" predicate.
    pub fn wrote_header(&self) -> bool {
        self.wrote_header
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), DemoError> {
        self.sink.write_all(&(data.len() as i32).to_le_bytes())?;
        self.sink.write_all(data)?;
        Ok(())
    }

    fn write_header(&mut self, ctx: &DemoContext) -> Result<(), DemoError> {
        let mut msg = MessageWriter::new(self.chunk_cap);

        let mut info = ctx.server.clone();
        info.demo = true;
        msg.write_u8(ServerOp::ServerData as u8);
        info.write(&mut msg);

        for (index, value) in ctx.config_strings.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            if msg.len() + value.len() + 32 > self.chunk_cap {
                self.write_chunk(msg.as_bytes())?;
                msg.clear();
            }
            msg.write_u8(ServerOp::ConfigString as u8);
            msg.write_u16(index as u16);
            msg.write_string(value);
        }

        let null_state = EntityState::default();
        for baseline in ctx.baselines.iter_set() {
            if msg.len() + 64 > self.chunk_cap {
                self.write_chunk(msg.as_bytes())?;
                msg.clear();
            }
            msg.write_u8(ServerOp::Baseline as u8);
            write_delta_entity(&null_state, baseline, &mut msg, true);
        }

        self.write_chunk(msg.as_bytes())?;
        debug!("demo header written");
        Ok(())
    }

    /// Append one outgoing per-tick message verbatim.
    ///
    /// Until the first baseline-relative frame goes out there is nothing a
    /// fresh decoder could apply, so earlier messages are skipped; the
    /// header is written exactly once, immediately ahead of that first
    /// uncompressed frame.
    pub fn on_frame_sent(
        &mut self,
        raw: &[u8],
        baseline_frame: bool,
        ctx: &DemoContext,
    ) -> Result<(), DemoError> {
        if !self.wrote_header {
            if !baseline_frame {
                debug!("skipping delta-compressed frame before demo header");
                return Ok(());
            }
            self.write_header(ctx)?;
            self.wrote_header = true;
        }
        self.write_chunk(raw)
    }

    /// Write the terminator, flush, and hand the sink back
    pub fn end(mut self) -> Result<W, DemoError> {
        self.sink.write_all(&END_OF_DEMO.to_le_bytes())?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}

/// Reads back the identical framing; yields chunks until the terminator.
/// EOF at a chunk boundary ends a truncated recording gracefully.
pub struct DemoReader<R: Read> {
    src: R,
    done: bool,
}

impl<R: Read> DemoReader<R> {
    pub fn new(src: R) -> Self {
        Self { src, done: false }
    }

    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DemoError> {
        if self.done {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        match self.src.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                self.done = true;
                return Ok(None);
            }
            Err(err) => return Err(DemoError::Io(err)),
        }

        let len = i32::from_le_bytes(len_bytes);
        if len == END_OF_DEMO {
            self.done = true;
            return Ok(None);
        }
        if len < 0 || len as usize > MAX_MESSAGE_SIZE {
            return Err(DemoError::BadChunkLength(len));
        }

        let mut chunk = vec![0u8; len as usize];
        self.src.read_exact(&mut chunk)?;
        Ok(Some(chunk))
    }
}
