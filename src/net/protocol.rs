//! Wire protocol: limits, chunk opcodes, delta bit masks, and errors.
//!
//! The live datagram path and the demo recorder share everything in this
//! module; a demo is decodable precisely because it is framed from these
//! same chunks.

use crate::net::wire::{MessageReader, MessageWriter};

/// Protocol revision, written into the server-data chunk
pub const PROTOCOL_VERSION: u32 = 1;

/// Fixed maximum entity count, known at level-load time.
/// Entity number 0 is reserved as the end-of-entities wire sentinel.
pub const MAX_ENTITIES: usize = 1024;

/// Player-state stat slots (health, armor, ammo, ...)
pub const MAX_STATS: usize = 16;

/// Maximum areas per level; bounds the per-frame area bit vector
pub const MAX_AREAS: usize = 256;
pub const MAX_AREA_BYTES: usize = MAX_AREAS / 8;

/// Externally-owned persistent string table size
pub const MAX_CONFIG_STRINGS: usize = 512;

/// Hard cap for any single message (also the demo chunk ceiling)
pub const MAX_MESSAGE_SIZE: usize = 16384;

/// Conservative per-packet budget for the unreliable datagram link
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// Worst-case wire size of one entity delta record; the frame encoder
/// truncates rather than start a record it cannot finish
pub const MAX_ENTITY_RECORD: usize = 32;

/// Wire sentinel for "no delta base" / "no compression"
pub const NO_DELTA_FRAME: i32 = -1;

/// Upper bound on a command sample's duration
pub const MAX_COMMAND_MSEC: u8 = 250;

/// Server → client chunk opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerOp {
    ServerData = 1,
    ConfigString = 2,
    Baseline = 3,
    Frame = 4,
}

impl ServerOp {
    pub fn from_u8(op: u8) -> Option<ServerOp> {
        match op {
            1 => Some(ServerOp::ServerData),
            2 => Some(ServerOp::ConfigString),
            3 => Some(ServerOp::Baseline),
            4 => Some(ServerOp::Frame),
            _ => None,
        }
    }
}

/// Client → server chunk opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientOp {
    Move = 1,
}

impl ClientOp {
    pub fn from_u8(op: u8) -> Option<ClientOp> {
        match op {
            1 => Some(ClientOp::Move),
            _ => None,
        }
    }
}

/// Entity delta bits
pub mod entity_bits {
    pub const ORIGIN: u16 = 1 << 0;
    pub const ANGLES: u16 = 1 << 1;
    pub const MODEL: u16 = 1 << 2;
    pub const SOUND: u16 = 1 << 3;
    pub const EVENT: u16 = 1 << 4;
    pub const EFFECTS: u16 = 1 << 5;
    pub const SOLID: u16 = 1 << 6;
    /// The entity left the client's frame; evict it
    pub const REMOVE: u16 = 1 << 15;
}

/// Player-state delta bits
pub mod player_bits {
    pub const ORIGIN: u8 = 1 << 0;
    pub const VELOCITY: u8 = 1 << 1;
    pub const VIEW_ANGLES: u8 = 1 << 2;
    pub const FLAGS: u8 = 1 << 3;
}

/// Command delta bits
pub mod cmd_bits {
    pub const ANGLE1: u8 = 1 << 0;
    pub const ANGLE2: u8 = 1 << 1;
    pub const ANGLE3: u8 = 1 << 2;
    pub const FORWARD: u8 = 1 << 3;
    pub const RIGHT: u8 = 1 << 4;
    pub const UP: u8 = 1 << 5;
    pub const BUTTONS: u8 = 1 << 6;
}

/// Datagram header carried ahead of the chunks: this packet's sequence
/// number and the highest peer sequence received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u32,
    pub ack: u32,
}

impl PacketHeader {
    pub const BYTES: usize = 8;

    pub fn write(&self, msg: &mut MessageWriter) {
        msg.write_u32(self.sequence);
        msg.write_u32(self.ack);
    }

    pub fn read(msg: &mut MessageReader) -> Option<PacketHeader> {
        Some(PacketHeader {
            sequence: msg.read_u32()?,
            ack: msg.read_u32()?,
        })
    }
}

/// One-time connection metadata, the first chunk of every demo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub protocol: u32,
    /// Server spawn count; bumps on map change so stale clients resync
    pub spawn_count: u32,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// True when this stream is a recording rather than a live connection
    pub demo: bool,
    /// Game directory the client must run
    pub game: String,
    /// The receiving client's own entity number
    pub client_entity: u16,
    pub level_name: String,
}

impl ServerInfo {
    pub fn write(&self, msg: &mut MessageWriter) {
        msg.write_u32(self.protocol);
        msg.write_u32(self.spawn_count);
        msg.write_u32(self.tick_rate);
        msg.write_u8(self.demo as u8);
        msg.write_string(&self.game);
        msg.write_u16(self.client_entity);
        msg.write_string(&self.level_name);
    }

    pub fn read(msg: &mut MessageReader) -> Option<ServerInfo> {
        Some(ServerInfo {
            protocol: msg.read_u32()?,
            spawn_count: msg.read_u32()?,
            tick_rate: msg.read_u32()?,
            demo: msg.read_u8()? != 0,
            game: msg.read_string()?,
            client_entity: msg.read_u16()?,
            level_name: msg.read_string()?,
        })
    }
}

/// Errors surfaced while encoding or decoding protocol chunks
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message truncated")]
    Truncated,
    #[error("unknown chunk opcode {0}")]
    UnknownOp(u8),
    #[error("entity number {0} out of range")]
    EntityOutOfRange(u16),
    #[error("media kind {kind} not valid in {slot} slot")]
    BadMediaKind { slot: &'static str, kind: u8 },
    #[error("bad solidity class {0}")]
    BadSolidity(u8),
    #[error("area bit vector of {0} bytes exceeds limit")]
    AreaBitsTooLong(usize),
    #[error("entity run not in ascending identity order")]
    UnsortedEntities,
    #[error("frame {tick} deltas from frame {base}, which this decoder no longer holds")]
    StaleDeltaBase { base: u32, tick: u32 },
    #[error("no frame recorded for tick {0}")]
    MissingFrame(u32),
    #[error("command duration {0}ms exceeds limit")]
    IllegalDuration(u8),
}
