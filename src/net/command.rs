//! The client input command channel.
//!
//! The client batches one input sample per local tick and every outgoing
//! packet carries the three most recent samples, oldest first, each diffed
//! against the one before it. A sample therefore rides in up to three
//! consecutive packets: the server recovers from one or two consecutive
//! drops without losing a tick of input, and deduplicates by the packet
//! sequence number so nothing is ever applied twice.

use smallvec::SmallVec;
use tracing::debug;

use crate::net::protocol::{
    cmd_bits, ClientOp, ProtocolError, MAX_COMMAND_MSEC, NO_DELTA_FRAME,
};
use crate::net::wire::{MessageReader, MessageWriter};
use crate::util::ring::SeqRing;

/// Samples carried per MOVE chunk
const REDUNDANCY: usize = 3;

/// One tick's worth of player input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandSample {
    /// View angles as 16-bit binary degrees
    pub angles: [u16; 3],
    pub forward: i16,
    pub right: i16,
    pub up: i16,
    pub buttons: u8,
    /// Duration of the tick this sample covers, in milliseconds
    pub msec: u8,
    /// Client-side sample timestamp; bookkeeping only, never transmitted
    pub timestamp_ms: u64,
}

/// Diff `to` against `from`. `msec` is always written: it is one byte and
/// changes nearly every sample.
pub fn write_delta_command(from: &CommandSample, to: &CommandSample, msg: &mut MessageWriter) {
    let mut bits: u8 = 0;
    if to.angles[0] != from.angles[0] {
        bits |= cmd_bits::ANGLE1;
    }
    if to.angles[1] != from.angles[1] {
        bits |= cmd_bits::ANGLE2;
    }
    if to.angles[2] != from.angles[2] {
        bits |= cmd_bits::ANGLE3;
    }
    if to.forward != from.forward {
        bits |= cmd_bits::FORWARD;
    }
    if to.right != from.right {
        bits |= cmd_bits::RIGHT;
    }
    if to.up != from.up {
        bits |= cmd_bits::UP;
    }
    if to.buttons != from.buttons {
        bits |= cmd_bits::BUTTONS;
    }

    msg.write_u8(bits);
    if bits & cmd_bits::ANGLE1 != 0 {
        msg.write_u16(to.angles[0]);
    }
    if bits & cmd_bits::ANGLE2 != 0 {
        msg.write_u16(to.angles[1]);
    }
    if bits & cmd_bits::ANGLE3 != 0 {
        msg.write_u16(to.angles[2]);
    }
    if bits & cmd_bits::FORWARD != 0 {
        msg.write_i16(to.forward);
    }
    if bits & cmd_bits::RIGHT != 0 {
        msg.write_i16(to.right);
    }
    if bits & cmd_bits::UP != 0 {
        msg.write_i16(to.up);
    }
    if bits & cmd_bits::BUTTONS != 0 {
        msg.write_u8(to.buttons);
    }
    msg.write_u8(to.msec);
}

pub fn read_delta_command(
    from: &CommandSample,
    msg: &mut MessageReader,
) -> Result<CommandSample, ProtocolError> {
    let mut to = *from;
    to.timestamp_ms = 0;
    let bits = msg.read_u8().ok_or(ProtocolError::Truncated)?;

    if bits & cmd_bits::ANGLE1 != 0 {
        to.angles[0] = msg.read_u16().ok_or(ProtocolError::Truncated)?;
    }
    if bits & cmd_bits::ANGLE2 != 0 {
        to.angles[1] = msg.read_u16().ok_or(ProtocolError::Truncated)?;
    }
    if bits & cmd_bits::ANGLE3 != 0 {
        to.angles[2] = msg.read_u16().ok_or(ProtocolError::Truncated)?;
    }
    if bits & cmd_bits::FORWARD != 0 {
        to.forward = msg.read_i16().ok_or(ProtocolError::Truncated)?;
    }
    if bits & cmd_bits::RIGHT != 0 {
        to.right = msg.read_i16().ok_or(ProtocolError::Truncated)?;
    }
    if bits & cmd_bits::UP != 0 {
        to.up = msg.read_i16().ok_or(ProtocolError::Truncated)?;
    }
    if bits & cmd_bits::BUTTONS != 0 {
        to.buttons = msg.read_u8().ok_or(ProtocolError::Truncated)?;
    }
    to.msec = msg.read_u8().ok_or(ProtocolError::Truncated)?;
    Ok(to)
}

/// Client side: the outgoing command ring and its redundant flush.
pub struct CommandChannel {
    ring: SeqRing<CommandSample>,
    outgoing_sequence: u32,
}

impl CommandChannel {
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= REDUNDANCY,
            "command ring must hold the redundant window"
        );
        Self {
            ring: SeqRing::new(capacity),
            outgoing_sequence: 0,
        }
    }

    /// Sequence number of the most recently recorded sample; goes into the
    /// packet header of the flush that carries it
    pub fn sequence(&self) -> u32 {
        self.outgoing_sequence
    }

    /// Finalize the current tick's sample under the next packet sequence
    pub fn record(&mut self, sample: CommandSample) -> u32 {
        self.outgoing_sequence += 1;
        self.ring.insert(self.outgoing_sequence as u64, sample);
        self.outgoing_sequence
    }

    fn sample_at(&self, sequence: u32) -> CommandSample {
        self.ring
            .get(sequence as u64)
            .copied()
            .unwrap_or_default()
    }

    /// Write the MOVE chunk: the acknowledged frame (or the explicit
    /// no-compression sentinel when the client holds no valid frame), then
    /// the three most recent samples, oldest first, the oldest diffed
    /// against the all-zero sample.
    ///
    /// `delta_base` is an explicit parameter: "I have no valid delta base"
    /// is the caller's predicate, independent of any recording concerns.
    pub fn flush(&self, delta_base: Option<u32>, msg: &mut MessageWriter) {
        msg.write_u8(ClientOp::Move as u8);
        msg.write_i32(delta_base.map_or(NO_DELTA_FRAME, |tick| tick as i32));

        let zero = CommandSample::default();
        let oldest = self.sample_at(self.outgoing_sequence.wrapping_sub(2));
        let middle = self.sample_at(self.outgoing_sequence.wrapping_sub(1));
        let newest = self.sample_at(self.outgoing_sequence);

        write_delta_command(&zero, &oldest, msg);
        write_delta_command(&oldest, &middle, msg);
        write_delta_command(&middle, &newest, msg);
    }
}

/// Everything recovered from one MOVE chunk
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConsumedMove {
    /// Samples to apply this tick, oldest first, each exactly once
    pub samples: SmallVec<[CommandSample; REDUNDANCY]>,
    /// Frame tick the client acknowledged; `None` requests a full encode
    pub acked_frame: Option<u32>,
    /// The chunk arrived out of order or duplicated and was dropped whole
    pub stale: bool,
}

/// Server side: per-client dedup over the redundant command stream
#[derive(Debug, Default)]
pub struct CommandConsumer {
    last_sequence: u32,
}

impl CommandConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sequence(&self) -> u32 {
        self.last_sequence
    }

    /// Consume a MOVE chunk (opcode already dispatched); `packet_sequence`
    /// comes from the datagram header.
    ///
    /// Stale or duplicate packets are dropped silently — redundancy makes
    /// them routine, not an error. The drop count since the last applied
    /// packet decides how many of the three samples are genuinely new:
    /// two or more drops recover the oldest, one recovers the middle, and
    /// the newest always applies.
    pub fn consume(
        &mut self,
        packet_sequence: u32,
        msg: &mut MessageReader,
    ) -> Result<ConsumedMove, ProtocolError> {
        let last_frame = msg.read_i32().ok_or(ProtocolError::Truncated)?;

        let zero = CommandSample::default();
        let oldest = read_delta_command(&zero, msg)?;
        let middle = read_delta_command(&oldest, msg)?;
        let newest = read_delta_command(&middle, msg)?;

        for sample in [&oldest, &middle, &newest] {
            if sample.msec > MAX_COMMAND_MSEC {
                return Err(ProtocolError::IllegalDuration(sample.msec));
            }
        }

        if packet_sequence <= self.last_sequence {
            debug!(
                packet_sequence,
                last = self.last_sequence,
                "dropping stale command packet"
            );
            return Ok(ConsumedMove {
                stale: true,
                ..ConsumedMove::default()
            });
        }

        let dropped = packet_sequence - self.last_sequence - 1;
        self.last_sequence = packet_sequence;

        let mut samples: SmallVec<[CommandSample; REDUNDANCY]> = SmallVec::new();
        if dropped >= 2 {
            samples.push(oldest);
        }
        if dropped >= 1 {
            samples.push(middle);
        }
        samples.push(newest);

        let acked_frame = if last_frame < 0 {
            None
        } else {
            Some(last_frame as u32)
        };

        Ok(ConsumedMove {
            samples,
            acked_frame,
            stale: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tick: i16) -> CommandSample {
        CommandSample {
            forward: tick,
            buttons: 1,
            msec: 25,
            timestamp_ms: tick as u64 * 25,
            ..CommandSample::default()
        }
    }

    fn flush_packet(channel: &CommandChannel, ack: Option<u32>) -> Vec<u8> {
        let mut msg = MessageWriter::new(256);
        channel.flush(ack, &mut msg);
        msg.into_bytes()
    }

    fn consume_packet(
        consumer: &mut CommandConsumer,
        sequence: u32,
        packet: &[u8],
    ) -> ConsumedMove {
        let mut reader = MessageReader::new(packet);
        assert_eq!(reader.read_u8(), Some(ClientOp::Move as u8));
        consumer.consume(sequence, &mut reader).unwrap()
    }

    #[test]
    fn test_delta_command_roundtrip() {
        let from = CommandSample::default();
        let to = CommandSample {
            angles: [100, 200, 0],
            forward: 127,
            right: -127,
            up: 0,
            buttons: 3,
            msec: 16,
            timestamp_ms: 0,
        };
        let mut msg = MessageWriter::new(64);
        write_delta_command(&from, &to, &mut msg);

        let mut reader = MessageReader::new(msg.as_bytes());
        assert_eq!(read_delta_command(&from, &mut reader).unwrap(), to);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn test_flush_carries_three_samples() {
        let mut channel = CommandChannel::new(64);
        channel.record(sample(1));
        channel.record(sample(2));
        channel.record(sample(3));

        let packet = flush_packet(&channel, Some(99));
        let mut consumer = CommandConsumer::new();
        let consumed = consume_packet(&mut consumer, channel.sequence(), &packet);

        assert_eq!(consumed.acked_frame, Some(99));
        // no drops: only the newest sample is fresh
        assert_eq!(consumed.samples.len(), 1);
        assert_eq!(consumed.samples[0].forward, 3);
    }

    #[test]
    fn test_no_compression_sentinel() {
        let mut channel = CommandChannel::new(64);
        channel.record(sample(1));
        let packet = flush_packet(&channel, None);

        let mut consumer = CommandConsumer::new();
        let consumed = consume_packet(&mut consumer, 1, &packet);
        assert_eq!(consumed.acked_frame, None);
    }

    #[test]
    fn test_single_drop_recovers_middle_sample() {
        let mut channel = CommandChannel::new(64);
        let mut consumer = CommandConsumer::new();

        channel.record(sample(1));
        let packet1 = flush_packet(&channel, None);
        channel.record(sample(2));
        let _lost = flush_packet(&channel, None);
        channel.record(sample(3));
        let packet3 = flush_packet(&channel, None);

        let consumed = consume_packet(&mut consumer, 1, &packet1);
        assert_eq!(consumed.samples.len(), 1);
        assert_eq!(consumed.samples[0].forward, 1);

        // packet 2 never arrives; packet 3 recovers tick 2 and applies 3
        let consumed = consume_packet(&mut consumer, 3, &packet3);
        let forwards: Vec<i16> = consumed.samples.iter().map(|s| s.forward).collect();
        assert_eq!(forwards, vec![2, 3]);
    }

    #[test]
    fn test_double_drop_recovers_both_samples() {
        let mut channel = CommandChannel::new(64);
        let mut consumer = CommandConsumer::new();

        channel.record(sample(1));
        let packet1 = flush_packet(&channel, None);
        channel.record(sample(2));
        channel.record(sample(3));
        channel.record(sample(4));
        let packet4 = flush_packet(&channel, None);

        consume_packet(&mut consumer, 1, &packet1);
        let consumed = consume_packet(&mut consumer, 4, &packet4);
        let forwards: Vec<i16> = consumed.samples.iter().map(|s| s.forward).collect();
        assert_eq!(forwards, vec![2, 3, 4]);
    }

    #[test]
    fn test_stale_packet_dropped_silently() {
        let mut channel = CommandChannel::new(64);
        let mut consumer = CommandConsumer::new();

        channel.record(sample(1));
        let packet1 = flush_packet(&channel, None);
        channel.record(sample(2));
        let packet2 = flush_packet(&channel, None);

        consume_packet(&mut consumer, 2, &packet2);
        // the late packet 1 is a duplicate of already-covered input
        let consumed = consume_packet(&mut consumer, 1, &packet1);
        assert!(consumed.stale);
        assert!(consumed.samples.is_empty());
        assert_eq!(consumer.last_sequence(), 2);
    }

    #[test]
    fn test_illegal_msec_rejected() {
        let mut msg = MessageWriter::new(64);
        msg.write_i32(NO_DELTA_FRAME);
        let zero = CommandSample::default();
        let bad = CommandSample {
            msec: 255,
            ..CommandSample::default()
        };
        write_delta_command(&zero, &bad, &mut msg);
        write_delta_command(&bad, &bad, &mut msg);
        write_delta_command(&bad, &bad, &mut msg);

        let mut consumer = CommandConsumer::new();
        let mut reader = MessageReader::new(msg.as_bytes());
        assert_eq!(
            consumer.consume(1, &mut reader),
            Err(ProtocolError::IllegalDuration(255))
        );
    }

    #[test]
    fn test_exactly_once_under_one_in_three_loss() {
        // periodic 1-in-3 loss: ticks 50..=54 must all be applied
        // exactly once
        let mut channel = CommandChannel::new(64);
        let mut consumer = CommandConsumer::new();
        let mut applied: Vec<i16> = Vec::new();

        for tick in 40..=60i16 {
            channel.record(sample(tick));
            let packet = flush_packet(&channel, None);
            if tick % 3 == 1 {
                continue; // dropped on the wire
            }
            let mut reader = MessageReader::new(&packet);
            reader.read_u8();
            let consumed = consumer.consume(channel.sequence(), &mut reader).unwrap();
            applied.extend(consumed.samples.iter().map(|s| s.forward));
        }

        for tick in 50..=54i16 {
            assert_eq!(
                applied.iter().filter(|&&f| f == tick).count(),
                1,
                "tick {tick} must be applied exactly once"
            );
        }
        // and in order
        let mut sorted = applied.clone();
        sorted.sort_unstable();
        assert_eq!(applied, sorted);
    }

    #[test]
    fn test_consume_error_on_truncated_chunk() {
        let mut consumer = CommandConsumer::new();
        let data = [0u8; 3];
        let mut reader = MessageReader::new(&data);
        assert_eq!(
            consumer.consume(1, &mut reader),
            Err(ProtocolError::Truncated)
        );
    }
}
