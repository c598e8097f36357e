//! Per-client replication bookkeeping on the server.

use smallvec::SmallVec;

use crate::game::entity::PlayerState;
use crate::game::history::EntityHistory;
use crate::game::ClientId;
use crate::net::command::CommandConsumer;
use crate::net::protocol::MAX_AREA_BYTES;
use crate::util::ring::SeqRing;

/// Ticks of slack kept in the frame ring before the server stops trusting
/// an old ack as a delta base; leaves room for retransmits in flight.
const ACK_HEADROOM: u32 = 3;

/// One client's per-tick snapshot record.
///
/// Does not own entity states: `first_entity`/`num_entities` reference a
/// contiguous run in the shared [`EntityHistory`]. Created once by the
/// snapshot builder, read-only afterwards, destroyed implicitly when its
/// ring slot is overwritten.
#[derive(Debug, Clone)]
pub struct ClientFrame {
    pub tick: u32,
    pub player_state: PlayerState,
    pub area_bits: SmallVec<[u8; MAX_AREA_BYTES]>,
    pub first_entity: u64,
    pub num_entities: u16,
    /// Server time when the frame went out, for round-trip accounting
    pub sent_at_ms: u64,
}

/// Server-side state for one connected client
pub struct ClientSlot {
    pub id: ClientId,
    /// The client's own entity number; always replicated to them
    pub entity_num: u16,
    pub frames: SeqRing<ClientFrame>,
    /// Last frame tick the client acknowledged; `None` means no valid
    /// delta base (just connected, or it explicitly requested a refresh)
    pub last_acked: Option<u32>,
    pub commands: CommandConsumer,
    /// Frames withheld by rate limiting since the last one sent
    pub suppress_count: u8,
}

impl ClientSlot {
    pub fn new(id: ClientId, entity_num: u16, frame_ring_capacity: usize) -> Self {
        Self {
            id,
            entity_num,
            frames: SeqRing::new(frame_ring_capacity),
            last_acked: None,
            commands: CommandConsumer::new(),
            suppress_count: 0,
        }
    }

    /// The frame to delta against when encoding `current_tick`, or `None`
    /// to force a full baseline-relative encode.
    ///
    /// `None` when the client has never acked, when the ack has fallen too
    /// far behind the frame ring, when the acked slot has been overwritten,
    /// or when the acked frame's entity run has left the history's retained
    /// window. The last check is the critical invariant: the server must
    /// never reference a logical history index older than
    /// `cursor - capacity`.
    pub fn delta_base(&self, current_tick: u32, history: &EntityHistory) -> Option<&ClientFrame> {
        let acked = self.last_acked?;
        let capacity = self.frames.capacity() as u32;
        if current_tick.saturating_sub(acked) >= capacity.saturating_sub(ACK_HEADROOM) {
            return None;
        }
        let frame = self.frames.get(acked as u64)?;
        if !history.retains_range(frame.first_entity, frame.num_entities) {
            return None;
        }
        Some(frame)
    }

    /// Record an ack from a MOVE chunk; returns the round-trip time when
    /// the acked frame is still held.
    pub fn note_ack(&mut self, acked: u32, now_ms: u64) -> Option<u64> {
        self.last_acked = Some(acked);
        self.frames
            .get(acked as u64)
            .map(|frame| now_ms.saturating_sub(frame.sent_at_ms))
    }

    /// The client asked for an uncompressed frame (wire ack of -1)
    pub fn clear_ack(&mut self) {
        self.last_acked = None;
    }
}
