//! Field-level delta codec: entities, player state, whole frames, and the
//! client-side decoder.
//!
//! The encoder walks the old and new frames' entity runs with two cursors,
//! both ordered by ascending identity, and emits per-field diffs, full
//! baseline-relative encodes for newly-relevant entities, and remove
//! markers for entities that left. Every entity present in the new frame is
//! mentioned on the wire — an unchanged entity still costs its
//! `number + bits(0)` marker — so the decoder never has to infer liveness
//! from absence.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{error, warn};

use crate::game::entity::{BaselineTable, EntityState, MediaRef, PlayerState, Solidity};
use crate::game::history::EntityHistory;
use crate::net::client::{ClientFrame, ClientSlot};
use crate::net::protocol::{
    entity_bits, player_bits, ProtocolError, ServerInfo, ServerOp, MAX_AREA_BYTES, MAX_ENTITIES,
    MAX_ENTITY_RECORD, MAX_STATS, NO_DELTA_FRAME,
};
use crate::net::wire::{MessageReader, MessageWriter};
use crate::util::ring::SeqRing;

/// Write `to` as a diff against `from`. With `force`, an all-zero diff
/// still emits the minimal `number + bits(0)` marker so the receiver can
/// extend the entity's lifetime. Returns whether anything was written.
pub fn write_delta_entity(
    from: &EntityState,
    to: &EntityState,
    msg: &mut MessageWriter,
    force: bool,
) -> bool {
    debug_assert!(to.number != 0, "entity number 0 is the wire sentinel");

    let mut bits: u16 = 0;
    if to.origin != from.origin {
        bits |= entity_bits::ORIGIN;
    }
    if to.angles != from.angles {
        bits |= entity_bits::ANGLES;
    }
    if to.model != from.model {
        bits |= entity_bits::MODEL;
    }
    if to.sound != from.sound {
        bits |= entity_bits::SOUND;
    }
    if to.event != 0 {
        // events are one-shot: zero compressed, never delta compressed
        bits |= entity_bits::EVENT;
    }
    if to.effects != from.effects {
        bits |= entity_bits::EFFECTS;
    }
    if to.solid != from.solid {
        bits |= entity_bits::SOLID;
    }

    if bits == 0 && !force {
        return false;
    }

    msg.write_u16(to.number);
    msg.write_u16(bits);

    if bits & entity_bits::ORIGIN != 0 {
        msg.write_position(to.origin);
    }
    if bits & entity_bits::ANGLES != 0 {
        msg.write_angles(to.angles);
    }
    if bits & entity_bits::MODEL != 0 {
        msg.write_u8(to.model.kind());
        msg.write_u16(to.model.handle());
    }
    if bits & entity_bits::SOUND != 0 {
        msg.write_u8(to.sound.kind());
        msg.write_u16(to.sound.handle());
    }
    if bits & entity_bits::EVENT != 0 {
        msg.write_u8(to.event);
    }
    if bits & entity_bits::EFFECTS != 0 {
        msg.write_u16(to.effects);
    }
    if bits & entity_bits::SOLID != 0 {
        msg.write_u8(to.solid as u8);
    }
    true
}

/// Apply a delta record on top of `from`. `number` and `bits` have already
/// been read by the caller's dispatch loop.
pub fn read_delta_entity(
    from: &EntityState,
    number: u16,
    bits: u16,
    msg: &mut MessageReader,
) -> Result<EntityState, ProtocolError> {
    if number == 0 || number as usize >= MAX_ENTITIES {
        return Err(ProtocolError::EntityOutOfRange(number));
    }

    let mut to = *from;
    to.number = number;
    to.event = 0; // one-shot: only present when transmitted

    if bits & entity_bits::ORIGIN != 0 {
        to.origin = msg.read_position().ok_or(ProtocolError::Truncated)?;
    }
    if bits & entity_bits::ANGLES != 0 {
        to.angles = msg.read_angles().ok_or(ProtocolError::Truncated)?;
    }
    if bits & entity_bits::MODEL != 0 {
        let kind = msg.read_u8().ok_or(ProtocolError::Truncated)?;
        let handle = msg.read_u16().ok_or(ProtocolError::Truncated)?;
        to.model = match MediaRef::from_wire(kind, handle) {
            Some(media @ (MediaRef::None | MediaRef::Model(_))) => media,
            _ => return Err(ProtocolError::BadMediaKind { slot: "model", kind }),
        };
    }
    if bits & entity_bits::SOUND != 0 {
        let kind = msg.read_u8().ok_or(ProtocolError::Truncated)?;
        let handle = msg.read_u16().ok_or(ProtocolError::Truncated)?;
        to.sound = match MediaRef::from_wire(kind, handle) {
            Some(media @ (MediaRef::None | MediaRef::Sound(_))) => media,
            _ => return Err(ProtocolError::BadMediaKind { slot: "sound", kind }),
        };
    }
    if bits & entity_bits::EVENT != 0 {
        to.event = msg.read_u8().ok_or(ProtocolError::Truncated)?;
    }
    if bits & entity_bits::EFFECTS != 0 {
        to.effects = msg.read_u16().ok_or(ProtocolError::Truncated)?;
    }
    if bits & entity_bits::SOLID != 0 {
        let solid = msg.read_u8().ok_or(ProtocolError::Truncated)?;
        to.solid = Solidity::from_wire(solid).ok_or(ProtocolError::BadSolidity(solid))?;
    }
    Ok(to)
}

/// Delta-encode the player state; a missing prior frame diffs against the
/// all-zero state.
pub fn write_delta_player_state(from: &PlayerState, to: &PlayerState, msg: &mut MessageWriter) {
    let mut bits: u8 = 0;
    if to.origin != from.origin {
        bits |= player_bits::ORIGIN;
    }
    if to.velocity != from.velocity {
        bits |= player_bits::VELOCITY;
    }
    if to.view_angles != from.view_angles {
        bits |= player_bits::VIEW_ANGLES;
    }
    if to.flags != from.flags {
        bits |= player_bits::FLAGS;
    }

    msg.write_u8(bits);
    if bits & player_bits::ORIGIN != 0 {
        msg.write_position(to.origin);
    }
    if bits & player_bits::VELOCITY != 0 {
        msg.write_position(to.velocity);
    }
    if bits & player_bits::VIEW_ANGLES != 0 {
        msg.write_angles(to.view_angles);
    }
    if bits & player_bits::FLAGS != 0 {
        msg.write_u16(to.flags);
    }

    let mut stat_bits: u32 = 0;
    for i in 0..MAX_STATS {
        if to.stats[i] != from.stats[i] {
            stat_bits |= 1 << i;
        }
    }
    msg.write_u32(stat_bits);
    for i in 0..MAX_STATS {
        if stat_bits & (1 << i) != 0 {
            msg.write_i16(to.stats[i]);
        }
    }
}

pub fn read_delta_player_state(
    from: &PlayerState,
    msg: &mut MessageReader,
) -> Result<PlayerState, ProtocolError> {
    let mut to = *from;
    let bits = msg.read_u8().ok_or(ProtocolError::Truncated)?;

    if bits & player_bits::ORIGIN != 0 {
        to.origin = msg.read_position().ok_or(ProtocolError::Truncated)?;
    }
    if bits & player_bits::VELOCITY != 0 {
        to.velocity = msg.read_position().ok_or(ProtocolError::Truncated)?;
    }
    if bits & player_bits::VIEW_ANGLES != 0 {
        to.view_angles = msg.read_angles().ok_or(ProtocolError::Truncated)?;
    }
    if bits & player_bits::FLAGS != 0 {
        to.flags = msg.read_u16().ok_or(ProtocolError::Truncated)?;
    }

    let stat_bits = msg.read_u32().ok_or(ProtocolError::Truncated)?;
    for i in 0..MAX_STATS {
        if stat_bits & (1 << i) != 0 {
            to.stats[i] = msg.read_i16().ok_or(ProtocolError::Truncated)?;
        }
    }
    Ok(to)
}

/// Two-cursor merge of two frames' entity runs, both ordered by ascending
/// identity (missing entries act as an infinite sentinel):
///
/// - equal identity: field diff (forced, so idle entities still get their
///   lifetime-extending marker)
/// - only in new: full encode against the entity's baseline
/// - only in old: explicit remove marker
///
/// `old` of `None` means no valid delta base: everything encodes in full.
/// Terminated by the `number 0, bits 0` sentinel.
pub fn emit_entities(
    old: Option<&ClientFrame>,
    new: &ClientFrame,
    history: &EntityHistory,
    baselines: &BaselineTable,
    msg: &mut MessageWriter,
) {
    let old_count = old.map_or(0, |frame| frame.num_entities as u32);
    let new_count = new.num_entities as u32;
    let mut old_index = 0u32;
    let mut new_index = 0u32;

    while old_index < old_count || new_index < new_count {
        // never start a record the message cannot finish
        if msg.remaining() < MAX_ENTITY_RECORD + 4 {
            warn!(
                written = new_index,
                total = new_count,
                "frame message full, truncating entity run"
            );
            break;
        }

        let new_state = if new_index < new_count {
            history.get(new.first_entity + new_index as u64)
        } else {
            None
        };
        if new_index < new_count && new_state.is_none() {
            // the frame being sent must always be inside the retained window
            error!(
                tick = new.tick,
                "current frame's entity run left the history window during encode"
            );
            break;
        }

        // a base entry that already fell out of the window ends the old
        // run early; its survivors simply re-encode from baseline
        let old_state = match old {
            Some(frame) if old_index < old_count => {
                history.get(frame.first_entity + old_index as u64)
            }
            _ => None,
        };

        let new_num = new_state.map_or(u32::MAX, |state| state.number as u32);
        let old_num = old_state.map_or(u32::MAX, |state| state.number as u32);

        if new_num == old_num {
            if let (Some(from), Some(to)) = (old_state, new_state) {
                write_delta_entity(from, to, msg, true);
            }
            old_index += 1;
            new_index += 1;
        } else if new_num < old_num {
            if let Some(to) = new_state {
                write_delta_entity(baselines.get(to.number), to, msg, true);
            }
            new_index += 1;
        } else {
            msg.write_u16(old_num as u16);
            msg.write_u16(entity_bits::REMOVE);
            old_index += 1;
        }
    }

    // end of entities
    msg.write_u16(0);
    msg.write_u16(0);
}

/// Encode one client's frame chunk for `tick`: header, area bits, player
/// state, entity run. Returns the delta base tick used, `None` meaning the
/// frame was baseline-relative.
pub fn write_frame(
    client: &mut ClientSlot,
    tick: u32,
    history: &EntityHistory,
    baselines: &BaselineTable,
    msg: &mut MessageWriter,
) -> Result<Option<u32>, ProtocolError> {
    let suppress_count = client.suppress_count;
    client.suppress_count = 0;

    let Some(frame) = client.frames.get(tick as u64) else {
        return Err(ProtocolError::MissingFrame(tick));
    };
    let base = client.delta_base(tick, history);
    let base_tick = base.map(|frame| frame.tick);

    msg.write_u8(ServerOp::Frame as u8);
    msg.write_u32(tick);
    msg.write_i32(base_tick.map_or(NO_DELTA_FRAME, |t| t as i32));
    msg.write_u8(suppress_count);

    msg.write_u8(frame.area_bits.len() as u8);
    msg.write_data(&frame.area_bits);

    let zero = PlayerState::default();
    let base_player = base.map_or(&zero, |frame| &frame.player_state);
    write_delta_player_state(base_player, &frame.player_state, msg);

    emit_entities(base, frame, history, baselines, msg);
    Ok(base_tick)
}

/// One frame as reconstructed by the client decoder
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub tick: u32,
    /// Tick this frame was delta'd from; `None` for a baseline-relative frame
    pub delta_tick: Option<u32>,
    /// Frames the server withheld for rate reasons since the previous one
    pub suppress_count: u8,
    pub area_bits: SmallVec<[u8; MAX_AREA_BYTES]>,
    pub player_state: PlayerState,
    /// Ascending identity order, same as the wire
    pub entities: Vec<EntityState>,
}

impl DecodedFrame {
    fn entity(&self, number: u16) -> Option<&EntityState> {
        self.entities
            .binary_search_by_key(&number, |state| state.number)
            .ok()
            .map(|index| &self.entities[index])
    }
}

/// Client-side mirror of the replication state: decoded frames for delta
/// bases, baselines from the connect/demo handshake, and a latest-frame
/// entity cache for the renderer.
pub struct ClientWorld {
    frames: SeqRing<DecodedFrame>,
    baselines: BaselineTable,
    /// Entity cache of the most recent frame, keyed by entity number
    current: FxHashMap<u16, EntityState>,
    latest_tick: Option<u32>,
    server_info: Option<ServerInfo>,
    config_strings: FxHashMap<u16, String>,
}

impl ClientWorld {
    pub fn new(frame_ring_capacity: usize) -> Self {
        Self {
            frames: SeqRing::new(frame_ring_capacity),
            baselines: BaselineTable::new(),
            current: FxHashMap::default(),
            latest_tick: None,
            server_info: None,
            config_strings: FxHashMap::default(),
        }
    }

    pub fn baselines(&self) -> &BaselineTable {
        &self.baselines
    }

    pub fn set_baseline(&mut self, state: EntityState) {
        self.baselines.set(state);
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn config_string(&self, index: u16) -> Option<&str> {
        self.config_strings.get(&index).map(|s| s.as_str())
    }

    /// The tick to acknowledge in the next MOVE; `None` requests an
    /// uncompressed frame (nothing decoded yet, or the last delta base was
    /// rejected)
    pub fn ack_tick(&self) -> Option<u32> {
        self.latest_tick
    }

    pub fn latest(&self) -> Option<&DecodedFrame> {
        self.latest_tick
            .and_then(|tick| self.frames.get(tick as u64))
    }

    /// Latest-frame state of one entity
    pub fn entity(&self, number: u16) -> Option<&EntityState> {
        self.current.get(&number)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityState> {
        self.current.values()
    }

    /// Dispatch every chunk in a server message (live packet body or demo
    /// chunk) through the decoder.
    pub fn parse_message(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut msg = MessageReader::new(data);
        while let Some(op) = msg.read_u8() {
            match ServerOp::from_u8(op).ok_or(ProtocolError::UnknownOp(op))? {
                ServerOp::ServerData => {
                    self.server_info =
                        Some(ServerInfo::read(&mut msg).ok_or(ProtocolError::Truncated)?);
                }
                ServerOp::ConfigString => {
                    let index = msg.read_u16().ok_or(ProtocolError::Truncated)?;
                    let value = msg.read_string().ok_or(ProtocolError::Truncated)?;
                    self.config_strings.insert(index, value);
                }
                ServerOp::Baseline => {
                    let number = msg.read_u16().ok_or(ProtocolError::Truncated)?;
                    let bits = msg.read_u16().ok_or(ProtocolError::Truncated)?;
                    let zero = EntityState::default();
                    let state = read_delta_entity(&zero, number, bits, &mut msg)?;
                    self.baselines.set(state);
                }
                ServerOp::Frame => {
                    self.parse_frame(&mut msg)?;
                }
            }
        }
        Ok(())
    }

    /// Decode one frame chunk (opcode already consumed).
    ///
    /// A frame whose delta base is no longer held is rejected with
    /// [`ProtocolError::StaleDeltaBase`] and the ack claim is dropped, so
    /// the next MOVE requests an uncompressed frame — the decoder is forced
    /// to baseline mode rather than silently corrupting state.
    pub fn parse_frame(&mut self, msg: &mut MessageReader) -> Result<(), ProtocolError> {
        let tick = msg.read_u32().ok_or(ProtocolError::Truncated)?;
        let delta = msg.read_i32().ok_or(ProtocolError::Truncated)?;
        let suppress_count = msg.read_u8().ok_or(ProtocolError::Truncated)?;

        let area_len = msg.read_u8().ok_or(ProtocolError::Truncated)? as usize;
        if area_len > MAX_AREA_BYTES {
            return Err(ProtocolError::AreaBitsTooLong(area_len));
        }
        let area_bytes = msg.read(area_len).ok_or(ProtocolError::Truncated)?;
        let area_bits = SmallVec::from_slice(area_bytes);

        let delta_tick = if delta < 0 { None } else { Some(delta as u32) };
        if let Some(base) = delta_tick {
            if !self.frames.contains(base as u64) {
                self.latest_tick = None;
                return Err(ProtocolError::StaleDeltaBase { base, tick });
            }
        }

        let frame = {
            let base = delta_tick.and_then(|t| self.frames.get(t as u64));
            let base_player = base.map_or(PlayerState::default(), |f| f.player_state);
            let player_state = read_delta_player_state(&base_player, msg)?;

            let mut entities = Vec::new();
            let mut previous: u32 = 0;
            loop {
                let number = msg.read_u16().ok_or(ProtocolError::Truncated)?;
                let bits = msg.read_u16().ok_or(ProtocolError::Truncated)?;
                if number == 0 && bits == 0 {
                    break;
                }
                if bits & entity_bits::REMOVE != 0 {
                    // left the frame; simply not part of the new entity run
                    continue;
                }
                if (number as u32) <= previous {
                    return Err(ProtocolError::UnsortedEntities);
                }
                previous = number as u32;

                // an entity carried over from the base frame diffs against
                // its state there; a newly-relevant one against its baseline
                let from = base
                    .and_then(|frame| frame.entity(number))
                    .unwrap_or_else(|| self.baselines.get(number));
                entities.push(read_delta_entity(from, number, bits, msg)?);
            }

            DecodedFrame {
                tick,
                delta_tick,
                suppress_count,
                area_bits,
                player_state,
                entities,
            }
        };

        // refresh the renderer-facing cache, evicting everything that is
        // not part of the new frame
        self.current.clear();
        for state in &frame.entities {
            self.current.insert(state.number, *state);
        }

        self.frames.insert(tick as u64, frame);
        self.latest_tick = Some(tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::effect_flags;
    use crate::net::command::CommandConsumer;
    use crate::util::vec3::Vec3;
    use uuid::Uuid;

    fn entity(number: u16, x: f32) -> EntityState {
        EntityState {
            number,
            origin: Vec3::new(x, 0.0, 0.0),
            model: MediaRef::Model(1),
            ..EntityState::default()
        }
    }

    /// Push `states` as one frame's run and register it on the client
    fn record_frame(
        client: &mut ClientSlot,
        history: &mut EntityHistory,
        tick: u32,
        states: &[EntityState],
    ) {
        let first_entity = history.next_index();
        for state in states {
            history.push(*state);
        }
        client.frames.insert(
            tick as u64,
            ClientFrame {
                tick,
                player_state: PlayerState::default(),
                area_bits: SmallVec::new(),
                first_entity,
                num_entities: states.len() as u16,
                sent_at_ms: 0,
            },
        );
    }

    fn new_client() -> ClientSlot {
        ClientSlot {
            id: Uuid::new_v4(),
            entity_num: 1,
            frames: SeqRing::new(16),
            last_acked: None,
            commands: CommandConsumer::new(),
            suppress_count: 0,
        }
    }

    #[test]
    fn test_entity_delta_roundtrip() {
        let from = entity(5, 10.0);
        let mut to = from;
        to.origin = Vec3::new(12.0, 0.0, 0.0);
        to.effects = effect_flags::ROTATE;
        to.solid = Solidity::Box;

        let mut msg = MessageWriter::new(256);
        assert!(write_delta_entity(&from, &to, &mut msg, false));

        let mut reader = MessageReader::new(msg.as_bytes());
        let number = reader.read_u16().unwrap();
        let bits = reader.read_u16().unwrap();
        assert_eq!(number, 5);
        assert_eq!(bits & entity_bits::ORIGIN, entity_bits::ORIGIN);
        assert_eq!(bits & entity_bits::MODEL, 0);

        let decoded = read_delta_entity(&from, number, bits, &mut reader).unwrap();
        assert_eq!(decoded, to);
    }

    #[test]
    fn test_unchanged_entity_needs_force() {
        let state = entity(5, 10.0);
        let mut msg = MessageWriter::new(256);
        assert!(!write_delta_entity(&state, &state, &mut msg, false));
        assert!(msg.is_empty());

        assert!(write_delta_entity(&state, &state, &mut msg, true));
        assert_eq!(msg.len(), 4); // number + zero bits, nothing else
    }

    #[test]
    fn test_event_is_zero_compressed_not_delta_compressed() {
        let mut from = entity(5, 10.0);
        from.event = 3;
        let mut to = from;
        to.event = 3; // same value must still be retransmitted

        let mut msg = MessageWriter::new(256);
        assert!(write_delta_entity(&from, &to, &mut msg, false));
        let mut reader = MessageReader::new(msg.as_bytes());
        let number = reader.read_u16().unwrap();
        let bits = reader.read_u16().unwrap();
        assert_ne!(bits & entity_bits::EVENT, 0);
        let decoded = read_delta_entity(&from, number, bits, &mut reader).unwrap();
        assert_eq!(decoded.event, 3);

        // and an absent event resets to zero on the receiver
        to.event = 0;
        let mut msg = MessageWriter::new(256);
        write_delta_entity(&from, &to, &mut msg, true);
        let mut reader = MessageReader::new(msg.as_bytes());
        let number = reader.read_u16().unwrap();
        let bits = reader.read_u16().unwrap();
        let decoded = read_delta_entity(&from, number, bits, &mut reader).unwrap();
        assert_eq!(decoded.event, 0);
    }

    #[test]
    fn test_media_kind_checked_per_slot() {
        let from = EntityState::default();
        let mut msg = MessageWriter::new(64);
        msg.write_u8(MediaRef::KIND_SOUND);
        msg.write_u16(9);

        let mut reader = MessageReader::new(msg.as_bytes());
        let result = read_delta_entity(&from, 5, entity_bits::MODEL, &mut reader);
        assert_eq!(
            result,
            Err(ProtocolError::BadMediaKind {
                slot: "model",
                kind: MediaRef::KIND_SOUND
            })
        );
    }

    #[test]
    fn test_entity_number_zero_rejected() {
        let from = EntityState::default();
        let data = [0u8; 8];
        let mut reader = MessageReader::new(&data);
        assert_eq!(
            read_delta_entity(&from, 0, 0, &mut reader),
            Err(ProtocolError::EntityOutOfRange(0))
        );
    }

    #[test]
    fn test_player_state_delta_roundtrip() {
        let from = PlayerState::default();
        let mut to = from;
        to.origin = Vec3::new(100.0, 8.0, 24.0);
        to.flags = 5;
        to.stats[0] = 100;
        to.stats[9] = -3;

        let mut msg = MessageWriter::new(256);
        write_delta_player_state(&from, &to, &mut msg);
        let mut reader = MessageReader::new(msg.as_bytes());
        let decoded = read_delta_player_state(&from, &mut reader).unwrap();
        assert_eq!(decoded, to);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn test_frame_roundtrip_against_prior_frame() {
        let mut history = EntityHistory::new(256);
        let baselines = BaselineTable::new();
        let mut client = new_client();

        let old_states = [entity(1, 0.0), entity(4, 10.0), entity(7, 20.0)];
        record_frame(&mut client, &mut history, 100, &old_states);

        // tick 101: entity 4 moved, 7 unchanged, 9 appears
        let mut moved = entity(4, 11.0);
        moved.effects = effect_flags::BOB;
        let new_states = [entity(1, 0.0), moved, entity(7, 20.0), entity(9, 30.0)];
        record_frame(&mut client, &mut history, 101, &new_states);
        client.note_ack(100, 0);

        let mut msg = MessageWriter::new(1400);
        let base = write_frame(&mut client, 101, &history, &baselines, &mut msg).unwrap();
        assert_eq!(base, Some(100));

        // decoder seeded with frame 100
        let mut world = ClientWorld::new(16);
        let mut seed = MessageWriter::new(1400);
        client.last_acked = None;
        let seed_base = write_frame(&mut client, 100, &history, &baselines, &mut seed).unwrap();
        assert_eq!(seed_base, None);
        world.parse_message(seed.as_bytes()).unwrap();
        assert_eq!(world.ack_tick(), Some(100));

        world.parse_message(msg.as_bytes()).unwrap();
        let frame = world.latest().unwrap();
        assert_eq!(frame.tick, 101);
        assert_eq!(frame.delta_tick, Some(100));
        let numbers: Vec<u16> = frame.entities.iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec![1, 4, 7, 9]);
        assert_eq!(world.entity(4).unwrap().origin, Vec3::new(11.0, 0.0, 0.0));
        assert_eq!(world.entity(4).unwrap().effects, effect_flags::BOB);
        assert_eq!(world.entity(7).unwrap().origin, Vec3::new(20.0, 0.0, 0.0));
    }

    #[test]
    fn test_baseline_encode_into_fresh_cache_matches_delta_path() {
        let mut history = EntityHistory::new(256);
        let mut baselines = BaselineTable::new();
        baselines.set(entity(4, -5.0));

        let mut client = new_client();
        let states = [entity(1, 0.0), entity(4, 10.0)];
        record_frame(&mut client, &mut history, 100, &states);

        // no ack: forced full encode against baselines
        let mut msg = MessageWriter::new(1400);
        let base = write_frame(&mut client, 100, &history, &baselines, &mut msg).unwrap();
        assert_eq!(base, None);

        let mut world = ClientWorld::new(16);
        world.set_baseline(entity(4, -5.0));
        world.parse_message(msg.as_bytes()).unwrap();

        let frame = world.latest().unwrap();
        assert_eq!(frame.entities.len(), 2);
        assert_eq!(world.entity(4).unwrap().origin, Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_remove_marker_and_reentry_from_baseline() {
        // entity 7 visible at tick 100 at (0,0,0), gone at
        // 101, back at 105 at (10,0,0) encoded from baseline, not from the
        // stale tick-100 state
        let mut history = EntityHistory::new(256);
        let baselines = BaselineTable::new();
        let mut client = new_client();
        let mut world = ClientWorld::new(16);

        record_frame(&mut client, &mut history, 100, &[entity(1, 0.0), entity(7, 0.0)]);
        let mut msg = MessageWriter::new(1400);
        write_frame(&mut client, 100, &history, &baselines, &mut msg).unwrap();
        world.parse_message(msg.as_bytes()).unwrap();
        assert!(world.entity(7).is_some());

        client.note_ack(100, 0);
        record_frame(&mut client, &mut history, 101, &[entity(1, 0.0)]);
        let mut msg = MessageWriter::new(1400);
        assert_eq!(
            write_frame(&mut client, 101, &history, &baselines, &mut msg).unwrap(),
            Some(100)
        );
        world.parse_message(msg.as_bytes()).unwrap();
        assert!(world.entity(7).is_none(), "remove marker must evict #7");

        client.note_ack(101, 0);
        record_frame(&mut client, &mut history, 105, &[entity(1, 0.0), entity(7, 10.0)]);
        let mut msg = MessageWriter::new(1400);
        assert_eq!(
            write_frame(&mut client, 105, &history, &baselines, &mut msg).unwrap(),
            Some(101)
        );
        world.parse_message(msg.as_bytes()).unwrap();
        assert_eq!(
            world.entity(7).unwrap().origin,
            Vec3::new(10.0, 0.0, 0.0),
            "re-entry must be reconstructed from baseline, not tick 100"
        );
    }

    #[test]
    fn test_stale_delta_base_rejected_and_forces_baseline() {
        let mut history = EntityHistory::new(256);
        let baselines = BaselineTable::new();
        let mut client = new_client();
        let mut world = ClientWorld::new(4);

        record_frame(&mut client, &mut history, 100, &[entity(1, 0.0)]);
        let mut msg = MessageWriter::new(1400);
        write_frame(&mut client, 100, &history, &baselines, &mut msg).unwrap();
        world.parse_message(msg.as_bytes()).unwrap();

        // hand-craft a frame claiming to delta from a tick the decoder
        // never saw
        let mut forged = MessageWriter::new(256);
        forged.write_u8(ServerOp::Frame as u8);
        forged.write_u32(130);
        forged.write_i32(90);
        forged.write_u8(0);
        forged.write_u8(0); // no area bits
        let result = world.parse_message(forged.as_bytes());
        assert_eq!(
            result,
            Err(ProtocolError::StaleDeltaBase { base: 90, tick: 130 })
        );
        // decoder self-heals: its next ack requests an uncompressed frame
        assert_eq!(world.ack_tick(), None);
    }

    #[test]
    fn test_truncation_still_terminates_cleanly() {
        let mut history = EntityHistory::new(512);
        let baselines = BaselineTable::new();
        let mut client = new_client();

        let states: Vec<EntityState> =
            (1..=200).map(|n| entity(n as u16, n as f32)).collect();
        record_frame(&mut client, &mut history, 100, &states);

        // far too small for 200 full encodes
        let mut msg = MessageWriter::new(512);
        write_frame(&mut client, 100, &history, &baselines, &mut msg).unwrap();
        assert!(!msg.overflowed(), "truncation must not overflow the writer");

        let mut world = ClientWorld::new(16);
        world.parse_message(msg.as_bytes()).unwrap();
        let decoded = world.latest().unwrap().entities.len();
        assert!(decoded > 0 && decoded < 200);
    }

    #[test]
    fn test_write_frame_requires_built_frame() {
        let history = EntityHistory::new(64);
        let baselines = BaselineTable::new();
        let mut client = new_client();
        let mut msg = MessageWriter::new(1400);
        assert_eq!(
            write_frame(&mut client, 55, &history, &baselines, &mut msg),
            Err(ProtocolError::MissingFrame(55))
        );
    }

    #[test]
    fn test_unsorted_entity_run_rejected() {
        let mut world = ClientWorld::new(4);
        let mut forged = MessageWriter::new(256);
        forged.write_u8(ServerOp::Frame as u8);
        forged.write_u32(10);
        forged.write_i32(NO_DELTA_FRAME);
        forged.write_u8(0);
        forged.write_u8(0);
        forged.write_u8(0); // player bits
        forged.write_u32(0); // stat bits
        forged.write_u16(5); // entity 5, no fields
        forged.write_u16(0);
        forged.write_u16(3); // entity 3 out of order
        forged.write_u16(0);
        forged.write_u16(0); // sentinel
        forged.write_u16(0);

        assert_eq!(
            world.parse_message(forged.as_bytes()),
            Err(ProtocolError::UnsortedEntities)
        );
    }
}
