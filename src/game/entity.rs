//! Replicated entity state and the baseline table.

use crate::net::protocol::{MAX_ENTITIES, MAX_STATS};
use crate::util::vec3::Vec3;

/// Active-effect bit constants carried in [`EntityState::effects`]
pub mod effect_flags {
    pub const NONE: u16 = 0;
    pub const ROTATE: u16 = 1 << 0;
    pub const BOB: u16 = 1 << 1;
    pub const PULSE: u16 = 1 << 2;
    pub const CORPSE: u16 = 1 << 3;
    pub const BEAM: u16 = 1 << 4;
    pub const LIGHT: u16 = 1 << 5;
}

/// Typed handle to an externally-owned media asset.
///
/// The wire carries a kind byte ahead of the handle so the decoder can
/// reject a handle arriving in the wrong slot before anything dereferences
/// it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MediaRef {
    #[default]
    None,
    Model(u16),
    Sound(u16),
}

impl MediaRef {
    pub const KIND_NONE: u8 = 0;
    pub const KIND_MODEL: u8 = 1;
    pub const KIND_SOUND: u8 = 2;

    pub fn kind(&self) -> u8 {
        match self {
            MediaRef::None => Self::KIND_NONE,
            MediaRef::Model(_) => Self::KIND_MODEL,
            MediaRef::Sound(_) => Self::KIND_SOUND,
        }
    }

    pub fn handle(&self) -> u16 {
        match self {
            MediaRef::None => 0,
            MediaRef::Model(handle) | MediaRef::Sound(handle) => *handle,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, MediaRef::None)
    }

    pub fn from_wire(kind: u8, handle: u16) -> Option<MediaRef> {
        match kind {
            Self::KIND_NONE => Some(MediaRef::None),
            Self::KIND_MODEL => Some(MediaRef::Model(handle)),
            Self::KIND_SOUND => Some(MediaRef::Sound(handle)),
            _ => None,
        }
    }
}

/// Solidity class used by client-side prediction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Solidity {
    #[default]
    Not = 0,
    Trigger = 1,
    Box = 2,
    Bsp = 3,
}

impl Solidity {
    pub fn from_wire(value: u8) -> Option<Solidity> {
        match value {
            0 => Some(Solidity::Not),
            1 => Some(Solidity::Trigger),
            2 => Some(Solidity::Box),
            3 => Some(Solidity::Bsp),
            _ => None,
        }
    }
}

/// Immutable-per-tick snapshot of one replicated entity.
///
/// `number` is the stable identity: unique within a frame, constant across
/// the entity's lifetime. Number `0` is reserved for the wire sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntityState {
    pub number: u16,
    pub origin: Vec3,
    pub angles: Vec3,
    pub model: MediaRef,
    /// Active-effect bitmask, see [`effect_flags`]
    pub effects: u16,
    /// One-shot event code, `0` = none; zero-compressed on the wire,
    /// never delta compressed
    pub event: u8,
    pub sound: MediaRef,
    pub solid: Solidity,
}

impl EntityState {
    /// True when the entity has anything a client could see or hear;
    /// entities without a manifestation carry no information worth the
    /// bandwidth.
    pub fn has_manifestation(&self) -> bool {
        !self.model.is_none() || self.effects != 0 || !self.sound.is_none() || self.event != 0
    }
}

/// Per-tick player state replicated to the owning client
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerState {
    pub origin: Vec3,
    pub velocity: Vec3,
    pub view_angles: Vec3,
    pub flags: u16,
    pub stats: [i16; MAX_STATS],
}

/// "Last known good" fully-specified state per entity number: the delta
/// anchor when a client has no usable prior frame.
///
/// Entry 0 stays at the zero state forever (number 0 is reserved) and
/// doubles as the out-of-range fallback.
#[derive(Debug)]
pub struct BaselineTable {
    states: Box<[EntityState]>,
}

impl BaselineTable {
    pub fn new() -> Self {
        Self {
            states: vec![EntityState::default(); MAX_ENTITIES].into_boxed_slice(),
        }
    }

    pub fn set(&mut self, state: EntityState) {
        debug_assert!(state.number != 0, "entity number 0 is reserved");
        let index = state.number as usize;
        if index > 0 && index < self.states.len() {
            self.states[index] = state;
        }
    }

    pub fn get(&self, number: u16) -> &EntityState {
        self.states
            .get(number as usize)
            .unwrap_or(&self.states[0])
    }

    /// Every baseline that has actually been set
    pub fn iter_set(&self) -> impl Iterator<Item = &EntityState> {
        self.states.iter().filter(|state| state.number != 0)
    }
}

impl Default for BaselineTable {
    fn default() -> Self {
        Self::new()
    }
}
