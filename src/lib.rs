//! Snapshot/delta state synchronization for an authoritative game server
//! and its predicting clients.
//!
//! Each simulation tick the server decides which entities every client may
//! know about ([`net::snapshot`]), appends their states to one shared
//! history ring ([`game::history`]), and compresses the result against the
//! client's last acknowledged frame ([`net::delta`]). Client input travels
//! the other way with threefold redundancy ([`net::command`]) so an isolated
//! dropped packet never costs a tick of input. Session recording
//! ([`net::demo`]) reuses the exact live wire framing, so a demo replays
//! through the same decoder as a live connection.
//!
//! The core is synchronous by design: all clients are serviced inside one
//! single-threaded server tick, and nothing here blocks or suspends.
//!
//! # Features
//!
//! - `recorder` - Demo session recording and playback framing (enabled by default)

pub mod config;
pub mod game;
pub mod level;
pub mod net;
pub mod util;
