pub mod client;
pub mod command;
pub mod delta;
#[cfg(feature = "recorder")]
pub mod demo;
pub mod protocol;
pub mod snapshot;
pub mod wire;
