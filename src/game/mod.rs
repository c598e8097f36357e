pub mod command_queue;
pub mod entity;
pub mod history;

use uuid::Uuid;

/// Unique identifier for a connected client
pub type ClientId = Uuid;
