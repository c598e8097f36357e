/// Sizing and culling parameters for the synchronization core.
///
/// The two ring capacities are deliberately construction-time values rather
/// than compile-time constants so tests can exercise wraparound with small
/// windows.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Capacity of the shared entity-state history ring (serves all clients)
    pub entity_history_capacity: usize,
    /// Per-client frame ring capacity, in ticks; must exceed plausible
    /// round-trip loss
    pub frame_ring_capacity: usize,
    /// Maximum entities recorded into one client frame before truncation
    pub max_frame_entities: usize,
    /// Byte cap for one per-tick frame message
    pub max_message_size: usize,
    /// Byte cap for one recorded demo chunk
    pub demo_chunk_size: usize,
    /// Half-extents of the eye box used for the fat PVS query; absorbs
    /// client-side prediction error
    pub eye_margin: f32,
    /// Distance beyond which sound-only entities are dropped from frames
    pub audible_distance: f32,
    /// Client-side outgoing command ring capacity, in packets
    pub command_ring_capacity: usize,
    /// Capacity of the queue draining decoded commands into the simulation
    pub command_queue_capacity: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            entity_history_capacity: 8192,
            frame_ring_capacity: 16,
            max_frame_entities: 64,
            max_message_size: 1400,
            demo_chunk_size: 16384,
            eye_margin: 8.0,
            audible_distance: 600.0,
            command_ring_capacity: 64,
            command_queue_capacity: 1024,
        }
    }
}

impl NetConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(capacity) = std::env::var("SNAPWIRE_HISTORY_CAPACITY") {
            if let Ok(parsed) = capacity.parse::<usize>() {
                if parsed > 0 {
                    config.entity_history_capacity = parsed;
                } else {
                    tracing::warn!("SNAPWIRE_HISTORY_CAPACITY must be > 0, using default");
                }
            } else {
                tracing::warn!(
                    "Invalid SNAPWIRE_HISTORY_CAPACITY '{}', using default",
                    capacity
                );
            }
        }

        if let Ok(backup) = std::env::var("SNAPWIRE_FRAME_BACKUP") {
            if let Ok(parsed) = backup.parse::<usize>() {
                if parsed >= 4 {
                    config.frame_ring_capacity = parsed;
                } else {
                    tracing::warn!("SNAPWIRE_FRAME_BACKUP must be >= 4, using default");
                }
            } else {
                tracing::warn!("Invalid SNAPWIRE_FRAME_BACKUP '{}', using default", backup);
            }
        }

        if let Ok(size) = std::env::var("SNAPWIRE_MAX_MESSAGE_SIZE") {
            if let Ok(parsed) = size.parse::<usize>() {
                if parsed >= 256 {
                    config.max_message_size = parsed;
                } else {
                    tracing::warn!("SNAPWIRE_MAX_MESSAGE_SIZE must be >= 256, using default");
                }
            } else {
                tracing::warn!("Invalid SNAPWIRE_MAX_MESSAGE_SIZE '{}', using default", size);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.frame_ring_capacity < 4 {
            return Err("frame_ring_capacity must be at least 4 ticks".to_string());
        }
        if self.max_frame_entities == 0 {
            return Err("max_frame_entities must be at least 1".to_string());
        }
        if self.entity_history_capacity < self.max_frame_entities * 2 {
            return Err(
                "entity_history_capacity must retain at least two full frames".to_string(),
            );
        }
        if self.max_message_size < 256 {
            return Err("max_message_size must be at least 256 bytes".to_string());
        }
        if self.demo_chunk_size < self.max_message_size {
            return Err("demo_chunk_size cannot be smaller than max_message_size".to_string());
        }
        if self.command_ring_capacity < 3 {
            return Err("command_ring_capacity must hold the three redundant samples".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(NetConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tiny_history() {
        let config = NetConfig {
            entity_history_capacity: 16,
            max_frame_entities: 64,
            ..NetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_frame_ring() {
        let config = NetConfig {
            frame_ring_capacity: 2,
            ..NetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_demo_chunk_below_message_size() {
        let config = NetConfig {
            max_message_size: 4096,
            demo_chunk_size: 1024,
            ..NetConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
