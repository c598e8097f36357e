//! The per-client snapshot builder.
//!
//! Runs once per client per server tick, after the simulation has
//! finalized positions: resolves the client's potentially-visible and
//! potentially-hearable sets, walks all live entities in ascending slot
//! order, and appends the relevant subset into the shared history,
//! recording the run in the client's frame ring.

use smallvec::SmallVec;
use tracing::warn;

use crate::config::NetConfig;
use crate::game::entity::{EntityState, PlayerState, Solidity};
use crate::game::history::EntityHistory;
use crate::level::vis::ClusterSet;
use crate::level::Level;
use crate::net::client::{ClientFrame, ClientSlot};
use crate::net::protocol::MAX_AREA_BYTES;

/// Per-entity cluster cap before the builder falls back to a subtree test
pub const MAX_ENT_CLUSTERS: usize = 16;

/// Precomputed spatial membership of one entity
#[derive(Debug, Clone)]
pub enum ClusterMembership {
    /// The clusters the entity's leafs occupy, testable individually
    Clusters(SmallVec<[i32; MAX_ENT_CLUSTERS]>),
    /// The entity spans too many leafs; test its whole subtree instead
    Subtree(i32),
}

/// One row of the simulation's entity table, as consumed by the builder.
/// The simulation produces these; this core only reads them.
#[derive(Debug, Clone)]
pub struct ReplicatedEntity {
    /// Authoritative table index; the stable identity on the wire
    pub slot: u16,
    pub state: EntityState,
    /// Never replicated to any client
    pub server_private: bool,
    /// Areas the entity occupies; doors may legally straddle two.
    /// `-1` = unset.
    pub areas: [i32; 2],
    pub clusters: ClusterMembership,
    /// Owning entity, if any; a client's own missiles lose solidity so
    /// prediction does not collide with them
    pub owner: Option<u16>,
}

/// Cull accounting for one built frame
#[derive(Debug, Default, Clone)]
pub struct BuildStats {
    pub considered: usize,
    pub included: usize,
    pub culled_private: usize,
    pub culled_empty: usize,
    pub culled_area: usize,
    pub culled_vis: usize,
    pub culled_attenuated: usize,
    pub fixed_identities: usize,
    pub truncated: bool,
}

/// Builds client frames; owns the tick-scoped decompression scratch so no
/// per-call allocation happens. The scratch must not outlive the tick.
pub struct SnapshotBuilder {
    eye_margin: f32,
    audible_distance: f32,
    max_frame_entities: usize,
    pvs: ClusterSet,
    phs: ClusterSet,
}

impl SnapshotBuilder {
    pub fn new(level: &Level, config: &NetConfig) -> Self {
        let clusters = level.num_clusters().max(1);
        Self {
            eye_margin: config.eye_margin,
            audible_distance: config.audible_distance,
            max_frame_entities: config.max_frame_entities,
            pvs: ClusterSet::new(clusters),
            phs: ClusterSet::new(clusters),
        }
    }

    /// Decide which entities this client may know about for `tick` and
    /// record the frame. `entities` must iterate in ascending slot order —
    /// the delta encoder's merge depends on it.
    pub fn build_client_frame(
        &mut self,
        level: &Level,
        history: &mut EntityHistory,
        client: &mut ClientSlot,
        entities: &[ReplicatedEntity],
        player_state: PlayerState,
        tick: u32,
        now_ms: u64,
    ) -> BuildStats {
        let mut stats = BuildStats::default();

        // the eye box tolerates client-side prediction error, so the PVS
        // cannot flicker when the interpolated view crosses a cluster edge
        let eye = player_state.origin;
        level.fat_pvs(eye, self.eye_margin, &mut self.pvs);

        let eye_leaf = level.leaf(level.point_leaf(eye));
        let eye_area = eye_leaf.area;
        level.cluster_phs(eye_leaf.cluster, &mut self.phs);

        let mut area_buf = [0u8; MAX_AREA_BYTES];
        let area_len = level.write_area_bits(eye_area, &mut area_buf);

        let first_entity = history.next_index();
        let mut count: u16 = 0;
        let mut truncated = false;
        let mut prev_slot: i32 = -1;

        for entity in entities {
            debug_assert!(
                (entity.slot as i32) > prev_slot,
                "entity table must iterate in ascending slot order"
            );
            prev_slot = entity.slot as i32;
            stats.considered += 1;

            // the client's own entity skips every relevance test
            if entity.slot != client.entity_num {
                if entity.server_private {
                    stats.culled_private += 1;
                    continue;
                }
                if !entity.state.has_manifestation() {
                    stats.culled_empty += 1;
                    continue;
                }

                let connected = level.areas_connected(eye_area, entity.areas[0])
                    || (entity.areas[1] >= 0
                        && level.areas_connected(eye_area, entity.areas[1]));
                if !connected {
                    // blocked by a closed door
                    stats.culled_area += 1;
                    continue;
                }

                // sounds and one-shot events carry wherever the PHS says
                // they are hearable; everything else tests the fat PVS
                let set = if !entity.state.sound.is_none() || entity.state.event != 0 {
                    &self.phs
                } else {
                    &self.pvs
                };
                let relevant = match &entity.clusters {
                    ClusterMembership::Subtree(node) => level.subtree_visible(*node, set),
                    ClusterMembership::Clusters(clusters) => {
                        clusters.iter().any(|&cluster| set.contains(cluster))
                    }
                };
                if !relevant {
                    stats.culled_vis += 1;
                    continue;
                }

                // a bare sound source attenuates to nothing at range
                if entity.state.model.is_none()
                    && entity.state.effects == 0
                    && entity.state.solid == Solidity::Not
                    && eye.distance(entity.state.origin) > self.audible_distance
                {
                    stats.culled_attenuated += 1;
                    continue;
                }
            }

            if (count as usize) >= self.max_frame_entities {
                warn!(
                    tick,
                    client = %client.id,
                    cap = self.max_frame_entities,
                    "relevant entities exceed the frame cap, truncating"
                );
                truncated = true;
                break;
            }

            let mut state = entity.state;
            if state.number != entity.slot {
                // data-integrity bug elsewhere in the simulation; correct
                // it rather than fail the tick
                warn!(
                    stored = state.number,
                    slot = entity.slot,
                    "entity identity drifted from its table index, correcting"
                );
                state.number = entity.slot;
                stats.fixed_identities += 1;
            }
            if entity.owner == Some(client.entity_num) {
                state.solid = Solidity::Not;
            }

            history.push(state);
            count += 1;
            stats.included += 1;
        }

        client.frames.insert(
            tick as u64,
            ClientFrame {
                tick,
                player_state,
                area_bits: SmallVec::from_slice(&area_buf[..area_len]),
                first_entity,
                num_entities: count,
                sent_at_ms: now_ms,
            },
        );

        stats.truncated = truncated;
        stats
    }
}
