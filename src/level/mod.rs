//! Immutable level geometry: the spatial tree, its clusters, and areas.
//!
//! Loaded once per level and never mutated while frames are being built.
//! The one exception is area portal state (doors opening and closing),
//! which re-floods area connectivity between ticks.

pub mod vis;

use smallvec::SmallVec;
use tracing::warn;

use crate::net::protocol::MAX_AREAS;
use crate::util::vec3::Vec3;
use vis::{decompress_row_into, ClusterSet, VisData, VisKind};

/// Sentinel cluster id meaning "no cluster"; never visible
pub const NO_CLUSTER: i32 = -1;
/// Sentinel area id meaning "no area"
pub const NO_AREA: i32 = -1;

/// Axis-aligned split plane
#[derive(Debug, Clone, Copy)]
pub struct SplitPlane {
    /// 0 = x, 1 = y, 2 = z
    pub axis: usize,
    pub dist: f32,
}

/// Interior node of the spatial tree.
///
/// A non-negative child is another node index; a negative child encodes
/// leaf `-1 - child`.
#[derive(Debug, Clone, Copy)]
pub struct Node {
    pub plane: SplitPlane,
    pub children: [i32; 2],
}

#[derive(Debug, Clone, Copy)]
pub struct Leaf {
    pub cluster: i32,
    pub area: i32,
}

/// Door-style connection between two areas
#[derive(Debug, Clone, Copy)]
pub struct AreaPortal {
    pub areas: [usize; 2],
}

#[derive(Debug, Clone, Copy, Default)]
struct Area {
    flood_num: i32,
    flood_valid: i32,
}

pub struct Level {
    nodes: Vec<Node>,
    leafs: Vec<Leaf>,
    num_clusters: usize,
    vis: Option<VisData>,
    areas: Vec<Area>,
    portals: Vec<AreaPortal>,
    portal_open: Vec<bool>,
    flood_valid: i32,
}

impl Level {
    /// Assemble a level from compiled geometry. Portals start closed;
    /// connectivity is flooded immediately.
    pub fn new(
        nodes: Vec<Node>,
        leafs: Vec<Leaf>,
        num_clusters: usize,
        vis: Option<VisData>,
        num_areas: usize,
        portals: Vec<AreaPortal>,
    ) -> Self {
        assert!(!leafs.is_empty(), "a level needs at least one leaf");
        assert!(
            num_areas <= MAX_AREAS,
            "level has more areas than the area bit vector can carry"
        );
        let portal_open = vec![false; portals.len()];
        let mut level = Self {
            nodes,
            leafs,
            num_clusters,
            vis,
            areas: vec![Area::default(); num_areas.max(1)],
            portals,
            portal_open,
            flood_valid: 0,
        };
        level.flood_areas();
        level
    }

    /// Trivial single-leaf level without visibility data. Everything is
    /// visible from everywhere (tool mode).
    pub fn unpartitioned() -> Self {
        Self::new(
            Vec::new(),
            vec![Leaf { cluster: 0, area: 0 }],
            1,
            None,
            1,
            Vec::new(),
        )
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn num_leafs(&self) -> usize {
        self.leafs.len()
    }

    pub fn num_areas(&self) -> usize {
        self.areas.len()
    }

    pub fn leaf(&self, index: usize) -> &Leaf {
        &self.leafs[index]
    }

    /// Index of the leaf containing `point`. The tree cannot be escaped,
    /// so this always resolves.
    pub fn point_leaf(&self, point: Vec3) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut index: i32 = 0;
        loop {
            let node = &self.nodes[index as usize];
            let side = if point.axis(node.plane.axis) >= node.plane.dist {
                0
            } else {
                1
            };
            let child = node.children[side];
            if child < 0 {
                return (-1 - child) as usize;
            }
            index = child;
        }
    }

    /// Every leaf the box touches; both subtrees are taken when the box
    /// straddles a split plane.
    pub fn box_leafs(&self, mins: Vec3, maxs: Vec3, out: &mut SmallVec<[usize; 64]>) {
        out.clear();
        if self.nodes.is_empty() {
            out.push(0);
            return;
        }
        self.box_leafs_r(0, mins, maxs, out);
    }

    fn box_leafs_r(&self, index: i32, mins: Vec3, maxs: Vec3, out: &mut SmallVec<[usize; 64]>) {
        if index < 0 {
            out.push((-1 - index) as usize);
            return;
        }
        let node = self.nodes[index as usize];
        let lo = mins.axis(node.plane.axis);
        let hi = maxs.axis(node.plane.axis);
        if lo >= node.plane.dist {
            self.box_leafs_r(node.children[0], mins, maxs, out);
        } else if hi < node.plane.dist {
            self.box_leafs_r(node.children[1], mins, maxs, out);
        } else {
            self.box_leafs_r(node.children[0], mins, maxs, out);
            self.box_leafs_r(node.children[1], mins, maxs, out);
        }
    }

    /// Decompress one cluster's row into `out`. With no visibility data
    /// every cluster is treated as visible: occluding gameplay is worse
    /// than wasting bandwidth. Cluster `-1` and out-of-range ids produce
    /// the empty set.
    pub fn cluster_vis(&self, cluster: i32, kind: VisKind, out: &mut ClusterSet) {
        out.clear();
        let Some(vis) = &self.vis else {
            out.fill();
            return;
        };
        if self.num_clusters == 0 {
            out.fill();
            return;
        }
        if cluster < 0 {
            return;
        }
        if let Some(row) = vis.row(cluster as usize, kind) {
            decompress_row_into(row, out);
        }
    }

    pub fn cluster_pvs(&self, cluster: i32, out: &mut ClusterSet) {
        self.cluster_vis(cluster, VisKind::Visible, out);
    }

    pub fn cluster_phs(&self, cluster: i32, out: &mut ClusterSet) {
        self.cluster_vis(cluster, VisKind::Hearable, out);
    }

    /// Merged PVS of an entire box: the union, via bitwise OR, of the rows
    /// of every cluster the box's leafs touch. The client interpolates its
    /// view position, so a single-point PVS would flicker at cluster
    /// boundaries.
    pub fn fat_pvs(&self, origin: Vec3, margin: f32, out: &mut ClusterSet) {
        out.clear();
        if self.vis.is_none() || self.num_clusters == 0 {
            out.fill();
            return;
        }
        let mins = origin - Vec3::splat(margin);
        let maxs = origin + Vec3::splat(margin);
        let mut leafs: SmallVec<[usize; 64]> = SmallVec::new();
        self.box_leafs(mins, maxs, &mut leafs);

        let mut seen: SmallVec<[i32; 64]> = SmallVec::new();
        for &leaf in &leafs {
            let cluster = self.leafs[leaf].cluster;
            if cluster < 0 || seen.contains(&cluster) {
                continue;
            }
            seen.push(cluster);
            self.cluster_row_into(cluster as usize, VisKind::Visible, out);
        }
    }

    fn cluster_row_into(&self, cluster: usize, kind: VisKind, out: &mut ClusterSet) {
        if let Some(vis) = &self.vis {
            if let Some(row) = vis.row(cluster, kind) {
                decompress_row_into(row, out);
            }
        }
    }

    /// True when any leaf beneath `node` lies in a cluster present in
    /// `set`. Short-circuits on the first hit; used for large static
    /// entities that span too many leafs to test individually.
    pub fn subtree_visible(&self, node: i32, set: &ClusterSet) -> bool {
        if self.nodes.is_empty() {
            return set.contains(self.leafs[0].cluster);
        }
        if node < 0 {
            let leaf = &self.leafs[(-1 - node) as usize];
            return set.contains(leaf.cluster);
        }
        let node = &self.nodes[node as usize];
        self.subtree_visible(node.children[0], set) || self.subtree_visible(node.children[1], set)
    }

    /// Open or close a door portal and re-flood connectivity
    pub fn set_portal_state(&mut self, portal: usize, open: bool) {
        if portal >= self.portals.len() {
            warn!(portal, "portal index out of range, ignoring");
            return;
        }
        self.portal_open[portal] = open;
        self.flood_areas();
    }

    fn flood_areas(&mut self) {
        self.flood_valid += 1;
        let mut flood_num = 0;
        for start in 0..self.areas.len() {
            if self.areas[start].flood_valid == self.flood_valid {
                continue; // already flooded into
            }
            flood_num += 1;
            self.areas[start].flood_num = flood_num;
            self.areas[start].flood_valid = self.flood_valid;
            let mut stack = vec![start];
            while let Some(area) = stack.pop() {
                for (index, portal) in self.portals.iter().enumerate() {
                    if !self.portal_open[index] {
                        continue;
                    }
                    let other = if portal.areas[0] == area {
                        portal.areas[1]
                    } else if portal.areas[1] == area {
                        portal.areas[0]
                    } else {
                        continue;
                    };
                    if other < self.areas.len()
                        && self.areas[other].flood_valid != self.flood_valid
                    {
                        self.areas[other].flood_num = flood_num;
                        self.areas[other].flood_valid = self.flood_valid;
                        stack.push(other);
                    }
                }
            }
        }
    }

    /// Whether two areas share a flood. Unknown or sentinel areas count as
    /// connected: an entity we cannot place must not be occluded.
    pub fn areas_connected(&self, a: i32, b: i32) -> bool {
        if a < 0 || b < 0 {
            return true;
        }
        let (a, b) = (a as usize, b as usize);
        if a >= self.areas.len() || b >= self.areas.len() {
            return true;
        }
        self.areas[a].flood_num == self.areas[b].flood_num
    }

    /// Fill `out` with a bit per area in the same flood as `area`; returns
    /// the number of bytes used. `NO_AREA` marks everything.
    pub fn write_area_bits(&self, area: i32, out: &mut [u8]) -> usize {
        let bytes = (self.areas.len() + 7) >> 3;
        let out = &mut out[..bytes];
        if area < 0 || area as usize >= self.areas.len() {
            out.fill(0xff);
            return bytes;
        }
        out.fill(0);
        let flood_num = self.areas[area as usize].flood_num;
        for (index, other) in self.areas.iter().enumerate() {
            if other.flood_num == flood_num {
                out[index >> 3] |= 1 << (index & 7);
            }
        }
        bytes
    }
}
