//! Cluster visibility data and its run-length codec.
//!
//! Per-cluster visibility rows are stored compressed and expanded into a
//! [`ClusterSet`] on demand. The decompressed sets are tick-scoped scratch:
//! callers clear and refill them per query and must not retain them across
//! ticks.

use bitvec::prelude::*;

/// Which precomputed per-cluster set to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisKind {
    /// Potentially visible set
    Visible,
    /// Potentially hearable set (wider: sound carries around corners)
    Hearable,
}

/// Decompressed cluster bitset sized to the level's cluster count
#[derive(Debug, Clone)]
pub struct ClusterSet {
    bits: BitVec,
}

impl ClusterSet {
    pub fn new(clusters: usize) -> Self {
        Self {
            bits: bitvec![0; clusters],
        }
    }

    pub fn clear(&mut self) {
        self.bits.fill(false);
    }

    /// Mark every cluster visible (fail-open path for levels without vis data)
    pub fn fill(&mut self) {
        self.bits.fill(true);
    }

    pub fn insert(&mut self, cluster: i32) {
        if cluster >= 0 && (cluster as usize) < self.bits.len() {
            self.bits.set(cluster as usize, true);
        }
    }

    /// Out-of-range ids, including `-1` ("no cluster"), are never contained
    pub fn contains(&self, cluster: i32) -> bool {
        cluster >= 0
            && self
                .bits
                .get(cluster as usize)
                .map(|bit| *bit)
                .unwrap_or(false)
    }

    /// Bitwise OR of `other` into `self`; both must be sized to the same level
    pub fn union_with(&mut self, other: &ClusterSet) {
        debug_assert_eq!(self.bits.len(), other.bits.len());
        for (dst, src) in self
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *dst |= *src;
        }
    }

    /// True when every cluster in `self` is also in `other`
    pub fn is_subset_of(&self, other: &ClusterSet) -> bool {
        self.bits.iter_ones().all(|index| other.contains(index as i32))
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

/// Run-length compress one visibility row: non-zero bytes are copied
/// verbatim, a zero byte is followed by its repeat count.
pub fn compress_row(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len());
    let mut i = 0;
    while i < row.len() {
        if row[i] != 0 {
            out.push(row[i]);
            i += 1;
        } else {
            let mut run = 0u8;
            while i < row.len() && row[i] == 0 && run < u8::MAX {
                run += 1;
                i += 1;
            }
            out.push(0);
            out.push(run);
        }
    }
    out
}

/// Expand a compressed row, OR-ing its bits into `out`.
///
/// A truncated trailing zero marker is read as an empty run rather than an
/// error: visibility data is trusted level input, and under-reading only
/// loses visibility bits for clusters past the end of the row.
pub(crate) fn decompress_row_into(compressed: &[u8], out: &mut ClusterSet) {
    let mut byte_index = 0usize;
    let mut i = 0usize;
    while i < compressed.len() {
        let byte = compressed[i];
        if byte != 0 {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    out.insert((byte_index * 8 + bit) as i32);
                }
            }
            byte_index += 1;
            i += 1;
        } else {
            let run = compressed.get(i + 1).copied().unwrap_or(0) as usize;
            byte_index += run;
            i += 2;
        }
    }
}

/// Build an uncompressed row with the given clusters' bits set
pub fn row_from_clusters(visible: &[usize], num_clusters: usize) -> Vec<u8> {
    let mut row = vec![0u8; (num_clusters + 7) / 8];
    for &cluster in visible {
        if cluster < num_clusters {
            row[cluster >> 3] |= 1 << (cluster & 7);
        }
    }
    row
}

/// Per-cluster compressed PVS and PHS rows
#[derive(Debug, Clone)]
pub struct VisData {
    pvs: Vec<Vec<u8>>,
    phs: Vec<Vec<u8>>,
}

impl VisData {
    /// Compress uncompressed rows, one per cluster for each set.
    ///
    /// Both slices must carry one row per cluster; rows shorter than the
    /// cluster count simply leave the tail invisible.
    pub fn from_rows(pvs_rows: &[Vec<u8>], phs_rows: &[Vec<u8>]) -> Self {
        assert_eq!(
            pvs_rows.len(),
            phs_rows.len(),
            "PVS and PHS must cover the same clusters"
        );
        Self {
            pvs: pvs_rows.iter().map(|row| compress_row(row)).collect(),
            phs: phs_rows.iter().map(|row| compress_row(row)).collect(),
        }
    }

    pub fn num_clusters(&self) -> usize {
        self.pvs.len()
    }

    pub(crate) fn row(&self, cluster: usize, kind: VisKind) -> Option<&[u8]> {
        let rows = match kind {
            VisKind::Visible => &self.pvs,
            VisKind::Hearable => &self.phs,
        };
        rows.get(cluster).map(|row| row.as_slice())
    }
}
