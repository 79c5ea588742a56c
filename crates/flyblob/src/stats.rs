//! Repair counters reported alongside each corrected frame.

use serde::{Deserialize, Serialize};

/// Outcome counts of the small- and large-blob repair passes.
///
/// Purely diagnostic: nothing in the repair logic reads these back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepairStats {
    /// Small blobs fixed by re-thresholding at a lower score.
    pub nsmall_lowerthresh: u32,
    /// Small blobs merged into a neighbor.
    pub nsmall_merged: u32,
    /// Small blobs deleted as noise.
    pub nsmall_deleted: u32,
    /// Small blobs left unresolved.
    pub nsmall_notfixed: u32,
    /// Large blobs split into several detections.
    pub nlarge_split: u32,
    /// Largest number of pieces produced by one split.
    pub max_nsplit: u32,
    /// Total number of pieces produced by all splits.
    pub sum_nsplit: u32,
    /// Large blobs left unresolved.
    pub nlarge_notfixed: u32,
    /// Huge blobs discarded without splitting.
    pub nlarge_ignored: u32,
}

impl RepairStats {
    /// Fold `other` into `self`: counters add, `max_nsplit` takes the maximum.
    pub fn accumulate(&mut self, other: &RepairStats) {
        self.nsmall_lowerthresh += other.nsmall_lowerthresh;
        self.nsmall_merged += other.nsmall_merged;
        self.nsmall_deleted += other.nsmall_deleted;
        self.nsmall_notfixed += other.nsmall_notfixed;
        self.nlarge_split += other.nlarge_split;
        self.max_nsplit = self.max_nsplit.max(other.max_nsplit);
        self.sum_nsplit += other.sum_nsplit;
        self.nlarge_notfixed += other.nlarge_notfixed;
        self.nlarge_ignored += other.nlarge_ignored;
    }

    /// Record one split into `pieces` detections.
    pub(crate) fn record_split(&mut self, pieces: u32) {
        self.nlarge_split += 1;
        self.max_nsplit = self.max_nsplit.max(pieces);
        self.sum_nsplit += pieces;
    }
}
