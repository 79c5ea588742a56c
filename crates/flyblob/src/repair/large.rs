//! Repair of blobs larger than `max_shape.area`.

use std::collections::BTreeSet;

use crate::config::ShapeProfile;
use crate::label::ScoreImage;
use crate::mixture::{EmParams, MixtureSplitter};
use crate::segmentation::{DetectionId, Segmentation};
use crate::stats::RepairStats;

use super::split::{mixture_split, threshold_split, BlobPixels, SplitProposal};

/// Large-blob repair pass over one frame.
///
/// Oversized blobs are split, lowest id first. Pieces that are still
/// oversized go back into the queue, so a blob may be split repeatedly.
#[derive(Debug, Clone, Copy)]
pub struct LargeBlobRepairer<'a, M> {
    profile: &'a ShapeProfile,
    params: &'a EmParams,
    splitter: &'a M,
    scores: &'a ScoreImage,
}

impl<'a, M: MixtureSplitter> LargeBlobRepairer<'a, M> {
    /// Repairer reading `scores`, splitting with `splitter`.
    pub fn new(
        profile: &'a ShapeProfile,
        params: &'a EmParams,
        splitter: &'a M,
        scores: &'a ScoreImage,
    ) -> Self {
        Self {
            profile,
            params,
            splitter,
            scores,
        }
    }

    fn is_large(&self, area: f64) -> bool {
        area > self.profile.max_shape.area
    }

    /// Repair every large blob, then compact.
    pub fn run(&self, seg: &mut Segmentation) -> RepairStats {
        let mut stats = RepairStats::default();
        let mut queue: BTreeSet<DetectionId> = seg
            .detections()
            .iter()
            .filter(|(_, e)| !e.is_empty() && self.is_large(e.area()))
            .map(|(id, _)| id)
            .collect();

        while let Some(id) = queue.pop_first() {
            let Some(ellipse) = seg.ellipse(id).filter(|e| !e.is_empty()) else {
                continue;
            };
            let area = ellipse.area();

            if area > self.profile.min_area_ignore {
                tracing::debug!(%id, area, "ignored huge blob");
                seg.tombstone(id);
                stats.nlarge_ignored += 1;
                continue;
            }

            let Some(proposal) = self.propose(seg, id) else {
                tracing::warn!(%id, area, "large blob could not be split");
                stats.nlarge_notfixed += 1;
                continue;
            };
            let pieces = self.apply(seg, id, proposal, &mut stats);
            // A lone piece keeps the blob's pixels; splitting it again would repeat.
            if pieces.len() < 2 {
                continue;
            }
            for piece in pieces {
                if seg.ellipse(piece).is_some_and(|e| self.is_large(e.area())) {
                    queue.insert(piece);
                }
            }
        }

        let removed = seg.compact();
        tracing::debug!(removed, ?stats, "large-blob pass done");
        stats
    }

    /// Threshold split first, mixture split as fallback.
    pub fn propose(&self, seg: &Segmentation, id: DetectionId) -> Option<SplitProposal> {
        let ellipse = seg.ellipse(id)?;
        let blob = BlobPixels::new(seg.pixels_of(id), self.scores);
        if blob.is_empty() {
            return None;
        }
        threshold_split(self.splitter, &blob, self.scores, self.profile, self.params).or_else(|| {
            mixture_split(self.splitter, &blob, &ellipse, self.profile, self.params)
        })
    }

    /// Commit a split; returns the ids of the installed pieces.
    ///
    /// The first piece always takes over `id`, even when no pixel was
    /// assigned to it. Later pieces without pixels are skipped. The split is
    /// counted with every proposed piece either way.
    fn apply(
        &self,
        seg: &mut Segmentation,
        id: DetectionId,
        proposal: SplitProposal,
        stats: &mut RepairStats,
    ) -> Vec<DetectionId> {
        let total = proposal.pieces.len();
        let pieces: Vec<_> = proposal
            .pieces
            .into_iter()
            .enumerate()
            .filter(|(k, (_, pixels))| *k == 0 || !pixels.is_empty())
            .map(|(_, piece)| piece)
            .collect();
        if pieces.len() < total {
            tracing::debug!(%id, skipped = total - pieces.len(), "skipped empty split pieces");
        }

        let ids = seg.split(id, pieces);
        stats.record_split(total as u32);
        tracing::debug!(%id, pieces = total, method = ?proposal.method, "split large blob");
        ids
    }
}
