//! Detection bookkeeping: the label image and the detections it refers to.
//!
//! Pixels store a [`DetectionId`] directly. Ids are never reused or
//! renumbered while a frame is being repaired, so merges, splits and
//! deletions only touch the pixels of the detections involved. Dense,
//! position-based labels are produced once, by [`Segmentation::into_dense`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::Ellipse;
use crate::label::LabelImage;

/// Stable handle of one detection within a frame.
///
/// Ids increase monotonically: initial detections take the
/// connected-component labels `1..=N`, split pieces are appended after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DetectionId(u32);

impl DetectionId {
    /// Id stored in a label pixel; `None` for background (0).
    pub fn from_label(label: u32) -> Option<Self> {
        (label != 0).then_some(Self(label))
    }

    /// Raw label value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for DetectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordered map of detections, including tombstoned ones until compaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    entries: BTreeMap<DetectionId, Ellipse>,
    next: u32,
}

impl DetectionSet {
    fn from_ellipses(ellipses: Vec<Ellipse>) -> Self {
        let entries: BTreeMap<_, _> = ellipses
            .into_iter()
            .enumerate()
            .map(|(k, e)| (DetectionId(k as u32 + 1), e))
            .collect();
        let next = entries.len() as u32 + 1;
        Self { entries, next }
    }

    /// Ellipse of `id`, if the id exists (tombstoned entries included).
    pub fn get(&self, id: DetectionId) -> Option<&Ellipse> {
        self.entries.get(&id)
    }

    /// Number of entries, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (DetectionId, &Ellipse)> + '_ {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    /// Ids of non-tombstoned entries, in id order.
    pub fn live_ids(&self) -> impl Iterator<Item = DetectionId> + '_ {
        self.iter().filter(|(_, e)| !e.is_empty()).map(|(id, _)| id)
    }

    fn push(&mut self, ellipse: Ellipse) -> DetectionId {
        let id = DetectionId(self.next);
        self.next += 1;
        self.entries.insert(id, ellipse);
        id
    }
}

/// Label image plus the detections its labels refer to.
///
/// Every mutation commits its pixel edits and ellipse edits together.
/// Tombstoned detections keep their pixels until [`Segmentation::compact`].
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    labels: LabelImage,
    detections: DetectionSet,
}

impl Segmentation {
    /// Pair a label image (values `0..=ellipses.len()`) with the ellipse
    /// fitted to each label; `ellipses[k - 1]` belongs to label `k`.
    pub fn new(labels: LabelImage, ellipses: Vec<Ellipse>) -> Self {
        debug_assert!(labels.as_raw().iter().all(|&l| l as usize <= ellipses.len()));
        Self {
            labels,
            detections: DetectionSet::from_ellipses(ellipses),
        }
    }

    /// Current label image (raw detection ids).
    pub fn labels(&self) -> &LabelImage {
        &self.labels
    }

    /// Current detections.
    pub fn detections(&self) -> &DetectionSet {
        &self.detections
    }

    /// Frame `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        self.labels.dimensions()
    }

    /// Ellipse of `id`.
    pub fn ellipse(&self, id: DetectionId) -> Option<Ellipse> {
        self.detections.get(id).copied()
    }

    /// Owner of pixel `(x, y)`.
    #[inline]
    pub fn owner(&self, x: u32, y: u32) -> Option<DetectionId> {
        DetectionId::from_label(self.labels.get_pixel(x, y)[0])
    }

    /// Pixels labeled `id`, row-major.
    pub fn pixels_of(&self, id: DetectionId) -> Vec<(u32, u32)> {
        self.labels
            .enumerate_pixels()
            .filter(|(_, _, l)| l[0] == id.0)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    /// Replace the ellipse of `id` without touching pixels.
    pub fn set_ellipse(&mut self, id: DetectionId, ellipse: Ellipse) {
        if let Some(slot) = self.detections.entries.get_mut(&id) {
            *slot = ellipse;
        }
    }

    /// Give the unowned pixels among `pixels` to `id` and install its new fit.
    pub fn grow(&mut self, id: DetectionId, pixels: &[(u32, u32)], ellipse: Ellipse) {
        for &(x, y) in pixels {
            let p = self.labels.get_pixel_mut(x, y);
            if p[0] == 0 {
                p[0] = id.0;
            }
        }
        self.set_ellipse(id, ellipse);
    }

    /// Move every pixel of `absorbed` to `keep`, install the merged fit on
    /// `keep` and tombstone `absorbed`.
    pub fn merge(&mut self, keep: DetectionId, absorbed: DetectionId, merged: Ellipse) {
        for p in self.labels.pixels_mut() {
            if p[0] == absorbed.0 {
                p[0] = keep.0;
            }
        }
        self.set_ellipse(keep, merged);
        self.tombstone(absorbed);
    }

    /// Replace `id` by split pieces `(ellipse, pixels)`.
    ///
    /// The first piece takes over `id`; the others get fresh ids in order.
    /// Returns the ids of all pieces, `id` first. An empty `pieces` is a no-op.
    pub fn split(
        &mut self,
        id: DetectionId,
        pieces: Vec<(Ellipse, Vec<(u32, u32)>)>,
    ) -> Vec<DetectionId> {
        let mut ids = Vec::with_capacity(pieces.len());
        for (k, (ellipse, pixels)) in pieces.into_iter().enumerate() {
            let target = if k == 0 {
                self.set_ellipse(id, ellipse);
                id
            } else {
                self.detections.push(ellipse)
            };
            for (x, y) in pixels {
                self.labels.get_pixel_mut(x, y)[0] = target.0;
            }
            ids.push(target);
        }
        ids
    }

    /// Mark `id` deleted (zero area). Its pixels stay until [`Self::compact`].
    pub fn tombstone(&mut self, id: DetectionId) {
        if let Some(e) = self.detections.entries.get_mut(&id) {
            e.tombstone();
        }
    }

    /// Drop tombstoned detections and clear their pixels. Returns how many
    /// were removed.
    pub fn compact(&mut self) -> usize {
        let before = self.detections.len();
        self.detections.entries.retain(|_, e| !e.is_empty());
        let entries = &self.detections.entries;
        for p in self.labels.pixels_mut() {
            if p[0] != 0 && !entries.contains_key(&DetectionId(p[0])) {
                p[0] = 0;
            }
        }
        before - self.detections.len()
    }

    /// True when every labeled pixel refers to a live, non-empty detection.
    pub fn is_consistent(&self) -> bool {
        self.labels.as_raw().iter().all(|&l| {
            l == 0
                || self
                    .detections
                    .get(DetectionId(l))
                    .is_some_and(|e| !e.is_empty())
        })
    }

    /// Compact, then convert to position-based output: ellipses in id order
    /// and a label image with contiguous labels `1..=len`.
    pub fn into_dense(mut self) -> (Vec<Ellipse>, LabelImage) {
        self.compact();
        let mut dense = BTreeMap::new();
        let mut ellipses = Vec::with_capacity(self.detections.len());
        for (k, (id, e)) in self.detections.entries.iter().enumerate() {
            dense.insert(id.0, k as u32 + 1);
            ellipses.push(*e);
        }
        let mut labels = self.labels;
        for p in labels.pixels_mut() {
            if p[0] != 0 {
                p[0] = dense.get(&p[0]).copied().unwrap_or(0);
            }
        }
        (ellipses, labels)
    }
}
