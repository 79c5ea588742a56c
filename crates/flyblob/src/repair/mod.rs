//! Blob repair passes.
//!
//! Both passes mutate one [`Segmentation`](crate::Segmentation) strictly in
//! id order; every merge, split and deletion is committed before the next
//! blob is looked at, since neighbors and penalties depend on the current
//! state.

mod large;
mod merge;
mod small;
mod split;

pub use large::LargeBlobRepairer;
pub use merge::{best_merge, merge_candidates, merge_penalty, MergeProposal};
pub use small::{Regrowth, SmallBlobRepairer};
pub use split::{
    mixture_split, threshold_split, BlobPixels, SplitMethod, SplitProposal, SLIVER_PENALTY,
    THRESHOLD_STEPS,
};
