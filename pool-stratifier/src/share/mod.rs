//! Share submission: dedup, latency measurement, and the end-to-end
//! validation pipeline (spec.md §4.3).

pub mod dedup;
pub mod latency;
pub mod pipeline;

pub use dedup::{DedupWindow, ShareFingerprint};
pub use latency::{LatencyPercentiles, LatencyWindow};
pub use pipeline::{AcceptingBlockSubmitter, BlockSubmitError, BlockSubmitter, ShareOutcome, submit_share};
