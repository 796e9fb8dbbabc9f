//! Download orchestration: one concurrent fetch per unit, an all-settle
//! barrier, then an explicit partial-failure policy before a single write.

mod orchestrator;
mod policy;

pub use orchestrator::{DownloadOptions, Orchestrator};
pub use policy::{FailurePolicy, UnitOutcome};
