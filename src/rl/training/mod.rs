//! Training Infrastructure
//!
//! Training loops, checkpointing, and evaluation utilities.

pub mod checkpointing;
pub mod metrics;
pub mod trainer;

pub use checkpointing::Checkpointer;
pub use metrics::{MetricsTracker, PerformanceSummary};
pub use trainer::{
    evaluate, run_episode, summarize_results, train, EpisodeMode, EpisodeResult, TrainingSummary,
};
