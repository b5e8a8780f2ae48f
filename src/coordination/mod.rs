//! Sequential load coordination: spec discovery, per-file workers, run summaries

pub mod coordinator;
pub mod summary;
pub mod worker;

pub use coordinator::{Coordinator, LoadConfig, LoadConfigBuilder, SpecPlan, plan_load};
pub use summary::{ErrorRecord, FileResult, LoadResult, SpecResult, write_summary};
pub use worker::RowErrorPolicy;
