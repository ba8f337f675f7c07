//! The export pipeline: pagination planning, CSV serialization, and the
//! run orchestrator that ties them together.

pub mod planner;
pub mod runner;
pub mod writer;

pub use planner::{FetchStats, PaginationPlan, PaginationPlanner, MAX_BATCH_SIZE, PROBE_ROW_LIMIT};
pub use runner::{ExportOutcome, ExportRunner};
pub use writer::{TabularWriter, WriteSummary};
