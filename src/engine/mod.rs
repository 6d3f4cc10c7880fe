//! Execution engine: scheduling units over samples and folding their
//! results into distributions.

pub mod aggregate;
pub mod result;
pub mod scheduler;
pub mod summary;

pub use aggregate::{Aggregate, Aggregator, Distribution};
pub use result::{LedgerEntry, ResultValue, UnitResult};
pub use scheduler::{
    CancelToken, ExecutionStats, ResultSink, SamplingPolicy, Scheduler, SchedulerConfig,
};
pub use summary::{Summary, ThresholdFinding, Thresholds};
