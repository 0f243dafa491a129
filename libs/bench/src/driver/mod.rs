//! Query sampling, concurrent load and the result log.

pub mod load;
pub mod log;
pub mod sampler;
pub mod sweep;

pub use load::{run_load, LoadConfig, RunSummary, Workload, DEFAULT_PLAN_SEED};
pub use log::{
    create_log_writer, open_result_log, spawn_log_consumer, LogConsumer, LogWriter,
    LogWriterConfig, QueryOutcome, ResultLogEntry, RESULT_LOG_FILE,
};
pub use sampler::{QueryPlan, QueryRecord};
