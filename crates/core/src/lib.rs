pub mod admission;
pub mod config;
pub mod dispatch;
pub mod exec;
pub mod health;
pub mod job;
pub mod metrics;
pub mod processor;
pub mod status;
pub mod worker;

pub use admission::{classify_tier, AdmissionController, AdmissionDecision, Tier};
pub use config::{
    load_config, load_config_from_str, validate_config, AdmissionConfig, Config, ConfigError,
    SanitizedConfig, StorageConfig, ToolsConfig, UploadLimits, WorkerConfig,
};
pub use dispatch::{
    detect_source_format, dispatch, source_family, ArchiveOperation, AudioEffect, ConversionPlan,
    DispatchError, FormatFamily,
};
pub use exec::{run_tool, run_tool_with_stderr, ToolError, ToolOutput};
pub use health::{check_required_tools, check_tool, HealthReport, ToolStatus};
pub use job::{
    ConversionOptions, FailoverJobStore, Job, JobError, JobInput, JobResultData, JobState,
    JobStore, MemoryJobStore, NewJob, QueueCounts, SqliteJobStore,
};
pub use processor::{
    processor_for, JobWorkspace, ProcessContext, Processor, ProcessorError, ProcessorOutput,
    ProgressSender,
};
pub use status::{downloadable, DownloadRejection, JobStatus};
pub use worker::{backoff_delay, ProcessorFactory, WorkerPool, WorkerPoolStatus};
