//! esgpanel runner: download orchestration on top of `esgpanel-core`.
//!
//! This crate provides:
//! - TOML configuration and list file loading
//! - Concurrent chunk download on a bounded worker pool
//! - Merging historic panels with static data
//! - CSV output, partial chunk checkpoints and the run report
//! - Industry classification download

pub mod config;
pub mod export;
pub mod industry;
pub mod merge;
pub mod pipeline;
pub mod report;
pub mod scheduler;

pub use config::{ConfigError, PipelineConfig, ProviderConfig, ResolvedConfig};
pub use export::{
    empty_columns_in_csv, partial_file_name, table_hash, write_table_csv, ExportError,
    OutputLayout,
};
pub use industry::{download_industry_codes, IndustryOutcome, INDUSTRY_FIELDS};
pub use merge::{join, CompletenessWarning, MergeOutcome};
pub use pipeline::{run_download, run_with_client, PipelineError, RunOutput};
pub use report::RunReport;
pub use scheduler::{
    download_all_frames, ChunkFailure, DownloadOutcome, DownloadReport, SchedulerError, TaskError,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn outcomes_are_send_sync() {
        assert_send::<DownloadOutcome>();
        assert_sync::<DownloadOutcome>();
        assert_send::<MergeOutcome>();
        assert_sync::<MergeOutcome>();
    }

    #[test]
    fn config_is_send_sync() {
        assert_send::<ResolvedConfig>();
        assert_sync::<ResolvedConfig>();
    }

    #[test]
    fn errors_are_send() {
        assert_send::<PipelineError>();
        assert_send::<TaskError>();
    }
}
