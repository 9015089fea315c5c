//! esgpanel core: the building blocks of the panel download pipeline.
//!
//! - Keyed polars tables with enforced key uniqueness ([`table`])
//! - Chunk planning for instrument and field lists ([`chunk`])
//! - Provider trait, raw frames and the scoped session ([`provider`])
//! - Blocking HTTP provider ([`http`])
//! - Retrieval client with retry and backoff ([`retrieval`])
//! - Static aggregation and historic standardization ([`standardize`])

pub mod chunk;
pub mod http;
pub mod provider;
pub mod retrieval;
pub mod standardize;
pub mod table;
pub mod value;

pub use chunk::{split_in_chunks, unique_in_order, ChunkError};
pub use http::HttpProvider;
pub use provider::{DataProvider, HistoryParams, ProviderError, RawFrame, RawRow, Session};
pub use retrieval::{
    DownloadError, RequestKind, RetrievalClient, RetryPolicy, Sleeper, ThreadSleeper,
};
pub use standardize::{
    aggregate_static, clean_static, empty_panel, merge_duplicates, standardize_historic,
    standardize_static, MergeConflict, ValidationError, YearRange,
};
pub use table::{JoinValidation, PanelKey, Table, TableError, TableKey};
pub use value::{Cell, Value};

#[cfg(test)]
mod tests {
    use super::*;

    /// Everything crossing the worker pool boundary must be Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Table<String>>();
        require_sync::<Table<String>>();
        require_send::<Table<PanelKey>>();
        require_sync::<Table<PanelKey>>();
        require_send::<RawFrame>();
        require_sync::<RawFrame>();
        require_send::<DownloadError>();
        require_send::<ValidationError>();
        require_sync::<RetrievalClient<'static>>();
        require_sync::<Session<'static>>();
        require_sync::<HttpProvider>();
    }
}
