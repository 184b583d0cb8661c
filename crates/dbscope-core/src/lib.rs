//! dbscope core - catalog, cache and search engine for SQLite files recovered
//! from a device image.
//!
//! The engine is synchronous and read-only. A caller hands it the list of
//! database files found by its own discovery step ([`PackageSource`]); the
//! [`Catalog`] opens each one, snapshots small tables in memory and the
//! [`SearchIndex`] indexes those snapshots. Searches combine index hits with
//! live per-column scans so that tables left on disk are still covered.
//!
//! # Example
//!
//! ```rust,no_run
//! use dbscope_core::{CancellationToken, PackageSource, SearchRequest, Session};
//!
//! fn main() -> dbscope_core::Result<()> {
//!     let packages = vec![PackageSource::new("com.example.chat", "/image/data/com.example.chat")
//!         .with_database("databases", "msg.db", "/image/data/com.example.chat/databases/msg.db")];
//!
//!     let cancel = CancellationToken::new();
//!     let mut session = Session::default();
//!     session.load(&packages, &cancel)?;
//!
//!     let report = session.search(&SearchRequest::plain("wang"), &cancel)?;
//!     for hit in &report.results {
//!         println!("{}/{}.{}: {}", hit.database_name, hit.table_name, hit.column_name, hit.match_value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod accessor;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod export;
pub mod index;
pub mod search;
pub mod session;
pub mod signature;
pub mod source;
pub mod value;

// Re-export commonly used types
pub use accessor::{quote_identifier, TableAccessor, TablePage};
pub use cancel::{CancellationToken, CancelledError};
pub use catalog::{
    Catalog, CatalogStats, DatabaseEntry, LoadIssue, LoadSummary, TableInfo, TableSnapshot,
};
pub use config::EngineConfig;
pub use error::{DbscopeError, Result};
pub use export::{AttachmentExporter, ExportGrouping, ExportReport, ExportedFileRecord};
pub use index::{IndexPosting, SearchIndex};
pub use search::{
    parse_hex_pattern, ScanIssue, SearchEngine, SearchMode, SearchReport, SearchRequest,
    SearchResult,
};
pub use session::Session;
pub use signature::{classify, FileKind};
pub use source::{read_manifest, PackageSource};
pub use value::{format_cell, CellValue, FormattedCell, RowMap};
