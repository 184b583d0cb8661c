//! One investigation session: a catalog plus the index built from it.
//!
//! `Session` is the only place that reloads a catalog, and it always rebuilds
//! the index in the same step, so callers cannot pair a fresh catalog with a
//! stale index by accident.
//!
//! # Concurrency
//!
//! All read operations take `&self` and are safe to run from several threads
//! at once. [`Session::load`] takes `&mut self`: an application sharing a
//! session wraps it in an `RwLock` (single writer, many readers). The session
//! holds no database connection between calls.

use crate::accessor::TablePage;
use crate::cancel::CancellationToken;
use crate::catalog::{Catalog, CatalogStats, LoadSummary, TableInfo};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::export::{AttachmentExporter, ExportGrouping, ExportReport};
use crate::index::SearchIndex;
use crate::search::{SearchEngine, SearchReport, SearchRequest};
use crate::source::PackageSource;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct Session {
    catalog: Catalog,
    index: SearchIndex,
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        let catalog = Catalog::new(config);
        let index = SearchIndex::build(&catalog);
        Self { catalog, index }
    }

    /// Load `packages`, replacing the catalog and rebuilding the index.
    ///
    /// On error (including cancellation) the previous catalog and index are
    /// left in place.
    pub fn load(
        &mut self,
        packages: &[PackageSource],
        cancel: &CancellationToken,
    ) -> Result<LoadSummary> {
        let summary = self.catalog.load(packages, cancel)?;
        self.index = SearchIndex::build(&self.catalog);
        info!(
            "Session loaded generation {}: {} databases, {} tables ({} cached), {} index tokens",
            summary.generation,
            summary.databases,
            summary.tables,
            summary.cached_tables,
            self.index.token_count()
        );
        Ok(summary)
    }

    pub fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchReport> {
        SearchEngine::new(&self.catalog, &self.index)?.search(request, cancel)
    }

    pub fn table_page(
        &self,
        package: &str,
        logical_dir: &str,
        database: &str,
        table: &str,
        limit: usize,
        offset: usize,
    ) -> TablePage {
        self.catalog
            .get_table_page(package, logical_dir, database, table, limit, offset)
    }

    pub fn table_info(
        &self,
        package: &str,
        logical_dir: &str,
        database: &str,
        table: &str,
    ) -> Option<TableInfo> {
        self.catalog.table_info(package, logical_dir, database, table)
    }

    pub fn statistics(&self) -> CatalogStats {
        self.catalog.statistics()
    }

    pub fn export_attachments(
        &self,
        root: &Path,
        grouping: ExportGrouping,
        cancel: &CancellationToken,
    ) -> Result<ExportReport> {
        AttachmentExporter::new(&self.catalog).export(root, grouping, cancel)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }
}
