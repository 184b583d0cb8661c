//! Per-session registry of every discovered database.
//!
//! [`Catalog::load`] walks the package list once, records a
//! [`DatabaseEntry`] per readable file and snapshots every table small
//! enough to keep in memory. Larger tables stay on disk and are paged through
//! the [`TableAccessor`] on demand.
//!
//! Each successful load bumps the catalog generation. A
//! [`SearchIndex`](crate::index::SearchIndex) built from an older generation
//! is stale and must be rebuilt.

use crate::accessor::{TableAccessor, TablePage};
use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::source::PackageSource;
use crate::value::CellValue;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Generations are unique across all catalogs in the process.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// A database file known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseEntry {
    pub package_name: String,
    pub logical_dir: String,
    pub database_name: String,
    pub path: PathBuf,
    /// User tables, sorted by name.
    pub tables: Vec<String>,
}

/// A fully materialised small table.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    columns: Arc<[String]>,
    rows: Vec<Arc<[CellValue]>>,
    total_rows: u64,
}

impl TableSnapshot {
    fn from_page(page: TablePage, total_rows: u64) -> Self {
        Self {
            columns: page.columns.into(),
            rows: page.rows.into_iter().map(Arc::from).collect(),
            total_rows,
        }
    }

    pub fn columns(&self) -> &Arc<[String]> {
        &self.columns
    }

    pub fn rows(&self) -> &[Arc<[CellValue]>] {
        &self.rows
    }

    /// Row count reported by the database when the snapshot was taken.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    fn page(&self, limit: usize, offset: usize) -> TablePage {
        TablePage {
            columns: self.columns.to_vec(),
            rows: self
                .rows
                .iter()
                .skip(offset)
                .take(limit)
                .map(|row| row.to_vec())
                .collect(),
        }
    }
}

/// Live column and row-count information for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub table_name: String,
    pub columns: Vec<String>,
    pub row_count: u64,
    pub cached: bool,
}

/// Something `load` had to skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadIssue {
    pub package_name: String,
    pub logical_dir: String,
    pub database_name: String,
    /// `None` when the whole database was skipped.
    pub table_name: Option<String>,
    pub message: String,
}

/// Outcome of a catalog load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub generation: u64,
    pub packages: usize,
    pub databases: usize,
    pub tables: usize,
    pub cached_tables: usize,
    pub issues: Vec<LoadIssue>,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogStats {
    pub total_packages: usize,
    pub total_databases: usize,
    pub total_tables: usize,
    pub total_cached_tables: usize,
    pub packages: Vec<PackageStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PackageStats {
    pub package_name: String,
    pub databases: usize,
    pub tables: usize,
    pub directories: Vec<DirectoryStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryStats {
    pub logical_dir: String,
    pub databases: usize,
    pub tables: usize,
    pub database_details: Vec<DatabaseStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseStats {
    pub database_name: String,
    pub tables: usize,
    pub cached_tables: usize,
    pub table_names: Vec<String>,
}

#[derive(Debug, Clone)]
struct CatalogedDatabase {
    entry: DatabaseEntry,
    snapshots: HashMap<String, TableSnapshot>,
}

/// package -> logical_dir -> database -> position in `databases`.
type Lookup = HashMap<String, HashMap<String, HashMap<String, usize>>>;

/// The catalog of one investigation session.
///
/// Reads take `&self` and may run concurrently. [`load`](Self::load) takes
/// `&mut self`; an application sharing a catalog across threads wraps it in
/// a lock so that a reload never overlaps outstanding reads.
#[derive(Debug, Clone)]
pub struct Catalog {
    config: EngineConfig,
    accessor: TableAccessor,
    generation: u64,
    databases: Vec<CatalogedDatabase>,
    lookup: Lookup,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            accessor: TableAccessor::new(&config),
            config,
            generation: 0,
            databases: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn accessor(&self) -> &TableAccessor {
        &self.accessor
    }

    /// Identifies the state produced by the most recent successful load.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace the catalog with the databases listed in `packages`.
    ///
    /// Missing files are ignored. An unreadable database or table is logged,
    /// recorded in the summary and skipped. If `cancel` fires, the previous
    /// catalog state is kept and `Cancelled` is returned.
    pub fn load(
        &mut self,
        packages: &[PackageSource],
        cancel: &CancellationToken,
    ) -> Result<LoadSummary> {
        let start = Instant::now();
        let mut databases = Vec::new();
        let mut lookup = Lookup::new();
        let mut summary = LoadSummary::default();

        info!("Loading catalog from {} packages", packages.len());
        cancel.check()?;

        for package in packages {
            for dir in &package.database_files {
                for file in &dir.files {
                    cancel.check()?;

                    if !file.file_path.exists() {
                        debug!("Skipping missing file {}", file.file_path.display());
                        continue;
                    }

                    let slot = lookup
                        .entry(package.package_name.clone())
                        .or_default()
                        .entry(dir.logical_dir.clone())
                        .or_default();
                    if slot.contains_key(&file.file_name) {
                        warn!(
                            "Duplicate database {}/{}/{}, keeping the first",
                            package.package_name, dir.logical_dir, file.file_name
                        );
                        continue;
                    }

                    let issue = |table_name: Option<&str>, message: String| LoadIssue {
                        package_name: package.package_name.clone(),
                        logical_dir: dir.logical_dir.clone(),
                        database_name: file.file_name.clone(),
                        table_name: table_name.map(str::to_string),
                        message,
                    };

                    let tables = match self.accessor.list_tables(&file.file_path) {
                        Ok(tables) => tables,
                        Err(err) => {
                            warn!(
                                "Skipping database {}: {}",
                                file.file_path.display(),
                                err
                            );
                            summary.issues.push(issue(None, err.to_string()));
                            continue;
                        }
                    };

                    debug!(
                        "Preloading {}/{}/{} ({} tables)",
                        package.package_name,
                        dir.logical_dir,
                        file.file_name,
                        tables.len()
                    );

                    let mut snapshots = HashMap::new();
                    for table in &tables {
                        cancel.check()?;
                        match self.snapshot_table(&file.file_path, table) {
                            Ok(Some(snapshot)) => {
                                snapshots.insert(table.clone(), snapshot);
                            }
                            Ok(None) => {}
                            Err(err) => {
                                warn!("Skipping table {}: {}", table, err);
                                summary.issues.push(issue(Some(table), err.to_string()));
                            }
                        }
                    }

                    summary.tables += tables.len();
                    summary.cached_tables += snapshots.len();
                    slot.insert(file.file_name.clone(), databases.len());
                    databases.push(CatalogedDatabase {
                        entry: DatabaseEntry {
                            package_name: package.package_name.clone(),
                            logical_dir: dir.logical_dir.clone(),
                            database_name: file.file_name.clone(),
                            path: file.file_path.clone(),
                            tables,
                        },
                        snapshots,
                    });
                }
            }
        }

        // Drop packages and directories that ended up without a readable database.
        for dirs in lookup.values_mut() {
            dirs.retain(|_, dbs| !dbs.is_empty());
        }
        lookup.retain(|_, dirs| !dirs.is_empty());

        self.generation = NEXT_GENERATION.fetch_add(1, Ordering::SeqCst);
        self.databases = databases;
        self.lookup = lookup;

        summary.generation = self.generation;
        summary.packages = self.lookup.len();
        summary.databases = self.databases.len();
        summary.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        info!(
            "Catalog loaded: {} packages, {} databases, {} tables ({} cached, {} issues)",
            summary.packages,
            summary.databases,
            summary.tables,
            summary.cached_tables,
            summary.issues.len()
        );

        Ok(summary)
    }

    /// Snapshot `table` if it is small enough. `Ok(None)` means it stays on disk.
    fn snapshot_table(&self, path: &std::path::Path, table: &str) -> Result<Option<TableSnapshot>> {
        let row_count = self.accessor.row_count(path, table)?;
        if row_count > self.config.cache_row_threshold {
            debug!("Leaving {} on disk ({} rows)", table, row_count);
            return Ok(None);
        }
        let page = self.accessor.try_read_page(path, table, None, 0)?;
        debug!("Cached {} ({} rows)", table, row_count);
        Ok(Some(TableSnapshot::from_page(page, row_count)))
    }

    fn position(&self, package: &str, logical_dir: &str, database: &str) -> Option<usize> {
        self.lookup.get(package)?.get(logical_dir)?.get(database).copied()
    }

    /// Every database in load order.
    pub fn databases(&self) -> impl Iterator<Item = &DatabaseEntry> {
        self.databases.iter().map(|db| &db.entry)
    }

    pub fn database(&self, package: &str, logical_dir: &str, database: &str) -> Option<&DatabaseEntry> {
        self.position(package, logical_dir, database)
            .map(|i| &self.databases[i].entry)
    }

    pub fn snapshot(
        &self,
        package: &str,
        logical_dir: &str,
        database: &str,
        table: &str,
    ) -> Option<&TableSnapshot> {
        self.position(package, logical_dir, database)
            .and_then(|i| self.databases[i].snapshots.get(table))
    }

    /// Whether `table` was materialised in memory at load time.
    pub fn is_cached(&self, package: &str, logical_dir: &str, database: &str, table: &str) -> bool {
        self.snapshot(package, logical_dir, database, table).is_some()
    }

    /// Every snapshot, in database order and then table-name order.
    pub fn snapshots(&self) -> impl Iterator<Item = (&DatabaseEntry, &str, &TableSnapshot)> {
        self.databases.iter().flat_map(|db| {
            db.entry.tables.iter().filter_map(move |table| {
                db.snapshots
                    .get(table)
                    .map(|snapshot| (&db.entry, table.as_str(), snapshot))
            })
        })
    }

    /// Page through a table. Snapshotted tables are sliced in memory; others
    /// are read from disk. Unknown locations yield an empty page.
    pub fn get_table_page(
        &self,
        package: &str,
        logical_dir: &str,
        database: &str,
        table: &str,
        limit: usize,
        offset: usize,
    ) -> TablePage {
        let Some(index) = self.position(package, logical_dir, database) else {
            return TablePage::default();
        };
        let db = &self.databases[index];
        if let Some(snapshot) = db.snapshots.get(table) {
            return snapshot.page(limit, offset);
        }
        self.accessor
            .read_page(&db.entry.path, table, Some(limit), offset)
    }

    /// Columns and a live row count for one catalogued table.
    pub fn table_info(
        &self,
        package: &str,
        logical_dir: &str,
        database: &str,
        table: &str,
    ) -> Option<TableInfo> {
        let db = &self.databases[self.position(package, logical_dir, database)?];
        if !db.entry.tables.iter().any(|t| t == table) {
            return None;
        }
        let result = self
            .accessor
            .columns(&db.entry.path, table)
            .and_then(|columns| Ok((columns, self.accessor.row_count(&db.entry.path, table)?)));
        match result {
            Ok((columns, row_count)) => Some(TableInfo {
                table_name: table.to_string(),
                columns,
                row_count,
                cached: db.snapshots.contains_key(table),
            }),
            Err(err) => {
                warn!("Failed to read table info for {}: {}", table, err);
                None
            }
        }
    }

    /// Counts per package, directory and database.
    pub fn statistics(&self) -> CatalogStats {
        let mut stats = CatalogStats::default();
        let mut package_pos: HashMap<&str, usize> = HashMap::new();

        for db in &self.databases {
            let entry = &db.entry;
            let table_count = entry.tables.len();

            let p = *package_pos
                .entry(entry.package_name.as_str())
                .or_insert_with(|| {
                    stats.packages.push(PackageStats {
                        package_name: entry.package_name.clone(),
                        ..PackageStats::default()
                    });
                    stats.packages.len() - 1
                });
            let package = &mut stats.packages[p];

            let d = match package
                .directories
                .iter()
                .position(|dir| dir.logical_dir == entry.logical_dir)
            {
                Some(d) => d,
                None => {
                    package.directories.push(DirectoryStats {
                        logical_dir: entry.logical_dir.clone(),
                        ..DirectoryStats::default()
                    });
                    package.directories.len() - 1
                }
            };
            let dir = &mut package.directories[d];

            dir.databases += 1;
            dir.tables += table_count;
            dir.database_details.push(DatabaseStats {
                database_name: entry.database_name.clone(),
                tables: table_count,
                cached_tables: db.snapshots.len(),
                table_names: entry.tables.clone(),
            });
            package.databases += 1;
            package.tables += table_count;

            stats.total_databases += 1;
            stats.total_tables += table_count;
            stats.total_cached_tables += db.snapshots.len();
        }

        stats.total_packages = stats.packages.len();
        stats
    }
}
