//! Attachment extraction.
//!
//! Every row of every catalogued table is streamed from disk with its rowid.
//! Blob cells larger than `attachment_min_bytes` are classified by signature
//! and written out; unclassified blobs are ignored.
//!
//! Two layouts are supported:
//!
//! - [`ExportGrouping::ByType`]: `<root>/<ext>/<db>_<table>_<column>_<rowid>.<ext>`
//! - [`ExportGrouping::ByPackage`]: `<root>/<package>/<db>_<n>.<ext>`, with `n`
//!   counted per (package, database)

use crate::cancel::CancellationToken;
use crate::catalog::{Catalog, DatabaseEntry};
use crate::error::{DbscopeError, Result};
use crate::search::ScanIssue;
use crate::signature::{classify, FileKind};
use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Characters that cannot appear in a file name on at least one common
/// filesystem.
const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Device names Windows refuses as file stems.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const MAX_COMPONENT_CHARS: usize = 120;

/// Output directory layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportGrouping {
    #[default]
    ByType,
    ByPackage,
}

/// One file written by the exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFileRecord {
    pub package_name: String,
    pub database_name: String,
    pub table_name: String,
    pub column_name: String,
    pub row_id: i64,
    pub file_kind: FileKind,
    pub path: PathBuf,
    pub size: u64,
}

/// Outcome of an export run.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub total_files: usize,
    pub destination_root: PathBuf,
    pub grouping: ExportGrouping,
    /// File counts per package or per extension, depending on `grouping`.
    pub breakdown: BTreeMap<String, usize>,
    pub files: Vec<ExportedFileRecord>,
    /// Tables that could not be read completely.
    pub skipped: Vec<ScanIssue>,
    pub elapsed_ms: f64,
}

/// Make `name` usable as a single path component.
///
/// Reserved and control characters become `_`, surrounding dots and spaces
/// are trimmed, and Windows device names get a trailing `_`.
pub fn safe_component(name: &str) -> String {
    let mut result: String = name
        .chars()
        .map(|c| {
            if c.is_control() || RESERVED_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .take(MAX_COMPONENT_CHARS)
        .collect();

    result = result.trim_matches(|c| c == '.' || c == ' ').to_string();

    let upper = result.to_uppercase();
    let stem = upper.split('.').next().unwrap_or_default();
    if RESERVED_NAMES.contains(&stem) {
        result.push('_');
    }

    if result.is_empty() {
        result = "unnamed".to_string();
    }
    result
}

/// Tracks names handed out during one run.
#[derive(Default)]
struct NameAllocator {
    used: HashSet<PathBuf>,
}

impl NameAllocator {
    /// `dir/stem.ext`, or `dir/stem_N.ext` for the first free `N` if taken.
    fn allocate(&mut self, dir: &Path, stem: &str, ext: &str) -> PathBuf {
        let mut candidate = dir.join(format!("{stem}.{ext}"));
        let mut suffix = 1u32;
        while self.used.contains(&candidate) || candidate.exists() {
            candidate = dir.join(format!("{stem}_{suffix}.{ext}"));
            suffix += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

/// Writes classified blobs from a catalog to disk.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentExporter<'a> {
    catalog: &'a Catalog,
}

impl<'a> AttachmentExporter<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Export every classified blob under `root`.
    ///
    /// `root` is deleted and recreated first; failing to do so is the only
    /// fatal error apart from cancellation. Tables that fail midway keep the
    /// files already written and are listed in [`ExportReport::skipped`].
    pub fn export(
        &self,
        root: &Path,
        grouping: ExportGrouping,
        cancel: &CancellationToken,
    ) -> Result<ExportReport> {
        let start = Instant::now();
        recreate_root(root)?;

        let mut run = ExportRun {
            root,
            grouping,
            min_bytes: self.catalog.config().attachment_min_bytes,
            names: NameAllocator::default(),
            counters: HashMap::new(),
            created_dirs: HashSet::new(),
            files: Vec::new(),
        };
        let mut skipped = Vec::new();

        for entry in self.catalog.databases() {
            for table in &entry.tables {
                cancel.check()?;

                let mut processed = 0usize;
                let outcome = self.catalog.accessor().for_each_row_with_rowid(
                    &entry.path,
                    table,
                    |columns, row_id, values| {
                        processed += 1;
                        cancel.check_every(processed)?;
                        run.export_row(entry, table, columns, row_id, &values)
                    },
                );

                match outcome {
                    Ok(()) => debug!(
                        "Scanned {} rows of {}/{} for attachments",
                        processed, entry.database_name, table
                    ),
                    Err(DbscopeError::Cancelled) => return Err(DbscopeError::Cancelled),
                    Err(err) => {
                        warn!(
                            "Attachment export skipped {}/{}: {}",
                            entry.path.display(),
                            table,
                            err
                        );
                        skipped.push(ScanIssue {
                            package_name: entry.package_name.clone(),
                            logical_dir: entry.logical_dir.clone(),
                            database_name: entry.database_name.clone(),
                            table_name: table.clone(),
                            column_name: None,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        let mut breakdown = BTreeMap::new();
        for file in &run.files {
            let key = match grouping {
                ExportGrouping::ByPackage => file.package_name.clone(),
                ExportGrouping::ByType => file.file_kind.extension().to_string(),
            };
            *breakdown.entry(key).or_insert(0) += 1;
        }

        info!(
            "Exported {} attachments to {} ({} tables skipped)",
            run.files.len(),
            root.display(),
            skipped.len()
        );

        Ok(ExportReport {
            total_files: run.files.len(),
            destination_root: root.to_path_buf(),
            grouping,
            breakdown,
            files: run.files,
            skipped,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

fn recreate_root(root: &Path) -> Result<()> {
    let unavailable = |message: String| DbscopeError::ExportDestination {
        path: root.to_path_buf(),
        message,
    };

    if root.is_dir() {
        std::fs::remove_dir_all(root)
            .map_err(|e| unavailable(format!("failed to clear: {e}")))?;
    } else if root.exists() {
        return Err(unavailable("exists and is not a directory".to_string()));
    }
    std::fs::create_dir_all(root).map_err(|e| unavailable(format!("failed to create: {e}")))
}

/// Mutable state of one export call.
struct ExportRun<'r> {
    root: &'r Path,
    grouping: ExportGrouping,
    min_bytes: usize,
    names: NameAllocator,
    counters: HashMap<(String, String), usize>,
    created_dirs: HashSet<PathBuf>,
    files: Vec<ExportedFileRecord>,
}

impl ExportRun<'_> {
    fn export_row(
        &mut self,
        entry: &DatabaseEntry,
        table: &str,
        columns: &[String],
        row_id: i64,
        values: &[CellValue],
    ) -> Result<()> {
        for (column_index, value) in values.iter().enumerate() {
            let Some(blob) = value.as_blob() else {
                continue;
            };
            if blob.len() <= self.min_bytes {
                continue;
            }
            let Some(kind) = classify(blob) else {
                continue;
            };

            let column = columns
                .get(column_index)
                .cloned()
                .unwrap_or_else(|| format!("col_{column_index}"));
            let path = self.destination(entry, table, &column, row_id, kind)?;

            std::fs::write(&path, blob).map_err(|e| DbscopeError::io_with_path(e, &path))?;

            self.files.push(ExportedFileRecord {
                package_name: entry.package_name.clone(),
                database_name: entry.database_name.clone(),
                table_name: table.to_string(),
                column_name: column,
                row_id,
                file_kind: kind,
                path,
                size: blob.len() as u64,
            });
        }
        Ok(())
    }

    fn destination(
        &mut self,
        entry: &DatabaseEntry,
        table: &str,
        column: &str,
        row_id: i64,
        kind: FileKind,
    ) -> Result<PathBuf> {
        let ext = kind.extension();
        let (dir, stem) = match self.grouping {
            ExportGrouping::ByPackage => {
                let counter = self
                    .counters
                    .entry((entry.package_name.clone(), entry.database_name.clone()))
                    .or_insert(0);
                *counter += 1;
                (
                    self.root.join(safe_component(&entry.package_name)),
                    safe_component(&format!("{}_{}", entry.database_name, counter)),
                )
            }
            ExportGrouping::ByType => (
                self.root.join(ext),
                safe_component(&format!(
                    "{}_{}_{}_{}",
                    entry.database_name, table, column, row_id
                )),
            ),
        };

        if !self.created_dirs.contains(&dir) {
            std::fs::create_dir_all(&dir).map_err(|e| DbscopeError::io_with_path(e, &dir))?;
            self.created_dirs.insert(dir.clone());
        }
        Ok(self.names.allocate(&dir, &stem, ext))
    }
}
