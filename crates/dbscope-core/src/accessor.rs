//! Read-only access to a single recovered database file.
//!
//! Every call opens its own connection and drops it before returning, so a
//! caller that stops waiting on a long operation never leaves a file locked.
//! Table and column names come from untrusted files: they are always quoted
//! with [`quote_identifier`], and values are bound as parameters.
//!
//! Column names are always taken from the statement that produced the rows,
//! so generated columns (which `SELECT *` returns but `table_info` hides)
//! keep their position.
//!
//! Text filters run through two SQL functions registered on every
//! connection, [`CELL_TEXT_FN`] and [`CELL_TEXT_LOWER_FN`]. They render a
//! cell exactly as [`CellValue::search_text`] does, so a disk scan matches the
//! same text the search index and search results use.

use crate::config::EngineConfig;
use crate::error::{DbscopeError, Result};
use crate::value::{value_ref_text, CellValue};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OpenFlags, Statement};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Column names plus a page of rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TablePage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl TablePage {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }
}

/// How a fallback query filters a column.
#[derive(Debug, Clone, Copy)]
pub enum ColumnFilter<'a> {
    /// Text containment. `needle` must already be lowercased when
    /// `case_sensitive` is false.
    Contains { needle: &'a str, case_sensitive: bool },
    /// Byte containment, restricted to blob cells.
    Bytes(&'a [u8]),
}

/// A row that matched a [`ColumnFilter`] on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnHit {
    pub column_index: usize,
    pub row: Vec<CellValue>,
}

/// Result of filtering every column of a table.
#[derive(Debug, Clone, Default)]
pub struct TableScan {
    pub columns: Vec<String>,
    /// Hits in column order, then row order.
    pub hits: Vec<ColumnHit>,
    /// Columns whose query failed, with the error text.
    pub column_errors: Vec<(String, String)>,
}

/// SQL function returning a cell's search text.
pub const CELL_TEXT_FN: &str = "dbscope_cell_text";
/// SQL function returning a cell's search text, lowercased with Unicode rules.
pub const CELL_TEXT_LOWER_FN: &str = "dbscope_cell_text_lower";

/// Quote a table or column name for use in SQL text.
///
/// Embedded double quotes are doubled. NUL cannot be represented in a SQLite
/// identifier and is rejected.
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.contains('\0') {
        return Err(DbscopeError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Opens short-lived read-only connections and applies the lock retry policy.
#[derive(Debug, Clone)]
pub struct TableAccessor {
    busy_timeout: Duration,
    retry_busy_timeout: Duration,
    lock_retry_delay: Duration,
}

impl Default for TableAccessor {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl TableAccessor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            busy_timeout: config.busy_timeout,
            retry_busy_timeout: config.retry_busy_timeout,
            lock_retry_delay: config.lock_retry_delay,
        }
    }

    fn open(path: &Path, busy_timeout: Duration) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DbscopeError::Database {
            message: format!("Failed to open {}: {}", path.display(), e),
            source: Some(e),
        })?;
        conn.busy_timeout(busy_timeout)?;
        register_text_functions(&conn)?;
        Ok(conn)
    }

    /// Run `op` on a fresh connection. A locked database gets exactly one more
    /// attempt on another fresh connection after a fixed pause.
    fn with_retry<T>(
        &self,
        path: &Path,
        mut op: impl FnMut(&Connection) -> Result<T>,
    ) -> Result<T> {
        let first = Self::open(path, self.busy_timeout).and_then(|conn| op(&conn));
        match first {
            Err(err) if err.is_lock_contention() => {
                warn!(
                    "Database {} is locked, retrying in {:?}",
                    path.display(),
                    self.lock_retry_delay
                );
                std::thread::sleep(self.lock_retry_delay);
                Self::open(path, self.retry_busy_timeout).and_then(|conn| op(&conn))
            }
            other => other,
        }
    }

    /// Names of all user tables, sorted. SQLite's internal tables are skipped.
    pub fn list_tables(&self, path: &Path) -> Result<Vec<String>> {
        self.with_retry(path, |conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
                 ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
    }

    /// Column names in declaration order.
    pub fn columns(&self, path: &Path, table: &str) -> Result<Vec<String>> {
        let sql = format!("SELECT * FROM {} LIMIT 0", quote_identifier(table)?);
        self.with_retry(path, |conn| Ok(statement_columns(&conn.prepare(&sql)?)))
    }

    pub fn row_count(&self, path: &Path, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table)?);
        self.with_retry(path, |conn| {
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
    }

    /// Read a page of rows. `limit = None` reads the whole table.
    ///
    /// Errors are propagated; see [`read_page`](Self::read_page) for the
    /// degrading variant.
    pub fn try_read_page(
        &self,
        path: &Path,
        table: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<TablePage> {
        let sql = format!(
            "SELECT * FROM {} LIMIT ?1 OFFSET ?2",
            quote_identifier(table)?
        );
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let offset = offset as i64;

        self.with_retry(path, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns = statement_columns(&stmt);
            let rows = collect_rows(&mut stmt, params![limit, offset])?;
            Ok(TablePage { columns, rows })
        })
    }

    /// Read a page of rows, degrading to an empty page on any failure.
    pub fn read_page(
        &self,
        path: &Path,
        table: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> TablePage {
        match self.try_read_page(path, table, limit, offset) {
            Ok(page) => {
                debug!(
                    "Read {} rows from {}/{}",
                    page.rows.len(),
                    path.display(),
                    table
                );
                page
            }
            Err(err) => {
                warn!(
                    "Failed to read table {} from {}: {}",
                    table,
                    path.display(),
                    err
                );
                TablePage::default()
            }
        }
    }

    /// Run `filter` against every column of `table` on a single connection.
    ///
    /// At most `limit_per_column` rows are returned per column. A failing
    /// column is recorded in [`TableScan::column_errors`] and the remaining
    /// columns are still searched.
    pub fn scan_columns(
        &self,
        path: &Path,
        table: &str,
        filter: ColumnFilter<'_>,
        limit_per_column: usize,
    ) -> Result<TableScan> {
        let quoted_table = quote_identifier(table)?;
        let limit = limit_per_column as i64;
        let columns_sql = format!("SELECT * FROM {quoted_table} LIMIT 0");

        self.with_retry(path, |conn| {
            let columns = statement_columns(&conn.prepare(&columns_sql)?);
            let mut scan = TableScan {
                columns: columns.clone(),
                ..TableScan::default()
            };

            for (column_index, column) in columns.iter().enumerate() {
                let rows = quote_identifier(column).and_then(|quoted_column| {
                    let (sql, rows) = match filter {
                        ColumnFilter::Contains {
                            needle,
                            case_sensitive: true,
                        } => {
                            let sql = format!(
                                "SELECT * FROM {quoted_table} WHERE instr({CELL_TEXT_FN}({quoted_column}), ?1) > 0 LIMIT ?2"
                            );
                            let mut stmt = conn.prepare(&sql)?;
                            let rows = collect_rows(&mut stmt, params![needle, limit])?;
                            (sql, rows)
                        }
                        ColumnFilter::Contains {
                            needle,
                            case_sensitive: false,
                        } => {
                            let sql = format!(
                                "SELECT * FROM {quoted_table} WHERE instr({CELL_TEXT_LOWER_FN}({quoted_column}), ?1) > 0 LIMIT ?2"
                            );
                            let mut stmt = conn.prepare(&sql)?;
                            let rows = collect_rows(&mut stmt, params![needle, limit])?;
                            (sql, rows)
                        }
                        ColumnFilter::Bytes(pattern) => {
                            let sql = format!(
                                "SELECT * FROM {quoted_table} \
                                 WHERE typeof({quoted_column}) = 'blob' AND instr({quoted_column}, ?1) > 0 \
                                 LIMIT ?2"
                            );
                            let mut stmt = conn.prepare(&sql)?;
                            let rows = collect_rows(&mut stmt, params![pattern, limit])?;
                            (sql, rows)
                        }
                    };
                    debug!("{} -> {} rows", sql, rows.len());
                    Ok(rows)
                });

                match rows {
                    Ok(rows) => scan.hits.extend(
                        rows.into_iter()
                            .map(|row| ColumnHit { column_index, row }),
                    ),
                    // A lock surfacing mid-scan aborts the attempt so the retry
                    // policy can take over.
                    Err(err) if err.is_lock_contention() => return Err(err),
                    Err(err) => {
                        debug!("Skipping column {}.{}: {}", table, column, err);
                        scan.column_errors.push((column.clone(), err.to_string()));
                    }
                }
            }

            Ok(scan)
        })
    }

    /// Stream every row of `table` together with its rowid.
    ///
    /// Tables declared `WITHOUT ROWID` fail here and are reported as errors.
    /// An error returned by `on_row` stops the scan and is propagated.
    pub fn for_each_row_with_rowid(
        &self,
        path: &Path,
        table: &str,
        mut on_row: impl FnMut(&[String], i64, Vec<CellValue>) -> Result<()>,
    ) -> Result<()> {
        let sql = format!("SELECT rowid, * FROM {}", quote_identifier(table)?);
        let mut delivered = 0usize;

        self.with_retry(path, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            // Skip the leading rowid.
            let columns: Vec<String> = statement_columns(&stmt).into_iter().skip(1).collect();
            let width = stmt.column_count();
            let mut rows = stmt.query([])?;
            // Rows already handed out are not replayed by a retry.
            let mut seen = 0usize;
            while let Some(row) = rows.next()? {
                seen += 1;
                if seen <= delivered {
                    continue;
                }
                let rowid: i64 = row.get(0)?;
                let values = (1..width)
                    .map(|i| row.get_ref(i).map(CellValue::from))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                on_row(&columns, rowid, values)?;
                delivered += 1;
            }
            Ok(())
        })
    }
}

/// Result column names of a prepared statement, in result order.
fn statement_columns(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(str::to_string).collect()
}

fn register_text_functions(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function(CELL_TEXT_FN, 1, flags, |ctx| {
        Ok(value_ref_text(ctx.get_raw(0)).map(|text| text.into_owned()))
    })?;
    conn.create_scalar_function(CELL_TEXT_LOWER_FN, 1, flags, |ctx| {
        Ok(value_ref_text(ctx.get_raw(0)).map(|text| text.to_lowercase()))
    })?;
    Ok(())
}

fn collect_rows(
    stmt: &mut Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<Vec<CellValue>>> {
    let width = stmt.column_count();
    let rows = stmt
        .query_map(params, |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(CellValue::from))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
