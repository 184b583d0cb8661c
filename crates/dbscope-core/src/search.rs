//! Plain, regex and byte-pattern search across the whole catalog.
//!
//! Plain searches consult the [`SearchIndex`] first and fall back to a live
//! per-column scan when the index produced fewer than
//! `fallback_threshold` hits. Regex and byte searches always scan the files.
//! Results are deduplicated on
//! `(package, database, table, column, match_value)` in every mode.

use crate::accessor::ColumnFilter;
use crate::cancel::CancellationToken;
use crate::catalog::{Catalog, DatabaseEntry};
use crate::error::{DbscopeError, Result};
use crate::index::{tokenize, SearchIndex};
use crate::value::{CellValue, RowMap};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How the search term is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Substring containment on the stringified cell.
    #[default]
    Plain,
    /// Regular expression on the stringified cell.
    Regex,
    /// Hex-encoded byte sequence, matched against blob cells only.
    BytePattern,
}

/// A single search invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub term: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub mode: SearchMode,
}

impl SearchRequest {
    pub fn plain(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            case_sensitive: false,
            mode: SearchMode::Plain,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            mode: SearchMode::Regex,
            ..Self::plain(pattern)
        }
    }

    pub fn bytes(hex_pattern: impl Into<String>) -> Self {
        Self {
            mode: SearchMode::BytePattern,
            ..Self::plain(hex_pattern)
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

/// One matching cell, with enough location data to navigate back to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub package_name: String,
    pub logical_dir: String,
    pub database_name: String,
    pub table_name: String,
    pub column_name: String,
    pub row: RowMap,
    pub match_value: String,
}

type DedupKey = (String, String, String, String, String);

impl SearchResult {
    fn dedup_key(&self) -> DedupKey {
        (
            self.package_name.clone(),
            self.database_name.clone(),
            self.table_name.clone(),
            self.column_name.clone(),
            self.match_value.clone(),
        )
    }
}

/// A table or column the scan could not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanIssue {
    pub package_name: String,
    pub logical_dir: String,
    pub database_name: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub message: String,
}

/// Everything a search produced.
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub term: String,
    pub mode: SearchMode,
    pub case_sensitive: bool,
    pub results: Vec<SearchResult>,
    /// How many of `results` came from the index.
    pub index_hits: usize,
    pub fallback_used: bool,
    pub issues: Vec<ScanIssue>,
    pub elapsed_ms: f64,
}

/// Decode a byte-pattern term. The term must be a non-empty, even-length
/// string of hex digits.
pub fn parse_hex_pattern(term: &str) -> Result<Vec<u8>> {
    if term.is_empty() {
        return Err(DbscopeError::validation("pattern", "hex pattern is empty"));
    }
    if let Some(bad) = term.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(DbscopeError::validation(
            "pattern",
            format!("{bad:?} is not a hex digit"),
        ));
    }
    if term.len() % 2 != 0 {
        return Err(DbscopeError::validation(
            "pattern",
            "hex pattern must have an even number of digits",
        ));
    }
    hex::decode(term).map_err(|e| DbscopeError::validation("pattern", e.to_string()))
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Accumulates results in order, dropping duplicates.
#[derive(Default)]
struct Collector {
    results: Vec<SearchResult>,
    seen: HashSet<DedupKey>,
    issues: Vec<ScanIssue>,
}

impl Collector {
    fn push(&mut self, result: SearchResult) {
        if self.seen.insert(result.dedup_key()) {
            self.results.push(result);
        }
    }

    fn issue(&mut self, entry: &DatabaseEntry, table: &str, column: Option<&str>, message: String) {
        self.issues.push(ScanIssue {
            package_name: entry.package_name.clone(),
            logical_dir: entry.logical_dir.clone(),
            database_name: entry.database_name.clone(),
            table_name: table.to_string(),
            column_name: column.map(str::to_string),
            message,
        });
    }
}

fn result_for(
    entry: &DatabaseEntry,
    table: &str,
    columns: &[String],
    column_index: usize,
    row: &[CellValue],
    match_value: String,
) -> SearchResult {
    SearchResult {
        package_name: entry.package_name.clone(),
        logical_dir: entry.logical_dir.clone(),
        database_name: entry.database_name.clone(),
        table_name: table.to_string(),
        column_name: columns[column_index].clone(),
        row: RowMap::from_parts(columns, row),
        match_value,
    }
}

/// Answers searches against one catalog and the index built from it.
#[derive(Debug, Clone, Copy)]
pub struct SearchEngine<'a> {
    catalog: &'a Catalog,
    index: &'a SearchIndex,
}

impl<'a> SearchEngine<'a> {
    /// Pair a catalog with its index. Fails if the index was built from a
    /// different catalog generation.
    pub fn new(catalog: &'a Catalog, index: &'a SearchIndex) -> Result<Self> {
        if catalog.generation() != index.generation() {
            return Err(DbscopeError::StaleIndex {
                catalog_generation: catalog.generation(),
                index_generation: index.generation(),
            });
        }
        Ok(Self { catalog, index })
    }

    /// Run one search.
    ///
    /// The term is matched as given, surrounding whitespace included; a
    /// byte pattern alone is trimmed before decoding.
    ///
    /// Invalid input (empty term, bad regex, malformed hex) is returned as a
    /// validation error. Unreadable tables and columns are skipped and listed
    /// in [`SearchReport::issues`].
    pub fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchReport> {
        let start = Instant::now();
        // Whitespace is part of the term; it only decides emptiness.
        let term = request.term.as_str();
        if term.trim().is_empty() {
            return Err(DbscopeError::validation("term", "search term is empty"));
        }
        cancel.check()?;

        let mut collector = Collector::default();
        let mut index_hits = 0;
        let mut fallback_used = false;

        match request.mode {
            SearchMode::Plain => {
                index_hits = self.search_index(term, request.case_sensitive, &mut collector, cancel)?;
                if collector.results.len() < self.catalog.config().fallback_threshold {
                    fallback_used = true;
                    let needle = if request.case_sensitive {
                        term.to_string()
                    } else {
                        term.to_lowercase()
                    };
                    self.fallback_scan(
                        ColumnFilter::Contains {
                            needle: &needle,
                            case_sensitive: request.case_sensitive,
                        },
                        &mut collector,
                        cancel,
                    )?;
                }
            }
            SearchMode::Regex => {
                let regex = RegexBuilder::new(term)
                    .case_insensitive(!request.case_sensitive)
                    .build()
                    .map_err(|e| DbscopeError::validation("pattern", e.to_string()))?;
                fallback_used = true;
                self.regex_scan(&regex, &mut collector, cancel)?;
            }
            SearchMode::BytePattern => {
                let pattern = parse_hex_pattern(term.trim())?;
                fallback_used = true;
                self.fallback_scan(ColumnFilter::Bytes(&pattern), &mut collector, cancel)?;
            }
        }

        info!(
            "Search {:?} ({:?}, case_sensitive={}) found {} results ({} from index)",
            term,
            request.mode,
            request.case_sensitive,
            collector.results.len(),
            index_hits
        );

        Ok(SearchReport {
            term: term.to_string(),
            mode: request.mode,
            case_sensitive: request.case_sensitive,
            results: collector.results,
            index_hits,
            fallback_used,
            issues: collector.issues,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Index pass of a plain search. Returns the number of results added.
    fn search_index(
        &self,
        term: &str,
        case_sensitive: bool,
        collector: &mut Collector,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let folded_term = term.to_lowercase();
        let needle = if case_sensitive { term } else { folded_term.as_str() };

        let mut words: Vec<&str> = Vec::new();
        for word in tokenize(&folded_term) {
            if !words.contains(&word) {
                words.push(word);
            }
        }

        let before = collector.results.len();
        let mut visited = 0usize;
        for word in words {
            for posting in self.index.lookup(word) {
                visited += 1;
                cancel.check_every(visited)?;

                let matched = if case_sensitive {
                    posting.match_value().contains(needle)
                } else {
                    posting.match_value().to_lowercase().contains(needle)
                };
                if !matched {
                    continue;
                }

                let location = posting.location();
                collector.push(SearchResult {
                    package_name: location.package_name.clone(),
                    logical_dir: location.logical_dir.clone(),
                    database_name: location.database_name.clone(),
                    table_name: location.table_name.clone(),
                    column_name: posting.column_name().to_string(),
                    row: RowMap::from_parts(&location.columns, posting.row()),
                    match_value: posting.match_value().to_string(),
                });
            }
        }

        debug!("Index pass visited {} postings", visited);
        Ok(collector.results.len() - before)
    }

    /// Live per-column scan of every table in the catalog.
    fn fallback_scan(
        &self,
        filter: ColumnFilter<'_>,
        collector: &mut Collector,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let accessor = self.catalog.accessor();
        let limit = self.catalog.config().fallback_column_limit;

        for entry in self.catalog.databases() {
            for table in &entry.tables {
                cancel.check()?;

                let scan = match accessor.scan_columns(&entry.path, table, filter, limit) {
                    Ok(scan) => scan,
                    Err(err) => {
                        warn!(
                            "Search skipped {}/{}: {}",
                            entry.path.display(),
                            table,
                            err
                        );
                        collector.issue(entry, table, None, err.to_string());
                        continue;
                    }
                };

                for (column, message) in scan.column_errors {
                    collector.issue(entry, table, Some(&column), message);
                }

                for hit in scan.hits {
                    let Some(value) = hit.row.get(hit.column_index) else {
                        continue;
                    };
                    if let ColumnFilter::Bytes(pattern) = filter {
                        match value.as_blob() {
                            Some(blob) if contains_bytes(blob, pattern) => {}
                            _ => continue,
                        }
                    }
                    let Some(match_value) = value.search_text().map(|t| t.into_owned()) else {
                        continue;
                    };
                    collector.push(result_for(
                        entry,
                        table,
                        &scan.columns,
                        hit.column_index,
                        &hit.row,
                        match_value,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Regex pass over the first `regex_row_cap` rows of every table.
    fn regex_scan(
        &self,
        regex: &Regex,
        collector: &mut Collector,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let accessor = self.catalog.accessor();
        let cap = self.catalog.config().regex_row_cap;

        for entry in self.catalog.databases() {
            for table in &entry.tables {
                cancel.check()?;

                let page = match accessor.try_read_page(&entry.path, table, Some(cap), 0) {
                    Ok(page) => page,
                    Err(err) => {
                        warn!(
                            "Regex search skipped {}/{}: {}",
                            entry.path.display(),
                            table,
                            err
                        );
                        collector.issue(entry, table, None, err.to_string());
                        continue;
                    }
                };

                let mut processed = 0usize;
                for column_index in 0..page.columns.len() {
                    for row in &page.rows {
                        processed += 1;
                        cancel.check_every(processed)?;

                        let Some(text) = row.get(column_index).and_then(CellValue::search_text)
                        else {
                            continue;
                        };
                        if regex.is_match(&text) {
                            let match_value = text.into_owned();
                            collector.push(result_for(
                                entry,
                                table,
                                &page.columns,
                                column_index,
                                row,
                                match_value,
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_pattern() {
        assert_eq!(parse_hex_pattern("504b0304").unwrap(), vec![0x50, 0x4b, 0x03, 0x04]);
        assert_eq!(parse_hex_pattern("FFd8").unwrap(), vec![0xff, 0xd8]);
    }

    #[test]
    fn test_parse_hex_pattern_rejects_bad_input() {
        for bad in ["", "abc", "zz", "50 4b", "0x50"] {
            let err = parse_hex_pattern(bad).unwrap_err();
            assert!(err.is_validation(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_contains_bytes() {
        assert!(contains_bytes(b"abcdef", b"cde"));
        assert!(!contains_bytes(b"abc", b"abcd"));
        assert!(contains_bytes(b"abc", b""));
    }

    #[test]
    fn test_stale_index_rejected() {
        let catalog = Catalog::default();
        let index = SearchIndex::build(&catalog);
        assert!(SearchEngine::new(&catalog, &index).is_ok());

        let mut reloaded = catalog.clone();
        reloaded.load(&[], &CancellationToken::new()).unwrap();
        let err = SearchEngine::new(&reloaded, &index).unwrap_err();
        assert!(matches!(err, DbscopeError::StaleIndex { .. }));
    }

    #[test]
    fn test_empty_term_rejected() {
        let catalog = Catalog::default();
        let index = SearchIndex::build(&catalog);
        let engine = SearchEngine::new(&catalog, &index).unwrap();
        let err = engine
            .search(&SearchRequest::plain("   "), &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_invalid_regex_is_validation_error() {
        let catalog = Catalog::default();
        let index = SearchIndex::build(&catalog);
        let engine = SearchEngine::new(&catalog, &index).unwrap();
        let err = engine
            .search(&SearchRequest::regex("(unclosed"), &CancellationToken::new())
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_request_builders() {
        let request = SearchRequest::bytes("ffd8").case_sensitive(true);
        assert_eq!(request.mode, SearchMode::BytePattern);
        assert!(request.case_sensitive);
        assert_eq!(SearchRequest::plain("x").mode, SearchMode::Plain);
    }
}
