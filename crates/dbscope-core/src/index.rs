//! Inverted token index over snapshotted tables.
//!
//! The index only covers tables the catalog materialised in memory. Tables
//! left on disk contribute nothing, so the search engine still runs a
//! fallback scan when index hits are sparse. Postings are never invalidated
//! individually: a reloaded catalog needs a freshly built index.

use crate::catalog::Catalog;
use crate::value::CellValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Where a posting came from. Shared by every posting of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation {
    pub package_name: String,
    pub logical_dir: String,
    pub database_name: String,
    pub table_name: String,
    pub columns: Arc<[String]>,
}

/// One occurrence of a token in a cached cell.
#[derive(Debug, Clone)]
pub struct IndexPosting {
    location: Arc<TableLocation>,
    column_index: usize,
    row: Arc<[CellValue]>,
    match_value: Arc<str>,
}

impl IndexPosting {
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    pub fn column_name(&self) -> &str {
        &self.location.columns[self.column_index]
    }

    /// The snapshot row the token was read from.
    pub fn row(&self) -> &[CellValue] {
        &self.row
    }

    /// The full stringified cell value, original case.
    pub fn match_value(&self) -> &str {
        &self.match_value
    }
}

/// Split lowercased text into index tokens: runs between whitespace, `,`,
/// `.` and `:` that are longer than one character.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ':'))
        .filter(|token| token.chars().nth(1).is_some())
}

/// Token -> postings, in table and row traversal order.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    generation: u64,
    postings: HashMap<String, Vec<IndexPosting>>,
    posting_count: usize,
}

impl SearchIndex {
    /// Index every non-null cell of every snapshot in `catalog`.
    pub fn build(catalog: &Catalog) -> Self {
        let start = Instant::now();
        let mut index = Self {
            generation: catalog.generation(),
            ..Self::default()
        };

        for (entry, table, snapshot) in catalog.snapshots() {
            let location = Arc::new(TableLocation {
                package_name: entry.package_name.clone(),
                logical_dir: entry.logical_dir.clone(),
                database_name: entry.database_name.clone(),
                table_name: table.to_string(),
                columns: snapshot.columns().clone(),
            });

            for row in snapshot.rows() {
                for (column_index, value) in row.iter().enumerate().take(location.columns.len()) {
                    let Some(text) = value.search_text() else {
                        continue;
                    };
                    let match_value: Arc<str> = Arc::from(&*text);
                    let lowered = text.to_lowercase();
                    for token in tokenize(&lowered) {
                        let posting = IndexPosting {
                            location: Arc::clone(&location),
                            column_index,
                            row: Arc::clone(row),
                            match_value: Arc::clone(&match_value),
                        };
                        match index.postings.get_mut(token) {
                            Some(list) => list.push(posting),
                            None => {
                                index.postings.insert(token.to_string(), vec![posting]);
                            }
                        }
                        index.posting_count += 1;
                    }
                }
            }
        }

        info!(
            "Search index built: {} tokens, {} postings in {:.1}ms",
            index.postings.len(),
            index.posting_count,
            start.elapsed().as_secs_f64() * 1000.0
        );
        index
    }

    /// Catalog generation this index was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Postings for an exact (lowercase) token.
    pub fn lookup(&self, token: &str) -> &[IndexPosting] {
        self.postings.get(token).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn token_count(&self) -> usize {
        self.postings.len()
    }

    pub fn posting_count(&self) -> usize {
        self.posting_count
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// Number of postings derived from one table.
    pub fn postings_for_table(
        &self,
        package: &str,
        logical_dir: &str,
        database: &str,
        table: &str,
    ) -> usize {
        self.postings
            .values()
            .flatten()
            .filter(|p| {
                let loc = p.location();
                loc.package_name == package
                    && loc.logical_dir == logical_dir
                    && loc.database_name == database
                    && loc.table_name == table
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::source::PackageSource;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn catalog_with(dir: &TempDir, sql: &str) -> Catalog {
        let path = dir.path().join("notes.db");
        Connection::open(&path).unwrap().execute_batch(sql).unwrap();
        let mut catalog = Catalog::default();
        catalog
            .load(
                &[PackageSource::new("pkg", dir.path()).with_database("databases", "notes.db", &path)],
                &CancellationToken::new(),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn test_tokenize() {
        let tokens: Vec<&str> = tokenize("hello, world.example:8080  a b cd").collect();
        assert_eq!(tokens, vec!["hello", "world", "example", "8080", "cd"]);
    }

    #[test]
    fn test_tokenize_counts_characters_not_bytes() {
        // A single multi-byte character is still a one-character token.
        assert_eq!(tokenize("é 王 王芳").collect::<Vec<_>>(), vec!["王芳"]);
    }

    #[test]
    fn test_build_indexes_lowercase_tokens() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog_with(
            &dir,
            "CREATE TABLE notes (id INTEGER, body TEXT, extra TEXT);
             INSERT INTO notes VALUES (1, 'Meet Alice at 10.30', NULL);
             INSERT INTO notes VALUES (2, 'alice: call back', 'x');",
        );
        let index = SearchIndex::build(&catalog);

        assert_eq!(index.generation(), catalog.generation());
        let hits = index.lookup("alice");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].match_value(), "Meet Alice at 10.30");
        assert_eq!(hits[0].column_name(), "body");
        assert_eq!(hits[0].location().table_name, "notes");
        assert_eq!(hits[1].row()[0], CellValue::Integer(2));

        assert_eq!(index.lookup("30").len(), 1);
        assert!(index.lookup("Alice").is_empty());
        // One-character values and NULLs produce nothing.
        assert!(index.lookup("x").is_empty());
        assert!(index.lookup("1").is_empty());
    }

    #[test]
    fn test_numbers_are_indexed_as_text() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog_with(
            &dir,
            "CREATE TABLE calls (number INTEGER, duration REAL);
             INSERT INTO calls VALUES (5551234, 12.5);",
        );
        let index = SearchIndex::build(&catalog);
        assert_eq!(index.lookup("5551234").len(), 1);
        // 12.5 splits on the dot.
        assert_eq!(index.lookup("12").len(), 1);
        assert!(index.lookup("5").is_empty());
    }

    #[test]
    fn test_empty_catalog() {
        let index = SearchIndex::build(&Catalog::default());
        assert!(index.is_empty());
        assert_eq!(index.posting_count(), 0);
    }
}
