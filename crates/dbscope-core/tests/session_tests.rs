//! Integration tests for loading, searching and exporting through `Session`.
//!
//! Every test builds its own fixture databases in a temp directory.

use dbscope_core::{
    CancellationToken, DbscopeError, EngineConfig, ExportGrouping, FileKind, PackageSource,
    SearchMode, SearchRequest, Session,
};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

fn blob(header: &[u8], len: usize) -> Vec<u8> {
    let mut data = header.to_vec();
    data.resize(len, 0x42);
    data
}

fn create_db(dir: &Path, name: &str, setup: impl FnOnce(&Connection)) -> PathBuf {
    let path = dir.join(name);
    let conn = Connection::open(&path).unwrap();
    setup(&conn);
    path
}

/// contacts.db (the two-person table), big.db (1000 and 1001 rows with a
/// planted needle) and media.db (blobs).
fn create_test_env() -> (TempDir, Vec<PackageSource>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path();

    let contacts = create_db(root, "contacts.db", |conn| {
        conn.execute_batch(
            "CREATE TABLE people (id INTEGER, name TEXT);
             INSERT INTO people VALUES (1, 'Alice Wang');
             INSERT INTO people VALUES (2, 'Bob Lee');",
        )
        .unwrap();
    });

    let big = create_db(root, "big.db", |conn| {
        conn.execute_batch(
            "CREATE TABLE events (id INTEGER, body TEXT);
             CREATE TABLE small (id INTEGER, body TEXT);",
        )
        .unwrap();
        let tx = conn.unchecked_transaction().unwrap();
        for i in 0..1001 {
            let body = if i == 750 {
                "planted Needle-Value here".to_string()
            } else {
                format!("event number {i}")
            };
            tx.execute("INSERT INTO events VALUES (?1, ?2)", params![i, body])
                .unwrap();
        }
        for i in 0..1000 {
            tx.execute(
                "INSERT INTO small VALUES (?1, ?2)",
                params![i, format!("small row {i}")],
            )
            .unwrap();
        }
        tx.commit().unwrap();
    });

    let media = create_db(root, "media.db", |conn| {
        conn.execute_batch("CREATE TABLE attachments (id INTEGER PRIMARY KEY, label TEXT, data BLOB);")
            .unwrap();
        let rows: Vec<(&str, Vec<u8>)> = vec![
            ("photo", blob(PNG_HEADER, 400)),
            ("scan", blob(JPEG_HEADER, 300)),
            ("thumb", blob(PNG_HEADER, 100)),
            ("noise", vec![0x01; 500]),
            ("PNG text only", b"PNG".to_vec()),
        ];
        for (label, data) in rows {
            conn.execute(
                "INSERT INTO attachments (label, data) VALUES (?1, ?2)",
                params![label, data],
            )
            .unwrap();
        }
        // The label column is text: it must never match a byte search.
        conn.execute(
            "INSERT INTO attachments (label, data) VALUES ('PNG', NULL)",
            [],
        )
        .unwrap();
    });

    let packages = vec![
        PackageSource::new("com.example.contacts", root)
            .with_database("databases", "contacts.db", contacts),
        PackageSource::new("com.example.events", root)
            .with_database("databases", "big.db", big)
            .with_database("files", "missing.db", root.join("missing.db")),
        PackageSource::new("com.example.media", root).with_database("cache", "media.db", media),
    ];

    (temp_dir, packages)
}

fn loaded_session(config: EngineConfig) -> (TempDir, Session) {
    let (temp_dir, packages) = create_test_env();
    let mut session = Session::new(config);
    session.load(&packages, &CancellationToken::new()).unwrap();
    (temp_dir, session)
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

#[test]
fn test_load_summary() {
    let (temp_dir, packages) = create_test_env();
    let mut session = Session::default();
    let summary = session.load(&packages, &CancellationToken::new()).unwrap();
    drop(temp_dir);

    assert_eq!(summary.packages, 3);
    assert_eq!(summary.databases, 3);
    assert_eq!(summary.tables, 4);
    // events has 1001 rows and stays on disk.
    assert_eq!(summary.cached_tables, 3);
    assert!(summary.issues.is_empty());
}

#[test]
fn test_scenario_single_result() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());

    let report = session
        .search(&SearchRequest::plain("wang"), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.results.len(), 1);
    let hit = &report.results[0];
    assert_eq!(hit.package_name, "com.example.contacts");
    assert_eq!(hit.database_name, "contacts.db");
    assert_eq!(hit.table_name, "people");
    assert_eq!(hit.column_name, "name");
    assert_eq!(hit.match_value, "Alice Wang");
    assert_eq!(
        hit.row.get("id"),
        Some(&dbscope_core::CellValue::Integer(1))
    );
}

#[test]
fn test_cache_boundary() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());
    let catalog = session.catalog();

    assert!(catalog.is_cached("com.example.events", "databases", "big.db", "small"));
    assert!(!catalog.is_cached("com.example.events", "databases", "big.db", "events"));

    let index = session.index();
    assert_eq!(
        index.postings_for_table("com.example.events", "databases", "big.db", "events"),
        0
    );
    assert!(index.postings_for_table("com.example.events", "databases", "big.db", "small") > 0);
}

#[test]
fn test_fallback_finds_match_in_uncached_table() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());

    let report = session
        .search(&SearchRequest::plain("needle-value"), &CancellationToken::new())
        .unwrap();

    assert_eq!(report.index_hits, 0);
    assert!(report.fallback_used);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].table_name, "events");
    assert_eq!(report.results[0].match_value, "planted Needle-Value here");
}

#[test]
fn test_no_duplicates_between_index_and_fallback() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());

    let report = session
        .search(&SearchRequest::plain("ALICE"), &CancellationToken::new())
        .unwrap();

    // The index finds it and so does the fallback scan of the same table.
    assert_eq!(report.index_hits, 1);
    assert!(report.fallback_used);
    assert_eq!(report.results.len(), 1);
    assert!(report.results[0].match_value.to_lowercase().contains("alice"));

    let report = session
        .search(&SearchRequest::plain("row"), &CancellationToken::new())
        .unwrap();
    let mut keys = HashSet::new();
    for hit in &report.results {
        assert!(keys.insert((
            hit.package_name.clone(),
            hit.database_name.clone(),
            hit.table_name.clone(),
            hit.column_name.clone(),
            hit.match_value.clone(),
        )));
    }
    // 1000 matches in the cached table are above the fallback threshold.
    assert_eq!(report.results.len(), 1000);
    assert!(!report.fallback_used);
}

#[test]
fn test_fallback_matches_whole_term_as_substring() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());

    let report = session
        .search(&SearchRequest::plain("event number 99"), &CancellationToken::new())
        .unwrap();

    // "event number 99", "event number 990".."999" all live in the uncached table.
    assert_eq!(report.index_hits, 0);
    assert_eq!(report.results.len(), 11);
    assert!(report.results.iter().all(|hit| hit.table_name == "events"));
}

#[test]
fn test_case_sensitive_plain_search() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());
    let cancel = CancellationToken::new();

    let insensitive = session.search(&SearchRequest::plain("WANG"), &cancel).unwrap();
    assert_eq!(insensitive.results.len(), 1);

    let sensitive = session
        .search(&SearchRequest::plain("WANG").case_sensitive(true), &cancel)
        .unwrap();
    assert!(sensitive.results.is_empty());

    let exact = session
        .search(&SearchRequest::plain("Wang").case_sensitive(true), &cancel)
        .unwrap();
    assert_eq!(exact.results.len(), 1);
}

#[test]
fn test_regex_search() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());
    let cancel = CancellationToken::new();

    let report = session.search(&SearchRequest::regex("^bob"), &cancel).unwrap();
    assert_eq!(report.mode, SearchMode::Regex);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].match_value, "Bob Lee");

    let report = session
        .search(&SearchRequest::regex("^bob").case_sensitive(true), &cancel)
        .unwrap();
    assert!(report.results.is_empty());
}

#[test]
fn test_regex_row_cap() {
    let config = EngineConfig {
        regex_row_cap: 500,
        ..EngineConfig::default()
    };
    let (_temp_dir, session) = loaded_session(config);

    // The needle sits at row 750.
    let report = session
        .search(&SearchRequest::regex("needle"), &CancellationToken::new())
        .unwrap();
    assert!(report.results.is_empty());
}

#[test]
fn test_invalid_regex_leaves_session_usable() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());
    let cancel = CancellationToken::new();

    let err = session.search(&SearchRequest::regex("[unclosed"), &cancel).unwrap_err();
    assert!(err.is_validation());

    let report = session.search(&SearchRequest::plain("wang"), &cancel).unwrap();
    assert_eq!(report.results.len(), 1);
}

#[test]
fn test_term_whitespace_is_significant() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());
    let cancel = CancellationToken::new();

    // "Bob Lee" has no trailing space after "Lee".
    let report = session.search(&SearchRequest::plain("Lee "), &cancel).unwrap();
    assert!(report.results.is_empty());
    assert_eq!(report.term, "Lee ");

    let report = session.search(&SearchRequest::plain("Bob "), &cancel).unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].match_value, "Bob Lee");

    let report = session.search(&SearchRequest::regex("Lee $"), &cancel).unwrap();
    assert!(report.results.is_empty());

    // Hex patterns alone tolerate surrounding whitespace.
    let report = session.search(&SearchRequest::bytes(" 504e47 "), &cancel).unwrap();
    assert_eq!(report.results.len(), 3);
}

/// One package whose database has a generated middle column and an
/// uncached table holding non-ASCII text and a large real.
fn loaded_extras_session() -> (TempDir, Session) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path();

    let extras = create_db(root, "extras.db", |conn| {
        conn.execute_batch(
            "CREATE TABLE tagged (
                 a TEXT,
                 b TEXT GENERATED ALWAYS AS (a || '-gen') VIRTUAL,
                 c TEXT
             );
             INSERT INTO tagged (a, c) VALUES ('alpha', 'gamma');
             CREATE TABLE notes (id INTEGER, body TEXT, reading REAL);",
        )
        .unwrap();
        let tx = conn.unchecked_transaction().unwrap();
        for i in 0..1501 {
            let (body, reading) = match i {
                400 => ("Ärger im Büro".to_string(), 2.5),
                900 => (format!("note {i}"), 1e15),
                _ => (format!("note {i}"), 2.5),
            };
            tx.execute(
                "INSERT INTO notes VALUES (?1, ?2, ?3)",
                params![i, body, reading],
            )
            .unwrap();
        }
        tx.commit().unwrap();
    });

    let packages = vec![PackageSource::new("com.example.extras", root)
        .with_database("databases", "extras.db", extras)];
    let mut session = Session::default();
    session.load(&packages, &CancellationToken::new()).unwrap();
    (temp_dir, session)
}

#[test]
fn test_generated_column_reported_under_its_own_name() {
    let (_temp_dir, session) = loaded_extras_session();

    let page = session.table_page("com.example.extras", "databases", "extras.db", "tagged", 10, 0);
    assert_eq!(page.columns, vec!["a", "b", "c"]);
    assert_eq!(
        page.rows[0][1],
        dbscope_core::CellValue::Text("alpha-gen".to_string())
    );

    // Index and fallback both see the table; they must agree on the column.
    let report = session
        .search(&SearchRequest::plain("gamma"), &CancellationToken::new())
        .unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].column_name, "c");
    assert_eq!(report.results[0].match_value, "gamma");
    assert_eq!(
        report.results[0].row.get("b"),
        Some(&dbscope_core::CellValue::Text("alpha-gen".to_string()))
    );
}

#[test]
fn test_fallback_folds_non_ascii_case() {
    let (_temp_dir, session) = loaded_extras_session();
    let cancel = CancellationToken::new();
    assert!(!session
        .catalog()
        .is_cached("com.example.extras", "databases", "extras.db", "notes"));

    for term in ["ärger", "ÄRGER IM", "büro"] {
        let report = session.search(&SearchRequest::plain(term), &cancel).unwrap();
        assert_eq!(report.index_hits, 0);
        assert!(report.fallback_used);
        assert_eq!(report.results.len(), 1, "{term:?}");
        assert_eq!(report.results[0].match_value, "Ärger im Büro");
    }

    let exact = session
        .search(&SearchRequest::plain("Ärger").case_sensitive(true), &cancel)
        .unwrap();
    assert_eq!(exact.results.len(), 1);
    let wrong_case = session
        .search(&SearchRequest::plain("ärger").case_sensitive(true), &cancel)
        .unwrap();
    assert!(wrong_case.results.is_empty());
}

#[test]
fn test_fallback_match_value_contains_real_term() {
    let (_temp_dir, session) = loaded_extras_session();

    let report = session
        .search(&SearchRequest::plain("e+15"), &CancellationToken::new())
        .unwrap();
    assert_eq!(report.results.len(), 1);
    let hit = &report.results[0];
    assert_eq!(hit.column_name, "reading");
    assert_eq!(hit.match_value, "1.0e+15");
    assert!(hit.match_value.contains(&report.term));
}

#[test]
fn test_byte_pattern_matches_only_blobs() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());

    // "PNG"
    let report = session
        .search(&SearchRequest::bytes("504e47"), &CancellationToken::new())
        .unwrap();

    assert!(!report.results.is_empty());
    for hit in &report.results {
        assert_eq!(hit.column_name, "data");
        let value = hit.row.get("data").and_then(|v| v.as_blob()).unwrap();
        assert!(value.windows(3).any(|w| w == b"PNG"));
    }
    // photo, thumb and the three-byte "PNG" blob.
    assert_eq!(report.results.len(), 3);
}

#[test]
fn test_byte_pattern_rejects_malformed_hex() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());
    let cancel = CancellationToken::new();

    for bad in ["504", "zz", "50 4e"] {
        let err = session.search(&SearchRequest::bytes(bad), &cancel).unwrap_err();
        assert!(err.is_validation(), "{bad:?} should be rejected");
    }
}

#[test]
fn test_cancelled_search() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = session.search(&SearchRequest::plain("wang"), &cancel).unwrap_err();
    assert!(matches!(err, DbscopeError::Cancelled));
}

#[test]
fn test_uncached_table_page() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());

    let page = session.table_page("com.example.events", "databases", "big.db", "events", 10, 995);
    assert_eq!(page.columns, vec!["id", "body"]);
    assert_eq!(page.rows.len(), 6);
    assert_eq!(page.rows[0][0], dbscope_core::CellValue::Integer(995));
}

#[test]
fn test_statistics_breakdown() {
    let (_temp_dir, session) = loaded_session(EngineConfig::default());
    let stats = session.statistics();

    assert_eq!(stats.total_packages, 3);
    assert_eq!(stats.total_databases, 3);
    assert_eq!(stats.total_tables, 4);
    let events = stats
        .packages
        .iter()
        .find(|p| p.package_name == "com.example.events")
        .unwrap();
    // missing.db never made it into the catalog, so `files` is absent.
    assert_eq!(events.directories.len(), 1);
    assert_eq!(events.directories[0].database_details[0].table_names, vec!["events", "small"]);
}

#[test]
fn test_export_by_type() {
    let (temp_dir, session) = loaded_session(EngineConfig::default());
    let root = temp_dir.path().join("out");

    let report = session
        .export_attachments(&root, ExportGrouping::ByType, &CancellationToken::new())
        .unwrap();

    // thumb is under the size threshold and noise has no signature.
    assert_eq!(report.total_files, 2);
    assert_eq!(report.breakdown.get("png"), Some(&1));
    assert_eq!(report.breakdown.get("jpg"), Some(&1));

    let png = report
        .files
        .iter()
        .find(|f| f.file_kind == FileKind::Png)
        .unwrap();
    assert_eq!(png.path, root.join("png").join("media.db_attachments_data_1.png"));
    assert_eq!(png.size, 400);
    assert_eq!(std::fs::read(&png.path).unwrap(), blob(PNG_HEADER, 400));
}

#[test]
fn test_export_by_package() {
    let (temp_dir, session) = loaded_session(EngineConfig::default());
    let root = temp_dir.path().join("out");

    let report = session
        .export_attachments(&root, ExportGrouping::ByPackage, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.breakdown.get("com.example.media"), Some(&2));
    let mut paths: Vec<_> = report.files.iter().map(|f| f.path.clone()).collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            root.join("com.example.media").join("media.db_1.png"),
            root.join("com.example.media").join("media.db_2.jpg"),
        ]
    );
}

#[test]
fn test_export_is_idempotent() {
    let (temp_dir, session) = loaded_session(EngineConfig::default());
    let root = temp_dir.path().join("out");
    let cancel = CancellationToken::new();

    let first = session
        .export_attachments(&root, ExportGrouping::ByType, &cancel)
        .unwrap();
    std::fs::write(root.join("leftover.txt"), b"stale").unwrap();
    let second = session
        .export_attachments(&root, ExportGrouping::ByType, &cancel)
        .unwrap();

    assert_eq!(first.total_files, second.total_files);
    assert_eq!(count_files(&root), second.total_files);
    assert!(!root.join("leftover.txt").exists());
}
