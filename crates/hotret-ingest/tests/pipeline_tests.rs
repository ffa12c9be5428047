//! End-to-end directory sweeps against the in-memory store

#![allow(clippy::unwrap_used, clippy::expect_used)]

use hotret_ingest::config::PipelineSettings;
use hotret_ingest::pipeline::DirectoryReport;
use hotret_ingest::router::{
    normalize_base_name, FileDestination, FAILED_DIR, NO_MATCHING_METADATA_DIR,
    PROCESSED_SUCCESSFULLY_DIR,
};
use hotret_ingest::run::process_staging_directory;
use hotret_ingest::store::{ColumnRow, MemoryStore};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Line with source code, source id and an amount at 1-based position 15
fn line(code: &str, id: &str, amount: &str) -> String {
    format!("{:<11}{} {:>5}", code, id, amount)
}

fn abc_store() -> MemoryStore {
    MemoryStore::new()
        .with_mapping("ABC01", "ABC_META", "abc_data")
        .with_schema_table(
            "ABC_META",
            vec![
                ColumnRow::new("code", 1, 3, "CHAR"),
                ColumnRow::new("amt", 15, 5, "DECIMAL"),
            ],
        )
        .with_destination("abc_data", &["id", "code", "amt", "instance_id"])
}

fn two_table_store() -> MemoryStore {
    abc_store()
        .with_mapping("DEF02", "DEF_META", "def_data")
        .with_schema_table("DEF_META", vec![ColumnRow::new("code", 1, 3, "CHAR")])
        .with_destination("def_data", &["code", "instance_id"])
}

fn stage(files: &[(&str, String)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

async fn sweep(store: &Arc<MemoryStore>, dir: &Path) -> DirectoryReport {
    process_staging_directory(
        Arc::clone(store),
        dir,
        &PipelineSettings::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap()
}

fn read(dir: &Path, folder: &str, name: &str) -> String {
    std::fs::read_to_string(dir.join(folder).join(name)).unwrap()
}

fn sorted_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    lines.sort();
    lines
}

#[tokio::test]
async fn test_known_line_is_decoded_and_loaded() {
    let store = Arc::new(abc_store());
    let dir = stage(&[("HOT_D240115.txt", format!("{}\n", line("ABC", "01", "12345")))]);

    let report = sweep(&store, dir.path()).await;

    assert_eq!(report.count(FileDestination::ProcessedSuccessfully), 1);
    assert!(dir
        .path()
        .join(PROCESSED_SUCCESSFULLY_DIR)
        .join("HOT_D240115.txt")
        .exists());

    let rows = store.rows("abc_data");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["code"], "ABC");
    assert_eq!(rows[0]["amt"], "12345");
    assert_eq!(rows[0]["instance_id"], "HOT_D240115");
    assert_eq!(rows[0].len(), 3);

    let file = &report.files[0];
    assert_eq!(file.processed.file_date, "240115");
    assert_eq!(file.processed.inserted["abc_data"], 1);
}

#[tokio::test]
async fn test_unknown_key_blocks_the_whole_file() {
    let store = Arc::new(abc_store());
    let unknown = line("ZZZ", "99", "1");
    let content = format!(
        "{}\n{}\n{}\n",
        line("ABC", "01", "100"),
        unknown,
        line("ABC", "01", "200")
    );
    let dir = stage(&[("HOT_D240116.txt", content)]);

    let report = sweep(&store, dir.path()).await;

    assert_eq!(report.count(FileDestination::NoMatchingMetadata), 1);
    assert_eq!(store.total_rows(), 0);
    assert!(!dir.path().join("HOT_D240116.txt").exists());
    assert!(dir
        .path()
        .join(NO_MATCHING_METADATA_DIR)
        .join("HOT_D240116.txt")
        .exists());

    assert_eq!(
        read(dir.path(), NO_MATCHING_METADATA_DIR, "NO_MATCHING_METADATA_HOT_D240116.txt"),
        format!("{}\n", unknown)
    );
    assert_eq!(
        read(dir.path(), NO_MATCHING_METADATA_DIR, "FAILED_INSERT_HOT_D240116.txt"),
        "ERROR - Bulk insert failed: 1 line(s) could not be matched to metadata\n"
    );
}

#[tokio::test]
async fn test_not_inserted_log_holds_every_bad_line_in_any_order() {
    let store = Arc::new(abc_store());
    let bad: Vec<String> = (0..20).map(|i| line("ZZZ", "99", &i.to_string())).collect();
    let mut content = String::new();
    for bad_line in &bad {
        content.push_str(&line("ABC", "01", "1"));
        content.push('\n');
        content.push_str(bad_line);
        content.push('\n');
    }
    let dir = stage(&[("HOT_D240117.txt", content)]);

    sweep(&store, dir.path()).await;

    // Lines are collected in completion order, so compare as sets
    let logged = read(dir.path(), NO_MATCHING_METADATA_DIR, "NO_MATCHING_METADATA_HOT_D240117.txt");
    let mut expected = bad.clone();
    expected.sort();
    assert_eq!(sorted_lines(&logged), expected);
}

#[tokio::test]
async fn test_empty_metadata_never_reaches_processed() {
    let store = Arc::new(
        MemoryStore::new()
            .with_mapping("ABC01", "ABC_META", "abc_data")
            .with_schema_table("ABC_META", Vec::new())
            .with_destination("abc_data", &["code", "instance_id"]),
    );
    let dir = stage(&[("HOT_D240118.txt", format!("{}\n", line("ABC", "01", "5")))]);

    let report = sweep(&store, dir.path()).await;

    assert_eq!(report.count(FileDestination::ProcessedSuccessfully), 0);
    assert_eq!(report.files[0].destination(), FileDestination::NoMatchingMetadata);
    assert_eq!(store.total_rows(), 0);
}

#[tokio::test]
async fn test_metadata_fetch_error_is_contained_to_its_table() {
    let store = Arc::new(two_table_store().fail_fetches_for("ABC_META"));
    let dir = stage(&[
        ("A_abc.txt", format!("{}\n", line("ABC", "01", "5"))),
        ("B_def.txt", format!("{}\n", line("DEF", "02", "5"))),
        ("C_abc.txt", format!("{}\n", line("ABC", "01", "6"))),
    ]);

    let report = sweep(&store, dir.path()).await;

    assert_eq!(report.count(FileDestination::NoMatchingMetadata), 2);
    assert_eq!(report.count(FileDestination::ProcessedSuccessfully), 1);
    assert_eq!(store.rows("def_data").len(), 1);
    // The failed lookup is remembered for the rest of the sweep
    assert_eq!(store.fetch_count("ABC_META"), 1);
}

#[tokio::test]
async fn test_failed_table_rolls_back_the_other_table() {
    let store = Arc::new(two_table_store().fail_inserts_into("def_data"));
    let content = format!(
        "{}\n{}\n",
        line("ABC", "01", "100"),
        line("DEF", "02", "200")
    );
    let dir = stage(&[("RET_D240119.txt", content)]);

    let report = sweep(&store, dir.path()).await;

    assert_eq!(report.count(FileDestination::Failed), 1);
    assert_eq!(store.rows("abc_data").len(), 0);
    assert_eq!(store.rows("def_data").len(), 0);
    assert!(!dir
        .path()
        .join(FAILED_DIR)
        .join("NO_MATCHING_METADATA_RET_D240119.txt")
        .exists());

    let log = read(dir.path(), FAILED_DIR, "FAILED_INSERT_RET_D240119.txt");
    assert!(log.starts_with("ERROR - Bulk insert failed [def_data]: "));
}

#[tokio::test]
async fn test_bad_file_does_not_stop_the_sweep() {
    let store = Arc::new(abc_store());
    let dir = stage(&[
        ("1_good.txt", format!("{}\n", line("ABC", "01", "1"))),
        ("2_bad.txt", format!("{}\n", line("ZZZ", "99", "2"))),
        ("3_blank_line.txt", format!("{}\r\n\r\n{}\r\n", line("ABC", "01", "3"), line("ABC", "01", "4"))),
        ("4_good.txt", format!("{}\n", line("ABC", "01", "5"))),
    ]);

    let report = sweep(&store, dir.path()).await;

    let names: Vec<String> = report
        .files
        .iter()
        .map(|f| f.source.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["1_good.txt", "2_bad.txt", "3_blank_line.txt", "4_good.txt"]);

    assert_eq!(report.count(FileDestination::ProcessedSuccessfully), 2);
    assert_eq!(report.count(FileDestination::NoMatchingMetadata), 2);
    assert_eq!(report.rows_inserted(), 2);
    assert_eq!(report.files[2].processed.blank_lines, 1);
    assert_eq!(store.fetch_count("ABC_META"), 1);
}

#[tokio::test]
async fn test_whitespace_only_line_holds_back_the_file() {
    let store = Arc::new(abc_store());
    let known = line("ABC", "01", "12345");
    let dir = stage(&[(
        "HOT_D240121.txt",
        format!("{}\n{}\n{}\n", known, " ".repeat(20), known),
    )]);

    let report = sweep(&store, dir.path()).await;

    assert_eq!(report.count(FileDestination::NoMatchingMetadata), 1);
    assert_eq!(report.rows_inserted(), 0);
    assert_eq!(store.total_rows(), 0);
    assert_eq!(report.files[0].processed.blank_lines, 1);
    assert!(dir
        .path()
        .join(NO_MATCHING_METADATA_DIR)
        .join("HOT_D240121.txt")
        .exists());

    let held_back = read(
        dir.path(),
        NO_MATCHING_METADATA_DIR,
        "NO_MATCHING_METADATA_HOT_D240121.txt",
    );
    assert_eq!(held_back, format!("{}\n", " ".repeat(20)));
}

#[tokio::test]
async fn test_reprocessed_diagnostic_names_do_not_nest() {
    assert_eq!(
        normalize_base_name("FAILED_INSERT_NO_MATCHING_METADATA_X.txt"),
        normalize_base_name("X.txt")
    );

    let store = Arc::new(abc_store());
    let dir = stage(&[(
        "FAILED_INSERT_HOT_D240120.txt",
        format!("{}\n", line("ZZZ", "99", "1")),
    )]);

    sweep(&store, dir.path()).await;

    let folder = dir.path().join(NO_MATCHING_METADATA_DIR);
    assert!(folder.join("NO_MATCHING_METADATA_HOT_D240120.txt").exists());
    assert!(!folder
        .join("NO_MATCHING_METADATA_FAILED_INSERT_HOT_D240120.txt")
        .exists());
}

#[tokio::test]
async fn test_output_folders_are_not_swept() {
    let store = Arc::new(abc_store());
    let dir = stage(&[("HOT_D240121.txt", format!("{}\n", line("ABC", "01", "1")))]);

    sweep(&store, dir.path()).await;
    let second = sweep(&store, dir.path()).await;

    assert!(second.files.is_empty());
    assert_eq!(store.total_rows(), 1);
}
