mod common;

use std::fs;

use assert_cmd::Command;
use common::{SALES_CSV, TestWorkspace};
use predicates::{prelude::PredicateBooleanExt, str::contains};
use serde_json::Value as JsonValue;

fn sheet_sql(workspace: &TestWorkspace) -> Command {
    let mut cmd = Command::cargo_bin("sheet-sql").expect("binary exists");
    cmd.current_dir(workspace.path())
        .env_remove("SHEET_SQL_DATABASE")
        .env_remove("SHEET_SQL_MODEL_TOKEN")
        .env_remove("SHEET_SQL_MODEL_ENDPOINT")
        .arg("--database")
        .arg(workspace.database());
    cmd
}

fn upload_sales(workspace: &TestWorkspace) -> JsonValue {
    let csv_path = workspace.write("sales.csv", SALES_CSV.as_bytes());
    let output = sheet_sql(workspace)
        .arg("upload")
        .arg(&csv_path)
        .args(["--title", "Sales"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("upload prints a JSON record")
}

#[test]
fn upload_then_list_shows_versions_newest_first() {
    let workspace = TestWorkspace::new();
    let first = upload_sales(&workspace);
    let second = upload_sales(&workspace);
    assert_eq!(first["version"], 1);
    assert_eq!(second["version"], 2);
    assert_eq!(first["num_rows"], 3);

    let output = sheet_sql(&workspace)
        .args(["uploads", "--filename", "sales.csv"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let listed: Vec<JsonValue> = serde_json::from_slice(&output).unwrap();
    let versions: Vec<i64> = listed.iter().map(|r| r["version"].as_i64().unwrap()).collect();
    assert_eq!(versions, vec![2, 1]);
}

#[test]
fn download_writes_regenerated_csv() {
    let workspace = TestWorkspace::new();
    let record = upload_sales(&workspace);
    let report_id = record["report_id"].as_str().unwrap();
    let target = workspace.path().join("copy.csv");
    sheet_sql(&workspace)
        .args(["download", report_id, "-o"])
        .arg(&target)
        .assert()
        .success();
    let contents = fs::read_to_string(&target).unwrap();
    assert!(contents.starts_with("date,amount,region\n"));
}

#[test]
fn show_reports_unknown_ids() {
    let workspace = TestWorkspace::new();
    sheet_sql(&workspace)
        .args(["show", "definitely-not-an-id"])
        .assert()
        .failure()
        .stderr(contains("not found"));
}

#[test]
fn unsupported_files_fail_with_a_message() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("notes.txt", b"a,b\n1,2\n");
    sheet_sql(&workspace)
        .arg("upload")
        .arg(&path)
        .assert()
        .failure()
        .stderr(contains("Invalid file type"));
}

#[test]
fn reports_and_tables_commands_share_the_database() {
    let workspace = TestWorkspace::new();
    let record = upload_sales(&workspace);
    let table = record["table_name"].as_str().unwrap().to_string();

    sheet_sql(&workspace)
        .args(["report", "create", "--title", "Regional", "--description", "By region", "--table"])
        .arg(&table)
        .assert()
        .success()
        .stdout(contains("\"title\": \"Regional\""));

    sheet_sql(&workspace)
        .args(["report", "list"])
        .assert()
        .success()
        .stdout(contains(table.as_str()));

    sheet_sql(&workspace)
        .arg("tables")
        .assert()
        .success()
        .stdout(contains("\"column_type\": \"DECIMAL\"").not())
        .stdout(contains("\"column_type\": \"NUMERIC\""));

    sheet_sql(&workspace)
        .arg("drop-table")
        .arg(&table)
        .assert()
        .success();
    sheet_sql(&workspace)
        .args(["report", "list"])
        .assert()
        .success()
        .stdout(contains("[]"));
}

#[test]
fn query_against_unknown_table_fails_before_calling_the_model() {
    let workspace = TestWorkspace::new();
    sheet_sql(&workspace)
        .env("SHEET_SQL_MODEL_ENDPOINT", "http://127.0.0.1:9")
        .args(["query", "ghost_table", "how many rows"])
        .assert()
        .failure()
        .stderr(contains("Table 'ghost_table' not found"));
}
