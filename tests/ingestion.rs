mod common;

use common::{SALES_CSV, TestWorkspace, memory_service, upload};
use serde_json::json;
use sheet_sql::{
    Error,
    ledger,
    sample,
    synth::{self, ColumnType},
};

#[test]
fn sales_upload_creates_table_ledger_entry_and_sample() {
    let mut service = memory_service();
    let record = service
        .upload(
            Some(&upload("sales.csv", SALES_CSV.as_bytes())),
            Some("Sales"),
            Some("February"),
            None,
        )
        .expect("upload succeeds");

    assert_eq!(record.version, 1);
    assert_eq!(record.num_columns, 3);
    assert_eq!(record.num_rows, 3);
    assert_eq!(record.title.as_deref(), Some("Sales"));
    assert!(record.table_name.starts_with("All_sales_"), "{}", record.table_name);

    let conn = service.store().conn();
    let table = synth::lookup(conn, &record.table_name).expect("registered");
    let types: Vec<(String, ColumnType)> = table
        .schema
        .columns
        .iter()
        .map(|c| (c.name.clone(), c.column_type))
        .collect();
    assert_eq!(
        types,
        vec![
            ("date".to_string(), ColumnType::Date),
            ("amount".to_string(), ColumnType::Numeric),
            ("region".to_string(), ColumnType::Text),
        ]
    );

    let stored: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", record.table_name),
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stored, 3);

    let table_sample = sample::load(conn, &record.table_name).unwrap();
    assert_eq!(table_sample.records.len(), 3);
    assert_eq!(table_sample.records[0]["date"], json!("2024-02-01"));
    assert_eq!(table_sample.records[0]["amount"], json!(10.5));
}

#[test]
fn reuploads_are_versioned_per_filename() {
    let mut service = memory_service();
    let mut versions = Vec::new();
    for name in ["sales.csv", "other.csv", "sales.csv", "other.csv", "sales.csv"] {
        let record = service
            .upload(Some(&upload(name, SALES_CSV.as_bytes())), None, None, None)
            .unwrap();
        versions.push((name, record.version));
    }
    assert_eq!(
        versions,
        vec![
            ("sales.csv", 1),
            ("other.csv", 1),
            ("sales.csv", 2),
            ("other.csv", 2),
            ("sales.csv", 3),
        ]
    );

    let history = ledger::list(service.store().conn(), Some("sales.csv")).unwrap();
    let listed: Vec<i64> = history.iter().map(|r| r.version).collect();
    assert_eq!(listed, vec![3, 2, 1]);
}

#[test]
fn unnamed_columns_are_dropped_from_the_synthesized_table() {
    let mut service = memory_service();
    let csv = ",Name,,Score\n0,ada,x,9\n1,bob,y,7\n";
    let record = service
        .upload(Some(&upload("scores.csv", csv.as_bytes())), None, None, None)
        .unwrap();
    assert_eq!(record.num_columns, 2);
    assert_eq!(record.num_rows, 2);
    let table = synth::lookup(service.store().conn(), &record.table_name).unwrap();
    assert_eq!(table.schema.column_names(), vec!["name", "score"]);
}

#[test]
fn latin1_file_is_decoded_by_detection() {
    let mut service = memory_service();
    let mut bytes = b"city,population\n".to_vec();
    bytes.extend_from_slice(b"K\xf6ln,1086000\nM\xfcnchen,1512000\n");
    let outcome = service
        .upload_detailed(Some(&upload("cities.csv", &bytes)), None, None, None)
        .unwrap();
    assert_eq!(outcome.record.num_rows, 2);
    let table_sample = sample::load(service.store().conn(), &outcome.record.table_name).unwrap();
    assert_eq!(table_sample.records[0]["city"], json!("Köln"));
    assert!(outcome.encoding.is_some());
}

#[test]
fn declared_encoding_that_cannot_decode_is_reported() {
    let mut service = memory_service();
    let err = service
        .upload(
            Some(&upload("bad.csv", b"a\n1\n")),
            None,
            None,
            Some("no-such-encoding"),
        )
        .unwrap_err();
    match err {
        Error::Decoding { attempted } => assert_eq!(attempted, vec!["no-such-encoding"]),
        other => panic!("expected decoding error, got {other:?}"),
    }
}

#[test]
fn unsupported_extension_is_rejected_before_parsing() {
    let mut service = memory_service();
    let err = service
        .upload(Some(&upload("notes.txt", b"a\n1\n")), None, None, None)
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(_)));
    assert_eq!(err.status(), 400);
    assert!(ledger::list(service.store().conn(), None).unwrap().is_empty());
}

#[test]
fn mixed_text_column_is_coerced_and_nulls_counted() {
    let mut service = memory_service();
    let csv = "item,qty\nbolt,4\nnut,five\nwasher,12\n";
    let outcome = service
        .upload_detailed(Some(&upload("parts.csv", csv.as_bytes())), None, None, None)
        .unwrap();
    assert_eq!(outcome.coercion.total_nulled(), 1);
    let qty = outcome
        .schema
        .columns
        .iter()
        .find(|c| c.name == "qty")
        .unwrap();
    assert_eq!(qty.column_type, ColumnType::Numeric);
}

#[test]
fn ledger_survives_reopening_the_database_file() {
    let workspace = TestWorkspace::new();
    let report_id = {
        let mut service = workspace.service();
        service
            .upload(Some(&upload("sales.csv", SALES_CSV.as_bytes())), None, None, None)
            .unwrap()
            .report_id
    };
    let service = workspace.service();
    let record = service.get_upload(&report_id.to_string()).unwrap();
    assert_eq!(record.file_name, "sales.csv");
}
