use contact_core::db::migrations::latest_version;
use contact_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "contacts");
    assert_index_exists(&conn, "idx_contacts_email");
    assert_index_exists(&conn, "idx_contacts_phone_number");
    assert_index_exists(&conn, "idx_contacts_linked_id");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "contacts");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn opening_unreachable_path_reports_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("nested").join("contacts.db");

    let err = open_db(&path).unwrap_err();
    assert!(matches!(err, DbError::Open { .. }), "unexpected error: {err}");
    assert!(err.to_string().contains("contacts.db"));
}

#[test]
fn schema_rejects_primary_with_link() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO contacts (email, link_precedence, created_at, updated_at)
         VALUES ('a@x.com', 'primary', 1, 1);",
        [],
    )
    .unwrap();

    let result = conn.execute(
        "INSERT INTO contacts (email, link_precedence, linked_id, created_at, updated_at)
         VALUES ('b@x.com', 'primary', 1, 2, 2);",
        [],
    );
    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    assert_schema_object(conn, "table", table_name);
}

fn assert_index_exists(conn: &Connection, index_name: &str) {
    assert_schema_object(conn, "index", index_name);
}

fn assert_schema_object(conn: &Connection, kind: &str, name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            );",
            [kind, name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "{kind} {name} does not exist");
}
