//! Tests for SQLite driver.

use std::time::Duration;

use super::*;
use crate::returning::{plan, Plan};
use crate::schema::KeyCache;

fn stmt(sql: &str, params: Vec<SqliteValue>) -> Plan {
    plan(sql, params).unwrap()
}

async fn open() -> (SqliteConnection, KeyCache) {
    let conn = SqliteConnection::open(":memory:", None).await.unwrap();
    conn.execute_batch(
        "CREATE TABLE users (
             id INTEGER PRIMARY KEY,
             email TEXT NOT NULL UNIQUE,
             name TEXT
         );",
    )
    .await
    .unwrap();
    (conn, KeyCache::new())
}

async fn count(conn: &SqliteConnection, keys: &KeyCache) -> SqliteValue {
    let rows = conn
        .run(stmt("SELECT count(*) FROM users", vec![]), keys)
        .await
        .unwrap();
    rows.rows[0][0].clone()
}

#[tokio::test]
async fn test_connection_open_memory() {
    let conn = SqliteConnection::open(":memory:", None).await.unwrap();
    assert!(!conn.is_closed());
    assert!(!conn.in_transaction().await.unwrap());
}

#[tokio::test]
async fn test_execute_and_query() {
    let (conn, keys) = open().await;

    let inserted = conn
        .run(
            stmt(
                "INSERT INTO users (email, name) VALUES ($2, $1)",
                vec![SqliteValue::Text("Ada".into()), SqliteValue::Text("ada@example.com".into())],
            ),
            &keys,
        )
        .await
        .unwrap();
    assert_eq!(inserted.rows_affected, 1);
    assert!(inserted.columns.is_empty());

    let result = conn
        .run(stmt("SELECT * FROM users", vec![]), &keys)
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["id", "email", "name"]);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][1], SqliteValue::Text("ada@example.com".into()));
    assert_eq!(result.rows[0][2], SqliteValue::Text("Ada".into()));
}

#[tokio::test]
async fn test_null_and_blob_values() {
    let conn = SqliteConnection::open(":memory:", None).await.unwrap();
    let keys = KeyCache::new();
    conn.execute_batch("CREATE TABLE test (id INTEGER, data BLOB)")
        .await
        .unwrap();

    let data = vec![0xDE, 0xAD, 0xBE, 0xEF];
    conn.run(
        stmt(
            "INSERT INTO test (id, data) VALUES ($1, $2), ($3, $4)",
            vec![
                SqliteValue::Integer(1),
                SqliteValue::Null,
                SqliteValue::Integer(2),
                SqliteValue::Blob(data.clone()),
            ],
        ),
        &keys,
    )
    .await
    .unwrap();

    let result = conn
        .run(stmt("SELECT data FROM test ORDER BY id", vec![]), &keys)
        .await
        .unwrap();
    assert_eq!(result.rows[0][0], SqliteValue::Null);
    assert_eq!(result.rows[1][0], SqliteValue::Blob(data));
}

#[tokio::test]
async fn test_insert_returning() {
    let (conn, keys) = open().await;

    let result = conn
        .run(
            stmt(
                "INSERT INTO users (email) VALUES ($1) RETURNING id, email, name",
                vec![SqliteValue::Text("grace@example.com".into())],
            ),
            &keys,
        )
        .await
        .unwrap();

    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.columns, vec!["id", "email", "name"]);
    assert_eq!(
        result.rows,
        vec![vec![
            SqliteValue::Integer(1),
            SqliteValue::Text("grace@example.com".into()),
            SqliteValue::Null,
        ]]
    );
    assert!(!conn.in_transaction().await.unwrap());
}

#[tokio::test]
async fn test_constraint_violation_keeps_extended_code() {
    let (conn, keys) = open().await;
    let insert = "INSERT INTO users (email) VALUES ($1) RETURNING id";
    let email = || vec![SqliteValue::Text("dup@example.com".into())];

    conn.run(stmt(insert, email()), &keys).await.unwrap();
    let err = conn.run(stmt(insert, email()), &keys).await.unwrap_err();

    assert!(err.is_constraint());
    assert_eq!(err.code(), Some((2067, "SQLITE_CONSTRAINT_UNIQUE")));
    assert_eq!(count(&conn, &keys).await, SqliteValue::Integer(1));
}

#[tokio::test]
async fn test_failed_emulation_rolls_back_write() {
    let (conn, keys) = open().await;

    // The insert succeeds; the follow-up select names a missing column.
    let err = conn
        .run(
            stmt(
                "INSERT INTO users (email) VALUES ($1) RETURNING nope",
                vec![SqliteValue::Text("x@example.com".into())],
            ),
            &keys,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SqliteError::Sqlite(_)));
    assert_eq!(count(&conn, &keys).await, SqliteValue::Integer(0));
    assert!(!conn.in_transaction().await.unwrap());
}

#[tokio::test]
async fn test_emulation_inside_open_transaction_uses_savepoint() {
    let (conn, keys) = open().await;
    conn.begin().await.unwrap();

    conn.run(
        stmt(
            "INSERT INTO users (email) VALUES ($1) RETURNING id",
            vec![SqliteValue::Text("kept@example.com".into())],
        ),
        &keys,
    )
    .await
    .unwrap();

    conn.run(
        stmt(
            "INSERT INTO users (email) VALUES ($1) RETURNING nope",
            vec![SqliteValue::Text("lost@example.com".into())],
        ),
        &keys,
    )
    .await
    .unwrap_err();

    // The outer transaction survives the failed statement.
    assert!(conn.in_transaction().await.unwrap());
    conn.commit().await.unwrap();
    assert_eq!(count(&conn, &keys).await, SqliteValue::Integer(1));
}

#[tokio::test]
async fn test_update_and_delete_returning() {
    let (conn, keys) = open().await;
    conn.execute_batch(
        "INSERT INTO users (email, name) VALUES
             ('a@example.com', 'a'), ('b@example.com', 'b'), ('c@example.com', 'c');",
    )
    .await
    .unwrap();

    let updated = conn
        .run(
            stmt(
                "UPDATE users SET name = upper(name) WHERE email <> $1 RETURNING id, name",
                vec![SqliteValue::Text("b@example.com".into())],
            ),
            &keys,
        )
        .await
        .unwrap();
    assert_eq!(updated.rows_affected, 2);
    assert_eq!(
        updated.rows,
        vec![
            vec![SqliteValue::Integer(1), SqliteValue::Text("A".into())],
            vec![SqliteValue::Integer(3), SqliteValue::Text("C".into())],
        ]
    );

    let deleted = conn
        .run(
            stmt(
                "DELETE FROM users WHERE name = $1 RETURNING email",
                vec![SqliteValue::Text("b".into())],
            ),
            &keys,
        )
        .await
        .unwrap();
    assert_eq!(deleted.rows_affected, 1);
    assert_eq!(deleted.rows, vec![vec![SqliteValue::Text("b@example.com".into())]]);
    assert_eq!(count(&conn, &keys).await, SqliteValue::Integer(2));
}

#[test]
fn test_statement_errors_are_malformed() {
    let err = SqliteError::from(plan("SELECT 1; SELECT 2", vec![]).unwrap_err());
    assert!(err.is_malformed());
    assert!(!err.is_unavailable());

    let err = SqliteError::from(plan("SELECT $2", vec![SqliteValue::Null]).unwrap_err());
    assert!(err.is_malformed());
}

#[tokio::test]
async fn test_statement_timeout_interrupts() {
    let conn = SqliteConnection::open(":memory:", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    let keys = KeyCache::new();

    let slow = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 100000000)
                SELECT count(*) FROM c";
    let err = conn.run(stmt(slow, vec![]), &keys).await.unwrap_err();
    assert!(matches!(err, SqliteError::Timeout(_)));
    assert!(err.is_unavailable());

    // The connection is usable once the interrupted statement unwinds.
    let rows = conn.run(stmt("SELECT 1", vec![]), &keys).await.unwrap();
    assert_eq!(rows.rows[0][0], SqliteValue::Integer(1));
}

#[tokio::test]
async fn test_without_rowid_table_refuses_returning() {
    let (conn, keys) = open().await;
    conn.execute_batch(
        "CREATE TABLE codes (id INTEGER PRIMARY KEY, label TEXT) WITHOUT ROWID;
         INSERT INTO codes VALUES (7, 'old');
         INSERT INTO users (email) VALUES ('a@example.com');",
    )
    .await
    .unwrap();

    // The new row must not come back as the users row whose rowid the
    // connection last reported.
    let err = conn
        .run(
            stmt(
                "INSERT INTO codes (id, label) VALUES ($1, $2) RETURNING *",
                vec![SqliteValue::Integer(1), SqliteValue::Text("new".into())],
            ),
            &keys,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SqliteError::Emulation(_)));
    assert!(err.is_malformed());

    for sql in [
        "UPDATE codes SET label = 'x' RETURNING id",
        "DELETE FROM codes RETURNING id",
    ] {
        let err = conn.run(stmt(sql, vec![]), &keys).await.unwrap_err();
        assert!(err.is_malformed(), "{}", sql);
    }

    let rows = conn
        .run(stmt("SELECT id, label FROM codes", vec![]), &keys)
        .await
        .unwrap();
    assert_eq!(
        rows.rows,
        vec![vec![SqliteValue::Integer(7), SqliteValue::Text("old".into())]]
    );

    // Plain writes are untouched.
    let written = conn
        .run(stmt("DELETE FROM codes WHERE id = $1", vec![SqliteValue::Integer(7)]), &keys)
        .await
        .unwrap();
    assert_eq!(written.rows_affected, 1);
}

#[tokio::test]
async fn test_double_quoted_unknown_name_is_an_error() {
    let (conn, keys) = open().await;
    let err = conn
        .run(stmt("SELECT \"nope\" FROM users", vec![]), &keys)
        .await
        .unwrap_err();
    assert!(matches!(err, SqliteError::Sqlite(_)));

    let rows = conn
        .run(stmt("SELECT 'literal' AS \"quoted\"", vec![]), &keys)
        .await
        .unwrap();
    assert_eq!(rows.columns, vec!["quoted"]);
}
