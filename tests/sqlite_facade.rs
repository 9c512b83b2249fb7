//! End-to-end tests of the public facade against SQLite.

use dualdb::{Backend, Database, DbConfig, ErrorKind, Value};
use serde_json::json;

const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        profile TEXT
    );
    CREATE TABLE posts (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id),
        title TEXT NOT NULL
    );
";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dualdb=debug")
        .with_test_writer()
        .try_init();
}

async fn setup() -> Database {
    init_tracing();
    let config = DbConfig::new("sqlite::memory:").structured_columns(["profile"]);
    let db = Database::connect(config).await.unwrap();
    db.execute_batch(SCHEMA).await.unwrap();
    db
}

async fn user_count(db: &Database) -> Value {
    let result = db.query("SELECT count(*) FROM users", &[]).await.unwrap();
    result.scalar().cloned().unwrap()
}

#[tokio::test]
async fn test_lifecycle() {
    init_tracing();
    let db = Database::new(DbConfig::new("sqlite::memory:"));
    assert_eq!(
        db.query("SELECT 1", &[]).await.unwrap_err().kind(),
        ErrorKind::NotInitialized
    );

    db.initialize().await.unwrap();
    assert_eq!(db.backend(), Some(Backend::Sqlite));
    let one = db.query("SELECT 1 AS one", &[]).await.unwrap();
    assert_eq!(one.one().unwrap()["one"], Value::Int(1));

    db.shutdown().await;
    db.shutdown().await;
    assert_eq!(
        db.query("SELECT 1", &[]).await.unwrap_err().kind(),
        ErrorKind::NotInitialized
    );
    assert_eq!(db.backend(), None);
}

#[tokio::test]
async fn test_insert_returning_includes_defaults() {
    let db = setup().await;

    let result = db
        .query(
            "INSERT INTO users (email, name) VALUES ($1, $2) RETURNING *",
            &[Value::from("a@example.com"), Value::from("A")],
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(
        result.columns(),
        &["id", "email", "name", "active", "profile"]
    );
    let row = result.one().unwrap();
    assert_eq!(row["id"], Value::Int(1));
    assert_eq!(row["name"], Value::from("A"));
    assert_eq!(row["active"], Value::Int(1));
    assert_eq!(row["profile"], Value::Null);
}

#[tokio::test]
async fn test_update_returning_all_matched_rows() {
    let db = setup().await;
    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        db.execute(
            "INSERT INTO users (email, name, active) VALUES ($1, $2, $3)",
            &[
                Value::from(format!("{}@example.com", name)),
                Value::from(*name),
                Value::Bool(i < 3),
            ],
        )
        .await
        .unwrap();
    }

    let result = db
        .query(
            "UPDATE users SET name = $1 WHERE active = $2 RETURNING id, name",
            &[Value::from("renamed"), Value::Bool(true)],
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 3);
    let ids: Vec<_> = result.column("id").unwrap().into_iter().cloned().collect();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert!(result
        .iter()
        .all(|row| row["name"] == Value::from("renamed")));

    let untouched = db
        .query("SELECT name FROM users WHERE id = $1", &[Value::Int(4)])
        .await
        .unwrap();
    assert_eq!(untouched.scalar(), Some(&Value::from("d")));
}

#[tokio::test]
async fn test_delete_returning() {
    let db = setup().await;
    db.execute_batch(
        "INSERT INTO users (email, name) VALUES ('x@example.com', 'x'), ('y@example.com', 'y');",
    )
    .await
    .unwrap();

    let result = db
        .query(
            "DELETE FROM users WHERE email = $1 RETURNING id, email",
            &[Value::from("y@example.com")],
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.one().unwrap()["id"], Value::Int(2));
    assert_eq!(user_count(&db).await, Value::Int(1));
}

#[tokio::test]
async fn test_structured_round_trip() {
    let db = setup().await;
    let profile = json!({
        "bio": "hello",
        "links": ["https://example.com"],
        "age": 36,
        "verified": false,
        "nested": {"k": null}
    });

    let inserted = db
        .query(
            "INSERT INTO users (email, name, profile) VALUES ($1, $2, $3) RETURNING profile",
            &[
                Value::from("json@example.com"),
                Value::from("J"),
                Value::Json(profile.clone()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(inserted.scalar(), Some(&Value::Json(profile.clone())));

    let read = db
        .query(
            "SELECT profile FROM users WHERE email = $1",
            &[Value::from("json@example.com")],
        )
        .await
        .unwrap();
    assert_eq!(read.scalar().and_then(Value::as_json), Some(&profile));
}

#[tokio::test]
async fn test_constraint_violation_leaves_no_write() {
    let db = setup().await;
    let insert = "INSERT INTO users (email, name) VALUES ($1, $2) RETURNING id";
    db.query(insert, &[Value::from("dup@example.com"), Value::from("first")])
        .await
        .unwrap();

    let err = db
        .query(insert, &[Value::from("dup@example.com"), Value::from("second")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    assert_eq!(err.code(), Some("SQLITE_CONSTRAINT_UNIQUE"));
    assert!(!err.is_transient());

    let err = db
        .query(
            "INSERT INTO posts (user_id, title) VALUES ($1, $2) RETURNING id",
            &[Value::Int(99), Value::from("orphan")],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("SQLITE_CONSTRAINT_FOREIGNKEY"));

    assert_eq!(user_count(&db).await, Value::Int(1));
    let posts = db.query("SELECT id FROM posts", &[]).await.unwrap();
    assert!(posts.is_empty());
}

#[tokio::test]
async fn test_malformed_markers() {
    let db = setup().await;

    let gap = db
        .query(
            "SELECT * FROM users WHERE id = $1 OR id = $3",
            &[Value::Int(1), Value::Int(2), Value::Int(3)],
        )
        .await
        .unwrap_err();
    assert_eq!(gap.kind(), ErrorKind::MalformedQuery);

    let missing = db
        .query("SELECT * FROM users WHERE id = $2", &[Value::Int(1)])
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::MalformedQuery);

    let several = db.query("SELECT 1; SELECT 2", &[]).await.unwrap_err();
    assert_eq!(several.kind(), ErrorKind::MalformedQuery);

    let syntax = db.query("SELEC 1", &[]).await.unwrap_err();
    assert_eq!(syntax.kind(), ErrorKind::Rejected);
}

#[tokio::test]
async fn test_repeated_marker_binds_once() {
    let db = setup().await;
    db.execute(
        "INSERT INTO users (email, name) VALUES ($1, $2)",
        &[Value::from("same@example.com"), Value::from("same@example.com")],
    )
    .await
    .unwrap();

    let result = db
        .query(
            "SELECT id FROM users WHERE email = $1 AND name = $1",
            &[Value::from("same@example.com")],
        )
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn test_handle_commit_and_rollback() {
    let db = setup().await;

    {
        let mut conn = db.acquire().await.unwrap();
        conn.begin().await.unwrap();
        let inserted = conn
            .query(
                "INSERT INTO users (email, name) VALUES ($1, $2) RETURNING id",
                &[Value::from("tx@example.com"), Value::from("T")],
            )
            .await
            .unwrap();
        assert_eq!(inserted.scalar(), Some(&Value::Int(1)));
        conn.commit().await.unwrap();
        assert!(!conn.in_transaction().await.unwrap());

        conn.begin().await.unwrap();
        conn.execute("DELETE FROM users", &[]).await.unwrap();
        conn.rollback().await.unwrap();
        conn.release().await.unwrap();
    }

    assert_eq!(user_count(&db).await, Value::Int(1));
}

#[tokio::test]
async fn test_dropped_handle_rolls_back() {
    let db = setup().await;

    {
        let mut conn = db.acquire().await.unwrap();
        conn.begin().await.unwrap();
        conn.execute(
            "INSERT INTO users (email, name) VALUES ($1, $2)",
            &[Value::from("gone@example.com"), Value::from("G")],
        )
        .await
        .unwrap();
        // Dropped without commit.
    }

    assert_eq!(user_count(&db).await, Value::Int(0));
}

#[tokio::test]
async fn test_file_database_shared_across_connections() {
    init_tracing();
    let path = std::env::temp_dir().join(format!("dualdb-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());

    let db = Database::connect(DbConfig::new(&url).max_connections(4))
        .await
        .unwrap();
    db.execute_batch(SCHEMA).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let db = db.clone();
        tasks.push(tokio::spawn(async move {
            db.query(
                "INSERT INTO users (email, name) VALUES ($1, $2) RETURNING id",
                &[Value::from(format!("u{}@example.com", i)), Value::from("U")],
            )
            .await
        }));
    }
    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.row_count, 1);
    }
    assert_eq!(user_count(&db).await, Value::Int(8));

    db.shutdown().await;
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

#[tokio::test]
async fn test_update_returning_when_set_changes_filter_column() {
    let db = setup().await;
    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        db.execute(
            "INSERT INTO users (email, name, active) VALUES ($1, $2, $3)",
            &[
                Value::from(format!("{}@example.com", name)),
                Value::from(*name),
                Value::Bool(i < 3),
            ],
        )
        .await
        .unwrap();
    }

    // After the write no row matches the WHERE clause any more.
    let result = db
        .query(
            "UPDATE users SET active = $1 WHERE active = $2 RETURNING id, active",
            &[Value::Bool(false), Value::Bool(true)],
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 3);
    let ids: Vec<_> = result.column("id").unwrap().into_iter().cloned().collect();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert!(result.iter().all(|row| row["active"] == Value::Int(0)));
}

#[tokio::test]
async fn test_marker_text_inside_literal_is_not_a_marker() {
    let db = setup().await;
    let result = db
        .query("SELECT 'cost $1' AS a, $1 AS b", &[Value::Int(9)])
        .await
        .unwrap();
    let row = result.one().unwrap();
    assert_eq!(row["a"], Value::from("cost $1"));
    assert_eq!(row["b"], Value::Int(9));
}

#[tokio::test]
async fn test_recreated_table_returns_its_own_rows() {
    let db = setup().await;
    db.query("CREATE TABLE tokens (id INTEGER PRIMARY KEY, n INTEGER)", &[])
        .await
        .unwrap();
    db.query("INSERT INTO tokens (n) VALUES ($1) RETURNING id", &[Value::Int(1)])
        .await
        .unwrap();

    db.query("DROP TABLE tokens", &[]).await.unwrap();
    db.query("CREATE TABLE tokens (code TEXT PRIMARY KEY, n INTEGER)", &[])
        .await
        .unwrap();

    let result = db
        .query(
            "INSERT INTO tokens (code, n) VALUES ($1, $2) RETURNING *",
            &[Value::from("a"), Value::Int(2)],
        )
        .await
        .unwrap();
    let row = result.one().unwrap();
    assert_eq!(row["code"], Value::from("a"));
    assert_eq!(row["n"], Value::Int(2));
}

#[tokio::test]
async fn test_without_rowid_returning_is_malformed() {
    let db = setup().await;
    db.execute_batch(
        "CREATE TABLE codes (id INTEGER PRIMARY KEY, label TEXT) WITHOUT ROWID;
         INSERT INTO users (email, name) VALUES ('a@example.com', 'A');",
    )
    .await
    .unwrap();

    let err = db
        .query(
            "INSERT INTO codes (id, label) VALUES ($1, $2) RETURNING *",
            &[Value::Int(5), Value::from("five")],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedQuery);

    let codes = db.query("SELECT count(*) FROM codes", &[]).await.unwrap();
    assert_eq!(codes.scalar(), Some(&Value::Int(0)));
}

#[tokio::test]
async fn test_generic_marker_is_malformed() {
    let db = setup().await;
    let err = db
        .query("SELECT id FROM users WHERE id = ?", &[Value::Int(1)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedQuery);
}
