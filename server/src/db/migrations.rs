use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: keyed JSON documents

CREATE TABLE documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);
",
        ),
        M::up(
            "-- Migration 2: lookup indexes for the hot query paths

CREATE INDEX idx_documents_user_id
    ON documents(collection, json_extract(body, '$.user_id'));

CREATE INDEX idx_documents_nfc_id
    ON documents(collection, json_extract(body, '$.nfc_id'));
",
        ),
    ])
}
