//! SQL schema for the Intake SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS batches (
    batch_id      TEXT PRIMARY KEY,
    jurisdiction  TEXT NOT NULL,
    fingerprint   TEXT NOT NULL,   -- hex SHA-256 of the raw batch
    summary       TEXT NOT NULL,   -- JSON CommitResult
    committed_at  TEXT NOT NULL    -- ISO 8601 UTC
);

-- Current state of every entity. Rows are never deleted.
CREATE TABLE IF NOT EXISTS entities (
    entity_id      TEXT PRIMARY KEY,
    jurisdiction   TEXT NOT NULL,
    kind           TEXT NOT NULL,   -- 'person' | 'booking' | 'arrest' | ...
    parent_id      TEXT REFERENCES entities(entity_id),
    external_id    TEXT,
    body           TEXT NOT NULL,   -- JSON of the entity's own attributes
    created_batch  TEXT NOT NULL REFERENCES batches(batch_id),
    updated_batch  TEXT NOT NULL REFERENCES batches(batch_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS entities_person_external_idx
    ON entities(jurisdiction, external_id)
    WHERE kind = 'person' AND external_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS entities_jurisdiction_idx ON entities(jurisdiction);
CREATE INDEX IF NOT EXISTS entities_parent_idx       ON entities(parent_id);

-- History is strictly append-only.
-- No UPDATE or DELETE is ever issued against this table. A row is closed by
-- its successor, which points back at it through previous_history_id.
CREATE TABLE IF NOT EXISTS history (
    history_id           INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id            TEXT NOT NULL REFERENCES entities(entity_id),
    kind                 TEXT NOT NULL,
    batch_id             TEXT NOT NULL REFERENCES batches(batch_id),
    recorded_at          TEXT NOT NULL,   -- valid-from
    value_before         TEXT,            -- NULL for the creating row
    value_after          TEXT NOT NULL,
    previous_history_id  INTEGER REFERENCES history(history_id),
    UNIQUE (previous_history_id)
);

CREATE INDEX IF NOT EXISTS history_entity_idx ON history(entity_id);

PRAGMA user_version = 1;
";
