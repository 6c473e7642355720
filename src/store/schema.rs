pub const SCHEMA: &str = r#"
-- Append-only lease journal. Replayed in seq order to rebuild the index.
CREATE TABLE IF NOT EXISTS lease_journal (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    op TEXT NOT NULL CHECK (op IN ('put', 'remove')),
    token TEXT NOT NULL,
    record TEXT,               -- JSON lease body, NULL for removals
    recorded_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_lease_journal_token ON lease_journal(token);
"#;
