/// Interaction log and derived fact tables.
pub const SCHEMA: &str = "
    -- Append-only conversation log
    CREATE TABLE IF NOT EXISTS interactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        meta TEXT
    );

    -- Timeless statements extracted from the log
    CREATE TABLE IF NOT EXISTS facts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        source TEXT NOT NULL,
        fact TEXT NOT NULL,
        importance INTEGER NOT NULL DEFAULT 1,
        norm TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_facts_importance ON facts (importance);
";

/// Created after `norm` is known to exist, so files from before the column
/// was added can be migrated first.
pub const FACT_NORM_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_facts_norm ON facts (norm);";
