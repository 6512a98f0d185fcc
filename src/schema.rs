/// Base schema for the VendorPulse store.
///
/// Raw transaction tables (`sales`, `purchases`), the run log, and
/// `alert_history` are append-only. Every derived table is rebuilt on each
/// pipeline run by writing into a `<name>_staging` table and atomically
/// renaming it over the published one (see `Database::swap_staging`), so the
/// derived tables listed here are created lazily by their producing stages.
pub const CREATE_SCHEMA_SQL: &str = r#"
BEGIN TRANSACTION;

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', '1');

CREATE TABLE IF NOT EXISTS runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    status CHAR(1) NOT NULL DEFAULT 'R', -- 'R' running, 'C' complete, 'F' failed
    summary TEXT                         -- JSON stage summary, filled at run end
);

CREATE TABLE IF NOT EXISTS sales (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER,
    vendor_name TEXT NOT NULL,
    description TEXT NOT NULL,
    quantity REAL NOT NULL,
    dollars REAL NOT NULL,
    txn_date TEXT,
    source_file TEXT,
    FOREIGN KEY (run_id) REFERENCES runs(run_id)
);

CREATE TABLE IF NOT EXISTS purchases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER,
    vendor_name TEXT NOT NULL,
    description TEXT NOT NULL,
    quantity REAL NOT NULL,
    dollars REAL NOT NULL,
    txn_date TEXT,
    source_file TEXT,
    FOREIGN KEY (run_id) REFERENCES runs(run_id)
);

CREATE INDEX IF NOT EXISTS idx_sales_vendor ON sales (vendor_name, description);
CREATE INDEX IF NOT EXISTS idx_purchases_vendor ON purchases (vendor_name, description);

CREATE TABLE IF NOT EXISTS alert_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id TEXT NOT NULL UNIQUE,
    run_id INTEGER,
    alert_type TEXT NOT NULL,
    priority TEXT NOT NULL,
    vendor TEXT NOT NULL,
    description TEXT NOT NULL,
    metric_value REAL,
    threshold REAL,
    message TEXT NOT NULL,
    recommendation TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    FOREIGN KEY (run_id) REFERENCES runs(run_id)
);

COMMIT;
"#;
