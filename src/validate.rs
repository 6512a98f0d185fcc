use std::fmt;

use log::{info, warn};

use crate::database::Database;
use crate::error::VendorPulseError;

/// Outcome of a single validation check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Fixed checklist run against freshly written tables. Used as a gate:
/// downstream analytics stages must not execute when `passed()` is false.
/// No auto-repair is attempted.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|check| !check.passed).collect()
    }

    fn record(&mut self, name: &str, passed: bool, detail: String) {
        if passed {
            info!("Validation check '{name}' passed: {detail}");
        } else {
            warn!("Validation check '{name}' FAILED: {detail}");
        }
        self.checks.push(CheckResult {
            name: name.to_string(),
            passed,
            detail,
        });
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let mark = if check.passed { "ok " } else { "FAIL" };
            writeln!(f, "[{mark}] {}: {}", check.name, check.detail)?;
        }
        Ok(())
    }
}

const RAW_TABLES: [&str; 2] = ["sales", "purchases"];

/// Runs the checklist: tables exist with at least `min_rows` rows, no
/// negative quantities or dollars in the raw tables, no negative totals in
/// the summary, and the descriptive key columns are non-empty.
pub fn validate_store(db: &Database, min_rows: u32) -> Result<ValidationReport, VendorPulseError> {
    let mut report = ValidationReport::default();

    for table in RAW_TABLES {
        check_table(db, &mut report, table, min_rows)?;
    }

    if db.table_exists("vendor_sales_summary")? {
        let negatives: i64 = db.conn().query_row(
            "SELECT count(*) FROM vendor_sales_summary
             WHERE total_sales_quantity < 0 OR total_sales_dollars < 0
                OR total_purchase_quantity < 0 OR total_purchase_dollars < 0",
            [],
            |row| row.get(0),
        )?;
        report.record(
            "summary_non_negative",
            negatives == 0,
            format!("{negatives} summary rows with negative totals"),
        );
    } else {
        report.record(
            "summary_exists",
            false,
            "table 'vendor_sales_summary' does not exist".to_string(),
        );
    }

    Ok(report)
}

fn check_table(
    db: &Database,
    report: &mut ValidationReport,
    table: &str,
    min_rows: u32,
) -> Result<(), VendorPulseError> {
    if !db.table_exists(table)? {
        report.record(
            &format!("{table}_exists"),
            false,
            format!("table '{table}' does not exist"),
        );
        return Ok(());
    }

    let rows = db.row_count(table)?;
    report.record(
        &format!("{table}_row_count"),
        rows >= min_rows as i64,
        format!("{rows} rows (minimum {min_rows})"),
    );

    let negatives: i64 = db.conn().query_row(
        &format!("SELECT count(*) FROM {table} WHERE quantity < 0 OR dollars < 0"),
        [],
        |row| row.get(0),
    )?;
    report.record(
        &format!("{table}_non_negative"),
        negatives == 0,
        format!("{negatives} rows with negative quantity or dollars"),
    );

    let blank_keys: i64 = db.conn().query_row(
        &format!(
            "SELECT count(*) FROM {table}
             WHERE vendor_name IS NULL OR trim(vendor_name) = ''
                OR description IS NULL OR trim(description) = ''"
        ),
        [],
        |row| row.get(0),
    )?;
    report.record(
        &format!("{table}_keys_present"),
        blank_keys == 0,
        format!("{blank_keys} rows with blank vendor or description"),
    );

    Ok(())
}
