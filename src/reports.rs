use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use crate::database::Database;
use crate::error::VendorPulseError;
use crate::pipeline::RunOutcome;

fn format_epoch(epoch: Option<i64>) -> String {
    match epoch {
        Some(secs) => match DateTime::<Utc>::from_timestamp(secs, 0) {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "-".to_string(),
        },
        None => "-".to_string(),
    }
}

/// Prints the end-of-run stage summary for a just-completed run.
pub fn print_run_summary(outcome: &RunOutcome) {
    let report = &outcome.report;

    println!("Run ID: {}", outcome.run_id);
    println!("Status: {}", outcome.status.as_str());
    println!("+--------------------------+--------+");
    println!("| Stage                    | Count  |");
    println!("+--------------------------+--------+");
    println!("| Files processed          | {:>6} |", report.files_processed);
    println!("| Files skipped            | {:>6} |", report.files_skipped);
    println!("| Rows loaded              | {:>6} |", report.rows_loaded);
    println!("| Rows skipped             | {:>6} |", report.rows_skipped);
    println!("| Summary rows             | {:>6} |", report.summary_rows);
    println!("| Vendors scored           | {:>6} |", report.vendors_scored);
    println!("| Overstocked              | {:>6} |", report.overstocked);
    println!("| Understocked             | {:>6} |", report.understocked);
    println!("| Anomalies flagged        | {:>6} |", report.anomalies_flagged);
    println!("| Rows priced              | {:>6} |", report.rows_priced);
    println!("| Pricing skipped          | {:>6} |", report.pricing_skipped);
    println!("| Forecasts                | {:>6} |", report.forecasts);
    println!("| Forecasts insufficient   | {:>6} |", report.forecasts_insufficient);
    println!("| Alerts generated         | {:>6} |", report.alerts_generated);
    println!("| Alerts critical          | {:>6} |", report.alerts_critical);
    println!("+--------------------------+--------+");

    if !report.validation_passed {
        println!("Validation FAILED:");
        for failure in &report.validation_failures {
            println!(" - {failure}");
        }
    }
    for error in &report.errors {
        println!("Error: {error}");
    }
}

/// Prints the most recent rows of the run log.
pub fn print_recent_runs(db: &Database, last: u32) -> Result<(), VendorPulseError> {
    let mut stmt = db.conn().prepare(
        "SELECT run_id, started_at, finished_at, status
         FROM runs
         ORDER BY run_id DESC
         LIMIT ?",
    )?;
    let rows: Vec<(i64, Option<i64>, Option<i64>, String)> = stmt
        .query_map([last], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<_, _>>()?;

    if rows.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for (run_id, started, finished, status) in rows {
        println!(
            "Run ID: {}, Started: {}, Finished: {}, Status: {}",
            run_id,
            format_epoch(started),
            format_epoch(finished),
            status
        );
    }
    Ok(())
}

/// Prints the current alert set, most urgent first.
pub fn print_active_alerts(db: &Database) -> Result<(), VendorPulseError> {
    if !db.table_exists("active_alerts")? {
        println!("No alerts generated yet.");
        return Ok(());
    }

    let mut stmt = db.conn().prepare(
        "SELECT alert_id, priority, alert_type, vendor, message, recommendation
         FROM active_alerts
         ORDER BY CASE priority
                      WHEN 'CRITICAL' THEN 0
                      WHEN 'HIGH' THEN 1
                      WHEN 'MEDIUM' THEN 2
                      ELSE 3
                  END,
                  alert_id",
    )?;
    let rows: Vec<(String, String, String, String, String, String)> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?
        .collect::<Result<_, _>>()?;

    if rows.is_empty() {
        println!("No active alerts.");
        return Ok(());
    }

    println!("Active alerts: {}", rows.len());
    for (alert_id, priority, alert_type, vendor, message, recommendation) in rows {
        println!("[{priority}] {alert_id} {alert_type} - {vendor}");
        println!("    {message}");
        println!("    Recommendation: {recommendation}");
    }
    Ok(())
}

/// Prints the vendor scoreboard from the latest analytics pass.
pub fn print_vendor_scores(db: &Database) -> Result<(), VendorPulseError> {
    if !db.table_exists("vendor_performance_scores")? {
        println!("No scores computed yet.");
        return Ok(());
    }

    let mut stmt = db.conn().prepare(
        "SELECT vendor_name, description, performance_score, performance_tier
         FROM vendor_performance_scores
         ORDER BY performance_score DESC",
    )?;
    let rows: Vec<(String, String, f64, String)> = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<_, _>>()?;

    if rows.is_empty() {
        println!("No scores computed yet.");
        return Ok(());
    }

    println!("+----------------------+----------------------+--------+-----------+");
    println!("| Vendor               | Item                 | Score  | Tier      |");
    println!("+----------------------+----------------------+--------+-----------+");
    for (vendor, description, score, tier) in rows {
        println!(
            "| {:<20.20} | {:<20.20} | {:>6.1} | {:<9} |",
            vendor, description, score, tier
        );
    }
    println!("+----------------------+----------------------+--------+-----------+");
    Ok(())
}

/// Prints the stored stage summary of a specific run, or the latest.
pub fn print_run_detail(db: &Database, run_id: Option<i64>) -> Result<(), VendorPulseError> {
    let row: Option<(i64, Option<i64>, Option<i64>, String, Option<String>)> = match run_id {
        Some(id) => db
            .conn()
            .query_row(
                "SELECT run_id, started_at, finished_at, status, summary
                 FROM runs WHERE run_id = ?",
                [id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?,
        None => db
            .conn()
            .query_row(
                "SELECT run_id, started_at, finished_at, status, summary
                 FROM runs ORDER BY run_id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?,
    };

    let Some((run_id, started, finished, status, summary)) = row else {
        println!("Run not found.");
        return Ok(());
    };

    println!("Run ID:   {run_id}");
    println!("Started:  {}", format_epoch(started));
    println!("Finished: {}", format_epoch(finished));
    println!("Status:   {status}");
    match summary {
        Some(json) => match serde_json::from_str::<serde_json::Value>(&json) {
            Ok(value) => println!("Summary:  {value:#}"),
            Err(_) => println!("Summary:  {json}"),
        },
        None => println!("Summary:  -"),
    }
    Ok(())
}
