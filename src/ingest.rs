use std::fs;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use log::{info, warn};
use rusqlite::params;

use crate::config::PipelineConfig;
use crate::database::Database;
use crate::error::VendorPulseError;

/// Destination raw table, inferred from the source file's name.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RawKind {
    Sales,
    Purchases,
}

impl RawKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            RawKind::Sales => "sales",
            RawKind::Purchases => "purchases",
        }
    }

    /// Files named `sales*.csv`, `purchase_2024.xlsx` etc. route by prefix.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("sales") {
            Some(RawKind::Sales)
        } else if lower.starts_with("purchase") {
            Some(RawKind::Purchases)
        } else {
            None
        }
    }

    fn quantity_headers(&self) -> &'static [&'static str] {
        match self {
            RawKind::Sales => &["quantity", "salesquantity"],
            RawKind::Purchases => &["quantity", "purchasequantity"],
        }
    }

    fn dollars_headers(&self) -> &'static [&'static str] {
        match self {
            RawKind::Sales => &["dollars", "salesdollars"],
            RawKind::Purchases => &["dollars", "purchasedollars"],
        }
    }

    fn date_headers(&self) -> &'static [&'static str] {
        match self {
            RawKind::Sales => &["salesdate", "date", "txndate"],
            RawKind::Purchases => &["purchasedate", "date", "txndate"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawRow {
    pub vendor_name: String,
    pub description: String,
    pub quantity: f64,
    pub dollars: f64,
    pub txn_date: Option<String>,
}

/// End-of-run ingestion summary. A file that cannot be read or falls below
/// the minimum row threshold is skipped with a note; the rest of the folder
/// is still processed.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub rows_loaded: usize,
    pub rows_skipped: usize,
    pub errors: Vec<String>,
}

/// Column positions resolved from a header row. Matching is case-insensitive
/// and ignores spaces/underscores, so `Vendor Name`, `vendor_name` and
/// `VendorName` all resolve.
struct ColumnMap {
    vendor: usize,
    description: usize,
    quantity: usize,
    dollars: usize,
    date: Option<usize>,
}

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect::<String>()
        .to_ascii_lowercase()
}

impl ColumnMap {
    fn from_headers(headers: &[String], kind: RawKind) -> Result<Self, VendorPulseError> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

        let find = |candidates: &[&str]| -> Option<usize> {
            normalized
                .iter()
                .position(|h| candidates.contains(&h.as_str()))
        };

        let vendor = find(&["vendorname", "vendor"]);
        let description = find(&["description", "product"]);
        let quantity = find(kind.quantity_headers());
        let dollars = find(kind.dollars_headers());

        match (vendor, description, quantity, dollars) {
            (Some(vendor), Some(description), Some(quantity), Some(dollars)) => Ok(ColumnMap {
                vendor,
                description,
                quantity,
                dollars,
                date: find(kind.date_headers()),
            }),
            _ => Err(VendorPulseError::Error(format!(
                "Missing required columns for {} data (have: {})",
                kind.table_name(),
                headers.join(", ")
            ))),
        }
    }
}

/// Ingests every recognized spreadsheet in the data folder into its raw
/// table, appending rows. Unreadable or too-small files are skipped and
/// reported; ingestion of the remaining files continues. When `archive` is
/// set, successfully loaded files are moved aside to prevent reprocessing.
pub fn ingest_folder(
    db: &mut Database,
    config: &PipelineConfig,
    run_id: Option<i64>,
    archive: bool,
) -> Result<IngestReport, VendorPulseError> {
    let mut report = IngestReport::default();

    let mut paths: Vec<PathBuf> = fs::read_dir(&config.data_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    for path in paths {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if !config.allowed_extensions.iter().any(|a| *a == ext) {
            continue;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let Some(kind) = RawKind::from_file_name(&file_name) else {
            report.files_skipped += 1;
            report.errors.push(format!(
                "{file_name}: file name does not identify a sales or purchase table"
            ));
            continue;
        };

        match load_file(db, &path, kind, config.min_rows, run_id) {
            Ok((loaded, skipped)) => {
                report.files_processed += 1;
                report.rows_loaded += loaded;
                report.rows_skipped += skipped;
                info!(
                    "Ingested {loaded} rows from {file_name} into {}",
                    kind.table_name()
                );

                if archive {
                    if let Err(e) = archive_file(&path, &config.archive_dir) {
                        warn!("Failed to archive {file_name}: {e}");
                        report.errors.push(format!("{file_name}: archive failed: {e}"));
                    }
                }
            }
            Err(e) => {
                warn!("Skipping {file_name}: {e}");
                report.files_skipped += 1;
                report.errors.push(format!("{file_name}: {e}"));
            }
        }
    }

    Ok(report)
}

fn archive_file(path: &Path, archive_dir: &Path) -> Result<(), VendorPulseError> {
    fs::create_dir_all(archive_dir)?;
    let target = archive_dir.join(path.file_name().unwrap_or_default());
    fs::rename(path, target)?;
    Ok(())
}

/// Reads one file and appends its rows into the raw table in a single
/// transaction. Files with fewer than `min_rows` data rows are rejected as
/// likely malformed.
fn load_file(
    db: &mut Database,
    path: &Path,
    kind: RawKind,
    min_rows: u32,
    run_id: Option<i64>,
) -> Result<(usize, usize), VendorPulseError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let (rows, rows_skipped) = if ext == "csv" {
        read_csv_rows(path, kind)?
    } else {
        read_workbook_rows(path, kind)?
    };

    if rows.len() < min_rows as usize {
        return Err(VendorPulseError::Error(format!(
            "only {} rows (minimum is {min_rows}), rejecting as likely malformed",
            rows.len()
        )));
    }

    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let tx = db.conn_mut().transaction()?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} (run_id, vendor_name, description, quantity, dollars, txn_date, source_file)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            kind.table_name()
        ))?;
        for row in &rows {
            stmt.execute(params![
                run_id,
                row.vendor_name,
                row.description,
                row.quantity,
                row.dollars,
                row.txn_date,
                source_file,
            ])?;
        }
    }
    tx.commit()?;

    Ok((rows.len(), rows_skipped))
}

fn read_csv_rows(path: &Path, kind: RawKind) -> Result<(Vec<RawRow>, usize), VendorPulseError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let map = ColumnMap::from_headers(&headers, kind)?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = record?;
        let get = |idx: usize| record.get(idx).unwrap_or("").trim().to_string();

        let vendor_name = get(map.vendor);
        let description = get(map.description);
        let quantity = get(map.quantity).parse::<f64>();
        let dollars = get(map.dollars).parse::<f64>();

        match (quantity, dollars) {
            (Ok(quantity), Ok(dollars)) if !vendor_name.is_empty() => {
                let txn_date = map
                    .date
                    .map(|idx| get(idx))
                    .filter(|date| !date.is_empty());
                rows.push(RawRow {
                    vendor_name,
                    description,
                    quantity,
                    dollars,
                    txn_date,
                });
            }
            _ => skipped += 1,
        }
    }

    Ok((rows, skipped))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn cell_to_f64(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn read_workbook_rows(
    path: &Path,
    kind: RawKind,
) -> Result<(Vec<RawRow>, usize), VendorPulseError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| VendorPulseError::Error("workbook has no sheets".to_string()))??;

    let mut iter = range.rows();
    let headers: Vec<String> = iter
        .next()
        .ok_or_else(|| VendorPulseError::Error("workbook sheet is empty".to_string()))?
        .iter()
        .map(cell_to_string)
        .collect();
    let map = ColumnMap::from_headers(&headers, kind)?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for cells in iter {
        let vendor_name = cells.get(map.vendor).map(cell_to_string).unwrap_or_default();
        let description = cells
            .get(map.description)
            .map(cell_to_string)
            .unwrap_or_default();
        let quantity = cells.get(map.quantity).and_then(cell_to_f64);
        let dollars = cells.get(map.dollars).and_then(cell_to_f64);

        match (quantity, dollars) {
            (Some(quantity), Some(dollars)) if !vendor_name.is_empty() => {
                let txn_date = map
                    .date
                    .and_then(|idx| cells.get(idx))
                    .map(cell_to_string)
                    .filter(|date| !date.is_empty());
                rows.push(RawRow {
                    vendor_name,
                    description,
                    quantity,
                    dollars,
                    txn_date,
                });
            }
            _ => skipped += 1,
        }
    }

    Ok((rows, skipped))
}
