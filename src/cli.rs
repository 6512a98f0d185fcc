use std::path::PathBuf;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::info;

use crate::alerts::AlertEngine;
use crate::anomaly;
use crate::config::Config;
use crate::database::Database;
use crate::error::VendorPulseError;
use crate::ingest;
use crate::inventory;
use crate::pipeline;
use crate::pricing;
use crate::reports;
use crate::scoring;
use crate::summary::VendorSummary;
use crate::validate;

#[derive(Parser)]
#[command(
    name = "vendorpulse",
    version,
    about = "VendorPulse: vendor sales and purchase analytics pipeline"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the full pipeline: ingest, aggregate, validate, analytics, alerts
    Run {
        /// Move ingested files into the archive directory
        #[arg(long = "archive", default_value_t = false)]
        archive: bool,

        /// Database file path (default: app data directory)
        #[arg(long = "db-path", short = 'd')]
        db_path: Option<PathBuf>,

        /// Folder to ingest spreadsheets from (default: from config)
        #[arg(long = "data-dir")]
        data_dir: Option<PathBuf>,
    },

    /// Ingest spreadsheets and rebuild the vendor summary, without analytics
    Ingest {
        /// Move ingested files into the archive directory
        #[arg(long = "archive", default_value_t = false)]
        archive: bool,

        /// Database file path (default: app data directory)
        #[arg(long = "db-path", short = 'd')]
        db_path: Option<PathBuf>,

        /// Folder to ingest spreadsheets from (default: from config)
        #[arg(long = "data-dir")]
        data_dir: Option<PathBuf>,
    },

    /// Validate the current store contents without writing anything
    Validate {
        /// Database file path (default: app data directory)
        #[arg(long = "db-path", short = 'd')]
        db_path: Option<PathBuf>,
    },

    /// Recompute every analytics table from the current vendor summary
    Analytics {
        /// Database file path (default: app data directory)
        #[arg(long = "db-path", short = 'd')]
        db_path: Option<PathBuf>,
    },

    /// Regenerate alerts from the current analytics tables
    Alerts {
        /// Database file path (default: app data directory)
        #[arg(long = "db-path", short = 'd')]
        db_path: Option<PathBuf>,
    },

    /// Report on runs, alerts, and vendor scores
    Report {
        #[command(subcommand)]
        report_type: ReportCommand,
    },
}

#[derive(Subcommand)]
pub enum ReportCommand {
    /// Show the most recent pipeline runs
    Runs {
        /// Show the latest `N` runs (default: 10)
        #[arg(long = "last", short = 'n', default_value_t = 10)]
        last: u32,

        /// Database file path (default: app data directory)
        #[arg(long = "db-path", short = 'd')]
        db_path: Option<PathBuf>,
    },

    /// Show the stored stage summary of one run (default: latest)
    Run {
        /// Specify a run ID to report on
        #[arg(long = "id", short = 'i')]
        id: Option<i64>,

        /// Database file path (default: app data directory)
        #[arg(long = "db-path", short = 'd')]
        db_path: Option<PathBuf>,
    },

    /// Show the current alert set, most urgent first
    Alerts {
        /// Database file path (default: app data directory)
        #[arg(long = "db-path", short = 'd')]
        db_path: Option<PathBuf>,
    },

    /// Show the vendor scoreboard from the latest analytics pass
    Scores {
        /// Database file path (default: app data directory)
        #[arg(long = "db-path", short = 'd')]
        db_path: Option<PathBuf>,
    },
}

impl Cli {
    pub fn handle_command_line(
        mut config: Config,
        project_dirs: &ProjectDirs,
    ) -> Result<(), VendorPulseError> {
        let args = Cli::parse();

        match args.command {
            Command::Run {
                archive,
                db_path,
                data_dir,
            } => {
                apply_data_dir(&mut config, data_dir);
                let mut db = open_database(db_path, project_dirs)?;
                let outcome = pipeline::run(&mut db, &config, archive)?;
                reports::print_run_summary(&outcome);
                Ok(())
            }
            Command::Ingest {
                archive,
                db_path,
                data_dir,
            } => {
                apply_data_dir(&mut config, data_dir);
                let mut db = open_database(db_path, project_dirs)?;
                let report = ingest::ingest_folder(&mut db, &config.pipeline, None, archive)?;
                let summary_rows = VendorSummary::rebuild(&mut db)?;
                println!(
                    "Ingested {} rows from {} files ({} files skipped, {} rows skipped); {} summary rows",
                    report.rows_loaded,
                    report.files_processed,
                    report.files_skipped,
                    report.rows_skipped,
                    summary_rows
                );
                for error in &report.errors {
                    println!("Error: {error}");
                }
                Ok(())
            }
            Command::Validate { db_path } => {
                let db = open_database(db_path, project_dirs)?;
                let report = validate::validate_store(&db, config.pipeline.min_rows)?;
                println!("{report}");
                if report.passed() {
                    Ok(())
                } else {
                    Err(VendorPulseError::Validation(
                        "store validation failed".to_string(),
                    ))
                }
            }
            Command::Analytics { db_path } => {
                let mut db = open_database(db_path, project_dirs)?;
                Self::run_analytics(&mut db, &config)?;
                reports::print_vendor_scores(&db)?;
                Ok(())
            }
            Command::Alerts { db_path } => {
                let mut db = open_database(db_path, project_dirs)?;
                Self::regenerate_alerts(&mut db, &config)?;
                reports::print_active_alerts(&db)?;
                Ok(())
            }
            Command::Report { report_type } => match report_type {
                ReportCommand::Runs { last, db_path } => {
                    let db = open_database(db_path, project_dirs)?;
                    reports::print_recent_runs(&db, last)
                }
                ReportCommand::Run { id, db_path } => {
                    let db = open_database(db_path, project_dirs)?;
                    reports::print_run_detail(&db, id)
                }
                ReportCommand::Alerts { db_path } => {
                    let db = open_database(db_path, project_dirs)?;
                    reports::print_active_alerts(&db)
                }
                ReportCommand::Scores { db_path } => {
                    let db = open_database(db_path, project_dirs)?;
                    reports::print_vendor_scores(&db)
                }
            },
        }
    }

    fn run_analytics(db: &mut Database, config: &Config) -> Result<(), VendorPulseError> {
        let summaries = VendorSummary::load_all(db)?;
        info!("Recomputing analytics for {} summary rows", summaries.len());

        scoring::rebuild_scores(db, &summaries)?;
        inventory::rebuild_recommendations(db, &summaries, config.analytics.lead_time_days)?;
        anomaly::rebuild_anomalies(db, &summaries, &config.analytics)?;
        pricing::rebuild_pricing(db, &summaries)?;
        crate::forecast::rebuild_forecasts(db, &config.analytics)?;
        Ok(())
    }

    /// Re-evaluates the alert rules against the stored summary and analytics
    /// tables without recomputing any of them.
    fn regenerate_alerts(db: &mut Database, config: &Config) -> Result<(), VendorPulseError> {
        let summaries = if db.table_exists("vendor_sales_summary")? {
            VendorSummary::load_all(db)?
        } else {
            Vec::new()
        };
        let scores = scoring::load_scores(db)?;
        let recommendations = inventory::load_recommendations(db)?;
        let anomalies = anomaly::load_anomalies(db)?;

        let batch = AlertEngine::new(&config.alerts).generate(
            db,
            None,
            &summaries,
            &scores,
            &recommendations,
            &anomalies,
        )?;
        info!("Generated {} alerts", batch.alerts.len());
        Ok(())
    }
}

fn apply_data_dir(config: &mut Config, data_dir: Option<PathBuf>) {
    if let Some(dir) = data_dir {
        config.pipeline.archive_dir = dir.join("archive");
        config.pipeline.data_dir = dir;
    }
}

fn open_database(
    db_path: Option<PathBuf>,
    project_dirs: &ProjectDirs,
) -> Result<Database, VendorPulseError> {
    let path = match db_path {
        Some(path) => path,
        None => {
            let dir = project_dirs.data_local_dir();
            std::fs::create_dir_all(dir)?;
            dir.join("vendorpulse.db")
        }
    };
    Database::connect(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn run_accepts_archive_and_overrides() {
        let cli = Cli::try_parse_from([
            "vendorpulse",
            "run",
            "--archive",
            "--db-path",
            "/tmp/vp.db",
            "--data-dir",
            "/tmp/incoming",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                archive,
                db_path,
                data_dir,
            } => {
                assert!(archive);
                assert_eq!(db_path.unwrap(), PathBuf::from("/tmp/vp.db"));
                assert_eq!(data_dir.unwrap(), PathBuf::from("/tmp/incoming"));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn report_runs_defaults_to_ten() {
        let cli = Cli::try_parse_from(["vendorpulse", "report", "runs"]).unwrap();
        match cli.command {
            Command::Report {
                report_type: ReportCommand::Runs { last, .. },
            } => assert_eq!(last, 10),
            _ => panic!("expected report runs"),
        }
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["vendorpulse", "scan"]).is_err());
        assert!(Cli::try_parse_from(["vendorpulse"]).is_err());
    }

    #[test]
    fn alerts_regenerate_from_stored_tables() {
        let mut db = Database::open_in_memory().unwrap();
        let config = Config::default();

        // Scores persisted by an earlier analytics pass. The summary table
        // itself is never built, so a recomputation would find nothing.
        let rows = vec![
            VendorSummary {
                vendor_name: "Best".to_string(),
                description: "Widget".to_string(),
                total_sales_quantity: 100.0,
                total_sales_dollars: 1000.0,
                total_purchase_quantity: 50.0,
                total_purchase_dollars: 100.0,
                gross_profit: 900.0,
                profit_margin: Some(90.0),
                stock_turnover: Some(2.0),
                sales_to_purchase_ratio: Some(10.0),
            },
            VendorSummary {
                vendor_name: "Worst".to_string(),
                description: "Widget".to_string(),
                total_sales_quantity: 10.0,
                total_sales_dollars: 100.0,
                total_purchase_quantity: 100.0,
                total_purchase_dollars: 1000.0,
                gross_profit: -900.0,
                profit_margin: Some(-900.0),
                stock_turnover: Some(0.1),
                sales_to_purchase_ratio: Some(0.1),
            },
        ];
        scoring::rebuild_scores(&mut db, &rows).unwrap();

        Cli::regenerate_alerts(&mut db, &config).unwrap();

        // The stored bottom score drives a poor-performance alert even
        // though no summary rows exist to recompute it from.
        let (alert_type, vendor): (String, String) = db
            .conn()
            .query_row(
                "SELECT alert_type, vendor FROM active_alerts",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(alert_type, "Poor Performance Score");
        assert_eq!(vendor, "Worst");
    }

    #[test]
    fn data_dir_override_moves_archive_too() {
        let mut config = Config::default();
        apply_data_dir(&mut config, Some(PathBuf::from("/tmp/incoming")));
        assert_eq!(config.pipeline.data_dir, PathBuf::from("/tmp/incoming"));
        assert_eq!(
            config.pipeline.archive_dir,
            PathBuf::from("/tmp/incoming/archive")
        );
    }
}
