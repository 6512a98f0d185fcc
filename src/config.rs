use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub vendorpulse: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            vendorpulse: Self::DEFAULT_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.vendorpulse.clone();
        self.vendorpulse = self.vendorpulse.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.vendorpulse.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.vendorpulse = Self::DEFAULT_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub min_rows: u32,
    pub allowed_extensions: Vec<String>,
    // Consumed by the external watcher/scheduler collaborators, not by the
    // pipeline itself. Kept here so one file configures the whole deployment.
    pub cooldown_seconds: u32,
    pub schedule_hours: u32,
}

impl PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_dir: PathBuf::from("data"),
            archive_dir: PathBuf::from("data/archive"),
            min_rows: 10,
            allowed_extensions: vec!["csv".into(), "xlsx".into(), "xls".into()],
            cooldown_seconds: 30,
            schedule_hours: 24,
        }
    }

    fn ensure_valid(&mut self) {
        for ext in self.allowed_extensions.iter_mut() {
            *ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        }
        self.allowed_extensions.retain(|ext| !ext.is_empty());
        if self.allowed_extensions.is_empty() {
            eprintln!("Config error: allowed_extensions is empty - using defaults");
            self.allowed_extensions = Self::default().allowed_extensions;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AnalyticsConfig {
    pub lead_time_days: f64,
    pub forecast_horizon_days: u32,
    pub min_forecast_periods: u32,
    pub forecast_top_vendors: u32,
    pub anomaly_contamination: f64,
    pub anomaly_seed: u64,
}

impl AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            lead_time_days: 7.0,
            forecast_horizon_days: 30,
            min_forecast_periods: 10,
            forecast_top_vendors: 3,
            anomaly_contamination: 0.10,
            anomaly_seed: 42,
        }
    }

    fn ensure_valid(&mut self) {
        if self.lead_time_days <= 0.0 {
            eprintln!(
                "Config error: lead_time_days of {} is invalid - using default of 7",
                self.lead_time_days
            );
            self.lead_time_days = 7.0;
        }
        if !(self.anomaly_contamination > 0.0 && self.anomaly_contamination <= 0.5) {
            eprintln!(
                "Config error: anomaly_contamination of {} is out of range (0, 0.5] - using default of 0.1",
                self.anomaly_contamination
            );
            self.anomaly_contamination = 0.1;
        }
        if self.min_forecast_periods < 2 {
            eprintln!(
                "Config error: min_forecast_periods of {} is too small - using 2",
                self.min_forecast_periods
            );
            self.min_forecast_periods = 2;
        }
    }
}

/// One numeric threshold per alert rule. Passed into the alert engine by
/// value at call time so tests can vary thresholds without cross-test
/// interference.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AlertThresholds {
    pub low_profit_margin: f64,
    pub negative_gross_profit: f64,
    pub low_stock_turnover: f64,
    pub overstock_ratio: f64,
    pub understock_ratio: f64,
    pub anomaly_score: f64,
    pub poor_performance_score: f64,
    pub high_inventory_value: f64,
}

impl AlertThresholds {
    fn default() -> Self {
        AlertThresholds {
            low_profit_margin: 15.0,
            negative_gross_profit: 0.0,
            low_stock_turnover: 0.5,
            overstock_ratio: 1.0,
            understock_ratio: 1.0,
            anomaly_score: -0.55,
            poor_performance_score: 30.0,
            high_inventory_value: 50_000.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    pub analytics: AnalyticsConfig,
    pub alerts: AlertThresholds,
}

impl Config {
    pub fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            pipeline: PipelineConfig::default(),
            analytics: AnalyticsConfig::default(),
            alerts: AlertThresholds::default(),
        }
    }

    /// Loads the configuration from a TOML file located in the app's data
    /// directory. If the file is missing or fails to parse, defaults are
    /// used. Additionally, writes the default config to disk if no file
    /// exists.
    pub fn load(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join("config.toml");
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Self {
        let default_config = Config::default();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!(
                        "Failed to create configuration directory {}: {}",
                        parent.display(),
                        e
                    );
                }
            }
            if let Ok(toml_string) = toml::to_string_pretty(&default_config) {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            } else {
                eprintln!("Failed to serialize default config.");
            }
        }

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path));

        let mut config: Config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.pipeline.ensure_valid();
        self.analytics.ensure_valid();
    }
}
