use log::info;
use rusqlite::params;

use crate::config::AnalyticsConfig;
use crate::database::Database;
use crate::error::VendorPulseError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ForecastConfidence {
    High,
    Medium,
    Low,
}

impl ForecastConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastConfidence::High => "High",
            ForecastConfidence::Medium => "Medium",
            ForecastConfidence::Low => "Low",
        }
    }

    fn from_r_squared(r_squared: f64) -> Self {
        if r_squared >= 0.6 {
            ForecastConfidence::High
        } else if r_squared >= 0.3 {
            ForecastConfidence::Medium
        } else {
            ForecastConfidence::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemandForecast {
    pub forecast_quantity: f64,
    pub forecast_dollars: f64,
    pub confidence: ForecastConfidence,
}

/// A vendor below the minimum number of observed periods gets the explicit
/// sentinel instead of an extrapolation from too few points.
#[derive(Debug, Clone, PartialEq)]
pub enum Forecast {
    Projection(DemandForecast),
    InsufficientData { observed_periods: usize },
}

struct TrendFit {
    intercept: f64,
    slope: f64,
    r_squared: f64,
    n: usize,
}

/// Ordinary least squares over (day index, value).
fn fit_trend(values: &[f64]) -> TrendFit {
    let n = values.len();
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / nf;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }

    let slope = if sxx == 0.0 { 0.0 } else { sxy / sxx };
    let intercept = y_mean - slope * x_mean;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in values.iter().enumerate() {
        let predicted = intercept + slope * i as f64;
        ss_res += (y - predicted) * (y - predicted);
        ss_tot += (y - y_mean) * (y - y_mean);
    }
    // A flat series is perfectly predicted by its mean
    let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };

    TrendFit {
        intercept,
        slope,
        r_squared,
        n,
    }
}

impl TrendFit {
    /// Sums the fitted line over the next `horizon` day indices, floored at
    /// zero per day (a declining trend never forecasts negative demand).
    fn extrapolate(&self, horizon: u32) -> f64 {
        (1..=horizon)
            .map(|h| {
                let x = (self.n - 1) as f64 + h as f64;
                (self.intercept + self.slope * x).max(0.0)
            })
            .sum()
    }
}

fn load_daily_series(
    db: &Database,
    vendor_name: &str,
) -> Result<(Vec<f64>, Vec<f64>), VendorPulseError> {
    let mut stmt = db.conn().prepare(
        "SELECT SUM(quantity), SUM(dollars)
         FROM sales
         WHERE vendor_name = ? AND txn_date IS NOT NULL
         GROUP BY txn_date
         ORDER BY txn_date",
    )?;

    let rows = stmt.query_map([vendor_name], |row| {
        Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut quantities = Vec::new();
    let mut dollars = Vec::new();
    for row in rows {
        let (q, d) = row?;
        quantities.push(q);
        dollars.push(d);
    }
    Ok((quantities, dollars))
}

/// Fits a per-vendor daily trend and extrapolates `forecast_horizon_days`
/// forward. Rows without a transaction date are excluded from the series.
pub fn forecast_vendor(
    db: &Database,
    vendor_name: &str,
    config: &AnalyticsConfig,
) -> Result<Forecast, VendorPulseError> {
    let (quantities, dollars) = load_daily_series(db, vendor_name)?;

    if quantities.len() < config.min_forecast_periods as usize {
        return Ok(Forecast::InsufficientData {
            observed_periods: quantities.len(),
        });
    }

    let qty_fit = fit_trend(&quantities);
    let dollar_fit = fit_trend(&dollars);

    // Overall confidence follows the weaker of the two fits
    let r_squared = qty_fit.r_squared.min(dollar_fit.r_squared);

    Ok(Forecast::Projection(DemandForecast {
        forecast_quantity: qty_fit.extrapolate(config.forecast_horizon_days),
        forecast_dollars: dollar_fit.extrapolate(config.forecast_horizon_days),
        confidence: ForecastConfidence::from_r_squared(r_squared),
    }))
}

fn top_vendors_by_sales(db: &Database, limit: u32) -> Result<Vec<String>, VendorPulseError> {
    let mut stmt = db.conn().prepare(
        "SELECT vendor_name
         FROM vendor_sales_summary
         GROUP BY vendor_name
         ORDER BY SUM(total_sales_dollars) DESC
         LIMIT ?",
    )?;
    let rows = stmt.query_map([limit], |row| row.get::<_, String>(0))?;

    let mut vendors = Vec::new();
    for row in rows {
        vendors.push(row?);
    }
    Ok(vendors)
}

#[derive(Debug, Default)]
pub struct ForecastReport {
    pub forecasts: Vec<(String, Forecast)>,
    pub insufficient: usize,
}

/// Forecasts the top vendors by sales dollars and replaces the
/// `demand_forecasts` table. Vendors with too little history are persisted
/// with NULL estimates and an 'Insufficient' confidence marker rather than
/// dropped.
pub fn rebuild_forecasts(
    db: &mut Database,
    config: &AnalyticsConfig,
) -> Result<ForecastReport, VendorPulseError> {
    let vendors = top_vendors_by_sales(db, config.forecast_top_vendors)?;

    let mut report = ForecastReport::default();
    for vendor in vendors {
        let forecast = forecast_vendor(db, &vendor, config)?;
        if matches!(forecast, Forecast::InsufficientData { .. }) {
            report.insufficient += 1;
        }
        report.forecasts.push((vendor, forecast));
    }

    db.conn().execute_batch(
        r#"
        DROP TABLE IF EXISTS demand_forecasts_staging;
        CREATE TABLE demand_forecasts_staging (
            vendor_name TEXT NOT NULL PRIMARY KEY,
            forecast_quantity REAL,
            forecast_dollars REAL,
            confidence TEXT NOT NULL,
            horizon_days INTEGER NOT NULL
        );
        "#,
    )?;

    {
        let mut stmt = db.conn().prepare(
            "INSERT INTO demand_forecasts_staging
             (vendor_name, forecast_quantity, forecast_dollars, confidence, horizon_days)
             VALUES (?, ?, ?, ?, ?)",
        )?;
        for (vendor, forecast) in &report.forecasts {
            match forecast {
                Forecast::Projection(projection) => stmt.execute(params![
                    vendor,
                    projection.forecast_quantity,
                    projection.forecast_dollars,
                    projection.confidence.as_str(),
                    config.forecast_horizon_days,
                ])?,
                Forecast::InsufficientData { .. } => stmt.execute(params![
                    vendor,
                    None::<f64>,
                    None::<f64>,
                    "Insufficient",
                    config.forecast_horizon_days,
                ])?,
            };
        }
    }

    db.swap_staging("demand_forecasts")?;
    info!(
        "Forecast {} vendors ({} with insufficient history)",
        report.forecasts.len(),
        report.insufficient
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::VendorSummary;
    use pretty_assertions::assert_eq;
    use rusqlite::params;

    fn test_analytics() -> AnalyticsConfig {
        AnalyticsConfig {
            lead_time_days: 7.0,
            forecast_horizon_days: 30,
            min_forecast_periods: 10,
            forecast_top_vendors: 3,
            anomaly_contamination: 0.1,
            anomaly_seed: 42,
        }
    }

    fn insert_daily_sales(db: &Database, vendor: &str, days: usize, qty_per_day: f64) {
        for day in 0..days {
            db.conn()
                .execute(
                    "INSERT INTO sales (vendor_name, description, quantity, dollars, txn_date)
                     VALUES (?, 'Widget', ?, ?, ?)",
                    params![
                        vendor,
                        qty_per_day,
                        qty_per_day * 10.0,
                        format!("2024-01-{:02}", day + 1)
                    ],
                )
                .unwrap();
        }
    }

    #[test]
    fn flat_series_forecasts_rate_times_horizon() {
        let db = Database::open_in_memory().unwrap();
        insert_daily_sales(&db, "Acme", 20, 5.0);

        let forecast = forecast_vendor(&db, "Acme", &test_analytics()).unwrap();
        let Forecast::Projection(projection) = forecast else {
            panic!("expected a projection");
        };
        assert!((projection.forecast_quantity - 150.0).abs() < 1e-6);
        assert!((projection.forecast_dollars - 1500.0).abs() < 1e-6);
        assert_eq!(projection.confidence, ForecastConfidence::High);
    }

    #[test]
    fn too_few_periods_returns_insufficient_data() {
        let db = Database::open_in_memory().unwrap();
        insert_daily_sales(&db, "Acme", 4, 5.0);

        let forecast = forecast_vendor(&db, "Acme", &test_analytics()).unwrap();
        assert_eq!(
            forecast,
            Forecast::InsufficientData {
                observed_periods: 4
            }
        );
    }

    #[test]
    fn undated_rows_do_not_count_as_periods() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..50 {
            db.conn()
                .execute(
                    "INSERT INTO sales (vendor_name, description, quantity, dollars)
                     VALUES ('Acme', 'Widget', 5.0, 50.0)",
                    [],
                )
                .unwrap();
        }

        let forecast = forecast_vendor(&db, "Acme", &test_analytics()).unwrap();
        assert_eq!(
            forecast,
            Forecast::InsufficientData {
                observed_periods: 0
            }
        );
    }

    #[test]
    fn rising_trend_forecasts_above_flat_average() {
        let db = Database::open_in_memory().unwrap();
        for day in 0..20 {
            db.conn()
                .execute(
                    "INSERT INTO sales (vendor_name, description, quantity, dollars, txn_date)
                     VALUES ('Acme', 'Widget', ?, ?, ?)",
                    params![
                        1.0 + day as f64,
                        (1.0 + day as f64) * 10.0,
                        format!("2024-01-{:02}", day + 1)
                    ],
                )
                .unwrap();
        }

        let config = test_analytics();
        let Forecast::Projection(projection) = forecast_vendor(&db, "Acme", &config).unwrap()
        else {
            panic!("expected a projection");
        };
        // Mean daily quantity is 10.5; the fitted trend keeps climbing
        assert!(projection.forecast_quantity > 10.5 * 30.0);
        assert_eq!(projection.confidence, ForecastConfidence::High);
    }

    #[test]
    fn declining_trend_never_goes_negative() {
        let db = Database::open_in_memory().unwrap();
        for day in 0..12 {
            db.conn()
                .execute(
                    "INSERT INTO sales (vendor_name, description, quantity, dollars, txn_date)
                     VALUES ('Acme', 'Widget', ?, ?, ?)",
                    params![
                        (12.0 - day as f64).max(0.0),
                        (12.0 - day as f64).max(0.0),
                        format!("2024-01-{:02}", day + 1)
                    ],
                )
                .unwrap();
        }

        let Forecast::Projection(projection) =
            forecast_vendor(&db, "Acme", &test_analytics()).unwrap()
        else {
            panic!("expected a projection");
        };
        assert!(projection.forecast_quantity >= 0.0);
        assert!(projection.forecast_dollars >= 0.0);
    }

    #[test]
    fn rebuild_targets_top_vendors_and_persists() {
        let mut db = Database::open_in_memory().unwrap();
        insert_daily_sales(&db, "Big", 20, 50.0);
        insert_daily_sales(&db, "Small", 20, 1.0);
        insert_daily_sales(&db, "Tiny", 2, 0.5);
        VendorSummary::rebuild(&mut db).unwrap();

        let mut config = test_analytics();
        config.forecast_top_vendors = 2;

        let report = rebuild_forecasts(&mut db, &config).unwrap();
        assert_eq!(report.forecasts.len(), 2);
        assert_eq!(db.row_count("demand_forecasts").unwrap(), 2);

        // Top vendor by dollars comes first
        assert_eq!(report.forecasts[0].0, "Big");
    }
}
