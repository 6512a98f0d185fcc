use log::info;
use rusqlite::params;

use crate::database::Database;
use crate::error::VendorPulseError;
use crate::summary::VendorSummary;

// Composite weights over the normalized metrics. Must sum to 1.
const W_PROFIT_MARGIN: f64 = 0.35;
const W_STOCK_TURNOVER: f64 = 0.25;
const W_SALES_DOLLARS: f64 = 0.25;
const W_EFFICIENCY: f64 = 0.15;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PerformanceTier {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl PerformanceTier {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 25.0 => PerformanceTier::Poor,
            s if s < 50.0 => PerformanceTier::Fair,
            s if s < 75.0 => PerformanceTier::Good,
            _ => PerformanceTier::Excellent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceTier::Poor => "Poor",
            PerformanceTier::Fair => "Fair",
            PerformanceTier::Good => "Good",
            PerformanceTier::Excellent => "Excellent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceScore {
    pub vendor_name: String,
    pub description: String,
    pub performance_score: f64,
    pub performance_tier: PerformanceTier,
}

/// Min-max normalizes one metric column into [0, 1].
///
/// Undefined values take the 0.0 raw floor before normalization. When the
/// column has zero variance (all defined values equal) every row gets the
/// neutral 0.5 instead of dividing by zero.
fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if values.is_empty() || (max - min).abs() < f64::EPSILON {
        return vec![0.5; values.len()];
    }

    values.iter().map(|v| (v - min) / (max - min)).collect()
}

fn efficiency_ratio(row: &VendorSummary) -> f64 {
    if row.total_purchase_dollars == 0.0 {
        0.0
    } else {
        row.total_sales_dollars / row.total_purchase_dollars
    }
}

/// Computes the weighted composite score for every summary row.
///
/// Deterministic and stateless: identical input always yields identical
/// scores. Scores land in [0, 100] for any input distribution, including
/// degenerate all-equal columns.
pub fn score_summaries(summaries: &[VendorSummary]) -> Vec<PerformanceScore> {
    let margins: Vec<f64> = summaries
        .iter()
        .map(|row| row.profit_margin.unwrap_or(0.0))
        .collect();
    let turnovers: Vec<f64> = summaries
        .iter()
        .map(|row| row.stock_turnover.unwrap_or(0.0))
        .collect();
    let sales: Vec<f64> = summaries.iter().map(|row| row.total_sales_dollars).collect();
    let efficiency: Vec<f64> = summaries.iter().map(efficiency_ratio).collect();

    let n_margin = min_max_normalize(&margins);
    let n_turnover = min_max_normalize(&turnovers);
    let n_sales = min_max_normalize(&sales);
    let n_efficiency = min_max_normalize(&efficiency);

    summaries
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let score = (n_margin[i] * W_PROFIT_MARGIN
                + n_turnover[i] * W_STOCK_TURNOVER
                + n_sales[i] * W_SALES_DOLLARS
                + n_efficiency[i] * W_EFFICIENCY)
                * 100.0;
            let score = score.clamp(0.0, 100.0);

            PerformanceScore {
                vendor_name: row.vendor_name.clone(),
                description: row.description.clone(),
                performance_score: score,
                performance_tier: PerformanceTier::from_score(score),
            }
        })
        .collect()
}

/// Scores all summary rows and replaces `vendor_performance_scores`.
pub fn rebuild_scores(
    db: &mut Database,
    summaries: &[VendorSummary],
) -> Result<Vec<PerformanceScore>, VendorPulseError> {
    let scores = score_summaries(summaries);

    db.conn().execute_batch(
        r#"
        DROP TABLE IF EXISTS vendor_performance_scores_staging;
        CREATE TABLE vendor_performance_scores_staging (
            vendor_name TEXT NOT NULL,
            description TEXT NOT NULL,
            performance_score REAL NOT NULL,
            performance_tier TEXT NOT NULL,
            PRIMARY KEY (vendor_name, description)
        );
        "#,
    )?;

    {
        let mut stmt = db.conn().prepare(
            "INSERT INTO vendor_performance_scores_staging
             (vendor_name, description, performance_score, performance_tier)
             VALUES (?, ?, ?, ?)",
        )?;
        for score in &scores {
            stmt.execute(params![
                score.vendor_name,
                score.description,
                score.performance_score,
                score.performance_tier.as_str(),
            ])?;
        }
    }

    db.swap_staging("vendor_performance_scores")?;
    info!("Scored {} vendors", scores.len());

    Ok(scores)
}

/// Loads the published scores; empty if no analytics pass has run yet.
pub fn load_scores(db: &Database) -> Result<Vec<PerformanceScore>, VendorPulseError> {
    if !db.table_exists("vendor_performance_scores")? {
        return Ok(Vec::new());
    }

    let mut stmt = db.conn().prepare(
        "SELECT vendor_name, description, performance_score
         FROM vendor_performance_scores
         ORDER BY vendor_name, description",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
        ))
    })?;

    let mut scores = Vec::new();
    for row in rows {
        let (vendor_name, description, performance_score) = row?;
        scores.push(PerformanceScore {
            vendor_name,
            description,
            performance_score,
            performance_tier: PerformanceTier::from_score(performance_score),
        });
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(vendor: &str, margin: Option<f64>, turnover: Option<f64>, sales: f64, purchases: f64) -> VendorSummary {
        VendorSummary {
            vendor_name: vendor.to_string(),
            description: "Widget".to_string(),
            total_sales_quantity: 0.0,
            total_sales_dollars: sales,
            total_purchase_quantity: 0.0,
            total_purchase_dollars: purchases,
            gross_profit: sales - purchases,
            profit_margin: margin,
            stock_turnover: turnover,
            sales_to_purchase_ratio: None,
        }
    }

    #[test]
    fn scores_stay_in_bounds() {
        let rows = vec![
            summary("A", Some(80.0), Some(5.0), 1000.0, 100.0),
            summary("B", Some(-20.0), Some(0.1), 10.0, 500.0),
            summary("C", Some(30.0), Some(1.0), 400.0, 300.0),
        ];
        for score in score_summaries(&rows) {
            assert!((0.0..=100.0).contains(&score.performance_score));
        }
    }

    #[test]
    fn best_row_on_every_metric_scores_100() {
        let rows = vec![
            summary("Best", Some(80.0), Some(5.0), 1000.0, 100.0),
            summary("Worst", Some(10.0), Some(0.5), 100.0, 1000.0),
        ];
        let scores = score_summaries(&rows);
        assert!((scores[0].performance_score - 100.0).abs() < 1e-9);
        assert!(scores[0].performance_tier == PerformanceTier::Excellent);
        assert!(scores[1].performance_score.abs() < 1e-9);
        assert!(scores[1].performance_tier == PerformanceTier::Poor);
    }

    #[test]
    fn degenerate_all_equal_metrics_get_neutral_midpoint() {
        let rows = vec![
            summary("A", Some(25.0), Some(1.0), 100.0, 100.0),
            summary("B", Some(25.0), Some(1.0), 100.0, 100.0),
        ];
        let scores = score_summaries(&rows);
        // All four metrics normalize to 0.5, so the composite is exactly 50
        for score in &scores {
            assert!((score.performance_score - 50.0).abs() < 1e-9);
            assert_eq!(score.performance_tier, PerformanceTier::Good);
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let rows = vec![
            summary("A", Some(42.5), Some(1.7), 812.33, 95.2),
            summary("B", Some(12.1), Some(0.3), 55.0, 70.0),
            summary("C", None, None, 0.0, 10.0),
        ];
        let first = score_summaries(&rows);
        let second = score_summaries(&rows);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.performance_score.to_bits(), b.performance_score.to_bits());
        }
    }

    #[test]
    fn tier_bands() {
        assert_eq!(PerformanceTier::from_score(0.0), PerformanceTier::Poor);
        assert_eq!(PerformanceTier::from_score(24.99), PerformanceTier::Poor);
        assert_eq!(PerformanceTier::from_score(25.0), PerformanceTier::Fair);
        assert_eq!(PerformanceTier::from_score(50.0), PerformanceTier::Good);
        assert_eq!(PerformanceTier::from_score(75.0), PerformanceTier::Excellent);
        assert_eq!(PerformanceTier::from_score(100.0), PerformanceTier::Excellent);
    }

    #[test]
    fn load_scores_reads_published_table() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(load_scores(&db).unwrap().is_empty());

        let rows = vec![
            summary("A", Some(80.0), Some(5.0), 1000.0, 100.0),
            summary("B", Some(10.0), Some(0.5), 100.0, 1000.0),
        ];
        let written = rebuild_scores(&mut db, &rows).unwrap();

        let loaded = load_scores(&db).unwrap();
        assert_eq!(loaded.len(), 2);
        for score in &written {
            let found = loaded
                .iter()
                .find(|s| s.vendor_name == score.vendor_name)
                .unwrap();
            assert_eq!(found.performance_score, score.performance_score);
            assert_eq!(found.performance_tier, score.performance_tier);
        }
    }

    #[test]
    fn rebuild_replaces_score_table() {
        let mut db = Database::open_in_memory().unwrap();
        let rows = vec![
            summary("A", Some(50.0), Some(2.0), 500.0, 250.0),
            summary("B", Some(10.0), Some(0.5), 100.0, 90.0),
        ];
        rebuild_scores(&mut db, &rows).unwrap();
        assert_eq!(db.row_count("vendor_performance_scores").unwrap(), 2);

        rebuild_scores(&mut db, &rows[..1]).unwrap();
        assert_eq!(db.row_count("vendor_performance_scores").unwrap(), 1);
    }
}
