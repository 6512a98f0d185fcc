use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::params;

use crate::config::AnalyticsConfig;
use crate::database::Database;
use crate::error::VendorPulseError;
use crate::summary::VendorSummary;

const N_TREES: usize = 100;
const MAX_SAMPLE_SIZE: usize = 256;
const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyRecord {
    pub vendor_name: String,
    pub description: String,
    pub profit_margin: Option<f64>,
    pub stock_turnover: Option<f64>,
    pub anomaly_score: f64,
}

enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

/// Isolation forest: outliers sit in sparse regions and are separated by
/// fewer random axis-aligned splits, so shorter average path lengths mean
/// higher anomaly likelihood. Deterministic for a given seed.
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

/// Average unsuccessful-search path length in a BST of `n` points; the
/// standard normalization term from the isolation forest paper.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let nf = n as f64;
            2.0 * ((nf - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (nf - 1.0) / nf
        }
    }
}

fn build_tree(points: &[usize], data: &[Vec<f64>], depth: usize, max_depth: usize, rng: &mut StdRng) -> Node {
    if depth >= max_depth || points.len() <= 1 {
        return Node::Leaf { size: points.len() };
    }

    let n_features = data[points[0]].len();

    // Only features that still vary within this node can split it
    let splittable: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|f| {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for &i in points {
                min = min.min(data[i][f]);
                max = max.max(data[i][f]);
            }
            (max > min).then_some((f, min, max))
        })
        .collect();

    if splittable.is_empty() {
        return Node::Leaf { size: points.len() };
    }

    let (feature, min, max) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = rng.gen_range(min..max);

    let (left, right): (Vec<usize>, Vec<usize>) =
        points.iter().partition(|&&i| data[i][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(&left, data, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(&right, data, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &Node, point: &[f64], depth: f64) -> f64 {
    match node {
        Node::Leaf { size } => depth + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if point[*feature] < *threshold {
                path_length(left, point, depth + 1.0)
            } else {
                path_length(right, point, depth + 1.0)
            }
        }
    }
}

impl IsolationForest {
    pub fn fit(data: &[Vec<f64>], seed: u64) -> Self {
        let n = data.len();
        let sample_size = n.min(MAX_SAMPLE_SIZE);
        let max_depth = (sample_size as f64).log2().ceil().max(1.0) as usize;
        let mut rng = StdRng::seed_from_u64(seed);

        let trees = (0..N_TREES)
            .map(|_| {
                let sample = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                build_tree(&sample, data, 0, max_depth, &mut rng)
            })
            .collect();

        IsolationForest { trees, sample_size }
    }

    /// Anomaly score in (-1, 0); lower means more anomalous, matching the
    /// negated-score convention of the usual library implementations.
    pub fn score(&self, point: &[f64]) -> f64 {
        let avg_path: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, point, 0.0))
            .sum::<f64>()
            / self.trees.len() as f64;

        let norm = average_path_length(self.sample_size);
        if norm == 0.0 {
            return -0.5;
        }
        -(2.0_f64.powf(-avg_path / norm))
    }
}

/// Standardizes each column to zero mean and unit variance; constant
/// columns map to all zeros.
fn standardize(data: &mut [Vec<f64>]) {
    if data.is_empty() {
        return;
    }
    let n = data.len() as f64;
    let n_features = data[0].len();

    for f in 0..n_features {
        let mean = data.iter().map(|row| row[f]).sum::<f64>() / n;
        let var = data.iter().map(|row| (row[f] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        for row in data.iter_mut() {
            row[f] = if std == 0.0 { 0.0 } else { (row[f] - mean) / std };
        }
    }
}

fn feature_vector(row: &VendorSummary) -> Vec<f64> {
    vec![
        row.profit_margin.unwrap_or(0.0),
        row.stock_turnover.unwrap_or(0.0),
        row.total_sales_dollars,
        row.sales_to_purchase_ratio.unwrap_or(0.0),
    ]
}

/// Scores every summary row and flags the top `anomaly_contamination`
/// fraction as anomalous.
pub fn detect_anomalies(
    summaries: &[VendorSummary],
    config: &AnalyticsConfig,
) -> Vec<AnomalyRecord> {
    if summaries.is_empty() {
        return Vec::new();
    }

    let mut data: Vec<Vec<f64>> = summaries.iter().map(feature_vector).collect();
    standardize(&mut data);

    let forest = IsolationForest::fit(&data, config.anomaly_seed);
    let scores: Vec<f64> = data.iter().map(|point| forest.score(point)).collect();

    let flag_count = ((summaries.len() as f64 * config.anomaly_contamination).ceil() as usize)
        .min(summaries.len());

    // Most anomalous = lowest score
    let mut order: Vec<usize> = (0..summaries.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut flagged: Vec<AnomalyRecord> = order[..flag_count]
        .iter()
        .map(|&i| AnomalyRecord {
            vendor_name: summaries[i].vendor_name.clone(),
            description: summaries[i].description.clone(),
            profit_margin: summaries[i].profit_margin,
            stock_turnover: summaries[i].stock_turnover,
            anomaly_score: scores[i],
        })
        .collect();
    flagged.sort_by(|a, b| a.anomaly_score.total_cmp(&b.anomaly_score));
    flagged
}

/// Detects anomalies and replaces the `vendor_anomalies` table.
pub fn rebuild_anomalies(
    db: &mut Database,
    summaries: &[VendorSummary],
    config: &AnalyticsConfig,
) -> Result<Vec<AnomalyRecord>, VendorPulseError> {
    let anomalies = detect_anomalies(summaries, config);

    db.conn().execute_batch(
        r#"
        DROP TABLE IF EXISTS vendor_anomalies_staging;
        CREATE TABLE vendor_anomalies_staging (
            vendor_name TEXT NOT NULL,
            description TEXT NOT NULL,
            profit_margin REAL,
            stock_turnover REAL,
            anomaly_score REAL NOT NULL,
            PRIMARY KEY (vendor_name, description)
        );
        "#,
    )?;

    {
        let mut stmt = db.conn().prepare(
            "INSERT INTO vendor_anomalies_staging
             (vendor_name, description, profit_margin, stock_turnover, anomaly_score)
             VALUES (?, ?, ?, ?, ?)",
        )?;
        for record in &anomalies {
            stmt.execute(params![
                record.vendor_name,
                record.description,
                record.profit_margin,
                record.stock_turnover,
                record.anomaly_score,
            ])?;
        }
    }

    db.swap_staging("vendor_anomalies")?;
    info!(
        "Flagged {} of {} vendors as anomalous",
        anomalies.len(),
        summaries.len()
    );

    Ok(anomalies)
}

/// Loads the published anomaly set; empty if no analytics pass has run yet.
pub fn load_anomalies(db: &Database) -> Result<Vec<AnomalyRecord>, VendorPulseError> {
    if !db.table_exists("vendor_anomalies")? {
        return Ok(Vec::new());
    }

    let mut stmt = db.conn().prepare(
        "SELECT vendor_name, description, profit_margin, stock_turnover, anomaly_score
         FROM vendor_anomalies
         ORDER BY anomaly_score",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(AnomalyRecord {
            vendor_name: row.get(0)?,
            description: row.get(1)?,
            profit_margin: row.get(2)?,
            stock_turnover: row.get(3)?,
            anomaly_score: row.get(4)?,
        })
    })?;

    let mut anomalies = Vec::new();
    for row in rows {
        anomalies.push(row?);
    }
    Ok(anomalies)
}
