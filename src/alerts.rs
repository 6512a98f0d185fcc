use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use log::info;
use rusqlite::{named_params, params};
use strum::Display;

use crate::anomaly::AnomalyRecord;
use crate::config::AlertThresholds;
use crate::database::Database;
use crate::error::VendorPulseError;
use crate::inventory::InventoryRecommendation;
use crate::scoring::PerformanceScore;
use crate::summary::VendorSummary;

#[derive(Debug, Display, PartialEq, Eq, Copy, Clone)]
pub enum AlertType {
    #[strum(serialize = "Low Profit Margin")]
    LowProfitMargin,
    #[strum(serialize = "Negative Profit")]
    NegativeProfit,
    #[strum(serialize = "Low Stock Turnover")]
    LowStockTurnover,
    #[strum(serialize = "Overstocked")]
    Overstocked,
    #[strum(serialize = "Understocked")]
    Understocked,
    #[strum(serialize = "Anomalous Vendor")]
    AnomalousVendor,
    #[strum(serialize = "Poor Performance Score")]
    PoorPerformance,
    #[strum(serialize = "High Inventory Value")]
    HighInventoryValue,
}

#[derive(Debug, Display, PartialEq, Eq, Copy, Clone)]
pub enum AlertPriority {
    #[strum(serialize = "CRITICAL")]
    Critical,
    #[strum(serialize = "HIGH")]
    High,
    #[strum(serialize = "MEDIUM")]
    Medium,
    #[strum(serialize = "LOW")]
    Low,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub vendor: String,
    pub description: String,
    pub metric_value: Option<f64>,
    pub threshold: f64,
    pub message: String,
    pub recommendation: String,
    pub timestamp: i64,
}

// Process-wide sequence. Never resets, so two generation passes within the
// same millisecond still produce distinct ids.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

struct AlertIdGenerator {
    base_millis: i64,
}

impl AlertIdGenerator {
    fn new(base_millis: i64) -> Self {
        Self { base_millis }
    }

    fn next(&self) -> String {
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("ALT-{}-{:06}", self.base_millis, seq)
    }
}

#[derive(Debug, Default)]
pub struct AlertBatch {
    pub alerts: Vec<Alert>,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl AlertBatch {
    fn push(&mut self, alert: Alert) {
        match alert.priority {
            AlertPriority::Critical => self.critical += 1,
            AlertPriority::High => self.high += 1,
            AlertPriority::Medium => self.medium += 1,
            AlertPriority::Low => self.low += 1,
        }
        self.alerts.push(alert);
    }
}

/// Evaluates the fixed rule set against the latest derived tables and
/// produces one alert per breaching row. Appends everything to
/// `alert_history` and replaces `active_alerts` with this generation pass.
/// No cross-run deduplication: repeated runs on unchanged data produce new
/// alert ids for the same condition.
pub struct AlertEngine<'a> {
    thresholds: &'a AlertThresholds,
}

impl<'a> AlertEngine<'a> {
    pub fn new(thresholds: &'a AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn generate(
        &self,
        db: &mut Database,
        run_id: Option<i64>,
        summaries: &[VendorSummary],
        scores: &[PerformanceScore],
        inventory: &[InventoryRecommendation],
        anomalies: &[AnomalyRecord],
    ) -> Result<AlertBatch, VendorPulseError> {
        let now = Utc::now();
        let timestamp = now.timestamp();
        let ids = AlertIdGenerator::new(now.timestamp_millis());

        let mut batch = AlertBatch::default();

        for row in summaries {
            self.check_profit_margin(row, &ids, timestamp, &mut batch);
            self.check_negative_profit(row, &ids, timestamp, &mut batch);
            self.check_stock_turnover(row, &ids, timestamp, &mut batch);
            self.check_inventory_value(row, &ids, timestamp, &mut batch);
        }
        for rec in inventory {
            self.check_stock_levels(rec, &ids, timestamp, &mut batch);
        }
        for record in anomalies {
            self.check_anomaly(record, &ids, timestamp, &mut batch);
        }
        for score in scores {
            self.check_performance(score, &ids, timestamp, &mut batch);
        }

        self.persist(db, run_id, &batch)?;
        info!(
            "Generated {} alerts ({} critical, {} high, {} medium, {} low)",
            batch.alerts.len(),
            batch.critical,
            batch.high,
            batch.medium,
            batch.low
        );

        Ok(batch)
    }

    fn check_profit_margin(
        &self,
        row: &VendorSummary,
        ids: &AlertIdGenerator,
        timestamp: i64,
        batch: &mut AlertBatch,
    ) {
        let threshold = self.thresholds.low_profit_margin;
        let Some(margin) = row.profit_margin else {
            return;
        };
        if margin >= threshold {
            return;
        }

        let priority = if margin < 0.0 {
            AlertPriority::Critical
        } else if margin < threshold * 0.5 {
            AlertPriority::High
        } else if margin < threshold * 0.8 {
            AlertPriority::Medium
        } else {
            AlertPriority::Low
        };

        batch.push(Alert {
            alert_id: ids.next(),
            alert_type: AlertType::LowProfitMargin,
            priority,
            vendor: row.vendor_name.clone(),
            description: row.description.clone(),
            metric_value: Some(margin),
            threshold,
            message: format!("Profit margin {margin:.1}% is below the {threshold:.1}% threshold"),
            recommendation: "Review pricing and negotiate purchase costs".to_string(),
            timestamp,
        });
    }

    fn check_negative_profit(
        &self,
        row: &VendorSummary,
        ids: &AlertIdGenerator,
        timestamp: i64,
        batch: &mut AlertBatch,
    ) {
        let threshold = self.thresholds.negative_gross_profit;
        if row.gross_profit >= threshold {
            return;
        }

        // Severity from the loss relative to sales volume
        let loss_ratio = -row.gross_profit / row.total_sales_dollars.max(1.0);
        let priority = if loss_ratio > 0.5 {
            AlertPriority::Critical
        } else if loss_ratio > 0.2 {
            AlertPriority::High
        } else {
            AlertPriority::Medium
        };

        batch.push(Alert {
            alert_id: ids.next(),
            alert_type: AlertType::NegativeProfit,
            priority,
            vendor: row.vendor_name.clone(),
            description: row.description.clone(),
            metric_value: Some(row.gross_profit),
            threshold,
            message: format!("Gross profit is negative ({:.2})", row.gross_profit),
            recommendation: "Selling below cost; reprice or discontinue the line".to_string(),
            timestamp,
        });
    }

    fn check_stock_turnover(
        &self,
        row: &VendorSummary,
        ids: &AlertIdGenerator,
        timestamp: i64,
        batch: &mut AlertBatch,
    ) {
        let threshold = self.thresholds.low_stock_turnover;
        let Some(turnover) = row.stock_turnover else {
            return;
        };
        if turnover >= threshold {
            return;
        }

        let priority = if turnover < threshold * 0.25 {
            AlertPriority::High
        } else if turnover < threshold * 0.5 {
            AlertPriority::Medium
        } else {
            AlertPriority::Low
        };

        batch.push(Alert {
            alert_id: ids.next(),
            alert_type: AlertType::LowStockTurnover,
            priority,
            vendor: row.vendor_name.clone(),
            description: row.description.clone(),
            metric_value: Some(turnover),
            threshold,
            message: format!("Stock turnover {turnover:.2} is below {threshold:.2}"),
            recommendation: "Reduce order volume or run promotions to move stock".to_string(),
            timestamp,
        });
    }

    fn check_inventory_value(
        &self,
        row: &VendorSummary,
        ids: &AlertIdGenerator,
        timestamp: i64,
        batch: &mut AlertBatch,
    ) {
        let threshold = self.thresholds.high_inventory_value;
        if row.total_purchase_dollars <= threshold {
            return;
        }

        let multiple = row.total_purchase_dollars / threshold.max(1.0);
        let priority = if multiple > 5.0 {
            AlertPriority::High
        } else if multiple > 2.0 {
            AlertPriority::Medium
        } else {
            AlertPriority::Low
        };

        batch.push(Alert {
            alert_id: ids.next(),
            alert_type: AlertType::HighInventoryValue,
            priority,
            vendor: row.vendor_name.clone(),
            description: row.description.clone(),
            metric_value: Some(row.total_purchase_dollars),
            threshold,
            message: format!(
                "Inventory value {:.2} exceeds the {threshold:.2} cap",
                row.total_purchase_dollars
            ),
            recommendation: "Large capital tied up; review purchasing cadence".to_string(),
            timestamp,
        });
    }

    fn check_stock_levels(
        &self,
        rec: &InventoryRecommendation,
        ids: &AlertIdGenerator,
        timestamp: i64,
        batch: &mut AlertBatch,
    ) {
        if rec.is_overstocked && rec.optimal_order_quantity > 0.0 {
            let threshold = self.thresholds.overstock_ratio;
            // How many optimal orders worth of stock is sitting on hand
            let multiple = rec.current_stock / rec.optimal_order_quantity;
            if multiple >= threshold {
                let priority = if multiple > 4.0 {
                    AlertPriority::High
                } else if multiple > 2.0 {
                    AlertPriority::Medium
                } else {
                    AlertPriority::Low
                };
                batch.push(Alert {
                    alert_id: ids.next(),
                    alert_type: AlertType::Overstocked,
                    priority,
                    vendor: rec.vendor_name.clone(),
                    description: rec.description.clone(),
                    metric_value: Some(multiple),
                    threshold,
                    message: format!(
                        "Stock on hand is {multiple:.1}x the optimal order quantity"
                    ),
                    recommendation: "Pause reordering until stock draws down".to_string(),
                    timestamp,
                });
            }
        }

        if rec.is_understocked && rec.reorder_point > 0.0 {
            let threshold = self.thresholds.understock_ratio;
            // Fraction of the reorder point covered by stock on hand
            let coverage = rec.current_stock / rec.reorder_point;
            if coverage <= threshold {
                let priority = if coverage < 0.25 {
                    AlertPriority::Critical
                } else if coverage < 0.5 {
                    AlertPriority::High
                } else {
                    AlertPriority::Medium
                };
                batch.push(Alert {
                    alert_id: ids.next(),
                    alert_type: AlertType::Understocked,
                    priority,
                    vendor: rec.vendor_name.clone(),
                    description: rec.description.clone(),
                    metric_value: Some(coverage),
                    threshold,
                    message: "Stock has fallen below the reorder point".to_string(),
                    recommendation: format!(
                        "Reorder now; suggested quantity {:.0}",
                        rec.optimal_order_quantity
                    ),
                    timestamp,
                });
            }
        }
    }

    fn check_anomaly(
        &self,
        record: &AnomalyRecord,
        ids: &AlertIdGenerator,
        timestamp: i64,
        batch: &mut AlertBatch,
    ) {
        let threshold = self.thresholds.anomaly_score;
        if record.anomaly_score >= threshold {
            return;
        }

        let priority = if record.anomaly_score < threshold - 0.2 {
            AlertPriority::High
        } else if record.anomaly_score < threshold - 0.1 {
            AlertPriority::Medium
        } else {
            AlertPriority::Low
        };

        batch.push(Alert {
            alert_id: ids.next(),
            alert_type: AlertType::AnomalousVendor,
            priority,
            vendor: record.vendor_name.clone(),
            description: record.description.clone(),
            metric_value: Some(record.anomaly_score),
            threshold,
            message: format!(
                "Vendor metrics are anomalous (score {:.3})",
                record.anomaly_score
            ),
            recommendation: "Audit recent transactions for data or process issues".to_string(),
            timestamp,
        });
    }

    fn check_performance(
        &self,
        score: &PerformanceScore,
        ids: &AlertIdGenerator,
        timestamp: i64,
        batch: &mut AlertBatch,
    ) {
        let threshold = self.thresholds.poor_performance_score;
        if score.performance_score >= threshold {
            return;
        }

        let priority = if score.performance_score < threshold / 3.0 {
            AlertPriority::High
        } else if score.performance_score < threshold * 2.0 / 3.0 {
            AlertPriority::Medium
        } else {
            AlertPriority::Low
        };

        batch.push(Alert {
            alert_id: ids.next(),
            alert_type: AlertType::PoorPerformance,
            priority,
            vendor: score.vendor_name.clone(),
            description: score.description.clone(),
            metric_value: Some(score.performance_score),
            threshold,
            message: format!(
                "Performance score {:.1} is below {threshold:.1}",
                score.performance_score
            ),
            recommendation: "Schedule a vendor review; consider alternate suppliers".to_string(),
            timestamp,
        });
    }

    fn persist(
        &self,
        db: &mut Database,
        run_id: Option<i64>,
        batch: &AlertBatch,
    ) -> Result<(), VendorPulseError> {
        db.conn().execute_batch(
            r#"
            DROP TABLE IF EXISTS active_alerts_staging;
            CREATE TABLE active_alerts_staging (
                alert_id TEXT NOT NULL PRIMARY KEY,
                alert_type TEXT NOT NULL,
                priority TEXT NOT NULL,
                vendor TEXT NOT NULL,
                description TEXT NOT NULL,
                metric_value REAL,
                threshold REAL,
                message TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            "#,
        )?;

        let tx = db.conn_mut().transaction()?;
        {
            let mut history = tx.prepare(
                r#"
                INSERT INTO alert_history (
                    alert_id, run_id, alert_type, priority, vendor, description,
                    metric_value, threshold, message, recommendation, timestamp
                ) VALUES (
                    :alert_id, :run_id, :alert_type, :priority, :vendor, :description,
                    :metric_value, :threshold, :message, :recommendation, :timestamp
                )
                "#,
            )?;
            let mut active = tx.prepare(
                "INSERT INTO active_alerts_staging (
                    alert_id, alert_type, priority, vendor, description,
                    metric_value, threshold, message, recommendation, timestamp
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for alert in &batch.alerts {
                history.execute(named_params! {
                    ":alert_id": alert.alert_id,
                    ":run_id": run_id,
                    ":alert_type": alert.alert_type.to_string(),
                    ":priority": alert.priority.to_string(),
                    ":vendor": alert.vendor,
                    ":description": alert.description,
                    ":metric_value": alert.metric_value,
                    ":threshold": alert.threshold,
                    ":message": alert.message,
                    ":recommendation": alert.recommendation,
                    ":timestamp": alert.timestamp,
                })?;
                active.execute(params![
                    alert.alert_id,
                    alert.alert_type.to_string(),
                    alert.priority.to_string(),
                    alert.vendor,
                    alert.description,
                    alert.metric_value,
                    alert.threshold,
                    alert.message,
                    alert.recommendation,
                    alert.timestamp,
                ])?;
            }
        }
        tx.commit()?;

        db.swap_staging("active_alerts")?;
        Ok(())
    }
}
