use log::info;
use rusqlite::params;

use crate::database::Database;
use crate::error::VendorPulseError;
use crate::summary::VendorSummary;

const LOW_MARGIN: f64 = 20.0;
const HIGH_MARGIN: f64 = 60.0;
const SLOW_TURNOVER: f64 = 1.0;

const INCREASE_FACTOR: f64 = 1.075;
const DECREASE_FACTOR: f64 = 0.95;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PriceAction {
    Increase,
    Decrease,
    Maintain,
}

impl PriceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceAction::Increase => "Increase by 5-10%",
            PriceAction::Decrease => "Decrease by 5% to boost sales",
            PriceAction::Maintain => "Maintain current price",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingRecommendation {
    pub vendor_name: String,
    pub description: String,
    pub avg_sale_price: f64,
    pub current_markup: Option<f64>,
    pub action: PriceAction,
    pub recommended_price: f64,
}

/// Pure rule table over margin and turnover. Total over rows where both the
/// margin and an average sale price are defined: thin margins get a price
/// increase, fat margins on slow stock get a decrease, everything else
/// holds.
pub fn price_action(profit_margin: f64, stock_turnover: Option<f64>) -> PriceAction {
    if profit_margin < LOW_MARGIN {
        PriceAction::Increase
    } else if profit_margin > HIGH_MARGIN && stock_turnover.is_some_and(|t| t < SLOW_TURNOVER) {
        PriceAction::Decrease
    } else {
        PriceAction::Maintain
    }
}

/// Recommends for one summary row. Returns None when the row cannot be
/// priced (no sales quantity or undefined margin); callers count these
/// exclusions rather than dropping them silently.
pub fn recommend(row: &VendorSummary) -> Option<PricingRecommendation> {
    let margin = row.profit_margin?;
    if row.total_sales_quantity == 0.0 {
        return None;
    }

    let avg_sale_price = row.total_sales_dollars / row.total_sales_quantity;
    let avg_purchase_price = (row.total_purchase_quantity > 0.0)
        .then(|| row.total_purchase_dollars / row.total_purchase_quantity);
    let current_markup = avg_purchase_price
        .filter(|p| *p > 0.0)
        .map(|p| (avg_sale_price - p) / p * 100.0);

    let action = price_action(margin, row.stock_turnover);
    let recommended_price = match action {
        PriceAction::Increase => avg_sale_price * INCREASE_FACTOR,
        PriceAction::Decrease => avg_sale_price * DECREASE_FACTOR,
        PriceAction::Maintain => avg_sale_price,
    };

    Some(PricingRecommendation {
        vendor_name: row.vendor_name.clone(),
        description: row.description.clone(),
        avg_sale_price,
        current_markup,
        action,
        recommended_price,
    })
}

#[derive(Debug, Default)]
pub struct PricingReport {
    pub recommendations: Vec<PricingRecommendation>,
    pub skipped: usize,
}

/// Prices every summary row and replaces `pricing_recommendations`.
pub fn rebuild_pricing(
    db: &mut Database,
    summaries: &[VendorSummary],
) -> Result<PricingReport, VendorPulseError> {
    let mut report = PricingReport::default();
    for row in summaries {
        match recommend(row) {
            Some(rec) => report.recommendations.push(rec),
            None => report.skipped += 1,
        }
    }

    db.conn().execute_batch(
        r#"
        DROP TABLE IF EXISTS pricing_recommendations_staging;
        CREATE TABLE pricing_recommendations_staging (
            vendor_name TEXT NOT NULL,
            description TEXT NOT NULL,
            avg_sale_price REAL NOT NULL,
            current_markup REAL,
            price_recommendation TEXT NOT NULL,
            recommended_price REAL NOT NULL,
            PRIMARY KEY (vendor_name, description)
        );
        "#,
    )?;

    {
        let mut stmt = db.conn().prepare(
            "INSERT INTO pricing_recommendations_staging
             (vendor_name, description, avg_sale_price, current_markup,
              price_recommendation, recommended_price)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for rec in &report.recommendations {
            stmt.execute(params![
                rec.vendor_name,
                rec.description,
                rec.avg_sale_price,
                rec.current_markup,
                rec.action.as_str(),
                rec.recommended_price,
            ])?;
        }
    }

    db.swap_staging("pricing_recommendations")?;
    info!(
        "Priced {} rows ({} skipped)",
        report.recommendations.len(),
        report.skipped
    );

    Ok(report)
}
