use log::info;
use rusqlite::params;

use crate::database::Database;
use crate::error::VendorPulseError;
use crate::summary::VendorSummary;

const DAYS_PER_YEAR: f64 = 365.0;
const SAFETY_STOCK_BUFFER: f64 = 1.5;
const ORDER_DAYS_SUPPLY: f64 = 30.0;

// Fixed turnover band for stock classification
const OVERSTOCK_TURNOVER: f64 = 0.5;
const UNDERSTOCK_TURNOVER: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryRecommendation {
    pub vendor_name: String,
    pub description: String,
    pub demand_rate: f64,
    pub safety_stock: f64,
    pub reorder_point: f64,
    pub optimal_order_quantity: f64,
    // Purchased quantity stands in for the current stock level
    pub current_stock: f64,
    pub is_overstocked: bool,
    pub is_understocked: bool,
}

#[derive(Debug, Default, Copy, Clone)]
pub struct InventoryCounts {
    pub overstocked: usize,
    pub understocked: usize,
    pub optimal: usize,
}

/// Reorder-point and safety-stock math from the annual demand rate:
/// DemandRate = sales quantity / 365, SafetyStock = rate × lead × 1.5,
/// ReorderPoint = rate × lead + SafetyStock, OptimalOrderQuantity = rate × 30.
pub fn recommend(row: &VendorSummary, lead_time_days: f64) -> InventoryRecommendation {
    let demand_rate = row.total_sales_quantity / DAYS_PER_YEAR;
    let safety_stock = demand_rate * lead_time_days * SAFETY_STOCK_BUFFER;
    let reorder_point = demand_rate * lead_time_days + safety_stock;
    let optimal_order_quantity = demand_rate * ORDER_DAYS_SUPPLY;

    // Turnover gates the band; purchases stand in for stock on hand
    let is_overstocked = row
        .stock_turnover
        .map(|t| t < OVERSTOCK_TURNOVER && row.total_purchase_quantity > optimal_order_quantity)
        .unwrap_or(false);
    let is_understocked = row
        .stock_turnover
        .map(|t| t > UNDERSTOCK_TURNOVER && row.total_purchase_quantity < reorder_point)
        .unwrap_or(false);

    InventoryRecommendation {
        vendor_name: row.vendor_name.clone(),
        description: row.description.clone(),
        demand_rate,
        safety_stock,
        reorder_point,
        optimal_order_quantity,
        current_stock: row.total_purchase_quantity,
        is_overstocked,
        is_understocked,
    }
}

/// Builds recommendations for every summary row and replaces
/// `inventory_recommendations`. Returns the rows plus aggregate counts.
pub fn rebuild_recommendations(
    db: &mut Database,
    summaries: &[VendorSummary],
    lead_time_days: f64,
) -> Result<(Vec<InventoryRecommendation>, InventoryCounts), VendorPulseError> {
    let recommendations: Vec<InventoryRecommendation> = summaries
        .iter()
        .map(|row| recommend(row, lead_time_days))
        .collect();

    let mut counts = InventoryCounts::default();
    for rec in &recommendations {
        if rec.is_overstocked {
            counts.overstocked += 1;
        } else if rec.is_understocked {
            counts.understocked += 1;
        } else {
            counts.optimal += 1;
        }
    }

    db.conn().execute_batch(
        r#"
        DROP TABLE IF EXISTS inventory_recommendations_staging;
        CREATE TABLE inventory_recommendations_staging (
            vendor_name TEXT NOT NULL,
            description TEXT NOT NULL,
            demand_rate REAL NOT NULL,
            safety_stock REAL NOT NULL,
            reorder_point REAL NOT NULL,
            optimal_order_quantity REAL NOT NULL,
            current_stock REAL NOT NULL,
            is_overstocked INTEGER NOT NULL,
            is_understocked INTEGER NOT NULL,
            PRIMARY KEY (vendor_name, description)
        );
        "#,
    )?;

    {
        let mut stmt = db.conn().prepare(
            "INSERT INTO inventory_recommendations_staging
             (vendor_name, description, demand_rate, safety_stock, reorder_point,
              optimal_order_quantity, current_stock, is_overstocked, is_understocked)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for rec in &recommendations {
            stmt.execute(params![
                rec.vendor_name,
                rec.description,
                rec.demand_rate,
                rec.safety_stock,
                rec.reorder_point,
                rec.optimal_order_quantity,
                rec.current_stock,
                rec.is_overstocked,
                rec.is_understocked,
            ])?;
        }
    }

    db.swap_staging("inventory_recommendations")?;
    info!(
        "Inventory: {} overstocked, {} understocked, {} optimal",
        counts.overstocked, counts.understocked, counts.optimal
    );

    Ok((recommendations, counts))
}

/// Loads the published recommendations; empty if no analytics pass has run
/// yet.
pub fn load_recommendations(
    db: &Database,
) -> Result<Vec<InventoryRecommendation>, VendorPulseError> {
    if !db.table_exists("inventory_recommendations")? {
        return Ok(Vec::new());
    }

    let mut stmt = db.conn().prepare(
        "SELECT vendor_name, description, demand_rate, safety_stock, reorder_point,
                optimal_order_quantity, current_stock, is_overstocked, is_understocked
         FROM inventory_recommendations
         ORDER BY vendor_name, description",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(InventoryRecommendation {
            vendor_name: row.get(0)?,
            description: row.get(1)?,
            demand_rate: row.get(2)?,
            safety_stock: row.get(3)?,
            reorder_point: row.get(4)?,
            optimal_order_quantity: row.get(5)?,
            current_stock: row.get(6)?,
            is_overstocked: row.get(7)?,
            is_understocked: row.get(8)?,
        })
    })?;

    let mut recommendations = Vec::new();
    for row in rows {
        recommendations.push(row?);
    }
    Ok(recommendations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(sales_qty: f64, purchase_qty: f64, turnover: Option<f64>) -> VendorSummary {
        named_summary("Acme", sales_qty, purchase_qty, turnover)
    }

    fn named_summary(
        vendor: &str,
        sales_qty: f64,
        purchase_qty: f64,
        turnover: Option<f64>,
    ) -> VendorSummary {
        VendorSummary {
            vendor_name: vendor.to_string(),
            description: "Widget".to_string(),
            total_sales_quantity: sales_qty,
            total_sales_dollars: sales_qty * 10.0,
            total_purchase_quantity: purchase_qty,
            total_purchase_dollars: purchase_qty * 8.0,
            gross_profit: 0.0,
            profit_margin: Some(20.0),
            stock_turnover: turnover,
            sales_to_purchase_ratio: None,
        }
    }

    #[test]
    fn example_scenario_exact_formulas() {
        // 3650 units/year => 10/day; lead time 7 days
        let rec = recommend(&summary(3650.0, 1000.0, Some(1.0)), 7.0);
        assert_eq!(rec.demand_rate, 10.0);
        assert_eq!(rec.safety_stock, 105.0);
        assert_eq!(rec.reorder_point, 175.0);
        assert_eq!(rec.optimal_order_quantity, 300.0);
    }

    #[test]
    fn formulas_hold_for_arbitrary_rows() {
        for (qty, lead) in [(100.0, 3.0), (9999.0, 14.0), (1.0, 7.0)] {
            let rec = recommend(&summary(qty, 50.0, Some(1.0)), lead);
            let rate = qty / 365.0;
            assert_eq!(rec.safety_stock, rate * lead * 1.5);
            assert_eq!(rec.reorder_point, rate * lead + rec.safety_stock);
            assert_eq!(rec.optimal_order_quantity, rate * 30.0);
        }
    }

    #[test]
    fn low_turnover_with_excess_purchases_is_overstocked() {
        let rec = recommend(&summary(365.0, 500.0, Some(0.2)), 7.0);
        assert!(rec.is_overstocked);
        assert!(!rec.is_understocked);
    }

    #[test]
    fn high_turnover_with_thin_purchases_is_understocked() {
        // rate 10/day, reorder point 175; only 100 purchased
        let rec = recommend(&summary(3650.0, 100.0, Some(3.0)), 7.0);
        assert!(rec.is_understocked);
        assert!(!rec.is_overstocked);
    }

    #[test]
    fn undefined_turnover_is_neither() {
        let rec = recommend(&summary(365.0, 0.0, None), 7.0);
        assert!(!rec.is_overstocked);
        assert!(!rec.is_understocked);
    }

    #[test]
    fn load_recommendations_reads_published_table() {
        let mut db = Database::open_in_memory().unwrap();
        assert!(load_recommendations(&db).unwrap().is_empty());

        let rows = vec![
            named_summary("Slow Co", 365.0, 500.0, Some(0.2)),
            named_summary("Hot Co", 3650.0, 100.0, Some(3.0)),
        ];
        let (written, _) = rebuild_recommendations(&mut db, &rows, 7.0).unwrap();

        let loaded = load_recommendations(&db).unwrap();
        assert_eq!(loaded.len(), 2);
        for rec in &written {
            let found = loaded
                .iter()
                .find(|r| r.vendor_name == rec.vendor_name)
                .unwrap();
            assert_eq!(found, rec);
        }
    }

    #[test]
    fn rebuild_persists_rows_and_counts() {
        let mut db = Database::open_in_memory().unwrap();
        let rows = vec![
            named_summary("Slow Co", 365.0, 500.0, Some(0.2)),  // overstocked
            named_summary("Hot Co", 3650.0, 100.0, Some(3.0)),  // understocked
            named_summary("Steady Co", 365.0, 20.0, Some(1.0)), // optimal
        ];
        let (recs, counts) = rebuild_recommendations(&mut db, &rows, 7.0).unwrap();
        assert_eq!(recs.len(), 3);
        assert_eq!(counts.overstocked, 1);
        assert_eq!(counts.understocked, 1);
        assert_eq!(counts.optimal, 1);
        assert_eq!(db.row_count("inventory_recommendations").unwrap(), 3);
    }
}
