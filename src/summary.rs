use log::info;
use rusqlite::Row;

use crate::database::Database;
use crate::error::VendorPulseError;

/// One row of `vendor_sales_summary`, keyed by (vendor_name, description).
///
/// The derived ratios are NULL (not an error, not NaN) whenever their
/// denominator is zero: profit_margin needs sales dollars, stock_turnover
/// needs purchase quantity, sales_to_purchase_ratio needs purchase dollars.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorSummary {
    pub vendor_name: String,
    pub description: String,
    pub total_sales_quantity: f64,
    pub total_sales_dollars: f64,
    pub total_purchase_quantity: f64,
    pub total_purchase_dollars: f64,
    pub gross_profit: f64,
    pub profit_margin: Option<f64>,
    pub stock_turnover: Option<f64>,
    pub sales_to_purchase_ratio: Option<f64>,
}

impl VendorSummary {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(VendorSummary {
            vendor_name: row.get(0)?,
            description: row.get(1)?,
            total_sales_quantity: row.get(2)?,
            total_sales_dollars: row.get(3)?,
            total_purchase_quantity: row.get(4)?,
            total_purchase_dollars: row.get(5)?,
            gross_profit: row.get(6)?,
            profit_margin: row.get(7)?,
            stock_turnover: row.get(8)?,
            sales_to_purchase_ratio: row.get(9)?,
        })
    }

    /// Rebuilds `vendor_sales_summary` from the raw tables.
    ///
    /// Sales and purchases are grouped and summed independently, then
    /// combined with a full outer join so a vendor/product pair present on
    /// only one side still appears, with the other side's sums at zero.
    /// The whole rebuild happens in a staging table that is swapped over
    /// the published one on success.
    pub fn rebuild(db: &mut Database) -> Result<usize, VendorPulseError> {
        let conn = db.conn();

        conn.execute_batch(
            r#"
            DROP TABLE IF EXISTS vendor_sales_summary_staging;
            CREATE TABLE vendor_sales_summary_staging (
                vendor_name TEXT NOT NULL,
                description TEXT NOT NULL,
                total_sales_quantity REAL NOT NULL,
                total_sales_dollars REAL NOT NULL,
                total_purchase_quantity REAL NOT NULL,
                total_purchase_dollars REAL NOT NULL,
                gross_profit REAL NOT NULL,
                profit_margin REAL,
                stock_turnover REAL,
                sales_to_purchase_ratio REAL,
                PRIMARY KEY (vendor_name, description)
            );
            "#,
        )?;

        let inserted = conn.execute(
            r#"
            INSERT INTO vendor_sales_summary_staging
            SELECT
                COALESCE(s.vendor_name, p.vendor_name)      AS vendor_name,
                COALESCE(s.description, p.description)      AS description,
                COALESCE(s.qty, 0.0)                        AS total_sales_quantity,
                COALESCE(s.dollars, 0.0)                    AS total_sales_dollars,
                COALESCE(p.qty, 0.0)                        AS total_purchase_quantity,
                COALESCE(p.dollars, 0.0)                    AS total_purchase_dollars,
                COALESCE(s.dollars, 0.0) - COALESCE(p.dollars, 0.0) AS gross_profit,
                CASE WHEN COALESCE(s.dollars, 0.0) = 0.0 THEN NULL
                     ELSE (COALESCE(s.dollars, 0.0) - COALESCE(p.dollars, 0.0))
                          / s.dollars * 100.0
                END                                         AS profit_margin,
                CASE WHEN COALESCE(p.qty, 0.0) = 0.0 THEN NULL
                     ELSE COALESCE(s.qty, 0.0) / p.qty
                END                                         AS stock_turnover,
                CASE WHEN COALESCE(p.dollars, 0.0) = 0.0 THEN NULL
                     ELSE COALESCE(s.dollars, 0.0) / p.dollars
                END                                         AS sales_to_purchase_ratio
            FROM (
                SELECT vendor_name, description,
                       SUM(quantity) AS qty, SUM(dollars) AS dollars
                FROM sales
                GROUP BY vendor_name, description
            ) s
            FULL OUTER JOIN (
                SELECT vendor_name, description,
                       SUM(quantity) AS qty, SUM(dollars) AS dollars
                FROM purchases
                GROUP BY vendor_name, description
            ) p
            ON s.vendor_name = p.vendor_name AND s.description = p.description
            "#,
            [],
        )?;

        db.swap_staging("vendor_sales_summary")?;
        info!("Aggregated {inserted} vendor/product summary rows");

        Ok(inserted)
    }

    pub fn load_all(db: &Database) -> Result<Vec<VendorSummary>, VendorPulseError> {
        let mut stmt = db.conn().prepare(
            "SELECT vendor_name, description,
                    total_sales_quantity, total_sales_dollars,
                    total_purchase_quantity, total_purchase_dollars,
                    gross_profit, profit_margin, stock_turnover,
                    sales_to_purchase_ratio
             FROM vendor_sales_summary
             ORDER BY vendor_name, description",
        )?;

        let rows = stmt.query_map([], |row| VendorSummary::from_row(row))?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn insert_sale(db: &Database, vendor: &str, desc: &str, qty: f64, dollars: f64) {
        db.conn()
            .execute(
                "INSERT INTO sales (vendor_name, description, quantity, dollars) VALUES (?, ?, ?, ?)",
                rusqlite::params![vendor, desc, qty, dollars],
            )
            .unwrap();
    }

    fn insert_purchase(db: &Database, vendor: &str, desc: &str, qty: f64, dollars: f64) {
        db.conn()
            .execute(
                "INSERT INTO purchases (vendor_name, description, quantity, dollars) VALUES (?, ?, ?, ?)",
                rusqlite::params![vendor, desc, qty, dollars],
            )
            .unwrap();
    }

    #[test]
    fn groups_and_sums_both_sides() {
        let mut db = Database::open_in_memory().unwrap();
        insert_sale(&db, "Acme", "Widget", 10.0, 100.0);
        insert_sale(&db, "Acme", "Widget", 5.0, 50.0);
        insert_purchase(&db, "Acme", "Widget", 20.0, 88.0);

        let count = VendorSummary::rebuild(&mut db).unwrap();
        assert_eq!(count, 1);

        let rows = VendorSummary::load_all(&db).unwrap();
        let row = &rows[0];
        assert_eq!(row.total_sales_quantity, 15.0);
        assert_eq!(row.total_sales_dollars, 150.0);
        assert_eq!(row.total_purchase_dollars, 88.0);
        assert_eq!(row.gross_profit, 62.0);
        assert_eq!(row.stock_turnover, Some(0.75));
    }

    #[test]
    fn outer_join_keeps_sales_only_and_purchase_only_pairs() {
        let mut db = Database::open_in_memory().unwrap();
        insert_sale(&db, "Acme", "Widget", 10.0, 100.0);
        insert_purchase(&db, "Bolt Co", "Bolt", 50.0, 25.0);

        VendorSummary::rebuild(&mut db).unwrap();
        let rows = VendorSummary::load_all(&db).unwrap();
        assert_eq!(rows.len(), 2);

        let sales_only = rows.iter().find(|r| r.vendor_name == "Acme").unwrap();
        assert_eq!(sales_only.total_purchase_quantity, 0.0);
        assert_eq!(sales_only.total_purchase_dollars, 0.0);
        // No purchases: turnover and ratio are undefined, margin is not
        assert_eq!(sales_only.stock_turnover, None);
        assert_eq!(sales_only.sales_to_purchase_ratio, None);
        assert_eq!(sales_only.profit_margin, Some(100.0));

        let purchase_only = rows.iter().find(|r| r.vendor_name == "Bolt Co").unwrap();
        assert_eq!(purchase_only.total_sales_dollars, 0.0);
        // No sales: margin undefined, turnover defined (0 sold of 50 bought)
        assert_eq!(purchase_only.profit_margin, None);
        assert_eq!(purchase_only.stock_turnover, Some(0.0));
        assert_eq!(purchase_only.gross_profit, -25.0);
    }

    #[test]
    fn margin_is_null_when_sales_dollars_zero() {
        let mut db = Database::open_in_memory().unwrap();
        insert_sale(&db, "Acme", "Widget", 10.0, 0.0);
        insert_purchase(&db, "Acme", "Widget", 0.0, 0.0);

        VendorSummary::rebuild(&mut db).unwrap();
        let rows = VendorSummary::load_all(&db).unwrap();
        assert_eq!(rows[0].profit_margin, None);
        assert_eq!(rows[0].stock_turnover, None);
        assert_eq!(rows[0].sales_to_purchase_ratio, None);
    }

    #[test]
    fn rebuild_fully_replaces_previous_summary() {
        let mut db = Database::open_in_memory().unwrap();
        insert_sale(&db, "Acme", "Widget", 10.0, 100.0);
        VendorSummary::rebuild(&mut db).unwrap();
        assert_eq!(VendorSummary::load_all(&db).unwrap().len(), 1);

        db.conn().execute("DELETE FROM sales", []).unwrap();
        insert_sale(&db, "Bolt Co", "Bolt", 1.0, 2.0);
        VendorSummary::rebuild(&mut db).unwrap();

        let rows = VendorSummary::load_all(&db).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vendor_name, "Bolt Co");
    }

    #[test]
    fn example_scenario_margin_of_twelve_percent() {
        let mut db = Database::open_in_memory().unwrap();
        insert_sale(&db, "Acme", "Widget", 10.0, 100.0);
        insert_purchase(&db, "Acme", "Widget", 10.0, 88.0);

        VendorSummary::rebuild(&mut db).unwrap();
        let rows = VendorSummary::load_all(&db).unwrap();
        assert_eq!(rows[0].gross_profit, 12.0);
        assert_eq!(rows[0].profit_margin, Some(12.0));
    }
}
