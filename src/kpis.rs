use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::engine::Engine;

pub const BILLING_TABLE: &str = "billing";

/// One row of aggregate revenue-cycle metrics for the registered billing file.
///
/// Monetary sums are `None` only when the file has no non-null values for the column.
/// Ratios are `None` whenever their denominator is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub total_claims: u64,
    pub total_billed: Option<f64>,
    pub total_paid: Option<f64>,
    pub collection_rate: Option<f64>,
    pub revenue_per_claim: Option<f64>,
    pub patient_responsibility_pct: Option<f64>,
    pub insurance_collection_pct: Option<f64>,
    pub avg_payment_days: Option<f64>,
}

/// The camelCase shape posted to the interpreter. Field order is the prompt's key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiPayload {
    pub total_claims: Option<f64>,
    pub total_billed: Option<f64>,
    pub total_paid: Option<f64>,
    pub collection_rate: Option<f64>,
    pub revenue_per_claim: Option<f64>,
    pub patient_responsibility_pct: Option<f64>,
    pub insurance_collection_pct: Option<f64>,
    pub avg_payment_days: Option<f64>,
}

impl MetricsRow {
    pub fn to_payload(&self) -> KpiPayload {
        KpiPayload {
            total_claims: Some(self.total_claims as f64),
            total_billed: self.total_billed,
            total_paid: self.total_paid,
            collection_rate: self.collection_rate,
            revenue_per_claim: self.revenue_per_claim,
            patient_responsibility_pct: self.patient_responsibility_pct,
            insurance_collection_pct: self.insurance_collection_pct,
            avg_payment_days: self.avg_payment_days,
        }
    }
}

fn metrics_sql(table: &str) -> String {
    // The date predicate is an aggregate FILTER so rows without dates still count
    // toward every monetary total.
    format!(
        r#"
        SELECT
          COUNT(*) AS total_claims,

          SUM(CAST(InvoiceAmount AS DOUBLE)) AS total_billed,
          SUM(CAST(Paid AS DOUBLE)) AS total_paid,

          ROUND(
            SUM(CAST(Paid AS DOUBLE)) /
            NULLIF(SUM(CAST(InvoiceAmount AS DOUBLE)), 0) * 100,
            2
          ) AS collection_rate,

          ROUND(
            SUM(CAST(Paid AS DOUBLE)) /
            NULLIF(COUNT(*), 0),
            2
          ) AS revenue_per_claim,

          ROUND(
            SUM(
              CAST(PTCopay AS DOUBLE)
              + CAST(deduct AS DOUBLE)
              + CAST(coins AS DOUBLE)
            ) /
            NULLIF(SUM(CAST(InvoiceAmount AS DOUBLE)), 0) * 100,
            2
          ) AS patient_responsibility_pct,

          ROUND(
            (
              SUM(CAST(Paid AS DOUBLE)) -
              SUM(
                CAST(PTCopay AS DOUBLE)
                + CAST(deduct AS DOUBLE)
                + CAST(coins AS DOUBLE)
              )
            ) /
            NULLIF(SUM(CAST(InvoiceAmount AS DOUBLE)), 0) * 100,
            2
          ) AS insurance_collection_pct,

          CAST(
            AVG(CAST(PostedDt AS DATE) - CAST(DOS AS DATE))
              FILTER (WHERE PostedDt IS NOT NULL AND DOS IS NOT NULL)
            AS DOUBLE
          ) AS avg_payment_days

        FROM "{table}"
    "#
    )
}

/// Runs the aggregation over the table registered as [`BILLING_TABLE`].
pub fn compute(engine: &Engine) -> anyhow::Result<MetricsRow> {
    let sql = metrics_sql(BILLING_TABLE);
    engine
        .query_row(&sql, |row| {
            Ok(MetricsRow {
                total_claims: row.get::<usize, i64>(0)?.max(0) as u64,
                total_billed: row.get(1)?,
                total_paid: row.get(2)?,
                collection_rate: row.get(3)?,
                revenue_per_claim: row.get(4)?,
                patient_responsibility_pct: row.get(5)?,
                insurance_collection_pct: row.get(6)?,
                avg_payment_days: row.get(7)?,
            })
        })
        .context("aggregate billing metrics")
}
