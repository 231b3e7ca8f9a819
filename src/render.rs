use std::fmt::Write as _;

use serde::Serialize;

use crate::dashboard::DashboardState;
use crate::kpis::MetricsRow;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiCard {
    pub title: &'static str,
    pub value: String,
}

pub fn cards(m: &MetricsRow) -> Vec<KpiCard> {
    let card = |title, value| KpiCard { title, value };
    vec![
        card("Total Claims", group_thousands(m.total_claims as f64)),
        card("Total Billed", money(m.total_billed)),
        card("Total Paid", money(m.total_paid)),
        card("Collection Rate", percent(m.collection_rate)),
        card("Revenue / Claim", money(m.revenue_per_claim)),
        card("Patient Responsibility %", percent(m.patient_responsibility_pct)),
        card("Insurance Collection %", percent(m.insurance_collection_pct)),
        card(
            "Avg Payment Days",
            m.avg_payment_days
                .map(|d| format!("{d:.1} days"))
                .unwrap_or_else(|| "N/A".to_string()),
        ),
    ]
}

fn money(v: Option<f64>) -> String {
    v.map(|v| format!("${}", group_thousands(v)))
        .unwrap_or_else(|| "N/A".to_string())
}

fn percent(v: Option<f64>) -> String {
    v.map(|v| format!("{}%", group_thousands(v)))
        .unwrap_or_else(|| "N/A".to_string())
}

/// en-US style: comma groups, at most three fraction digits, no trailing zeros.
pub fn group_thousands(v: f64) -> String {
    if !v.is_finite() {
        return "N/A".to_string();
    }
    let fixed = format!("{:.3}", v.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac_part = frac_part.trim_end_matches('0');

    let mut out = String::new();
    if v < 0.0 && (int_part != "0" || !frac_part.is_empty()) {
        out.push('-');
    }
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

/// Plain-text rendering of the dashboard for the `analyze` subcommand.
pub fn terminal(state: &DashboardState) -> String {
    let mut out = String::new();
    match state {
        DashboardState::Idle => out.push_str("No file processed yet.\n"),
        DashboardState::Loading => out.push_str("Processing dataset...\n"),
        DashboardState::Ready { .. } | DashboardState::Failed { .. } => {}
    }

    if let DashboardState::Failed { notice, .. } = state {
        let _ = writeln!(out, "! {notice}");
    }

    if let Some(m) = state.metrics() {
        let cards = cards(m);
        let width = cards.iter().map(|c| c.title.len()).max().unwrap_or(0);
        out.push_str("Clinic Performance\n");
        for c in &cards {
            let _ = writeln!(out, "  {:<width$}  {}", c.title, c.value);
        }
    }

    let bullets = state.bullets();
    if !bullets.is_empty() {
        out.push_str("\nKPI Interpretation\n");
        for b in bullets {
            let _ = writeln!(out, "  - {b}");
        }
    }
    out
}
