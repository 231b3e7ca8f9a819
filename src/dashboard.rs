use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::interpret::Interpreter;
use crate::kpis::{self, BILLING_TABLE, MetricsRow};
use crate::render::{KpiCard, cards};

pub const PROCESSING_FAILED: &str = "Error processing file. Check column names and formats.";
pub const INTERPRETATION_FAILED: &str = "Metrics computed, but the interpretation service failed.";

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardState {
    Idle,
    Loading,
    Ready {
        metrics: MetricsRow,
        bullets: Vec<String>,
    },
    Failed {
        metrics: Option<MetricsRow>,
        notice: String,
    },
}

impl DashboardState {
    pub fn metrics(&self) -> Option<&MetricsRow> {
        match self {
            DashboardState::Ready { metrics, .. } => Some(metrics),
            DashboardState::Failed { metrics, .. } => metrics.as_ref(),
            _ => None,
        }
    }

    pub fn bullets(&self) -> &[String] {
        match self {
            DashboardState::Ready { bullets, .. } => bullets,
            _ => &[],
        }
    }

    pub fn view(&self) -> DashboardView {
        let (status, notice) = match self {
            DashboardState::Idle => ("idle", None),
            DashboardState::Loading => ("loading", None),
            DashboardState::Ready { .. } => ("ready", None),
            DashboardState::Failed { notice, .. } => ("failed", Some(notice.clone())),
        };
        let metrics = self.metrics().cloned();
        DashboardView {
            status,
            cards: metrics.as_ref().map(cards).unwrap_or_default(),
            metrics,
            bullets: self.bullets().to_vec(),
            notice,
        }
    }
}

/// Shape returned to the browser page.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub status: &'static str,
    pub metrics: Option<MetricsRow>,
    pub cards: Vec<KpiCard>,
    pub bullets: Vec<String>,
    pub notice: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("An upload is already being processed")]
pub struct Busy;

/// The single processing slot. Released when dropped.
pub type Slot = tokio::sync::OwnedMutexGuard<()>;

/// Runs the upload → query → interpret flow and owns the resulting UI state.
pub struct Dashboard {
    engine: Arc<Engine>,
    interpreter: Arc<Interpreter>,
    state: Mutex<DashboardState>,
    flight: Arc<tokio::sync::Mutex<()>>,
}

impl Dashboard {
    pub fn new(engine: Arc<Engine>, interpreter: Arc<Interpreter>) -> Self {
        Self {
            engine,
            interpreter,
            state: Mutex::new(DashboardState::Idle),
            flight: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn snapshot(&self) -> DashboardState {
        match self.state.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set(&self, next: DashboardState) {
        let mut s = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        *s = next;
    }

    /// Reserves the single processing slot. Held for the whole flow.
    pub fn try_begin(&self) -> Result<Slot, Busy> {
        Arc::clone(&self.flight).try_lock_owned().map_err(|_| Busy)
    }

    /// Runs [`Dashboard::process_reserved`] on its own task, which keeps `slot` until the
    /// state has settled. Dropping the handle does not cancel the run.
    pub fn spawn_process(
        self: &Arc<Self>,
        slot: Slot,
        path: PathBuf,
    ) -> JoinHandle<DashboardState> {
        let dashboard = Arc::clone(self);
        tokio::spawn(async move {
            let state = dashboard.process_reserved(&path).await;
            drop(slot);
            state
        })
    }

    /// Processes `path` with the caller already holding the slot from [`Dashboard::try_begin`].
    pub async fn process_reserved(&self, path: &Path) -> DashboardState {
        self.set(DashboardState::Loading);

        let metrics = match self.compute(path.to_path_buf()).await {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("processing {} failed: {e:#}", path.display());
                let next = DashboardState::Failed {
                    metrics: None,
                    notice: PROCESSING_FAILED.to_string(),
                };
                self.set(next.clone());
                return next;
            }
        };
        tracing::info!(
            "metrics: claims={} billed={:?} paid={:?}",
            metrics.total_claims,
            metrics.total_billed,
            metrics.total_paid
        );

        let next = match self.interpret(&metrics).await {
            Ok(bullets) => DashboardState::Ready { metrics, bullets },
            Err(e) => {
                tracing::error!("Interpret KPI error: {e:#}");
                DashboardState::Failed {
                    metrics: Some(metrics),
                    notice: INTERPRETATION_FAILED.to_string(),
                }
            }
        };
        self.set(next.clone());
        next
    }

    /// Single-flight wrapper over [`Dashboard::process_reserved`].
    pub async fn process(&self, path: &Path) -> Result<DashboardState, Busy> {
        let _slot = self.try_begin()?;
        Ok(self.process_reserved(path).await)
    }

    async fn compute(&self, path: PathBuf) -> anyhow::Result<MetricsRow> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            engine.register_csv(BILLING_TABLE, &path)?;
            kpis::compute(&engine)
        })
        .await
        .context("join query worker")?
    }

    async fn interpret(&self, metrics: &MetricsRow) -> anyhow::Result<Vec<String>> {
        let payload = serde_json::to_value(metrics.to_payload())?;
        let Value::Object(kpis) = payload else {
            return Err(anyhow!("KPI payload is not an object"));
        };
        Ok(self.interpreter.interpret(&kpis).await?)
    }
}
