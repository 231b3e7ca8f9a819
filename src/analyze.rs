use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};

use crate::cli::AnalyzeArgs;
use crate::dashboard::{Dashboard, DashboardState};
use crate::engine::Engine;
use crate::interpret::Interpreter;
use crate::render;
use crate::storage::file_present_nonempty;

pub async fn run(opts: AnalyzeArgs) -> anyhow::Result<()> {
    let path = PathBuf::from(&opts.file);
    if !file_present_nonempty(&path) {
        return Err(anyhow!("no billing CSV at {}", path.display()));
    }
    let path = path
        .canonicalize()
        .with_context(|| format!("resolve {}", path.display()))?;

    let groq = opts.groq.to_config();
    if groq.api_key.is_none() {
        tracing::warn!("GROQ_API_KEY is not set; only metrics will be shown");
    }

    tracing::info!("Processing dataset {}", path.display());
    let t0 = std::time::Instant::now();
    let dashboard = Dashboard::new(
        Arc::new(Engine::open_in_memory()?),
        Arc::new(Interpreter::new(&groq)?),
    );
    let state = dashboard.process(&path).await?;
    tracing::info!("Done in {:.1}s", t0.elapsed().as_secs_f64());

    print!("{}", render::terminal(&state));

    match state {
        DashboardState::Failed { metrics: None, .. } => Err(anyhow!("processing failed")),
        _ => Ok(()),
    }
}
