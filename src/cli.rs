use std::time::Duration;

use clap::{Parser, Subcommand};

const DEFAULT_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");

pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Parser, Debug)]
#[command(name = "clinic-kpis")]
#[command(about = "Clinic billing KPIs (DuckDB + Groq interpretation)", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the dashboard page and HTTP API.
    Serve(ServeArgs),
    /// Compute KPIs for a local CSV and print cards plus interpretation.
    Analyze(AnalyzeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Backend data directory (uploaded CSV lands under uploads/).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8787)]
    pub port: u16,

    #[command(flatten)]
    pub groq: GroqArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Billing CSV with InvoiceAmount, Paid, PTCopay, deduct, coins, PostedDt and DOS columns.
    pub file: String,

    #[command(flatten)]
    pub groq: GroqArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GroqArgs {
    /// Groq API key. Interpretation requests fail with 500 when unset.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    /// OpenAI-compatible base URL (the client appends /chat/completions).
    #[arg(long, env = "GROQ_BASE_URL", default_value = DEFAULT_GROQ_BASE_URL)]
    pub groq_base_url: String,

    #[arg(long, env = "GROQ_MODEL", default_value = DEFAULT_GROQ_MODEL)]
    pub groq_model: String,

    /// Per-attempt timeout for the chat-completion call.
    #[arg(long, default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Extra attempts after a timeout, transport error or retryable status.
    #[arg(long, default_value_t = 1)]
    pub upstream_retries: u32,
}

impl GroqArgs {
    pub fn to_config(&self) -> crate::groq::GroqConfig {
        crate::groq::GroqConfig {
            api_key: self
                .groq_api_key
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            base_url: self.groq_base_url.trim_end_matches('/').to_string(),
            model: self.groq_model.clone(),
            timeout: Duration::from_secs(self.upstream_timeout_secs.max(1)),
            max_retries: self.upstream_retries,
            retry_backoff: Duration::from_secs(1),
        }
    }
}
