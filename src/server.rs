use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cli::ServeArgs;
use crate::dashboard::{Busy, Dashboard};
use crate::engine::Engine;
use crate::interpret::{BulletsResponse, ErrorBody, Interpreter};
use crate::storage::{self, StoragePaths};

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
    pub interpreter: Arc<Interpreter>,
    pub paths: StoragePaths,
}

impl AppState {
    pub fn new(paths: StoragePaths, interpreter: Interpreter) -> anyhow::Result<Self> {
        let engine = Arc::new(Engine::open_in_memory()?);
        let interpreter = Arc::new(interpreter);
        Ok(Self {
            dashboard: Arc::new(Dashboard::new(engine, Arc::clone(&interpreter))),
            interpreter,
            paths,
        })
    }
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let paths = StoragePaths::new(&opts.data_dir);
    paths.ensure_dirs().context("create data directories")?;

    let groq = opts.groq.to_config();
    if groq.api_key.is_none() {
        tracing::warn!("GROQ_API_KEY is not set; /api/kpis/interpret will return 500");
    }
    let interpreter = Interpreter::new(&groq)?;
    let state = AppState::new(paths, interpreter)?;

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/api/kpis/interpret", post(api_interpret))
        .route("/api/upload", post(api_upload))
        .route("/api/dashboard", get(api_dashboard))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn api_interpret(State(st): State<AppState>, body: Bytes) -> Response {
    tracing::debug!("api hit");
    match st.interpreter.interpret_body(&body).await {
        Ok(bullets) => Json(BulletsResponse { bullets }).into_response(),
        Err(e) => {
            if let crate::interpret::InterpretError::Internal(cause) = &e {
                tracing::error!("Interpret KPI error: {cause:#}");
            }
            e.into_response()
        }
    }
}

async fn api_upload(State(st): State<AppState>, body: Body) -> Response {
    let slot = match st.dashboard.try_begin() {
        Ok(slot) => slot,
        Err(busy) => return busy.into_response(),
    };

    match storage::write_stream(body.into_data_stream(), &st.paths.upload_csv).await {
        Ok(0) => return error(StatusCode::BAD_REQUEST, "upload body is empty"),
        Ok(n) => tracing::info!(
            "stored upload ({n} bytes) at {}",
            st.paths.upload_csv.display()
        ),
        Err(e) => {
            tracing::error!("store upload: {e:#}");
            return error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store upload");
        }
    }

    let run = st.dashboard.spawn_process(slot, st.paths.upload_csv.clone());
    match run.await {
        Ok(state) => Json(state.view()).into_response(),
        Err(e) => {
            tracing::error!("upload processing task: {e}");
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process upload")
        }
    }
}

async fn api_dashboard(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.dashboard.snapshot().view())
}

fn error(status: StatusCode, msg: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for Busy {
    fn into_response(self) -> Response {
        error(StatusCode::CONFLICT, self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::{Request, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::groq::GroqConfig;

    const CSV: &str = "InvoiceAmount,Paid,PTCopay,deduct,coins,PostedDt,DOS\n\
                       100,80,10,5,0,2024-01-11,2024-01-01\n\
                       200,150,20,0,10,2024-01-21,2024-01-01\n\
                       50,50,0,0,0,,2024-01-02\n";

    fn app(base_url: String, api_key: Option<&str>, data_dir: &std::path::Path) -> Router {
        let cfg = GroqConfig {
            api_key: api_key.map(str::to_string),
            base_url,
            model: "test-model".to_string(),
            timeout: Duration::from_secs(2),
            max_retries: 0,
            retry_backoff: Duration::ZERO,
        };
        let state = AppState::new(StoragePaths::new(data_dir), Interpreter::new(&cfg).unwrap())
            .unwrap();
        router(state)
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn upstream_replying(content: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": content}}]
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn interpret_rejects_missing_or_non_object_kpis() {
        let dir = tempfile::tempdir().unwrap();
        for body in [r#"{"kpis": null}"#, r#"{"kpis": 7}"#, r#"{"other": {}}"#] {
            let app = app("http://127.0.0.1:9".to_string(), Some("k"), dir.path());
            let (status, v) = call(app, post_json("/api/kpis/interpret", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(v, json!({"error": "KPIs are required"}));
        }
    }

    #[tokio::test]
    async fn interpret_without_key_is_misconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let app = app("http://127.0.0.1:9".to_string(), None, dir.path());
        let (status, v) = call(
            app,
            post_json("/api/kpis/interpret", r#"{"kpis": {"totalClaims": 3}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(v, json!({"error": "Groq API key not configured"}));
    }

    #[tokio::test]
    async fn interpret_with_unparseable_reply_returns_empty_bullets() {
        let server = upstream_replying("```json\n{not valid json\n```").await;
        let dir = tempfile::tempdir().unwrap();
        let app = app(server.uri(), Some("k"), dir.path());
        let (status, v) = call(
            app,
            post_json("/api/kpis/interpret", r#"{"kpis": {"totalClaims": 3}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v, json!({"bullets": []}));
    }

    #[tokio::test]
    async fn interpret_returns_strings_in_received_order() {
        let reply = json!({"interpretation": {
            "totalClaims": "s1",
            "totalBilled": "s2",
            "totalPaid": "s3",
            "collectionRate": "s4",
            "revenuePerClaim": 93.33,
            "patientResponsibilityPct": "s5",
            "insuranceCollectionPct": "s6",
            "avgPaymentDays": "s7",
            "extra": "s8"
        }})
        .to_string();
        let server = upstream_replying(&reply).await;
        let dir = tempfile::tempdir().unwrap();
        let app = app(server.uri(), Some("k"), dir.path());
        let (status, v) = call(
            app,
            post_json("/api/kpis/interpret", r#"{"kpis": {"totalClaims": 3}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            v,
            json!({"bullets": ["s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8"]})
        );
    }

    #[tokio::test]
    async fn interpret_upstream_failure_is_500() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let app = app(server.uri(), Some("k"), dir.path());
        let (status, v) = call(
            app,
            post_json("/api/kpis/interpret", r#"{"kpis": {"totalClaims": 3}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(v, json!({"error": "Groq API failed"}));
    }

    #[tokio::test]
    async fn interpret_with_malformed_request_is_generic_failure() {
        let dir = tempfile::tempdir().unwrap();
        let app = app("http://127.0.0.1:9".to_string(), Some("k"), dir.path());
        let (status, v) = call(app, post_json("/api/kpis/interpret", "{oops")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(v, json!({"error": "Failed to interpret KPIs"}));
    }

    #[tokio::test]
    async fn upload_runs_the_whole_chain() {
        let reply = json!({"interpretation": {"totalClaims": "Three claims were processed."}})
            .to_string();
        let server = upstream_replying(&reply).await;
        let dir = tempfile::tempdir().unwrap();
        let app = app(server.uri(), Some("k"), dir.path());

        let req = Request::post("/api/upload")
            .header(header::CONTENT_TYPE, "text/csv")
            .body(Body::from(CSV))
            .unwrap();
        let (status, v) = call(app.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["status"], "ready");
        assert_eq!(v["metrics"]["total_claims"], 3);
        assert_eq!(v["metrics"]["total_billed"], 350.0);
        assert_eq!(v["metrics"]["collection_rate"], 80.0);
        assert_eq!(v["metrics"]["avg_payment_days"], 15.0);
        assert_eq!(v["cards"][0], json!({"title": "Total Claims", "value": "3"}));
        assert_eq!(v["bullets"], json!(["Three claims were processed."]));

        let req = Request::get("/api/dashboard").body(Body::empty()).unwrap();
        let (status, snapshot) = call(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot, v);
    }

    #[tokio::test]
    async fn upload_with_bad_columns_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let app = app("http://127.0.0.1:9".to_string(), Some("k"), dir.path());
        let req = Request::post("/api/upload")
            .body(Body::from("Amount,Paid\n1,2\n"))
            .unwrap();
        let (status, v) = call(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["status"], "failed");
        assert!(v["metrics"].is_null());
        assert_eq!(v["bullets"], json!([]));
        assert_eq!(
            v["notice"],
            "Error processing file. Check column names and formats."
        );
    }

    #[tokio::test]
    async fn empty_upload_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = app("http://127.0.0.1:9".to_string(), Some("k"), dir.path());
        let req = Request::post("/api/upload").body(Body::empty()).unwrap();
        let (status, v) = call(app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(v, json!({"error": "upload body is empty"}));
    }

    #[tokio::test]
    async fn index_page_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let app = app("http://127.0.0.1:9".to_string(), None, dir.path());
        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("/api/upload"));
    }
}
