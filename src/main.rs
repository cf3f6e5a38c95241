use axum::{extract::State, response::Json, routing::post, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use fetchd::core::types::FetchRequest;
use fetchd::session::SessionDispatcher;
use fetchd::{AppState, FetchError};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("starting fetchd");

    let state = Arc::new(AppState::new()?);

    let app = Router::new()
        .route("/", axum::routing::get(health_check))
        .route("/health", axum::routing::get(health_check))
        .route("/get", post(get_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let port: u16 = parse_port_from_args().unwrap_or_else(|| state.config.resolve_port());
    let host = state.config.resolve_host();
    let bind_addr = format!("{host}:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "address already in use: {bind_addr}. Stop the existing process or run with --port {} (or set FETCHD_PORT/PORT).",
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("fetchd listening on http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();
        let mut sigint = signal(SignalKind::interrupt()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
            _ = async {
                if let Some(ref mut s) = sigint {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutting down, draining browser pool");
    state.browser_pool.shutdown().await;
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "fetchd",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn get_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FetchRequest>,
) -> Result<Json<fetchd::core::types::FetchResponse>, FetchError> {
    let payload = payload.validate()?;
    let url = payload.url.clone();

    let dispatcher = SessionDispatcher {
        pool: &state.browser_pool,
        store: &state.sessions,
        http: &state.http_client,
        config: &state.config,
    };

    match dispatcher.fetch(payload).await {
        Ok(result) => Ok(Json(fetchd::core::types::FetchResponse {
            status_code: result.status_code,
            used_browser: result.used_browser,
            headers: fetchd::core::types::aggregate_headers(&result.headers),
            body: result.body,
        })),
        Err(err) => {
            warn!(url, "fetch failed: {err}");
            Err(err)
        }
    }
}
