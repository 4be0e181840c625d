mod handlers;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    Router,
    extract::{ConnectInfo, FromRef},
    http::{Request, StatusCode, header},
};
use ci_relay_bridge::Bridge;
use ci_relay_core::config::Config;
use ci_relay_github::GitHub;
use ci_relay_gitlab::GitLab;
use tokio::{net::TcpListener, signal, sync::Semaphore};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt,
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Level, Span};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::handlers::build_router;

/// Health checks allowed to run at once.
const HEALTH_CHECK_PERMITS: usize = 10;

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    bridge: Arc<Bridge>,
    health_permits: Arc<Semaphore>,
}

impl AppState {
    fn new(bridge: Arc<Bridge>) -> Self {
        Self {
            config: bridge.config.clone(),
            bridge,
            health_permits: Arc::new(Semaphore::new(HEALTH_CHECK_PERMITS)),
        }
    }
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    if let Err(e) = run().await {
        tracing::error!("{e:?}");
        std::process::exit(1);
    }
    tracing::info!("Shut down gracefully");
}

async fn run() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env()?);
    if config.bridge.dry_run {
        tracing::warn!("Dry run: pipelines, job retries and dispatches are not submitted");
    }
    let github = GitHub::new(&config.github).await.context("Failed to create GitHub client")?;
    let gitlab = GitLab::new(&config.gitlab).context("Failed to create GitLab client")?;
    let bridge = Bridge::new(config.clone(), gitlab, github);
    let state = AppState::new(bridge);

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
    let listener = TcpListener::bind(addr).await.context("bind error")?;
    tracing::info!("Web server: Listening on {}", addr);

    let router = app(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error")?;
    tracing::info!("Web server stopped");
    Ok(())
}

fn app(state: AppState) -> Router {
    let sensitive_headers: Arc<[_]> = vec![
        header::AUTHORIZATION,
        header::HeaderName::from_static("x-gitlab-token"),
        header::HeaderName::from_static("x-hub-signature-256"),
    ]
    .into();
    let middleware = ServiceBuilder::new()
        .sensitive_request_headers(sensitive_headers)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(RelayMakeSpan { level: Level::INFO })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
        .layer(NormalizePathLayer::trim_trailing_slash());
    build_router().with_state(state).layer(middleware)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

#[derive(Debug, Clone)]
pub struct RelayMakeSpan {
    level: Level,
}

impl<B> MakeSpan<B> for RelayMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let forwarded_for = request
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        let ip = forwarded_for
            .or_else(|| {
                request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(socket_addr)| socket_addr.ip())
            })
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("[unknown]");
        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    ip = %ip,
                    user_agent = %user_agent,
                )
            }
        }
        match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        }
    }
}
