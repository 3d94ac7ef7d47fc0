use serde::{Deserialize, Serialize};

pub mod address;
pub mod api;
pub mod jobs;
pub mod mailer;
pub mod startup_checks;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub mail: mailer::MailConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// How long completed and failed job results stay queryable
    #[serde(default = "default_result_ttl_seconds")]
    pub result_ttl_seconds: i64,
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

fn default_result_ttl_seconds() -> i64 {
    86_400
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            result_ttl_seconds: default_result_ttl_seconds(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            app: AppConfig {
                name: "Mailhop".to_string(),
                log_level: "info".to_string(),
            },
            jobs: JobsConfig::default(),
            mail: mailer::MailConfig::default(),
        }
    }
}

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<mailer::Dispatcher>,
    pub jobs: jobs::JobStore,
    pub config: Config,
}

pub async fn create_app(config: Config) -> Router {
    // One HTTP client shared by every provider
    let client = reqwest::Client::new();
    let providers: Vec<mailer::DynMailer> = config
        .mail
        .providers
        .iter()
        .map(|provider_config| mailer::create_provider(provider_config, client.clone()))
        .collect();

    let dispatcher = Arc::new(mailer::Dispatcher::new(providers));

    let job_store = jobs::JobStore::new(config.jobs.result_ttl_seconds);
    jobs::start_periodic_cleanup(job_store.clone(), config.jobs.cleanup_interval_seconds);

    let app_state = AppState {
        dispatcher,
        jobs: job_store,
        config: config.clone(),
    };

    Router::new()
        .route("/", axum::routing::get(api::index_handler))
        .route("/messages", axum::routing::post(api::send_message_handler))
        .route("/status", axum::routing::post(api::message_status_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::info_span!(
                        "http_request",
                        method = %method,
                        uri = %uri,
                        matched_path,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    let method = request.method();
                    let uri = request.uri();
                    let headers = request.headers();
                    let user_agent = headers
                        .get("user-agent")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");
                    let referer = headers
                        .get("referer")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");

                    tracing::info!(
                        target: "access_log",
                        method = %method,
                        path = %uri.path(),
                        query = ?uri.query(),
                        user_agent = %user_agent,
                        referer = %referer,
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = response.status();
                        let size = response
                            .headers()
                            .get("content-length")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("-");

                        tracing::info!(
                            target: "access_log",
                            status = %status,
                            size = %size,
                            latency_ms = %latency.as_millis(),
                            "response"
                        );
                    },
                ),
        )
        .with_state(app_state)
}
