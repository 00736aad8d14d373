//! Application setup and server configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{delete, get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use trust_engine::{
    Analyzer, AnalyzerSpec, Backends, MemoryStore, PostgresStore, RemoteAnalyzer,
    RemoteExtractor, ScoringConfig, TrustService,
};

use crate::config::ServerConfig;
use crate::server::routes::{
    analyze_handler, health_handler, invalidate_handler, result_handler, status_handler,
};

/// Requests never wait on a pipeline run, so this only bounds slow storage.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: TrustService,
    /// Present when state lives in Postgres; checked by `/health`
    pub db_pool: Option<PgPool>,
}

/// Remote analyzers for the default graph: three media/text analyzers run in
/// parallel, the claim and source checks wait for text extraction.
pub fn remote_analyzers(base_url: &str) -> trust_engine::Result<Vec<Arc<dyn Analyzer>>> {
    let specs = [
        AnalyzerSpec::new("image-authenticity"),
        AnalyzerSpec::new("text-extraction"),
        AnalyzerSpec::new("manipulation-detection"),
        AnalyzerSpec::new("claim-credibility").depends_on(["text-extraction"]),
        AnalyzerSpec::new("source-reputation").depends_on(["text-extraction"]),
    ];

    specs
        .into_iter()
        .map(|spec| Ok(Arc::new(RemoteAnalyzer::new(base_url, spec)?) as Arc<dyn Analyzer>))
        .collect()
}

/// Connect backends, load the weight table and assemble the service.
pub async fn build_service(config: &ServerConfig) -> Result<(TrustService, Option<PgPool>)> {
    let (backends, pool) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            let store = PostgresStore::from_pool(pool.clone())
                .await
                .context("Failed to prepare trust tables")?;
            tracing::info!("Database connected");
            (Backends::shared(Arc::new(store)), Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping jobs and cache in memory");
            (Backends::shared(Arc::new(MemoryStore::new())), None)
        }
    };

    let scoring = match &config.scoring_config {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading scoring weights");
            ScoringConfig::from_file(path).context("Failed to load scoring config")?
        }
        None => ScoringConfig::default(),
    };

    let extractor = RemoteExtractor::new(&config.extractor_url)
        .context("Invalid EXTRACTOR_URL")?;
    let analyzers =
        remote_analyzers(&config.analyzer_base_url).context("Invalid ANALYZER_BASE_URL")?;

    let service = TrustService::builder(Arc::new(extractor), backends)
        .with_analyzers(analyzers)
        .with_scoring(scoring)
        .with_config(config.pipeline_config())
        .build()
        .context("Failed to build trust service")?;

    Ok((service, pool))
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    // CORS configuration - allow any origin for development
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/api/analyze", post(analyze_handler))
        .route("/api/status/:id", get(status_handler))
        .route("/api/results/:id", get(result_handler))
        .route("/api/cache/:key", delete(invalidate_handler))
        .route("/health", get(health_handler))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
