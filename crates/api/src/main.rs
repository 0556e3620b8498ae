use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketlog_core::domain::event::EventSubmission;
use marketlog_core::domain::record::{parse_document_key, TradingDayRecord};
use marketlog_core::service::TradingDayService;
use marketlog_core::storage::metadata::{self, TradingDaySummary};
use marketlog_core::Error;

const DEFAULT_LIST_LIMIT: i64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = marketlog_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    // Documents live on disk; the database only backs the listing index.
    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match marketlog_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API without trading-day index");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API without trading-day index");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "starting API without trading-day index");
            None
        }
    };

    let service = TradingDayService::from_settings(&settings, pool)?;
    let state = AppState {
        service: Arc::new(service),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/days", get(list_days))
        .route("/days/:date", get(get_day))
        .route("/days/:date/document", get(get_document))
        .route("/days/:date/events", post(submit_event))
        .route("/days/:date/preview", post(preview_event))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    service: Arc<TradingDayService>,
}

/// Maps pipeline errors onto HTTP statuses. Only unexpected failures go to Sentry.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: format!("{err:#}"),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = match err.downcast_ref::<Error>() {
            Some(Error::MissingOpenData { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::InvalidPrice(_) | Error::InvalidSubmission(_)) => StatusCode::BAD_REQUEST,
            _ => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %format!("{err:#}"), "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: format!("{err:#}"),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        anyhow::Error::new(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

async fn list_days(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TradingDaySummary>>, ApiError> {
    let Some(pool) = state.service.metadata_pool() else {
        return Err(ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "trading-day index unavailable (DATABASE_URL not configured)".to_string(),
        });
    };

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=1000).contains(&limit) {
        return Err(ApiError::bad_request(anyhow::anyhow!(
            "limit must be 1..=1000 (got {limit})"
        )));
    }

    Ok(Json(metadata::list_trading_days(pool, limit).await?))
}

async fn get_day(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<TradingDayRecord>, ApiError> {
    let date = parse_document_key(&date).map_err(ApiError::bad_request)?;
    Ok(Json(state.service.get(date).await?))
}

async fn get_document(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Response, ApiError> {
    let date = parse_document_key(&date).map_err(ApiError::bad_request)?;
    let text = state.service.document_text(date).await?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        text,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    record: TradingDayRecord,
}

async fn submit_event(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(submission): Json<EventSubmission>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let date = parse_document_key(&date).map_err(ApiError::bad_request)?;
    let slot = submission.slot;
    let record = state.service.submit(date, submission).await?;
    tracing::info!(%date, %slot, "event accepted");
    Ok(Json(SubmitResponse { record }))
}

async fn preview_event(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(submission): Json<EventSubmission>,
) -> Result<Response, ApiError> {
    let date = parse_document_key(&date).map_err(ApiError::bad_request)?;
    let text = state.service.preview(date, submission).await?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        text,
    )
        .into_response())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &marketlog_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
