// DFP Bank Benchmark - Web Server
// Read-only JSON API over the persisted run

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use dfp_bank_benchmark::{
    apply_filter, dashboard, get_latest_run, get_mapping_usage, get_records, get_shadowed_lines,
    get_unmapped_lines,
    BenchmarkConfig, DashboardMetric, Filter, StatementType,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }

    fn fail(status: StatusCode, message: String) -> Response {
        (
            status,
            Json(Self {
                success: false,
                data: None,
                error: Some(message),
            }),
        )
            .into_response()
    }
}

/// Record with every dashboard column; undefined serializes as null
#[derive(Serialize)]
struct RecordResponse {
    company: String,
    year: i32,
    reference_date: String,
    values: BTreeMap<String, Option<f64>>,
    yoy: BTreeMap<String, Option<f64>>,
}

#[derive(Deserialize)]
struct RecordsQuery {
    bank: Option<String>,
    year: Option<i32>,
}

#[derive(Deserialize)]
struct RankingQuery {
    metric: Option<String>,
    year: Option<i32>,
}

#[derive(Deserialize)]
struct UnmappedQuery {
    year: Option<i32>,
    statement: Option<String>,
}

#[derive(Deserialize)]
struct YearQuery {
    year: Option<i32>,
}

#[derive(Serialize)]
struct RankingResponse {
    metric: DashboardMetric,
    year: i32,
    entries: Vec<dashboard::RankingEntry>,
}

/// Run `f` against the locked connection, mapping failures to a 500
fn with_db<T, F>(state: &AppState, f: F) -> std::result::Result<T, Response>
where
    T: Serialize,
    F: FnOnce(&Connection) -> dfp_bank_benchmark::Result<T>,
{
    let conn = state.db.lock().map_err(|_| {
        ApiResponse::<T>::fail(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned".to_string())
    })?;
    f(&*conn).map_err(|e| {
        error!(error = %e, "query failed");
        ApiResponse::<T>::fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/records?bank=&year=
async fn records(State(state): State<AppState>, Query(query): Query<RecordsQuery>) -> Response {
    let records = match with_db(&state, get_records) {
        Ok(records) => records,
        Err(response) => return response,
    };

    let mut filter = Filter::default();
    filter.banks.extend(query.bank);
    filter.years.extend(query.year);

    let response: Vec<RecordResponse> = apply_filter(&records, &filter)
        .into_iter()
        .map(|record| RecordResponse {
            company: record.company.clone(),
            year: record.year,
            reference_date: record.reference_date.to_string(),
            values: dashboard::DASHBOARD_METRICS
                .iter()
                .map(|m| (m.column.to_string(), record.column(m.column)))
                .collect(),
            yoy: record.derived.yoy.clone(),
        })
        .collect();

    ApiResponse::ok(response)
}

/// GET /api/ranking?metric=&year=
async fn ranking(State(state): State<AppState>, Query(query): Query<RankingQuery>) -> Response {
    let column = query.metric.as_deref().unwrap_or(dashboard::DASHBOARD_METRICS[0].column);
    let Some(metric) = DashboardMetric::by_column(column) else {
        return ApiResponse::<()>::fail(StatusCode::BAD_REQUEST, format!("unknown metric '{}'", column));
    };

    let records = match with_db(&state, get_records) {
        Ok(records) => records,
        Err(response) => return response,
    };

    let Some(year) = query.year.or_else(|| dashboard::years(&records).last().copied()) else {
        return ApiResponse::<()>::fail(StatusCode::NOT_FOUND, "no records persisted".to_string());
    };

    let all: Vec<_> = records.iter().collect();
    ApiResponse::ok(RankingResponse {
        metric,
        year,
        entries: dashboard::ranking(&all, &metric, year),
    })
}

/// GET /api/unmapped?year=&statement=
async fn unmapped(State(state): State<AppState>, Query(query): Query<UnmappedQuery>) -> Response {
    let statement = match query.statement.as_deref().map(StatementType::from_code) {
        Some(None) => {
            return ApiResponse::<()>::fail(StatusCode::BAD_REQUEST, "statement must be BPA, BPP or DRE".to_string())
        }
        Some(Some(s)) => Some(s),
        None => None,
    };

    match with_db(&state, get_unmapped_lines) {
        Ok(lines) => {
            let filtered: Vec<_> = lines
                .into_iter()
                .filter(|l| query.year.map_or(true, |y| l.year == y))
                .filter(|l| statement.map_or(true, |s| l.statement == s))
                .collect();
            ApiResponse::ok(filtered)
        }
        Err(response) => response,
    }
}

/// GET /api/shadowed?year=
async fn shadowed(State(state): State<AppState>, Query(query): Query<YearQuery>) -> Response {
    match with_db(&state, get_shadowed_lines) {
        Ok(lines) => {
            let filtered: Vec<_> = lines
                .into_iter()
                .filter(|l| query.year.map_or(true, |y| l.year == y))
                .collect();
            ApiResponse::ok(filtered)
        }
        Err(response) => response,
    }
}

/// GET /api/mapping-usage
async fn mapping_usage(State(state): State<AppState>) -> Response {
    match with_db(&state, get_mapping_usage) {
        Ok(usage) => ApiResponse::ok(usage),
        Err(response) => response,
    }
}

/// GET /api/runs/latest
async fn latest_run(State(state): State<AppState>) -> Response {
    match with_db(&state, get_latest_run) {
        Ok(Some(run)) => ApiResponse::ok(run),
        Ok(None) => ApiResponse::<()>::fail(StatusCode::NOT_FOUND, "no run persisted yet".to_string()),
        Err(response) => response,
    }
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/records", get(records))
        .route("/ranking", get(ranking))
        .route("/unmapped", get(unmapped))
        .route("/shadowed", get(shadowed))
        .route("/mapping-usage", get(mapping_usage))
        .route("/runs/latest", get(latest_run))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🌐 DFP Bank Benchmark - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = match std::env::args().nth(1).or_else(|| std::env::var("DFP_DATABASE").ok()) {
        Some(path) => PathBuf::from(path),
        None => BenchmarkConfig::default().database_path,
    };

    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: dfp-bank-benchmark extract");
        eprintln!("   to build the dataset first.");
        std::process::exit(1);
    }

    let conn = Connection::open(&db_path).with_context(|| format!("Failed to open {:?}", db_path))?;
    println!("✓ Database opened: {:?}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let addr = std::env::var("DFP_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/records", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}
