//! HTTP surface for challenge generation
//!
//! Axum server with optional bearer authentication. Health and metrics are
//! plain JSON; `POST /challenges/generate-ai` runs one batch per request.

use std::cmp::Ordering;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::{ProofAndFitError, Result};
use crate::schemas::{ChallengeType, Difficulty, GenerationRequest};
use crate::service::{BatchReport, ChallengeGenerationService};
use crate::store::RequestContext;

/// Shared state for HTTP server
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub service: Arc<ChallengeGenerationService>,
    pub metrics: Arc<Mutex<HttpMetrics>>,
}

/// Metrics for HTTP server
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    pub total_requests: u64,
    pub last_request_unix: u64,
    pub errors_total: u64,
    pub batches_total: u64,
    pub batches_empty: u64,
    pub items_generated: u64,
    pub duplicates_rejected: u64,
    pub generation_failures: u64,
    pub save_failures: u64,
    pub latencies: Vec<f64>, // ring buffer for p95
}

impl HttpMetrics {
    fn new() -> Self {
        Self {
            total_requests: 0,
            last_request_unix: unix_now(),
            errors_total: 0,
            batches_total: 0,
            batches_empty: 0,
            items_generated: 0,
            duplicates_rejected: 0,
            generation_failures: 0,
            save_failures: 0,
            latencies: Vec::with_capacity(256),
        }
    }

    fn record_batch(&mut self, report: &BatchReport) {
        self.batches_total += 1;
        if report.saved.is_empty() {
            self.batches_empty += 1;
        }
        self.items_generated += report.saved.len() as u64;
        self.duplicates_rejected += report.counters.duplicates_rejected as u64;
        self.generation_failures += report.counters.generation_failures as u64;
        self.save_failures += report.save_failures.len() as u64;
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl HttpState {
    pub fn new(config: Arc<Config>, service: Arc<ChallengeGenerationService>) -> Self {
        Self {
            config,
            service,
            metrics: Arc::new(Mutex::new(HttpMetrics::new())),
        }
    }
}

/// Body of `POST /challenges/generate-ai`
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub skills: Vec<String>,
    pub difficulty: String,
    #[serde(default)]
    pub challenge_type: Option<String>,
    /// Rotate types across the batch instead of using `challenge_type`
    #[serde(default)]
    pub challenge_types: Option<Vec<String>>,
    #[serde(default = "default_count", alias = "numberOfChallenges")]
    pub count: usize,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub job_description: Option<String>,
    #[serde(default)]
    pub job_post_id: Option<String>,
    #[serde(default)]
    pub created_by_user_id: Option<String>,
}

fn default_count() -> usize {
    1
}

impl GenerateBody {
    pub fn into_request(self, max_batch_size: usize) -> Result<(GenerationRequest, RequestContext)> {
        let difficulty: Difficulty = self.difficulty.parse()?;
        let challenge_type: ChallengeType = match self.challenge_type.as_deref() {
            Some(t) if !t.trim().is_empty() => t.parse()?,
            _ => ChallengeType::Scenario,
        };
        let rotation = self
            .challenge_types
            .unwrap_or_default()
            .iter()
            .map(|t| t.parse())
            .collect::<Result<Vec<ChallengeType>>>()?;

        let mut request =
            GenerationRequest::new(&self.skills, difficulty, challenge_type, self.count)?
                .with_type_rotation(rotation);
        if self.job_title.is_some() || self.job_description.is_some() {
            request = request.with_job(
                self.job_title.unwrap_or_default(),
                self.job_description.unwrap_or_default(),
            );
        }
        request.ensure_within(max_batch_size)?;

        let ctx = RequestContext {
            created_by_admin: self.job_post_id.is_none(),
            job_post_id: self.job_post_id,
            created_by_user_id: self.created_by_user_id,
        };
        Ok((request, ctx))
    }
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

/// Metrics endpoint
pub async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let metrics = state.metrics.lock().await.clone();

    let (avg_latency_ms, p95_latency_ms) = if metrics.latencies.is_empty() {
        (None, None)
    } else {
        let sum: f64 = metrics.latencies.iter().sum();
        let avg = sum / metrics.latencies.len() as f64;
        let mut sorted = metrics.latencies.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let p95_idx = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
        (Some(avg), sorted.get(p95_idx).copied())
    };

    Json(json!({
        "metrics_version": "1",
        "provider": state.service.provider(),
        "store": state.service.store().backend(),
        "total_requests": metrics.total_requests,
        "last_request_unix": metrics.last_request_unix,
        "errors_total": metrics.errors_total,
        "batches_total": metrics.batches_total,
        "batches_empty": metrics.batches_empty,
        "items_generated": metrics.items_generated,
        "duplicates_rejected": metrics.duplicates_rejected,
        "generation_failures": metrics.generation_failures,
        "save_failures": metrics.save_failures,
        "avg_latency_ms": avg_latency_ms,
        "p95_latency_ms": p95_latency_ms,
    }))
}

/// Generate a batch of unique challenges and persist them
pub async fn generate_handler(
    State(state): State<HttpState>,
    Json(body): Json<GenerateBody>,
) -> std::result::Result<Json<BatchReport>, ProofAndFitError> {
    let (request, ctx) = body.into_request(state.config.generation.max_batch_size)?;
    let report = state.service.generate(&request, &ctx).await?;
    state.metrics.lock().await.record_batch(&report);
    Ok(Json(report.into_result()?))
}

fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"code": 401, "message": "Unauthorized"}})),
    )
        .into_response()
}

pub fn router(state: HttpState) -> Router {
    let bearer = state.config.runtime.bearer_token.clone();

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/challenges/generate-ai", post(generate_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            |State(metrics): State<Arc<Mutex<HttpMetrics>>>,
             req: axum::http::Request<Body>,
             next: axum::middleware::Next| async move {
                let start = std::time::Instant::now();
                let resp = next.run(req).await;
                let latency_ms = start.elapsed().as_millis() as f64;
                let mut m = metrics.lock().await;
                if latency_ms > 0.0 {
                    m.latencies.push(latency_ms);
                    if m.latencies.len() > 256 {
                        m.latencies.remove(0);
                    }
                }
                if !resp.status().is_success() {
                    m.errors_total = m.errors_total.saturating_add(1);
                }
                m.total_requests = m.total_requests.saturating_add(1);
                m.last_request_unix = unix_now();
                resp
            },
        ))
        // Bearer guard only when a token is configured
        .layer(middleware::from_fn_with_state(
            bearer,
            |State(token): State<Option<String>>,
             req: axum::http::Request<Body>,
             next: axum::middleware::Next| async move {
                let Some(expected) = token else {
                    return next.run(req).await;
                };
                if req.uri().path() == "/health" {
                    return next.run(req).await;
                }
                if !bearer_matches(req.headers(), &expected) {
                    return unauthorized();
                }
                next.run(req).await
            },
        ))
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_http_server(state: HttpState) -> Result<()> {
    let bind = state.config.runtime.http_bind;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener: {}", e))?;

    tracing::info!("Starting HTTP server on {}", bind);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: serde_json::Value) -> GenerateBody {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn body_maps_to_request_and_context() {
        let (request, ctx) = body(json!({
            "skills": ["Fraud Detection"],
            "difficulty": "advanced",
            "challenge_type": "scenario",
            "challenge_types": ["analytical", "case_study"],
            "count": 3,
            "job_title": "Forensic Accountant",
            "job_post_id": "job-42"
        }))
        .into_request(20)
        .unwrap();
        assert_eq!(request.desired_count(), 3);
        assert_eq!(request.type_for_slot(1), ChallengeType::CaseStudy);
        assert_eq!(request.job().unwrap().title, "Forensic Accountant");
        assert_eq!(ctx.job_post_id.as_deref(), Some("job-42"));
        assert!(!ctx.created_by_admin);
    }

    #[test]
    fn bearer_token_must_match_exactly() {
        let mut headers = HeaderMap::new();
        assert!(!bearer_matches(&headers, "s3cret"));

        headers.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(bearer_matches(&headers, "s3cret"));
        assert!(!bearer_matches(&headers, "s3cre"));

        headers.insert(header::AUTHORIZATION, "Basic s3cret".parse().unwrap());
        assert!(!bearer_matches(&headers, "s3cret"));
    }

    #[test]
    fn invalid_body_is_rejected() {
        let err = body(json!({"skills": ["Audit"], "difficulty": "wizard"}))
            .into_request(20)
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = body(json!({"skills": ["Audit"], "difficulty": "beginner", "count": 50}))
            .into_request(20)
            .unwrap_err();
        assert!(matches!(err, ProofAndFitError::InvalidParams { .. }));

        let err = body(json!({"skills": [], "difficulty": "beginner"}))
            .into_request(20)
            .unwrap_err();
        assert!(matches!(err, ProofAndFitError::InvalidParams { .. }));
    }
}
