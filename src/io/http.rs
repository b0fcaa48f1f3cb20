//! HTTP API surface for the booking core
//!
//! hyper http1 server with hand-rolled routing. The endpoint surface
//! maps 1:1 to the store, lifecycle and calendar operations; the actor
//! performing a cancellation or deletion arrives in the `X-Actor`
//! header and is recorded, never authenticated here. Error bodies carry
//! a stable `error` kind string so UIs can tell a forbidden
//! reactivation apart from a generic failure.

use crate::domain::{
    Actor, BookingError, BookingId, BookingPatch, BookingRecord, BookingStatus, BookingView,
    FieldId, TeamRef, UserRef,
};
use crate::infra::{Config, Metrics};
use crate::io::prometheus;
use crate::services::expiry::effective_status;
use crate::services::lifecycle::bounded;
use crate::services::{
    BookingStore, CalendarAggregator, CalendarFilters, ExpirySweeper, LifecycleController,
};
use bytes::Bytes;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Shared handles the request handlers operate on
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookingStore>,
    pub lifecycle: Arc<LifecycleController>,
    pub sweeper: Arc<ExpirySweeper>,
    pub calendar: Arc<CalendarAggregator>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
    deadline: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BookingStore>,
        lifecycle: Arc<LifecycleController>,
        sweeper: Arc<ExpirySweeper>,
        calendar: Arc<CalendarAggregator>,
        metrics: Arc<Metrics>,
        config: Arc<Config>,
    ) -> Self {
        let deadline = Duration::from_millis(config.ops_timeout_ms());
        Self { store, lifecycle, sweeper, calendar, metrics, config, deadline }
    }
}

#[derive(Debug, Deserialize)]
struct CreateBookingRequest {
    field_id: FieldId,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    #[serde(default)]
    activity_type: Option<String>,
    #[serde(default)]
    team_ref: Option<TeamRef>,
    #[serde(default)]
    user_ref: Option<UserRef>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusChangeRequest {
    status: BookingStatus,
}

/// Local wall clock, the reference for expiry evaluation
fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn json_ok<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "response_encode_failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"storage","message":"failed to encode response"}"#.to_vec(),
            )
        }
    }
}

fn json_created<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => json_response(StatusCode::CREATED, body),
        Err(e) => {
            error!(error = %e, "response_encode_failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"storage","message":"failed to encode response"}"#.to_vec(),
            )
        }
    }
}

fn bad_request(message: &str) -> Response<Full<Bytes>> {
    let body = json!({ "error": "bad_request", "message": message });
    json_response(StatusCode::BAD_REQUEST, body.to_string().into_bytes())
}

fn not_found() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        br#"{"error":"not_found","message":"no such route"}"#.to_vec(),
    )
}

/// Map the error taxonomy onto HTTP statuses; the `error` kind string
/// is the contract UIs rely on
fn error_response(err: &BookingError) -> Response<Full<Bytes>> {
    let status = match err {
        BookingError::NotFound => StatusCode::NOT_FOUND,
        BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
        BookingError::ReactivationForbidden => StatusCode::FORBIDDEN,
        BookingError::Conflict(_) => StatusCode::CONFLICT,
        BookingError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        BookingError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
    };
    let body = json!({ "error": err.kind(), "message": err.to_string() });
    json_response(status, body.to_string().into_bytes())
}

fn parse_query(query: Option<&str>) -> FxHashMap<String, String> {
    let mut params = FxHashMap::default();
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                params.insert(key.to_string(), value.to_string());
            }
        }
    }
    params
}

fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    headers.get("x-actor").and_then(|v| v.to_str().ok()).and_then(|s| s.parse().ok())
}

fn calendar_filters(params: &FxHashMap<String, String>) -> Result<CalendarFilters, String> {
    let field = match params.get("field") {
        Some(raw) => Some(FieldId(raw.parse().map_err(|_| format!("invalid field id: {raw}"))?)),
        None => None,
    };
    let status = match params.get("status") {
        Some(raw) => Some(raw.parse::<BookingStatus>()?),
        None => None,
    };
    Ok(CalendarFilters { field, status })
}

/// The configured catalog plus any field ids seen in bookings; unknown
/// ids render with the `FIELD_{id}` fallback name
fn field_catalog_json(config: &Config, seen: &[FieldId]) -> serde_json::Value {
    let mut ids: Vec<i32> = config.field_catalog().keys().copied().collect();
    ids.extend(seen.iter().map(|field| field.0));
    ids.sort_unstable();
    ids.dedup();
    json!(ids
        .into_iter()
        .map(|id| json!({ "id": id, "name": config.field_name(FieldId(id)) }))
        .collect::<Vec<_>>())
}

async fn create_booking(state: &AppState, body: Bytes) -> Response<Full<Bytes>> {
    let request: CreateBookingRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return bad_request(&format!("invalid booking payload: {e}")),
    };

    let record = match BookingRecord::new_request(
        request.field_id,
        request.date,
        request.start_time,
        request.end_time,
        request.activity_type,
        request.team_ref,
        request.user_ref,
        request.notes,
    ) {
        Ok(record) => record,
        Err(e) => return error_response(&e),
    };

    match bounded(state.deadline, state.store.insert(record)).await {
        Ok(record) => {
            state.metrics.record_created();
            info!(id = %record.id, field = %record.field_id, date = %record.date, "booking_created");
            json_created(&record)
        }
        Err(e) => error_response(&e),
    }
}

async fn list_bookings(
    state: &AppState,
    params: &FxHashMap<String, String>,
) -> Response<Full<Bytes>> {
    let filters = match calendar_filters(params) {
        Ok(filters) => filters,
        Err(message) => return bad_request(&message),
    };
    let user = match params.get("user") {
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) => Some(UserRef(id)),
            Err(_) => return bad_request(&format!("invalid user ref: {raw}")),
        },
        None => None,
    };
    let from = match params.get("from").map(|raw| raw.parse::<NaiveDate>()) {
        Some(Ok(date)) => Some(date),
        Some(Err(_)) => return bad_request("invalid from date, expected YYYY-MM-DD"),
        None => None,
    };
    let to = match params.get("to").map(|raw| raw.parse::<NaiveDate>()) {
        Some(Ok(date)) => Some(date),
        Some(Err(_)) => return bad_request("invalid to date, expected YYYY-MM-DD"),
        None => None,
    };

    let records = match bounded(state.deadline, state.store.list()).await {
        Ok(records) => records,
        Err(e) => return error_response(&e),
    };

    let now = now_local();
    let views: Vec<BookingView> = records
        .into_iter()
        .filter(|r| filters.field.map_or(true, |f| r.field_id == f))
        .filter(|r| user.map_or(true, |u| r.user_ref == Some(u)))
        .filter(|r| from.map_or(true, |d| r.date >= d))
        .filter(|r| to.map_or(true, |d| r.date <= d))
        .filter_map(|r| {
            let effective = effective_status(&r, now);
            filters
                .status
                .map_or(true, |wanted| effective == wanted)
                .then(|| BookingView::new(r, effective))
        })
        .collect();
    json_ok(&views)
}

async fn get_booking(state: &AppState, id: BookingId) -> Response<Full<Bytes>> {
    match bounded(state.deadline, state.store.get(id)).await {
        Ok(record) => {
            let effective = effective_status(&record, now_local());
            json_ok(&BookingView::new(record, effective))
        }
        Err(e) => error_response(&e),
    }
}

async fn change_status(
    state: &AppState,
    id: BookingId,
    headers: &HeaderMap,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let request: StatusChangeRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return bad_request(&format!("invalid status payload: {e}")),
    };

    let result = match request.status {
        BookingStatus::Confirmed => state.lifecycle.confirm(id).await,
        BookingStatus::Cancelled => match actor_from_headers(headers) {
            Some(actor) => state.lifecycle.cancel(id, actor).await,
            None => return bad_request("cancellation requires an X-Actor header (user|admin)"),
        },
        BookingStatus::Pending => state.lifecycle.reactivate(id).await,
        BookingStatus::Expired => {
            return bad_request("expiry is sweep-driven; use POST /bookings/sweep")
        }
    };

    match result {
        Ok(record) => json_ok(&record),
        Err(e) => error_response(&e),
    }
}

async fn patch_details(state: &AppState, id: BookingId, body: Bytes) -> Response<Full<Bytes>> {
    let patch: BookingPatch = match serde_json::from_slice(&body) {
        Ok(patch) => patch,
        Err(e) => return bad_request(&format!("invalid patch payload: {e}")),
    };
    if patch.touches_status() {
        return bad_request("status changes go through PATCH /bookings/{id}/status");
    }

    match bounded(state.deadline, state.store.update(id, patch)).await {
        Ok(record) => json_ok(&record),
        Err(e) => error_response(&e),
    }
}

async fn delete_booking(
    state: &AppState,
    id: BookingId,
    headers: &HeaderMap,
) -> Response<Full<Bytes>> {
    let Some(actor) = actor_from_headers(headers) else {
        return bad_request("deletion requires an X-Actor header (user|admin)");
    };
    match state.lifecycle.delete(id, actor).await {
        Ok(record) => json_ok(&record),
        Err(e) => error_response(&e),
    }
}

async fn run_sweep(state: &AppState) -> Response<Full<Bytes>> {
    match state.sweeper.sweep(now_local()).await {
        Ok(report) => json_ok(&report),
        Err(e) => error_response(&e),
    }
}

async fn purge_expired(state: &AppState) -> Response<Full<Bytes>> {
    // Sweep first so freshly overdue bookings are included in the purge
    let swept = match state.sweeper.sweep(now_local()).await {
        Ok(report) => report.updated,
        Err(e) => return error_response(&e),
    };
    match state.lifecycle.purge_expired().await {
        Ok(removed) => json_ok(&json!({ "swept": swept, "removed": removed })),
        Err(e) => error_response(&e),
    }
}

async fn auto_confirm(state: &AppState) -> Response<Full<Bytes>> {
    match state
        .lifecycle
        .auto_confirm_stale(Utc::now(), state.config.auto_confirm_days())
        .await
    {
        Ok(confirmed) => json_ok(&json!({ "confirmed": confirmed })),
        Err(e) => error_response(&e),
    }
}

async fn calendar_month(
    state: &AppState,
    year: i32,
    month: u32,
    params: &FxHashMap<String, String>,
) -> Response<Full<Bytes>> {
    let filters = match calendar_filters(params) {
        Ok(filters) => filters,
        Err(message) => return bad_request(&message),
    };
    match state.calendar.month_view(year, month, filters, now_local()).await {
        Ok(view) => {
            let seen: Vec<FieldId> = view
                .cells
                .iter()
                .flat_map(|cell| cell.bookings.iter().map(|b| b.booking.field_id))
                .collect();
            json_ok(&json!({
                "year": view.year,
                "month": view.month,
                "days": view.day_index(),
                "fields": field_catalog_json(&state.config, &seen),
            }))
        }
        Err(e) => error_response(&e),
    }
}

async fn calendar_day(
    state: &AppState,
    date: NaiveDate,
    params: &FxHashMap<String, String>,
) -> Response<Full<Bytes>> {
    let filters = match calendar_filters(params) {
        Ok(filters) => filters,
        Err(message) => return bad_request(&message),
    };
    match state.calendar.bookings_for_day(date, filters, now_local()).await {
        Ok(bookings) => json_ok(&bookings),
        Err(e) => error_response(&e),
    }
}

async fn metrics_text(state: &AppState) -> Response<Full<Bytes>> {
    let records = bounded(state.deadline, state.store.list())
        .await
        .map(|records| records.len())
        .unwrap_or(0);
    let body = prometheus::render(&state.metrics, state.config.site_id(), records);
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

async fn route(
    state: &AppState,
    method: Method,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let params = parse_query(query);

    match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        (&Method::GET, ["metrics"]) => metrics_text(state).await,

        (&Method::POST, ["bookings"]) => create_booking(state, body).await,
        (&Method::GET, ["bookings"]) => list_bookings(state, &params).await,
        (&Method::POST, ["bookings", "sweep"]) => run_sweep(state).await,
        (&Method::POST, ["bookings", "auto-confirm"]) => auto_confirm(state).await,
        (&Method::DELETE, ["bookings", "expired"]) => purge_expired(state).await,

        (&Method::GET, ["bookings", raw_id]) => match raw_id.parse::<BookingId>() {
            Ok(id) => get_booking(state, id).await,
            Err(_) => bad_request("invalid booking id"),
        },
        (&Method::PATCH, ["bookings", raw_id, "status"]) => match raw_id.parse::<BookingId>() {
            Ok(id) => change_status(state, id, headers, body).await,
            Err(_) => bad_request("invalid booking id"),
        },
        (&Method::PUT, ["bookings", raw_id]) => match raw_id.parse::<BookingId>() {
            Ok(id) => patch_details(state, id, body).await,
            Err(_) => bad_request("invalid booking id"),
        },
        (&Method::DELETE, ["bookings", raw_id]) => match raw_id.parse::<BookingId>() {
            Ok(id) => delete_booking(state, id, headers).await,
            Err(_) => bad_request("invalid booking id"),
        },

        (&Method::GET, ["calendar", "day", raw_date]) => match raw_date.parse::<NaiveDate>() {
            Ok(date) => calendar_day(state, date, &params).await,
            Err(_) => bad_request("invalid date, expected YYYY-MM-DD"),
        },
        (&Method::GET, ["calendar", raw_year, raw_month]) => {
            match (raw_year.parse::<i32>(), raw_month.parse::<u32>()) {
                (Ok(year), Ok(month)) => calendar_month(state, year, month, &params).await,
                _ => bad_request("invalid calendar path, expected /calendar/{year}/{month}"),
            }
        }
        (&Method::GET, ["fields"]) => json_ok(&field_catalog_json(&state.config, &[])),

        _ => not_found(),
    }
}

/// Handle one HTTP request
async fn handle_request(
    req: Request<Incoming>,
    state: AppState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Ok(bad_request(&format!("failed to read request body: {e}")));
        }
    };

    let response = route(
        &state,
        parts.method.clone(),
        &path,
        query.as_deref(),
        &parts.headers,
        body,
    )
    .await;

    let latency_us = start.elapsed().as_micros() as u64;
    state.metrics.record_request(latency_us);
    debug!(
        method = %parts.method,
        path = %path,
        status = %response.status().as_u16(),
        latency_us = %latency_us,
        "http_request"
    );
    Ok(response)
}

/// Start the HTTP API server; runs until the shutdown signal flips
pub async fn start_http_server(
    port: u16,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %state.config.site_id(), "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let params = parse_query(Some("field=2&status=confirmed&from=2025-03-01"));
        assert_eq!(params.get("field").map(String::as_str), Some("2"));
        assert_eq!(params.get("status").map(String::as_str), Some("confirmed"));
        assert_eq!(params.get("from").map(String::as_str), Some("2025-03-01"));
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_calendar_filters_parsing() {
        let params = parse_query(Some("field=3&status=pending"));
        let filters = calendar_filters(&params).unwrap();
        assert_eq!(filters.field, Some(FieldId(3)));
        assert_eq!(filters.status, Some(BookingStatus::Pending));

        let bad = parse_query(Some("status=confermata"));
        assert!(calendar_filters(&bad).is_err());
    }

    #[test]
    fn test_actor_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(actor_from_headers(&headers), None);

        headers.insert("x-actor", "admin".parse().unwrap());
        assert_eq!(actor_from_headers(&headers), Some(Actor::Admin));

        headers.insert("x-actor", "somebody".parse().unwrap());
        assert_eq!(actor_from_headers(&headers), None);
    }

    #[test]
    fn test_field_catalog_renders_fallback_for_unknown_seen_ids() {
        let mut names = std::collections::HashMap::new();
        names.insert(1, "Campo Centrale".to_string());
        let config = Config::default().with_field_names(names);

        let value = field_catalog_json(&config, &[FieldId(1), FieldId(9)]);
        let entries = value.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "Campo Centrale");
        assert_eq!(entries[1]["id"], 9);
        assert_eq!(entries[1]["name"], "FIELD_9");
    }

    #[test]
    fn test_error_response_statuses() {
        assert_eq!(error_response(&BookingError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            error_response(&BookingError::ReactivationForbidden).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            error_response(&BookingError::InvalidTransition {
                from: BookingStatus::Expired,
                to: BookingStatus::Confirmed,
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(error_response(&BookingError::Timeout).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            error_response(&BookingError::Conflict("x".into())).status(),
            StatusCode::CONFLICT
        );
    }
}
