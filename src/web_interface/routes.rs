use std::convert::Infallible;
use std::sync::Arc;

use log::{debug, error, warn};
use serde::Serialize;
use tokio_stream::StreamExt;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::sse::Event;
use warp::{reply, Filter, Rejection, Reply};

use super::types::{ApiError, DeletedResponse};
use crate::configuration::Settings;
use crate::error_handling::types::SessionError;
use crate::session_management::live_fanout::{LiveEvent, KEEPALIVE_INTERVAL};
use crate::session_management::session_manager::SessionManager;
use crate::storage::session_filter::{EntryQuery, EntryQueryParams};

const SETTINGS_BODY_LIMIT: u64 = 16 * 1024;

const DASHBOARD_HTML: &str = r#"<!doctype html>
<html><head><meta charset="utf-8"><title>logifai</title></head>
<body><h1>logifai is running</h1>
<p>Sessions: <a href="/api/sessions">/api/sessions</a></p></body></html>"#;

fn with_manager(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = (Arc<SessionManager>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&manager))
}

pub fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    reply::with_status(reply::json(body), status).into_response()
}

/// HTTP status for a failed session operation.
pub fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Conflict(_) => StatusCode::CONFLICT,
        SessionError::StorageError(_) | SessionError::CaptureError(_) | SessionError::ConfigError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn error_reply(err: &SessionError) -> Response {
    let status = status_for(err);
    let message = match err {
        SessionError::NotFound(_) => "Session not found".to_string(),
        SessionError::Conflict(_) => "Cannot delete the live session".to_string(),
        other => {
            error!("Request failed: {}", other);
            "Internal server error".to_string()
        }
    };
    json_reply(&ApiError::new(message), status)
}

/// SSE frame for a live event; `None` if the entry cannot be encoded.
pub fn sse_event(event: LiveEvent) -> Option<Event> {
    match event {
        LiveEvent::Entry(entry) => match serde_json::to_string(&entry) {
            Ok(json) => Some(Event::default().event("entry").data(json)),
            Err(e) => {
                warn!("Failed to serialize live entry {}: {}", entry.line, e);
                None
            }
        },
        LiveEvent::End => Some(Event::default().event("end").data("{}")),
    }
}

/// GET /
pub fn dashboard_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .map(|| reply::html(DASHBOARD_HTML))
}

/// GET /api/sessions
pub fn list_sessions_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions")
        .and(warp::get())
        .and(with_manager(manager))
        .map(|manager: Arc<SessionManager>| match manager.list_sessions() {
            Ok(listing) => json_reply(&listing, StatusCode::OK),
            Err(e) => error_reply(&e),
        })
}

/// GET /api/sessions/:id/entries?offset&limit&level&search
pub fn entries_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "entries")
        .and(warp::get())
        .and(warp::query::<EntryQueryParams>())
        .and(with_manager(manager))
        .map(|id: String, params: EntryQueryParams, manager: Arc<SessionManager>| {
            let query = EntryQuery::from(params);
            match manager.entries(&id, &query) {
                Ok(page) => json_reply(&page, StatusCode::OK),
                Err(e) => error_reply(&e),
            }
        })
}

/// GET /api/sessions/:id/stream (Server-Sent Events)
pub fn stream_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "stream")
        .and(warp::get())
        .and(with_manager(manager))
        .map(|id: String, manager: Arc<SessionManager>| {
            let subscription = match manager.subscribe(&id) {
                Ok(s) => s,
                Err(_) => {
                    return json_reply(&ApiError::new("No live session with this ID"), StatusCode::NOT_FOUND);
                }
            };
            debug!("SSE client attached to {}", id);
            let events = subscription.filter_map(|event| sse_event(event).map(Ok::<_, Infallible>));
            warp::sse::reply(
                warp::sse::keep_alive()
                    .interval(KEEPALIVE_INTERVAL)
                    .text("keepalive")
                    .stream(events),
            )
            .into_response()
        })
}

/// DELETE /api/sessions/:id
pub fn delete_session_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String)
        .and(warp::delete())
        .and(with_manager(manager))
        .map(|id: String, manager: Arc<SessionManager>| match manager.delete_session(&id) {
            Ok(meta) => json_reply(&DeletedResponse { deleted: meta.id, filename: meta.filename }, StatusCode::OK),
            Err(e) => error_reply(&e),
        })
}

/// POST /api/cleanup
pub fn cleanup_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "cleanup")
        .and(warp::post())
        .and(with_manager(manager))
        .map(|manager: Arc<SessionManager>| match manager.cleanup_with_settings() {
            Ok(result) => json_reply(&result, StatusCode::OK),
            Err(e) => error_reply(&e),
        })
}

/// GET /api/settings
pub fn get_settings_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "settings")
        .and(warp::get())
        .and(with_manager(manager))
        .map(|manager: Arc<SessionManager>| json_reply(&manager.settings(), StatusCode::OK))
}

/// PUT /api/settings
///
/// Fields missing or invalid in the body fall back to their defaults, as in
/// the settings file.
pub fn put_settings_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "settings")
        .and(warp::put())
        .and(warp::body::content_length_limit(SETTINGS_BODY_LIMIT))
        .and(warp::body::json::<serde_json::Value>())
        .and(with_manager(manager))
        .map(|body: serde_json::Value, manager: Arc<SessionManager>| {
            let settings = match Settings::from_json(body) {
                Ok(settings) => settings,
                Err(e) => {
                    debug!("Rejected settings body: {}", e);
                    return json_reply(&ApiError::new("Invalid settings"), StatusCode::BAD_REQUEST);
                }
            };
            match manager.update_settings(settings) {
                Ok(saved) => json_reply(&saved, StatusCode::OK),
                Err(e) => error_reply(&e),
            }
        })
}

/// Turns unmatched routes into JSON errors.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.is_not_found() {
        return Ok(json_reply(&ApiError::new("Not found"), StatusCode::NOT_FOUND));
    }
    // Body and query problems outrank the method mismatches of sibling routes.
    if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        return Ok(json_reply(&ApiError::new("Invalid JSON body"), StatusCode::BAD_REQUEST));
    }
    if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        return Ok(json_reply(&ApiError::new("Expected application/json"), StatusCode::UNSUPPORTED_MEDIA_TYPE));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(json_reply(&ApiError::new("Body too large"), StatusCode::PAYLOAD_TOO_LARGE));
    }
    if err.find::<warp::reject::LengthRequired>().is_some() {
        return Ok(json_reply(&ApiError::new("Content-Length required"), StatusCode::LENGTH_REQUIRED));
    }
    if err.find::<warp::reject::InvalidQuery>().is_some() {
        return Ok(json_reply(&ApiError::new("Invalid query"), StatusCode::BAD_REQUEST));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(json_reply(&ApiError::new("Method not allowed"), StatusCode::METHOD_NOT_ALLOWED));
    }
    warn!("Unhandled rejection: {:?}", err);
    Ok(json_reply(&ApiError::new("Internal server error"), StatusCode::INTERNAL_SERVER_ERROR))
}
