use futures::{SinkExt, StreamExt};
use pctransfer_core::{ErrorKind, HubStats, RelayEvent, TransferError, TransferHub};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::Filter;

// ============================================================================
// WEB CONTEXT: shared state for HTTP endpoints
// ============================================================================

pub struct WebContext {
    pub hub: TransferHub,
    /// Overrides the header-derived base URL in mobile links
    pub public_base_url: Option<String>,
    pub start_time: Instant,
}

impl WebContext {
    pub fn new(hub: TransferHub, public_base_url: Option<String>) -> Self {
        Self {
            hub,
            public_base_url,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// API REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct NewSessionResponse {
    pub session_id: String,
    pub mobile_url: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiStatus {
    Success,
    Error { kind: ErrorKind, error: String },
}

impl From<&TransferError> for ApiStatus {
    fn from(err: &TransferError) -> Self {
        ApiStatus::Error {
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    version: &'static str,
    uptime_seconds: u64,
    #[serde(flatten)]
    hub: HubStats,
}

// ============================================================================
// SERVER START
// ============================================================================

/// The pages, compiled into the binary.
const DESKTOP_HTML: &str = include_str!("desktop.html");
const MOBILE_HTML: &str = include_str!("mobile.html");
const SESSION_PLACEHOLDER: &str = "__SESSION_ID__";
const LIMIT_PLACEHOLDER: &str = "__MAX_PAYLOAD_BYTES__";

/// Upper bound for a JSON unlock body
const UNLOCK_BODY_LIMIT: u64 = 4 * 1024;

/// How long a closing socket may spend delivering queued events
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the HTTP + WebSocket server until the listener fails.
pub async fn serve(addr: SocketAddr, ctx: Arc<WebContext>) {
    let max_payload = ctx.hub.max_payload_bytes();

    let ctx_filter = warp::any().map({
        let ctx = ctx.clone();
        move || ctx.clone()
    });

    let hub_filter = warp::any().map({
        let hub = ctx.hub.clone();
        move || hub.clone()
    });

    let base_url_headers = warp::header::optional::<String>("host")
        .and(warp::header::optional::<String>("x-forwarded-proto"));

    // --- Routes ---

    // 1. Desktop page at /
    let desktop_html = DESKTOP_HTML.replace(LIMIT_PLACEHOLDER, &max_payload.to_string());
    let desktop_route = warp::path::end()
        .and(warp::get())
        .map(move || warp::reply::html(desktop_html.clone()))
        .boxed();

    // 2. Mobile page at /mobile/{session_id}
    let mobile_route = warp::path!("mobile" / String)
        .and(warp::get())
        .and(ctx_filter.clone())
        .map(|session_id: String, ctx: Arc<WebContext>| {
            let (status, body) = render_mobile(&ctx.hub, &session_id);
            warp::reply::with_status(warp::reply::html(body), status)
        })
        .boxed();

    // 3. Session creation
    let session_route = warp::path!("api" / "session")
        .and(warp::post())
        .and(base_url_headers)
        .and(ctx_filter.clone())
        .map(
            |host: Option<String>, proto: Option<String>, ctx: Arc<WebContext>| {
                let base = base_url(
                    ctx.public_base_url.as_deref(),
                    host.as_deref(),
                    proto.as_deref(),
                );
                let session_id = ctx.hub.create_session();
                let mobile_url = format!("{}/mobile/{}", base, session_id);
                warp::reply::json(&NewSessionResponse {
                    session_id,
                    mobile_url,
                })
            },
        )
        .boxed();

    // 4. Phone-side claim
    let unlock_route = warp::path!("api" / "mobile-unlock")
        .and(warp::post())
        .and(warp::body::content_length_limit(UNLOCK_BODY_LIMIT))
        .and(warp::body::json())
        .and(ctx_filter.clone())
        .map(|request: UnlockRequest, ctx: Arc<WebContext>| {
            let (status, body) = mobile_unlock(&ctx.hub, &request);
            warp::reply::with_status(warp::reply::json(&body), status)
        })
        .boxed();

    // 5. Counters
    let stats_route = warp::path!("api" / "stats")
        .and(warp::get())
        .and(ctx_filter)
        .map(|ctx: Arc<WebContext>| {
            warp::reply::json(&StatsResponse {
                version: env!("CARGO_PKG_VERSION"),
                uptime_seconds: ctx.start_time.elapsed().as_secs(),
                hub: ctx.hub.stats(),
            })
        })
        .boxed();

    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| "OK")
        .boxed();

    // 6. WebSocket at /ws
    let ws_limit = ws_message_limit(max_payload);
    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(hub_filter)
        .map(move |ws: warp::ws::Ws, hub: TransferHub| {
            ws.max_message_size(ws_limit)
                .on_upgrade(move |socket| handle_connection(socket, hub))
        })
        .boxed();

    // Combine all routes with CORS
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"])
        .allow_header("content-type");
    let routes = desktop_route
        .or(mobile_route)
        .or(session_route)
        .or(unlock_route)
        .or(stats_route)
        .or(health_route)
        .or(ws_route)
        .with(cors)
        .boxed();

    info!("Starting WebSocket + HTTP server on {}", addr);
    warp::serve(routes).run(addr).await;
}

// ============================================================================
// API HANDLERS
// ============================================================================

/// Claim the session and unlock its subscribers
pub fn mobile_unlock(hub: &TransferHub, request: &UnlockRequest) -> (StatusCode, ApiStatus) {
    match hub.claim(&request.session_id, request.email.trim()) {
        Ok(notified) => {
            info!(
                "Session {} claimed by {} ({} desktop connection(s) notified)",
                request.session_id,
                request.email.trim(),
                notified
            );
            (StatusCode::OK, ApiStatus::Success)
        }
        Err(e) => {
            warn!("Unlock for session {} refused: {}", request.session_id, e);
            (status_for(e.kind()), ApiStatus::from(&e))
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnknownSession => StatusCode::NOT_FOUND,
        ErrorKind::InvalidSessionId | ErrorKind::InvalidEmail => StatusCode::BAD_REQUEST,
        ErrorKind::AlreadyClaimed | ErrorKind::RecipientMismatch => StatusCode::CONFLICT,
        ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::NotClaimed | ErrorKind::InvalidAttachment => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::MissingCredentials | ErrorKind::TransportFailure => StatusCode::BAD_GATEWAY,
    }
}

/// Mobile page for a live session, or a 404 page
pub fn render_mobile(hub: &TransferHub, session_id: &str) -> (StatusCode, String) {
    if hub.session(session_id).is_some() {
        // Live ids only contain [A-Za-z0-9_-], so they are safe to embed.
        (StatusCode::OK, MOBILE_HTML.replace(SESSION_PLACEHOLDER, session_id))
    } else {
        debug!("Mobile page requested for unknown session {}", session_id);
        (
            StatusCode::NOT_FOUND,
            "<!DOCTYPE html><html><body style=\"font-family:sans-serif;text-align:center\">\
             <h2>This link has expired</h2><p>Reload the page on the PC and scan the new code.</p>\
             </body></html>"
                .to_string(),
        )
    }
}

/// Base URL for mobile links: configured value first, then the request's
/// Host header with X-Forwarded-Proto (default http). Without a Host the
/// link is left relative.
pub fn base_url(configured: Option<&str>, host: Option<&str>, proto: Option<&str>) -> String {
    if let Some(base) = configured {
        return base.trim_end_matches('/').to_string();
    }
    match host {
        Some(host) => {
            let proto = proto
                .and_then(|p| p.split(',').next())
                .map(str::trim)
                .filter(|p| *p == "http" || *p == "https")
                .unwrap_or("http");
            format!("{}://{}", proto, host)
        }
        None => String::new(),
    }
}

/// Largest frame the socket accepts. A payload at the limit can arrive as
/// JSON-escaped text (up to 6 bytes per control character as `\u00XX`) or
/// as base64 (4 bytes per 3), so the frame cap is sized for the worse of the
/// two plus room for the envelope. Anything the assembler would still reject
/// gets a `packageRejected` instead of a dropped socket.
fn ws_message_limit(max_payload: usize) -> usize {
    max_payload.saturating_mul(6).saturating_add(64 * 1024)
}

/// Frame size reported by the socket when a frame exceeds the cap, e.g.
/// "Space limit exceeded: Message too long: 4096 > 1024".
fn oversized_frame_size(error: &str) -> Option<usize> {
    let (_, rest) = error.split_once("too long:")?;
    rest.split('>').next()?.trim().parse().ok()
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

async fn handle_connection(ws: warp::ws::WebSocket, hub: TransferHub) {
    let max_payload = hub.max_payload_bytes();
    let (mut user_ws_tx, mut user_ws_rx) = ws.split();
    let (mut connection, mut frames) = hub.open_connection();
    let connection_id = connection.id();
    debug!("Connection {} opened", connection_id);

    // Task to forward relay frames -> WebSocket
    let mut forward_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            match frame.event.to_json() {
                Ok(json) => {
                    if user_ws_tx
                        .send(warp::ws::Message::text(json))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => warn!("Could not encode {} event: {}", frame.event.name(), e),
            }
        }
    });

    // Handle WebSocket -> hub commands
    while let Some(result) = user_ws_rx.next().await {
        match result {
            Ok(msg) => {
                if let Ok(text) = msg.to_str() {
                    // Dispatches run detached; their outcome arrives as dispatchStatus.
                    let _ = connection.handle_text(text);
                } else if msg.is_close() {
                    break;
                }
            }
            Err(e) => {
                debug!("Connection {} read error: {}", connection_id, e);
                let reply = match oversized_frame_size(&e.to_string()) {
                    Some(size) => RelayEvent::rejected(&TransferError::PayloadTooLarge {
                        size,
                        limit: max_payload,
                    }),
                    None => RelayEvent::Error {
                        kind: None,
                        error: format!("connection closed: {}", e),
                    },
                };
                hub.relay().send_to(connection_id, reply);
                break;
            }
        }
    }

    // Dropping the connection closes its queue; give the forwarder a moment
    // to flush what is left, e.g. a final rejection.
    drop(connection);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut forward_task)
        .await
        .is_err()
    {
        forward_task.abort();
    }
    debug!("Connection {} closed", connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pctransfer_core::HubConfig;

    // Building the SMTP mailer does not touch the network; no test sends mail.
    fn hub() -> TransferHub {
        TransferHub::with_smtp(HubConfig::default()).unwrap()
    }

    fn unlock(session_id: &str, email: &str) -> UnlockRequest {
        UnlockRequest {
            session_id: session_id.to_string(),
            email: email.to_string(),
        }
    }

    #[test]
    fn test_unlock_success_notifies_desktop() {
        let hub = hub();
        let id = hub.create_session();
        let (mut desktop, mut rx) = hub.open_connection();
        desktop.handle(pctransfer_core::ClientCommand::Join { room: id.clone() });
        rx.try_recv().unwrap();

        let (status, body) = mobile_unlock(&hub, &unlock(&id, " s@college.edu "));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"status": "success"})
        );
        assert_eq!(
            rx.try_recv().unwrap().event,
            pctransfer_core::RelayEvent::unlock("s@college.edu")
        );
    }

    #[test]
    fn test_unlock_unknown_session_is_404() {
        let (status, body) = mobile_unlock(&hub(), &unlock("nosuchsession", "s@college.edu"));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "unknown_session");
    }

    #[test]
    fn test_unlock_missing_email_is_400() {
        let hub = hub();
        let id = hub.create_session();
        let request: UnlockRequest =
            serde_json::from_str(&format!(r#"{{"session_id":"{}"}}"#, id)).unwrap();

        let (status, body) = mobile_unlock(&hub, &request);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(serde_json::to_value(&body).unwrap()["kind"], "invalid_email");
    }

    #[test]
    fn test_mobile_page_embeds_live_session_only() {
        let hub = hub();
        let id = hub.create_session();

        let (status, page) = render_mobile(&hub, &id);
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains(&id));
        assert!(!page.contains(SESSION_PLACEHOLDER));

        let (status, page) = render_mobile(&hub, "<script>");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn test_base_url_sources() {
        assert_eq!(
            base_url(Some("https://pc.example.org/"), Some("ignored:5000"), None),
            "https://pc.example.org"
        );
        assert_eq!(
            base_url(None, Some("10.0.0.5:5000"), None),
            "http://10.0.0.5:5000"
        );
        assert_eq!(
            base_url(None, Some("pc.example.org"), Some("https, http")),
            "https://pc.example.org"
        );
        assert_eq!(
            base_url(None, Some("pc.example.org"), Some("javascript")),
            "http://pc.example.org"
        );
        assert_eq!(base_url(None, None, Some("https")), "");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::UnknownSession), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::InvalidEmail), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::AlreadyClaimed), StatusCode::CONFLICT);
    }

    #[test]
    fn test_ws_limit_fits_worst_case_frame() {
        let max = 3 * 1024;
        // Control characters escape to six bytes each; the file is base64 of
        // a full-size attachment.
        let text: String = "\u{1}".repeat(max);
        let file_data = format!("data:application/octet-stream;base64,{}", "A".repeat(max.div_ceil(3) * 4));
        let frame = serde_json::json!({
            "cmd": "send_package",
            "target_email": "s@college.edu",
            "text": text,
            "file_data": file_data,
            "file_name": "x".repeat(255),
        })
        .to_string();

        assert!(frame.len() > max * 6);
        assert!(frame.len() <= ws_message_limit(max));
    }

    #[test]
    fn test_ws_limit_saturates() {
        assert_eq!(ws_message_limit(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_oversized_frame_size() {
        assert_eq!(
            oversized_frame_size("Space limit exceeded: Message too long: 4096 > 1024"),
            Some(4096)
        );
        assert_eq!(oversized_frame_size("Connection reset without closing handshake"), None);
    }

    #[test]
    fn test_recipient_mismatch_is_conflict() {
        assert_eq!(status_for(ErrorKind::RecipientMismatch), StatusCode::CONFLICT);
    }
}
