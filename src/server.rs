//! Local preview server with live-reload notifications.
//!
//! Serves the preview root over HTTP and streams build outcomes to browsers
//! as Server-Sent Events on [`RELOAD_PATH`]:
//!
//! - `event: reload` with `{"type":"reload","pipelines":[...]}`
//! - `event: error` with `{"type":"error","pipeline":"...","message":"..."}`
//!
//! Every HTML page served with status 200 gets a `<script>` tag loading
//! [`CLIENT_PATH`] before its closing `</body>`.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;

use crate::build::scheduler::{Service, ServiceError};
use crate::events::{BuildEvent, Notifier};

/// SSE endpoint.
pub const RELOAD_PATH: &str = "/__assetflow/reload";

/// Client script that reloads the page on `reload` events.
pub const CLIENT_PATH: &str = "/__assetflow/client.js";

const CLIENT_SCRIPT: &str = r#"(function () {
  var source = new EventSource("/__assetflow/reload");
  source.addEventListener("reload", function () { window.location.reload(); });
  source.addEventListener("error", function (e) {
    if (e.data) { console.error("[assetflow]", JSON.parse(e.data).message); }
  });
})();
"#;

const CLIENT_TAG: &str = r#"<script src="/__assetflow/client.js"></script>"#;

/// Largest page buffered for client injection.
const INJECT_LIMIT: usize = 16 * 1024 * 1024;

/// Pending messages per subscriber before slow clients start skipping.
const HUB_CAPACITY: usize = 64;

/// Preview server failure.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Tokio runtime could not start
    #[error("failed to start server runtime: {0}")]
    Runtime(std::io::Error),
    /// Listener could not bind
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        source: std::io::Error,
    },
    /// Server loop ended with an error
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Message pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReloadMessage {
    /// Outputs changed; reload
    Reload { pipelines: Vec<String> },
    /// A pipeline failed; keep the page and report
    Error { pipeline: String, message: String },
}

impl ReloadMessage {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            ReloadMessage::Reload { .. } => "reload",
            ReloadMessage::Error { .. } => "error",
        }
    }

    fn to_event(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_default();
        Event::default().event(self.event_name()).data(data)
    }
}

impl From<&BuildEvent> for ReloadMessage {
    fn from(event: &BuildEvent) -> Self {
        match event {
            BuildEvent::Completed { pipelines, .. } => {
                ReloadMessage::Reload { pipelines: pipelines.clone() }
            }
            BuildEvent::Failed { pipeline, error } => ReloadMessage::Error {
                pipeline: pipeline.clone(),
                message: error.to_string(),
            },
        }
    }
}

/// Broadcasts build events to every connected browser.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    tx: broadcast::Sender<ReloadMessage>,
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.tx.subscribe()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send to every subscriber. Without subscribers the message is dropped.
    pub fn broadcast(&self, message: ReloadMessage) {
        let _ = self.tx.send(message);
    }
}

impl Notifier for ReloadHub {
    fn notify(&self, event: &BuildEvent) {
        self.broadcast(ReloadMessage::from(event));
    }
}

/// The preview server.
#[derive(Debug, Clone)]
pub struct DevServer {
    port: u16,
    root: PathBuf,
    hub: ReloadHub,
}

impl DevServer {
    pub fn new(port: u16, root: PathBuf, hub: ReloadHub) -> Self {
        Self { port, root, hub }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.port))
    }

    /// Reload endpoints plus static files from the preview root, with the
    /// client script injected into HTML pages.
    pub fn router(&self) -> Router {
        Router::new()
            .route(RELOAD_PATH, get(reload_stream))
            .route(CLIENT_PATH, get(client_script))
            .fallback_service(ServeDir::new(&self.root))
            .with_state(self.hub.clone())
            .layer(middleware::map_response(inject_client))
    }

    /// Bind and serve until the process ends.
    pub async fn serve(&self) -> Result<(), ServeError> {
        let addr = self.addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;

        tracing::info!("Serving {} at http://{}", self.root.display(), addr);
        axum::serve(listener, self.router()).await.map_err(ServeError::Serve)
    }

    /// Run [`serve`](Self::serve) on a dedicated runtime, blocking the calling thread.
    pub fn run_blocking(&self) -> Result<(), ServeError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(ServeError::Runtime)?;
        runtime.block_on(self.serve())
    }
}

impl Service for DevServer {
    fn name(&self) -> &str {
        "dev server"
    }

    fn run(&self) -> Result<(), ServiceError> {
        self.run_blocking().map_err(Into::into)
    }
}

async fn reload_stream(
    State(hub): State<ReloadHub>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("Reload client connected ({} total)", hub.client_count() + 1);
    Sse::new(message_stream(hub.subscribe())).keep_alive(KeepAlive::default())
}

async fn client_script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], CLIENT_SCRIPT)
}

fn is_html_page(response: &Response) -> bool {
    response.status() == StatusCode::OK
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/html"))
}

async fn inject_client(response: Response) -> Response {
    if !is_html_page(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let html = match axum::body::to_bytes(body, INJECT_LIMIT).await {
        Ok(html) => html,
        Err(e) => {
            tracing::warn!("Could not buffer page for live reload: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(inject_script(&html)))
}

/// Insert the client tag before the last `</body>`, or append it.
/// Pages that already load the client are returned unchanged.
fn inject_script(html: &[u8]) -> Vec<u8> {
    let path = CLIENT_PATH.as_bytes();
    if html.windows(path.len()).any(|w| w == path) {
        return html.to_vec();
    }

    let at = html
        .windows(b"</body>".len())
        .rposition(|w| w.eq_ignore_ascii_case(b"</body>"))
        .unwrap_or(html.len());
    let mut out = Vec::with_capacity(html.len() + CLIENT_TAG.len());
    out.extend_from_slice(&html[..at]);
    out.extend_from_slice(CLIENT_TAG.as_bytes());
    out.extend_from_slice(&html[at..]);
    out
}

/// Turn a hub subscription into SSE events. Lagging clients skip ahead.
fn message_stream(
    rx: broadcast::Receiver<ReloadMessage>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(message) => return Some((Ok(message.to_event()), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Reload client lagged by {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformError;
    use axum::http::Request;
    use futures::StreamExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn fetch(server: &DevServer, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn completed() -> BuildEvent {
        BuildEvent::Completed {
            pipelines: vec!["sass".to_string(), "css".to_string()],
            written: vec![PathBuf::from("/p/src/css/main.css")],
        }
    }

    #[test]
    fn test_reload_message_json() {
        let message = ReloadMessage::from(&completed());
        assert_eq!(message.event_name(), "reload");
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"type":"reload","pipelines":["sass","css"]}"#
        );
    }

    #[test]
    fn test_error_message_json() {
        let event = BuildEvent::Failed {
            pipeline: "js".to_string(),
            error: TransformError::new("command:npx", "SyntaxError").in_pipeline("js"),
        };
        let message = ReloadMessage::from(&event);
        assert_eq!(message.event_name(), "error");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({
                "type": "error",
                "pipeline": "js",
                "message": "[js] command:npx failed: SyntaxError"
            })
        );
    }

    #[test]
    fn test_hub_delivers_to_subscribers() {
        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();
        assert_eq!(hub.client_count(), 1);

        hub.notify(&completed());
        assert_eq!(
            rx.try_recv().unwrap(),
            ReloadMessage::Reload { pipelines: vec!["sass".to_string(), "css".to_string()] }
        );
    }

    #[test]
    fn test_hub_without_subscribers() {
        ReloadHub::new().notify(&completed());
    }

    #[test]
    fn test_dev_server_binds_loopback() {
        let server = DevServer::new(3000, PathBuf::from("src"), ReloadHub::new());
        assert_eq!(server.addr().to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_inject_script_placement() {
        assert_eq!(
            inject_script(b"<body><p>x</p></BODY>"),
            format!("<body><p>x</p>{}</BODY>", CLIENT_TAG).into_bytes()
        );
        assert_eq!(inject_script(b"<p>x</p>"), format!("<p>x</p>{}", CLIENT_TAG).into_bytes());

        let already = format!("<body>{}</body>", CLIENT_TAG);
        assert_eq!(inject_script(already.as_bytes()), already.into_bytes());
    }

    #[tokio::test]
    async fn test_served_pages_load_client() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("index.html"), "<html><body><h1>Home</h1></body></html>")
            .unwrap();
        std::fs::write(temp.path().join("app.js"), "document.write('</body>');").unwrap();
        let server = DevServer::new(0, temp.path().to_path_buf(), ReloadHub::new());

        let (status, page) = fetch(&server, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            page,
            format!("<html><body><h1>Home</h1>{}</body></html>", CLIENT_TAG)
        );

        let (_, script) = fetch(&server, "/app.js").await;
        assert_eq!(script, "document.write('</body>');");

        let (_, client) = fetch(&server, CLIENT_PATH).await;
        assert!(client.contains(RELOAD_PATH));

        let (status, _) = fetch(&server, "/missing.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_message_stream_yields_events_until_closed() {
        let hub = ReloadHub::new();
        let mut events = Box::pin(message_stream(hub.subscribe()));

        hub.notify(&completed());
        assert!(events.next().await.is_some());

        drop(hub);
        assert!(events.next().await.is_none());
    }
}
