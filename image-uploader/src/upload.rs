use futures_util::StreamExt;
use mime::Mime;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Size of each body chunk handed to the transport; one progress event per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Everything needed for one upload request. Immutable once built.
#[derive(Debug, Clone)]
pub struct UploadDescriptor {
    endpoint: String,
    field_name: String,
    payload: Vec<u8>,
    file_name: String,
    mime: Mime,
}

impl UploadDescriptor {
    pub fn new(
        endpoint: impl Into<String>,
        field_name: impl Into<String>,
        payload: Vec<u8>,
        file_name: impl Into<String>,
        mime: Mime,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            field_name: field_name.into(),
            payload,
            file_name: file_name.into(),
            mime,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime(&self) -> &Mime {
        &self.mime
    }
}

/// Successful response body: JSON when it parses, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(JsonValue),
    Text(String),
}

impl ResponseBody {
    pub fn parse(text: String) -> Self {
        match serde_json::from_str::<JsonValue>(&text) {
            Ok(v) => ResponseBody::Json(v),
            Err(_) => ResponseBody::Text(text),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            ResponseBody::Json(v) => v.clone(),
            ResponseBody::Text(t) => JsonValue::String(t.clone()),
        }
    }
}

/// A failed upload. `status` is `None` when no HTTP response was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UploadError {
    pub status: Option<u16>,
    pub method: &'static str,
    pub url: String,
    pub message: String,
}

impl UploadError {
    fn transport(url: &str, message: impl Into<String>) -> Self {
        Self {
            status: None,
            method: "post",
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// Build from a non-2xx response. Message preference: JSON `error` field,
    /// then raw body text, then a synthesized line naming the endpoint and status.
    pub fn from_response(url: &str, status: u16, body: &str) -> Self {
        let message = json_error_field(body)
            .or_else(|| (!body.is_empty()).then(|| body.to_string()))
            .unwrap_or_else(|| format!("fail to post {url} {status}"));
        Self {
            status: Some(status),
            method: "post",
            url: url.to_string(),
            message,
        }
    }
}

fn json_error_field(body: &str) -> Option<String> {
    let parsed: JsonValue = serde_json::from_str(body).ok()?;
    match parsed.get("error")? {
        JsonValue::Null => None,
        JsonValue::String(s) if s.is_empty() => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Fraction of the body handed to the transport, in [0,1].
    Progress(f64),
    Success(ResponseBody),
    Failure(UploadError),
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferEvent::Progress(_))
    }
}

/// Built-in HTTP uploader. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct UploadClient {
    http: reqwest::Client,
    chunk_size: usize,
}

impl Default for UploadClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadClient {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Start the request on the current tokio runtime and return its event stream.
    pub fn send(&self, descriptor: UploadDescriptor) -> UploadHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = descriptor.endpoint.clone();
        let http = self.http.clone();
        let chunk_size = self.chunk_size;
        let task = tokio::spawn(async move {
            let event = match transfer(&http, &descriptor, chunk_size, &tx).await {
                Ok(body) => {
                    tracing::debug!(url = %descriptor.endpoint, "upload succeeded");
                    TransferEvent::Success(body)
                }
                Err(e) => {
                    tracing::warn!(url = %e.url, status = ?e.status, error = %e.message, "upload failed");
                    TransferEvent::Failure(e)
                }
            };
            // Receiver may be gone after an abort.
            let _ = tx.send(event);
        });
        UploadHandle {
            url,
            events: rx,
            task,
            finished: false,
        }
    }
}

async fn transfer(
    http: &reqwest::Client,
    d: &UploadDescriptor,
    chunk_size: usize,
    tx: &mpsc::UnboundedSender<TransferEvent>,
) -> Result<ResponseBody, UploadError> {
    let total = d.payload.len() as u64;
    tracing::debug!(url = %d.endpoint, field = %d.field_name, file = %d.file_name, bytes = total, "starting upload");

    let chunks: Vec<Vec<u8>> = d.payload.chunks(chunk_size).map(<[u8]>::to_vec).collect();
    let progress = tx.clone();
    let mut loaded = 0u64;
    let body = futures_util::stream::iter(chunks).map(move |chunk| {
        loaded += chunk.len() as u64;
        if total > 0 {
            let _ = progress.send(TransferEvent::Progress(loaded as f64 / total as f64));
        }
        Ok::<_, std::io::Error>(chunk)
    });

    let part =
        reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
            .file_name(d.file_name.clone())
            .mime_str(d.mime.as_ref())
            .map_err(|e| {
                UploadError::transport(&d.endpoint, format!("invalid mime '{}': {e}", d.mime))
            })?;
    let form = reqwest::multipart::Form::new().part(d.field_name.clone(), part);

    let resp = http
        .post(&d.endpoint)
        .multipart(form)
        .send()
        .await
        .map_err(|e| UploadError::transport(&d.endpoint, e.to_string()))?;
    let status = resp.status();
    let text = resp.text().await.map_err(|e| UploadError {
        status: Some(status.as_u16()),
        ..UploadError::transport(&d.endpoint, e.to_string())
    })?;
    if !status.is_success() {
        return Err(UploadError::from_response(&d.endpoint, status.as_u16(), &text));
    }
    Ok(ResponseBody::parse(text))
}

/// Event stream of one in-flight upload. Dropping the handle aborts the request.
pub struct UploadHandle {
    url: String,
    events: mpsc::UnboundedReceiver<TransferEvent>,
    task: JoinHandle<()>,
    finished: bool,
}

impl UploadHandle {
    /// Next event in order; `None` once the terminal event was delivered or after `abort`.
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        if self.finished {
            return None;
        }
        match self.events.recv().await {
            Some(ev) => {
                if ev.is_terminal() {
                    self.finished = true;
                }
                Some(ev)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Cancel the transport. No events are yielded afterwards.
    pub fn abort(&mut self) {
        self.task.abort();
        self.events.close();
        self.finished = true;
    }

    /// Drain the stream, forwarding progress, and return the terminal outcome.
    pub async fn finish(
        mut self,
        mut on_progress: impl FnMut(f64),
    ) -> Result<ResponseBody, UploadError> {
        while let Some(ev) = self.next_event().await {
            match ev {
                TransferEvent::Progress(p) => on_progress(p),
                TransferEvent::Success(body) => return Ok(body),
                TransferEvent::Failure(e) => return Err(e),
            }
        }
        Err(UploadError::transport(&self.url, "upload ended without a response"))
    }
}

impl Drop for UploadHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Multipart;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::json;
    use std::time::Duration;

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn echo(mut multipart: Multipart) -> axum::Json<JsonValue> {
        let mut fields = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().map(str::to_string);
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let size = field.bytes().await.unwrap().len();
            fields.push(json!({
                "name": name,
                "file_name": file_name,
                "content_type": content_type,
                "size": size,
            }));
        }
        axum::Json(json!({ "fields": fields }))
    }

    fn descriptor(endpoint: &str, payload: Vec<u8>) -> UploadDescriptor {
        UploadDescriptor::new(endpoint, "avatar", payload, "me.png", mime::IMAGE_PNG)
    }

    #[tokio::test]
    async fn uploads_single_field_with_progress() {
        let base = spawn_server(Router::new().route("/up", post(echo))).await;
        let payload = vec![7u8; 100 * 1024];
        let mut handle = UploadClient::new().send(descriptor(&format!("{base}/up"), payload));

        let mut progress = Vec::new();
        let mut terminal = None;
        while let Some(ev) = handle.next_event().await {
            match ev {
                TransferEvent::Progress(p) => progress.push(p),
                other => terminal = Some(other),
            }
        }
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last().copied(), Some(1.0));

        let body = match terminal {
            Some(TransferEvent::Success(ResponseBody::Json(body))) => body,
            other => panic!("expected json success, got {other:?}"),
        };
        let fields = body["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0]["name"], "avatar");
        assert_eq!(fields[0]["file_name"], "me.png");
        assert_eq!(fields[0]["content_type"], "image/png");
        assert_eq!(fields[0]["size"], 100 * 1024);
    }

    #[tokio::test]
    async fn plain_text_success_body() {
        let app = Router::new().route("/up", post(|| async { "stored" }));
        let base = spawn_server(app).await;
        let body = UploadClient::new()
            .send(descriptor(&format!("{base}/up"), vec![1, 2, 3]))
            .finish(|_| {})
            .await
            .unwrap();
        assert_eq!(body, ResponseBody::Text("stored".into()));
    }

    #[tokio::test]
    async fn json_error_field_is_the_message() {
        let app = Router::new().route(
            "/up",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({ "error": "too large" })),
                )
            }),
        );
        let base = spawn_server(app).await;
        let url = format!("{base}/up");
        let err = UploadClient::new()
            .send(descriptor(&url, vec![0; 10]))
            .finish(|_| {})
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(500));
        assert_eq!(err.message, "too large");
        assert_eq!(err.method, "post");
        assert_eq!(err.url, url);
    }

    #[tokio::test]
    async fn empty_error_body_synthesizes_message() {
        let base = spawn_server(Router::new()).await;
        let url = format!("{base}/missing");
        let err = UploadClient::new()
            .send(descriptor(&url, vec![0; 10]))
            .finish(|_| {})
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(404));
        assert_eq!(err.message, format!("fail to post {url} 404"));
    }

    #[test]
    fn message_preference_order() {
        let e = UploadError::from_response("u", 400, "bad things");
        assert_eq!(e.message, "bad things");
        let e = UploadError::from_response("u", 400, r#"{"error":{"code":3}}"#);
        assert_eq!(e.message, r#"{"code":3}"#);
        let e = UploadError::from_response("u", 400, r#"{"detail":"x"}"#);
        assert_eq!(e.message, r#"{"detail":"x"}"#);
        let e = UploadError::from_response("u", 400, "");
        assert_eq!(e.message, "fail to post u 400");
    }

    #[tokio::test]
    async fn connection_refused_is_a_transport_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = UploadClient::new()
            .send(descriptor(&format!("http://{addr}/up"), vec![0; 10]))
            .finish(|_| {})
            .await
            .unwrap_err();
        assert_eq!(err.status, None);
        assert!(!err.message.is_empty());
    }

    #[tokio::test]
    async fn abort_stops_all_events() {
        let app = Router::new().route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let base = spawn_server(app).await;
        let mut handle =
            UploadClient::new().send(descriptor(&format!("{base}/slow"), vec![0; 64 * 1024]));
        let first = handle.next_event().await;
        assert!(matches!(first, Some(TransferEvent::Progress(_))), "got {first:?}");

        handle.abort();
        assert_eq!(handle.next_event().await, None);
        // The server would hold the request for 30s; the transport task must be gone well before.
        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.task.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("transport task still running after abort");
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn empty_payload_reports_no_progress() {
        let app = Router::new().route("/up", post(|| async { "ok" }));
        let base = spawn_server(app).await;
        let mut handle = UploadClient::new().send(descriptor(&format!("{base}/up"), Vec::new()));
        let mut events = Vec::new();
        while let Some(ev) = handle.next_event().await {
            events.push(ev);
        }
        assert_eq!(events, vec![TransferEvent::Success(ResponseBody::Text("ok".into()))]);
    }

    #[test]
    fn response_body_parsing() {
        assert_eq!(
            ResponseBody::parse(r#"{"ok":true}"#.into()),
            ResponseBody::Json(json!({"ok": true}))
        );
        assert_eq!(ResponseBody::parse("".into()), ResponseBody::Text(String::new()));
    }
}
