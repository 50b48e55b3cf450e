use super::error::ToolInvokeError;
use super::interface::{ServerHandshake, ToolOutput, ToolSession};
use super::process::handle_notification;
use super::rpc::{self, Inbound, RpcChannel, RpcCorrelator};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection parameters for a server reached over HTTP with server-sent events.
#[derive(Debug, Clone)]
pub struct SseSpec {
    pub server: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// MCP session over the HTTP+SSE transport: responses arrive on a GET event
/// stream, requests are POSTed to the endpoint the stream announces first.
pub struct SseSession {
    inner: Arc<SseInner>,
    listener: AsyncMutex<Option<JoinHandle<()>>>,
}

struct SseInner {
    server: String,
    http: Client,
    headers: HeaderMap,
    endpoint: Url,
    timeout: Duration,
    rpc: Arc<RpcCorrelator>,
}

impl SseSession {
    pub async fn connect(spec: SseSpec) -> Result<Self, ToolInvokeError> {
        let server = spec.server.clone();
        let stream_url = Url::parse(&spec.url).map_err(|err| {
            ToolInvokeError::transport(&server, format!("invalid url '{}': {err}", spec.url))
        })?;
        let headers = header_map(&server, &spec.headers)?;
        let http = Client::new();

        let request = http.get(stream_url.clone()).headers(headers.clone());
        let mut source = EventSource::new(request)
            .map_err(|err| ToolInvokeError::transport(&server, err.to_string()))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let rpc = Arc::new(RpcCorrelator::new(server.clone()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let listener = tokio::spawn(listen(
            source,
            stream_url,
            Arc::clone(&rpc),
            endpoint_tx,
        ));

        let endpoint = match tokio::time::timeout(spec.timeout, endpoint_rx).await {
            Ok(Ok(Ok(endpoint))) => endpoint,
            Ok(Ok(Err(err))) => {
                listener.abort();
                return Err(err);
            }
            Ok(Err(_)) => {
                listener.abort();
                return Err(ToolInvokeError::Terminated { server });
            }
            Err(_) => {
                listener.abort();
                return Err(ToolInvokeError::Timeout {
                    server,
                    method: "endpoint".into(),
                    timeout: spec.timeout,
                });
            }
        };
        info!(server = %server, endpoint = %endpoint, "Connected to MCP server event stream");

        Ok(Self {
            inner: Arc::new(SseInner {
                server,
                http,
                headers,
                endpoint,
                timeout: spec.timeout,
                rpc,
            }),
            listener: AsyncMutex::new(Some(listener)),
        })
    }
}

#[async_trait]
impl ToolSession for SseSession {
    async fn initialize(&self) -> Result<ServerHandshake, ToolInvokeError> {
        rpc::handshake(self.inner.as_ref()).await
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolOutput, ToolInvokeError> {
        rpc::call_tool(self.inner.as_ref(), tool, arguments).await
    }

    async fn close(&self) -> Result<(), ToolInvokeError> {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }
        self.inner.rpc.fail_all().await;
        Ok(())
    }
}

#[async_trait]
impl RpcChannel for SseInner {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolInvokeError> {
        let (id, payload, rx) = self.rpc.prepare(method, params).await;
        if let Err(err) = self.post(&payload).await {
            self.rpc.forget(&id).await;
            return Err(err);
        }
        self.rpc.wait(&id, method, rx, self.timeout).await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolInvokeError> {
        self.post(&rpc::notification(method, params)).await
    }
}

impl SseInner {
    async fn post(&self, payload: &Value) -> Result<(), ToolInvokeError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| ToolInvokeError::transport(&self.server, err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolInvokeError::transport(
                &self.server,
                format!("endpoint rejected message with status {}", status.as_u16()),
            ));
        }
        Ok(())
    }
}

type EndpointSender = oneshot::Sender<Result<Url, ToolInvokeError>>;

async fn listen(
    mut source: EventSource,
    stream_url: Url,
    rpc: Arc<RpcCorrelator>,
    endpoint_tx: EndpointSender,
) {
    let server = rpc.server().to_string();
    let mut endpoint_tx = Some(endpoint_tx);

    while let Some(event) = source.next().await {
        match event {
            Ok(Event::Open) => debug!(server = %server, "event stream opened"),
            Ok(Event::Message(message)) => match message.event.as_str() {
                "endpoint" => {
                    let resolved = stream_url.join(message.data.trim()).map_err(|err| {
                        ToolInvokeError::transport(&server, format!("invalid endpoint: {err}"))
                    });
                    match endpoint_tx.take() {
                        Some(tx) => {
                            let _ = tx.send(resolved);
                        }
                        None => debug!(server = %server, "ignoring repeated endpoint event"),
                    }
                }
                "message" | "" => match serde_json::from_str::<Value>(&message.data) {
                    Ok(value) => route(&rpc, value).await,
                    Err(source) => warn!(
                        server = %server,
                        %source,
                        "received invalid JSON on event stream"
                    ),
                },
                other => debug!(server = %server, event = other, "ignoring event"),
            },
            Err(err) => {
                warn!(server = %server, %err, "event stream closed");
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(Err(ToolInvokeError::transport(&server, err.to_string())));
                }
                break;
            }
        }
    }

    source.close();
    rpc.fail_all().await;
}

async fn route(rpc: &RpcCorrelator, value: Value) {
    match rpc::classify(value) {
        Inbound::Response { id, message } => rpc.handle_response(id, message).await,
        Inbound::Notification { method } => handle_notification(rpc.server(), &method),
        Inbound::Request { method, .. } => {
            // Replies would have to go through the POST endpoint; nothing here needs them.
            debug!(server = %rpc.server(), method, "ignoring server request on event stream");
        }
        Inbound::Ignored => {}
    }
}

fn header_map(
    server: &str,
    headers: &BTreeMap<String, String>,
) -> Result<HeaderMap, ToolInvokeError> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|err| ToolInvokeError::transport(server, format!("header '{key}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| ToolInvokeError::transport(server, format!("header '{key}': {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcResponse;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    type EventSink = Arc<AsyncMutex<Option<mpsc::UnboundedSender<String>>>>;
    type Heads = Arc<AsyncMutex<Vec<String>>>;

    /// Reads one HTTP request and returns its head and body.
    async fn read_request(socket: &mut TcpStream) -> Option<(String, String)> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let read = socket.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            data.extend_from_slice(&chunk[..read]);
        };
        let head = String::from_utf8_lossy(&data[..head_end]).to_string();
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.trim().eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        while data.len() < head_end + length {
            let read = socket.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            data.extend_from_slice(&chunk[..read]);
        }
        let body = String::from_utf8_lossy(&data[head_end..head_end + length]).to_string();
        Some((head, body))
    }

    fn reply_for(request: &Value) -> Option<Value> {
        let id = request.get("id")?.clone();
        let result = match request.get("method").and_then(Value::as_str) {
            Some("initialize") => json!({
                "protocolVersion": crate::rpc::types::PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "echo", "version": "1.0.0" },
                "instructions": "Echo server."
            }),
            Some("tools/list") => json!({
                "tools": [{
                    "name": "echo",
                    "description": "Echo back",
                    "inputSchema": { "type": "object", "properties": {} }
                }]
            }),
            Some("tools/call") => json!({
                "content": [{ "type": "text", "text": "pong" }],
                "isError": false
            }),
            _ => return Some(RpcResponse::method_not_found(Some(id), "unknown").to_value()),
        };
        Some(RpcResponse::success(Some(id), result).to_value())
    }

    async fn handle_connection(mut socket: TcpStream, sink: EventSink, heads: Heads) {
        while let Some((head, body)) = read_request(&mut socket).await {
            if head.starts_with("GET") {
                let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                *sink.lock().await = Some(tx);
                let opening = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\nevent: endpoint\ndata: /messages?session_id=abc\n\n";
                if socket.write_all(opening.as_bytes()).await.is_err() {
                    return;
                }
                while let Some(data) = rx.recv().await {
                    let frame = format!("event: message\ndata: {data}\n\n");
                    if socket.write_all(frame.as_bytes()).await.is_err() {
                        return;
                    }
                }
                return;
            }

            heads.lock().await.push(head);
            let accepted = "HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\n\r\n";
            if socket.write_all(accepted.as_bytes()).await.is_err() {
                return;
            }
            let Ok(request) = serde_json::from_str::<Value>(&body) else {
                continue;
            };
            if let Some(reply) = reply_for(&request) {
                if let Some(tx) = sink.lock().await.as_ref() {
                    let _ = tx.send(reply.to_string());
                }
            }
        }
    }

    /// Event-stream MCP server answering on a local port.
    async fn spawn_event_stream_server() -> (String, Heads) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let sink: EventSink = Arc::default();
        let heads: Heads = Arc::default();
        let seen = Arc::clone(&heads);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(handle_connection(socket, Arc::clone(&sink), Arc::clone(&seen)));
            }
        });
        (format!("http://{addr}/sse"), heads)
    }

    #[tokio::test]
    async fn handshake_and_call_travel_over_the_event_stream() {
        let (url, heads) = spawn_event_stream_server().await;
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer t".to_string());
        let session = SseSession::connect(SseSpec {
            server: "remote".into(),
            url,
            headers,
            timeout: Duration::from_secs(5),
        })
        .await
        .expect("connect");
        assert!(session.inner.endpoint.as_str().ends_with("/messages?session_id=abc"));

        let handshake = session.initialize().await.expect("handshake");
        let names: Vec<_> = handshake.tools.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names, vec!["echo"]);
        assert_eq!(handshake.instructions.as_deref(), Some("Echo server."));

        let output = session
            .call_tool("echo", json!({ "message": "ping" }))
            .await
            .expect("call");
        assert!(!output.is_error);
        assert_eq!(output.as_text(), "pong");

        let posted = heads.lock().await.clone();
        assert_eq!(posted.len(), 4);
        assert!(posted.iter().all(|head| head.starts_with("POST /messages?session_id=abc")));
        assert!(
            posted
                .iter()
                .all(|head| head.to_ascii_lowercase().contains("authorization: bearer t"))
        );

        session.close().await.expect("close");
    }

    #[test]
    fn builds_header_map() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        let map = header_map("remote", &headers).expect("headers");
        assert_eq!(map.get("authorization").map(|v| v.as_bytes()), Some(&b"Bearer abc"[..]));
    }

    #[test]
    fn rejects_invalid_header_names() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            header_map("remote", &headers),
            Err(ToolInvokeError::Transport { .. })
        ));
    }

    #[test]
    fn endpoint_paths_resolve_against_stream_url() {
        let base = Url::parse("http://localhost:8000/sse").expect("url");
        let joined = base.join("/messages/?session_id=abc").expect("join");
        assert_eq!(joined.as_str(), "http://localhost:8000/messages/?session_id=abc");
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_connect() {
        let result = SseSession::connect(SseSpec {
            server: "remote".into(),
            url: "http://127.0.0.1:9/sse".into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(5),
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalid_url_is_a_transport_error() {
        let result = SseSession::connect(SseSpec {
            server: "remote".into(),
            url: "not a url".into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(1),
        })
        .await;
        assert!(matches!(result, Err(ToolInvokeError::Transport { .. })));
    }
}
