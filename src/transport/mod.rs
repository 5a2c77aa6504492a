pub mod line_buffer;

use crate::errors::{AppError, AppResult};
use base64::Engine;
use line_buffer::LineBuffer;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

const MAX_LINE_BYTES: usize = 100 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Operations the processing core needs from the messaging side.
pub trait Transport: Send + Sync {
    fn fetch_attachment(&self, id: &str) -> impl Future<Output = AppResult<Vec<u8>>> + Send;
    fn send_group_message(&self, group_id: &str, message: &str) -> impl Future<Output = AppResult<()>> + Send;
    fn send_to_recipient(&self, recipient: &str, message: &str) -> impl Future<Output = AppResult<()>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// JSON-RPC client for a signal-cli daemon listening on TCP.
pub struct SignalRpcClient {
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl SignalRpcClient {
    /// Connects and starts the reader task. `receive` notification params
    /// are delivered on the returned channel, which closes when the
    /// connection ends. The channel is unbounded so the reader never stalls
    /// behind the consumer while the consumer awaits a response.
    pub async fn connect(host: &str, port: u16) -> AppResult<(Self, mpsc::UnboundedReceiver<Value>)> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|error| AppError::Transport(format!("Failed to connect to {}:{}: {}", host, port, error)))?;
        tracing::info!(host = %host, port, "connected to signal-cli");

        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (sender, receiver) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(read_half, pending.clone(), sender));

        Ok((
            Self {
                writer: Mutex::new(write_half),
                pending,
                next_id: AtomicU64::new(1),
                reader,
            },
            receiver,
        ))
    }

    async fn write_request(&self, id: u64, method: &str, params: Option<Value>) -> AppResult<()> {
        let mut request = json!({ "jsonrpc": "2.0", "method": method, "id": id });
        if let Some(params) = params {
            request["params"] = params;
        }
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|error| AppError::Transport(format!("Failed to send {}: {}", method, error)))?;
        writer
            .flush()
            .await
            .map_err(|error| AppError::Transport(format!("Failed to send {}: {}", method, error)))
    }

    /// Sends a request and waits for its response; returns `result`.
    pub async fn call(&self, method: &str, params: Option<Value>) -> AppResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(id, sender);

        if let Err(error) = self.write_request(id, method, params).await {
            self.pending.lock().await.remove(&id);
            return Err(error);
        }

        let response = receiver
            .await
            .map_err(|_| AppError::Transport(format!("Connection closed before {} response", method)))?;
        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(AppError::Transport(format!("{} failed: {}", method, message)));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Sends a request without waiting for the response.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> AppResult<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write_request(id, method, params).await
    }

    pub async fn list_groups(&self) -> AppResult<Vec<GroupSummary>> {
        let result = self.call("listGroups", None).await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(result)?)
    }

    pub async fn update_profile(&self, name: &str) -> AppResult<()> {
        self.notify("updateProfile", Some(json!({ "name": name }))).await
    }
}

impl Drop for SignalRpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl Transport for SignalRpcClient {
    async fn fetch_attachment(&self, id: &str) -> AppResult<Vec<u8>> {
        let result = self.call("getAttachment", Some(json!({ "id": id }))).await?;
        let encoded = result
            .get("data")
            .and_then(Value::as_str)
            .or_else(|| result.as_str())
            .ok_or_else(|| AppError::Transport(format!("getAttachment returned no data for {}", id)))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|error| AppError::Transport(format!("Attachment {} is not valid base64: {}", id, error)))
    }

    async fn send_group_message(&self, group_id: &str, message: &str) -> AppResult<()> {
        self.call("send", Some(json!({ "groupId": group_id, "message": message })))
            .await
            .map(|_| ())
    }

    async fn send_to_recipient(&self, recipient: &str, message: &str) -> AppResult<()> {
        self.call("send", Some(json!({ "recipient": [recipient], "message": message })))
            .await
            .map(|_| ())
    }
}

async fn read_loop(mut stream: OwnedReadHalf, pending: PendingMap, receive: mpsc::UnboundedSender<Value>) {
    let mut buffer = LineBuffer::new(Some(MAX_LINE_BYTES));
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    loop {
        let read = match stream.read(&mut chunk).await {
            Ok(0) => {
                tracing::warn!("signal-cli closed the connection");
                break;
            }
            Ok(read) => read,
            Err(error) => {
                tracing::error!(error = %error, "failed to read from signal-cli");
                break;
            }
        };

        let lines = buffer.push(&chunk[..read]);
        let overflowed = buffer.consume_overflowed_bytes();
        if overflowed > 0 {
            tracing::warn!(bytes = overflowed, "dropped oversized line from signal-cli");
        }
        for line in lines {
            if !route_line(&line, &pending, &receive).await {
                tracing::info!("receive channel closed; stopping reader");
                pending.lock().await.clear();
                return;
            }
        }
    }

    if let Some(rest) = buffer.flush() {
        route_line(&rest, &pending, &receive).await;
    }
    pending.lock().await.clear();
}

/// Returns false once the receive channel has no consumer.
async fn route_line(line: &str, pending: &PendingMap, receive: &mpsc::UnboundedSender<Value>) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }
    let message: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(error = %error, "ignoring non-JSON line from signal-cli");
            return true;
        }
    };

    if message.get("method").and_then(Value::as_str) == Some("receive") {
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        return receive.send(params).is_ok();
    }

    match message.get("id").and_then(Value::as_u64) {
        Some(id) => {
            let waiter = pending.lock().await.remove(&id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(message);
                }
                None => tracing::debug!(id, "response without a waiting caller"),
            }
        }
        None => tracing::debug!(method = ?message.get("method"), "unhandled message from signal-cli"),
    }
    true
}
