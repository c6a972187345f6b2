//! Analysis server running as a child process, spoken to with JSON-RPC 2.0
//! over stdio using `Content-Length` framing.
//!
//! A writer task drains the outgoing queue into the child's stdin. A reader
//! task correlates responses with pending requests by id. When stdout closes
//! or a kill is forced, every pending request fails with
//! [`ServerError::Terminated`], the child is reaped and the termination
//! notifier fires.

use crate::errors::{Result, ServerError};
use crate::protocol::{AnalysisReport, AnalyzeRequest, RulesRequest};
use crate::server::{AnalysisServer, PendingResponse, ServerFactory, TerminationNotifier};
use analysis_state::{Rule, ServerLaunchSettings};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const METHOD_ANALYZE: &str = "analyze";
const METHOD_RETRIEVE_RULES: &str = "retrieveRules";
const METHOD_SHUTDOWN: &str = "shutdown";
const NOTIFICATION_EXIT: &str = "exit";
/// Largest message body accepted from the server.
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

type PendingMap = Arc<DashMap<i64, oneshot::Sender<Result<Value>>>>;

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone)]
pub struct ProcessServerFactory {
    command: String,
    args: Vec<String>,
    kill_grace: Duration,
}

impl ProcessServerFactory {
    pub fn new(command: impl Into<String>, args: Vec<String>, kill_grace: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            kill_grace,
        }
    }

    pub fn from_settings(settings: &ServerLaunchSettings) -> Self {
        Self::new(
            settings.command.clone(),
            settings.args.clone(),
            Duration::from_millis(settings.kill_grace_ms),
        )
    }
}

#[async_trait]
impl ServerFactory for ProcessServerFactory {
    async fn launch(&self, notifier: TerminationNotifier) -> Result<Arc<dyn AnalysisServer>> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServerError::Launch {
                command: self.command.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServerError::Transport("analysis server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServerError::Transport("analysis server stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            let generation = notifier.generation();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(generation, "analysis server: {}", line);
                }
            });
        }

        info!(
            generation = notifier.generation(),
            command = %self.command,
            pid = ?child.id(),
            "Analysis server process started"
        );

        let (outgoing, outgoing_receiver) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let kill = CancellationToken::new();

        tokio::spawn(write_loop(stdin, outgoing_receiver));
        tokio::spawn(
            ReaderTask {
                child,
                pending: Arc::clone(&pending),
                alive: Arc::clone(&alive),
                kill: kill.clone(),
                kill_grace: self.kill_grace,
                notifier: notifier.clone(),
            }
            .run(stdout),
        );

        Ok(Arc::new(ProcessServer {
            generation: notifier.generation(),
            outgoing,
            next_id: AtomicI64::new(1),
            pending,
            alive,
            kill,
            kill_grace: self.kill_grace,
        }))
    }
}

pub struct ProcessServer {
    generation: u64,
    outgoing: mpsc::UnboundedSender<String>,
    next_id: AtomicI64,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    kill: CancellationToken,
    kill_grace: Duration,
}

impl ProcessServer {
    fn request<T>(&self, method: &'static str, params: Value) -> PendingResponse<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(id, sender);

        // The reader marks the server dead before draining `pending`, so a
        // request registered above is either drained or rejected here.
        if !self.alive.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return futures::future::ready(Err(ServerError::Terminated)).boxed();
        }

        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if self.outgoing.send(message.to_string()).is_err() {
            self.pending.remove(&id);
            return futures::future::ready(Err(ServerError::Terminated)).boxed();
        }
        debug!(generation = self.generation, id, method, "Request sent to analysis server");

        async move {
            let value = receiver.await.map_err(|_| ServerError::Terminated)??;
            serde_json::from_value(value).map_err(|source| ServerError::Protocol {
                method: method.to_string(),
                source,
            })
        }
        .boxed()
    }

    fn notify(&self, method: &'static str) {
        let message = json!({ "jsonrpc": "2.0", "method": method });
        let _ = self.outgoing.send(message.to_string());
    }
}

impl AnalysisServer for ProcessServer {
    fn analyze(&self, request: AnalyzeRequest) -> PendingResponse<AnalysisReport> {
        match serde_json::to_value(&request) {
            Ok(params) => self.request(METHOD_ANALYZE, params),
            Err(source) => futures::future::ready(Err(ServerError::Protocol {
                method: METHOD_ANALYZE.to_string(),
                source,
            }))
            .boxed(),
        }
    }

    fn retrieve_rules(&self, request: RulesRequest) -> PendingResponse<Vec<Rule>> {
        match serde_json::to_value(&request) {
            Ok(params) => self.request(METHOD_RETRIEVE_RULES, params),
            Err(source) => futures::future::ready(Err(ServerError::Protocol {
                method: METHOD_RETRIEVE_RULES.to_string(),
                source,
            }))
            .boxed(),
        }
    }

    fn terminate(&self) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        info!(generation = self.generation, "Requesting analysis server shutdown");

        // The shutdown answer is not awaited; the exit is observed by the reader.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shutdown = json!({ "jsonrpc": "2.0", "id": id, "method": METHOD_SHUTDOWN });
        let _ = self.outgoing.send(shutdown.to_string());
        self.notify(NOTIFICATION_EXIT);

        let kill = self.kill.clone();
        let grace = self.kill_grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    kill.cancel();
                });
            }
            Err(_) => kill.cancel(),
        }
    }
}

struct ReaderTask {
    child: Child,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    kill: CancellationToken,
    kill_grace: Duration,
    notifier: TerminationNotifier,
}

impl ReaderTask {
    async fn run(mut self, stdout: ChildStdout) {
        let generation = self.notifier.generation();
        let mut reader = BufReader::new(stdout);
        let mut killed = false;

        loop {
            tokio::select! {
                _ = self.kill.cancelled() => {
                    warn!(generation, "Killing analysis server after grace period");
                    if let Err(e) = self.child.start_kill() {
                        warn!(generation, "Failed to kill analysis server: {}", e);
                    }
                    killed = true;
                    break;
                }
                frame = read_frame(&mut reader) => match frame {
                    Ok(Some(body)) => dispatch_response(&body, &self.pending),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(generation, "Failed to read from analysis server: {}", e);
                        break;
                    }
                },
            }
        }

        self.alive.store(false, Ordering::SeqCst);
        fail_pending(&self.pending);

        let status = if killed {
            self.child.wait().await
        } else {
            match tokio::time::timeout(self.kill_grace, self.child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(generation, "Analysis server closed stdout but kept running, killing");
                    let _ = self.child.start_kill();
                    self.child.wait().await
                }
            }
        };
        match status {
            Ok(status) => info!(generation, %status, "Analysis server process exited"),
            Err(e) => warn!(generation, "Failed to reap analysis server: {}", e),
        }

        self.notifier.notify();
    }
}

async fn write_loop(stdin: ChildStdin, mut outgoing: mpsc::UnboundedReceiver<String>) {
    let mut writer = BufWriter::new(stdin);
    while let Some(body) = outgoing.recv().await {
        if let Err(e) = write_frame(&mut writer, &body).await {
            debug!("Analysis server stdin closed: {}", e);
            break;
        }
    }
}

fn dispatch_response(body: &str, pending: &PendingMap) {
    let response: JsonRpcResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            warn!("Discarding malformed message from analysis server: {}", e);
            return;
        }
    };

    if let Some(method) = response.method {
        debug!(method = %method, "Ignoring message initiated by analysis server");
        return;
    }
    let Some(id) = response.id else {
        debug!("Ignoring response without id");
        return;
    };
    let Some((_, sender)) = pending.remove(&id) else {
        debug!(id, "Ignoring response to unknown request");
        return;
    };

    let result = match response.error {
        Some(error) => Err(ServerError::Remote {
            code: error.code,
            message: error.message,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    let _ = sender.send(result);
}

fn fail_pending(pending: &PendingMap) {
    let ids: Vec<i64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, sender)) = pending.remove(&id) {
            let _ = sender.send(Err(ServerError::Terminated));
        }
    }
}

/// Encodes a message body with its `Content-Length` header.
pub fn encode_message(body: &str) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut output = Vec::with_capacity(header.len() + body.len());
    output.extend_from_slice(header.as_bytes());
    output.extend_from_slice(body.as_bytes());
    output
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &str) -> std::io::Result<()> {
    writer.write_all(&encode_message(body)).await?;
    writer.flush().await
}

/// Reads one framed message. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    loop {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let header = line.trim();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok();
                }
            }
        }

        // Headers without a length carry no body we could delimit.
        let Some(length) = content_length else {
            continue;
        };

        if length > MAX_MESSAGE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("message of {length} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit"),
            ));
        }

        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        return String::from_utf8(body)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_encode_message_header() {
        let encoded = encode_message(r#"{"id":1}"#);
        assert_eq!(encoded, b"Content-Length: 8\r\n\r\n{\"id\":1}".to_vec());
    }

    #[tokio::test]
    async fn test_read_frame_sequence() {
        let mut bytes = encode_message(r#"{"id":1}"#);
        bytes.extend_from_slice(b"Content-Type: application/json\r\ncontent-length: 9\r\n\r\n{\"id\":22}");
        let mut reader = BufReader::new(bytes.as_slice());

        assert_eq!(read_frame(&mut reader).await.unwrap().as_deref(), Some(r#"{"id":1}"#));
        assert_eq!(read_frame(&mut reader).await.unwrap().as_deref(), Some(r#"{"id":22}"#));
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body_is_an_error() {
        let bytes = b"Content-Length: 50\r\n\r\n{\"id\":1}".to_vec();
        let mut reader = BufReader::new(bytes.as_slice());
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length() {
        let bytes = b"Content-Length: 1073741824\r\n\r\n{}".to_vec();
        let mut reader = BufReader::new(bytes.as_slice());

        let error = read_frame(&mut reader).await.unwrap_err();

        assert_eq!(error.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_dispatch_routes_results_and_errors() {
        let pending: PendingMap = Arc::new(DashMap::new());
        let (ok_sender, ok_receiver) = oneshot::channel();
        let (err_sender, err_receiver) = oneshot::channel();
        pending.insert(1, ok_sender);
        pending.insert(2, err_sender);

        dispatch_response(r#"{"jsonrpc":"2.0","method":"log","params":{}}"#, &pending);
        dispatch_response(r#"{"jsonrpc":"2.0","id":99,"result":null}"#, &pending);
        dispatch_response(r#"{"jsonrpc":"2.0","id":1,"result":{"issues":[]}}"#, &pending);
        dispatch_response(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32000,"message":"license expired"}}"#,
            &pending,
        );

        assert_eq!(ok_receiver.await.unwrap().unwrap(), json!({ "issues": [] }));
        match err_receiver.await.unwrap() {
            Err(ServerError::Remote { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "license expired");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_launch_of_missing_command_fails() {
        let factory = ProcessServerFactory::new(
            "ide-lint-server-that-does-not-exist",
            Vec::new(),
            Duration::from_millis(10),
        );
        let (sender, _receiver) = mpsc::unbounded_channel();

        let result = factory.launch(TerminationNotifier::new(1, sender)).await;

        assert!(matches!(result, Err(ServerError::Launch { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_unresponsive_server() {
        // `cat` echoes requests back; those are ignored and never answered.
        let factory = ProcessServerFactory::new("cat", Vec::new(), Duration::from_millis(50));
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let server = factory.launch(TerminationNotifier::new(7, sender)).await.unwrap();

        let pending = server.retrieve_rules(RulesRequest::default());
        server.terminate();

        let exited = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap();
        assert_eq!(exited, Some(7));
        assert!(matches!(pending.await, Err(ServerError::Terminated)));

        let late = server.analyze(AnalyzeRequest {
            base_dir: PathBuf::from("/work"),
            files: vec![PathBuf::from("/work/a.pas")],
            connection: Default::default(),
        });
        assert!(matches!(late.await, Err(ServerError::Terminated)));
    }
}
