//! Request/response multiplexer over the subprocess transport.
//!
//! One background task owns the write half and drains an outgoing channel;
//! another owns the read half and dispatches each line to the pending call
//! it answers, or to that call's notification callback if it carries no
//! `id`. This is the same split as `mcp-server`'s stdin-reader /
//! processor / stdout-writer trio in `mcp-server/src/lib.rs`, collapsed to
//! two tasks since there is only ever one logical peer (the subprocess)
//! rather than many connected clients.
//!
//! Ported from `matchlock/client.py`'s `_send_request`/`_reader_loop`: a
//! monotonic id counter, a pending-call table guarded by a lock, and a
//! timeout that fires a fire-and-forget `cancel` RPC before giving up.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use matchlock_wire::Frame;
use matchlock_wire::NotificationFrame;
use matchlock_wire::RequestId;
use matchlock_wire::ResponseFrame;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use crate::config::Config;
use crate::error::ClientError;
use crate::error::Result;
use crate::transport;

/// Outcome of a completed call: the `result` value, the RPC error object's
/// `(code, message)`, or the transport having closed before a response
/// arrived.
enum CallOutcome {
    Result(Value),
    Rpc(i64, String),
    Closed(String),
}

/// Invoked for every notification frame whose `params.id` matches the call
/// it streams output for (e.g. `exec_stream.stdout`/`exec_stream.stderr`).
pub type NotificationSink = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Invoked for every `event` notification (spec §4.3), which carries no
/// `id` and is not addressed to any particular in-flight call. Routed to
/// the VFS event dispatcher by `Client::start`.
pub type EventSink = Box<dyn Fn(Value) + Send + Sync>;

struct PendingCall {
    reply: oneshot::Sender<CallOutcome>,
    on_notification: Option<NotificationSink>,
}

/// Multiplexes many concurrent logical calls over one subprocess
/// connection. Cheaply cloneable; all clones share the same writer task,
/// reader task, and pending-call table.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

struct Inner {
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, PendingCall>>,
    outgoing: mpsc::Sender<String>,
    event_handler: Mutex<Option<EventSink>>,
    on_closed: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl Multiplexer {
    /// Spawns the sandbox-manager subprocess and starts the reader/writer
    /// tasks. Returns the multiplexer plus a handle whose `shutdown` method
    /// should be called exactly once, when the owning client closes.
    pub async fn start(config: &Config) -> Result<(Self, MultiplexerShutdown)> {
        let (writer, mut reader, handle) = transport::spawn(config).await?;
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(128);

        let inner = Arc::new(Inner {
            next_id: AtomicI64::new(0),
            pending: Mutex::new(HashMap::new()),
            outgoing: outgoing_tx,
            event_handler: Mutex::new(None),
            on_closed: Mutex::new(None),
        });

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = outgoing_rx.recv().await {
                if let Err(e) = writer.write_line(&line).await {
                    warn!("matchlock transport write failed: {e}");
                    break;
                }
            }
        });

        let reader_inner = inner.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.read_line().await {
                    Ok(Some(line)) => reader_inner.dispatch_line(&line).await,
                    Ok(None) => {
                        reader_inner.fail_all_pending("matchlock process closed unexpectedly").await;
                        break;
                    }
                    Err(e) => {
                        reader_inner.fail_all_pending(&e.to_string()).await;
                        break;
                    }
                }
            }
        });

        let mp = Multiplexer { inner };
        let shutdown = MultiplexerShutdown {
            handle,
            writer_task,
            reader_task,
        };
        Ok((mp, shutdown))
    }

    fn next_id(&self) -> RequestId {
        RequestId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Installs the handler invoked for every `event` notification (file
    /// events, spec §4.3/§6.2). Replaces any previously installed handler.
    pub async fn set_event_handler(&self, handler: EventSink) {
        *self.inner.event_handler.lock().await = Some(handler);
    }

    /// Installs the callback run exactly once, when the reader observes EOF
    /// or a read error (spec §4.2/§5 "process death"): the owning client
    /// uses this to stop the local hook server.
    pub async fn set_on_closed(&self, handler: Box<dyn Fn() + Send + Sync>) {
        *self.inner.on_closed.lock().await = Some(handler);
    }

    /// Sends a request and waits for its response, optionally bounded by
    /// `timeout_ms`. On timeout, fires a fire-and-forget `cancel` for the
    /// original id and returns `ClientError::Timeout`.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_ms: Option<u64>,
        on_notification: Option<NotificationSink>,
    ) -> Result<Value> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(
                id,
                PendingCall {
                    reply: tx,
                    on_notification,
                },
            );
        }

        let frame = Frame::request(id, method, params);
        let line = serde_json::to_string(&frame)?;
        if self.inner.outgoing.send(line).await.is_err() {
            self.inner.pending.lock().await.remove(&id);
            return Err(ClientError::Transport("matchlock process not running".to_string()));
        }

        let outcome = match timeout_ms {
            Some(ms) => {
                match tokio::time::timeout(std::time::Duration::from_millis(ms), rx).await {
                    Ok(received) => received,
                    Err(_) => {
                        self.inner.pending.lock().await.remove(&id);
                        self.send_cancel(id).await;
                        return Err(ClientError::Timeout {
                            method: method.to_string(),
                            request_id: id,
                            timeout_ms: ms,
                        });
                    }
                }
            }
            None => rx.await,
        };

        match outcome {
            Ok(CallOutcome::Result(value)) => Ok(value),
            Ok(CallOutcome::Rpc(code, message)) => Err(ClientError::Rpc { code, message }),
            Ok(CallOutcome::Closed(message)) => Err(ClientError::Transport(message)),
            Err(_) => Err(ClientError::Transport(
                "matchlock process closed unexpectedly".to_string(),
            )),
        }
    }

    /// Fire-and-forget `cancel` RPC referencing `target_id`. Never waits for
    /// a reply; the manager is not expected to send one.
    async fn send_cancel(&self, target_id: RequestId) {
        let cancel_id = self.next_id();
        let frame = Frame::request(
            cancel_id,
            "cancel",
            Some(serde_json::json!({ "id": target_id })),
        );
        if let Ok(line) = serde_json::to_string(&frame) {
            let _ = self.inner.outgoing.send(line).await;
        }
    }
}

impl Inner {
    async fn dispatch_line(&self, line: &str) {
        let frame: Frame = match serde_json::from_str(line) {
            Ok(f) => f,
            Err(e) => {
                debug!("ignoring malformed frame from matchlock process: {e}");
                return;
            }
        };

        match frame {
            Frame::Response(resp) => self.dispatch_response(resp).await,
            Frame::Notification(notif) => self.dispatch_notification(notif).await,
            Frame::Request(_) => {
                debug!("ignoring unexpected request frame from matchlock process");
            }
        }
    }

    async fn dispatch_response(&self, resp: ResponseFrame) {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending.remove(&resp.id)
        };
        let Some(pending) = entry else {
            return;
        };
        let outcome = match resp.error {
            Some(err) => CallOutcome::Rpc(err.code, err.message),
            None => CallOutcome::Result(resp.result.unwrap_or(Value::Null)),
        };
        let _ = pending.reply.send(outcome);
    }

    async fn dispatch_notification(&self, notif: NotificationFrame) {
        let Some(params) = notif.params else {
            return;
        };

        if notif.method == "event" {
            let handler = self.event_handler.lock().await;
            if let Some(handler) = handler.as_ref() {
                handler(params);
            }
            return;
        }

        let Some(req_id) = params.get("id").and_then(|v| v.as_i64()) else {
            return;
        };
        let pending = self.pending.lock().await;
        if let Some(call) = pending.get(&RequestId(req_id)) {
            if let Some(sink) = &call.on_notification {
                sink(&notif.method, &params);
            }
        }
    }

    async fn fail_all_pending(&self, message: &str) {
        let mut pending = self.pending.lock().await;
        for (_, call) in pending.drain() {
            let _ = call.reply.send(CallOutcome::Closed(message.to_string()));
        }
        drop(pending);
        if let Some(handler) = self.on_closed.lock().await.take() {
            handler();
        }
    }
}

/// Owns the transport's child-process handle and the reader/writer task
/// join handles. `shutdown` drops the writer (closing the channel, which
/// drains and then drops stdin) and waits for the child to exit.
pub struct MultiplexerShutdown {
    handle: transport::TransportHandle,
    writer_task: tokio::task::JoinHandle<()>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl MultiplexerShutdown {
    /// Drops the caller's last `Multiplexer` handle (closing the outgoing
    /// channel, which lets the writer task finish and drop stdin), then
    /// waits up to `grace_seconds` for the child to exit before killing it.
    /// `mp` must be the only remaining `Multiplexer` clone.
    pub async fn shutdown(self, mp: Multiplexer, grace_seconds: u64) -> Result<()> {
        drop(mp);
        let _ = self.writer_task.await;
        let result = self.handle.close(grace_seconds).await;
        self.reader_task.abort();
        result
    }
}
