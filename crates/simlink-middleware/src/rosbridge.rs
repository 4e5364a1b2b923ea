//! rosbridge WebSocket client.
//!
//! [`RosbridgeClient`] keeps one persistent connection to a rosbridge server.
//! All network I/O happens on a dedicated receive thread that drives a
//! single-threaded tokio runtime; the public API is synchronous and safe to
//! call from the simulation tick.  Outbound frames are handed to the receive
//! thread over an unbounded channel, so [`publish`][RosbridgeClient::publish]
//! never blocks on the socket.
//!
//! Inbound `publish` frames are routed by topic to the handler registered via
//! [`subscribe`][RosbridgeClient::subscribe].  Handlers run on the receive
//! thread and must not block.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::protocol::BusMessage;

/// Callback invoked with the `msg` body of every inbound publish on a topic.
pub type MessageHandler = Arc<dyn Fn(&Value) + Send + Sync>;

type ServiceHandler = Box<dyn FnOnce(ServiceReply) + Send>;

const CONNECTION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Response to a [`call_service`][RosbridgeClient::call_service] request.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceReply {
    pub service: String,
    pub values: Value,
    /// `false` when the server reports the call failed.
    pub result: bool,
}

enum Outbound {
    Text(String),
    Close,
}

// ---------------------------------------------------------------------------
// Shared state between the caller and the receive thread
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    handlers: Mutex<HashMap<String, MessageHandler>>,
    advertised: Mutex<HashSet<String>>,
    pending_calls: Mutex<HashMap<String, ServiceHandler>>,
    next_id: AtomicU64,
    sent: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn generate_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}_{n}")
    }

    /// Route one inbound text frame.
    fn dispatch(&self, text: &str) {
        let message: BusMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed rosbridge frame");
                return;
            }
        };

        match message {
            BusMessage::Publish { topic, msg, .. } => {
                // Clone out of the lock so a handler may (un)subscribe.
                let handler = lock(&self.handlers).get(&topic).cloned();
                match handler {
                    Some(handler) => handler(&msg),
                    None => trace!(%topic, "no handler for inbound publish"),
                }
            }
            BusMessage::ServiceResponse {
                id,
                service,
                values,
                result,
            } => {
                let handler = id.as_ref().and_then(|id| lock(&self.pending_calls).remove(id));
                match handler {
                    Some(handler) => handler(ServiceReply {
                        service,
                        values,
                        result,
                    }),
                    None => debug!(?id, %service, "unsolicited service response"),
                }
            }
            other if is_acknowledgement(&other) => {
                debug!(op = other.op(), id = ?other.id(), "rosbridge acknowledgement")
            }
            other => trace!(op = other.op(), "ignoring rosbridge frame"),
        }
    }

    /// Forget everything tied to the previous connection.
    fn reset_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.handlers).clear();
        lock(&self.advertised).clear();
        lock(&self.pending_calls).clear();
    }
}

fn is_acknowledgement(message: &BusMessage) -> bool {
    matches!(message, BusMessage::Advertise { .. }) || message.id().is_some()
}

// ---------------------------------------------------------------------------
// RosbridgeClient
// ---------------------------------------------------------------------------

/// Synchronous handle over a rosbridge connection.
pub struct RosbridgeClient {
    shared: Arc<Shared>,
    outbound: Mutex<Option<UnboundedSender<Outbound>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for RosbridgeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RosbridgeClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            outbound: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Start connecting to `uri` on the receive thread.
    ///
    /// Returns `false` if the URI cannot be parsed, a connection is already
    /// running, or the thread could not be spawned.  Connection failures are
    /// reported asynchronously: [`is_connected`][Self::is_connected] simply
    /// never becomes true.
    ///
    /// A new connection starts with no advertised topics, handlers or pending
    /// service calls; callers re-advertise and re-subscribe.
    pub fn connect(&self, uri: &str) -> bool {
        let request = match uri.into_client_request() {
            Ok(request) => request,
            Err(e) => {
                error!(%uri, error = %e, "invalid rosbridge uri");
                return false;
            }
        };

        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!(%uri, "rosbridge connection already running");
            return false;
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }
        self.shared.reset_session();

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("rosbridge-rx".to_string())
            .spawn(move || run_connection(request, rx, shared));

        match spawned {
            Ok(handle) => {
                *lock(&self.outbound) = Some(tx);
                *worker = Some(handle);
                info!(%uri, "connecting to rosbridge");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to spawn rosbridge receive thread");
                false
            }
        }
    }

    /// Poll until the connection is open or `timeout` elapses.
    pub fn wait_for_connection(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_connected() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(CONNECTION_POLL_INTERVAL.min(deadline - now));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Number of frames handed to the connection since creation.
    pub fn frames_sent(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    /// Declare `topic` with message type `msg_type`.
    ///
    /// The topic is recorded as advertised as soon as the request is sent;
    /// the server's reply is not awaited.
    pub fn advertise(&self, topic: &str, msg_type: &str) -> bool {
        if !self.is_connected() {
            warn!(%topic, "cannot advertise: not connected");
            return false;
        }
        let sent = self.send(&BusMessage::Advertise {
            id: Some(self.shared.generate_id("adv")),
            topic: topic.to_string(),
            msg_type: msg_type.to_string(),
        });
        if sent {
            lock(&self.shared.advertised).insert(topic.to_string());
            debug!(%topic, %msg_type, "topic advertised");
        }
        sent
    }

    pub fn unadvertise(&self, topic: &str) -> bool {
        if !self.is_connected() {
            warn!(%topic, "cannot unadvertise: not connected");
            return false;
        }
        if !self.is_advertised(topic) {
            return false;
        }
        let sent = self.send(&BusMessage::Unadvertise {
            id: Some(self.shared.generate_id("unadv")),
            topic: topic.to_string(),
        });
        if sent {
            lock(&self.shared.advertised).remove(topic);
        }
        sent
    }

    pub fn is_advertised(&self, topic: &str) -> bool {
        lock(&self.shared.advertised).contains(topic)
    }

    /// Publish `msg` on a previously advertised topic.
    ///
    /// Returns `false` without touching the network if the client is
    /// disconnected or `topic` was never advertised.
    pub fn publish(&self, topic: &str, msg_type: &str, msg: Value) -> bool {
        if !self.is_connected() {
            return false;
        }
        if !self.is_advertised(topic) {
            warn!(%topic, "publish on unadvertised topic");
            return false;
        }
        self.send(&BusMessage::Publish {
            topic: topic.to_string(),
            msg_type: Some(msg_type.to_string()),
            msg,
        })
    }

    /// Register `handler` for inbound publishes on `topic` and ask the server
    /// to forward them.  A later subscribe on the same topic replaces the
    /// handler.
    pub fn subscribe<F>(&self, topic: &str, msg_type: &str, handler: F) -> bool
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if !self.is_connected() {
            warn!(%topic, "cannot subscribe: not connected");
            return false;
        }
        lock(&self.shared.handlers).insert(topic.to_string(), Arc::new(handler));
        self.send(&BusMessage::Subscribe {
            id: Some(self.shared.generate_id("sub")),
            topic: topic.to_string(),
            msg_type: msg_type.to_string(),
        })
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        if !self.is_connected() {
            warn!(%topic, "cannot unsubscribe: not connected");
            return false;
        }
        if !lock(&self.shared.handlers).contains_key(topic) {
            return false;
        }
        let sent = self.send(&BusMessage::Unsubscribe {
            id: Some(self.shared.generate_id("unsub")),
            topic: topic.to_string(),
        });
        if sent {
            lock(&self.shared.handlers).remove(topic);
        }
        sent
    }

    /// Invoke a service; `handler` receives the matching `service_response`
    /// on the receive thread.
    pub fn call_service<F>(&self, service: &str, args: Value, handler: F) -> bool
    where
        F: FnOnce(ServiceReply) + Send + 'static,
    {
        if !self.is_connected() {
            warn!(%service, "cannot call service: not connected");
            return false;
        }
        let id = self.shared.generate_id("call");
        lock(&self.shared.pending_calls).insert(id.clone(), Box::new(handler));
        let sent = self.send(&BusMessage::CallService {
            id: Some(id.clone()),
            service: service.to_string(),
            args,
        });
        if !sent {
            lock(&self.shared.pending_calls).remove(&id);
        }
        sent
    }

    /// List the topics currently known to the bus via `/rosapi/topics`.
    pub fn request_topics<F>(&self, handler: F) -> bool
    where
        F: FnOnce(Vec<String>) + Send + 'static,
    {
        self.call_service("/rosapi/topics", Value::Object(Default::default()), move |reply| {
            let topics = reply
                .values
                .get("topics")
                .and_then(|t| t.as_array())
                .map(|topics| {
                    topics
                        .iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            handler(topics)
        })
    }

    /// Close the connection and join the receive thread.
    ///
    /// Blocks until the close handshake finishes or the peer drops.
    pub fn disconnect(&self) {
        if let Some(tx) = lock(&self.outbound).take() {
            let _ = tx.send(Outbound::Close);
        }
        let worker = lock(&self.worker).take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                error!("rosbridge receive thread panicked");
            }
            info!("rosbridge disconnected");
        }
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    fn send(&self, message: &BusMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!(op = message.op(), error = %e, "failed to serialise rosbridge frame");
                return false;
            }
        };
        let outbound = lock(&self.outbound);
        let Some(tx) = outbound.as_ref() else {
            return false;
        };
        if tx.send(Outbound::Text(text)).is_err() {
            warn!(op = message.op(), "rosbridge connection closed; frame dropped");
            return false;
        }
        self.shared.sent.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl Drop for RosbridgeClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Receive thread
// ---------------------------------------------------------------------------

fn run_connection(request: Request, outbound: UnboundedReceiver<Outbound>, shared: Arc<Shared>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build rosbridge runtime");
            return;
        }
    };
    let span = info_span!("rosbridge_connection", uri = %request.uri());
    runtime.block_on(connection_loop(request, outbound, &shared).instrument(span));
    shared.connected.store(false, Ordering::SeqCst);
}

async fn connection_loop(
    request: Request,
    mut outbound: UnboundedReceiver<Outbound>,
    shared: &Shared,
) {
    let (ws, _response) = match connect_async(request).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "rosbridge connection failed");
            return;
        }
    };
    shared.connected.store(true, Ordering::SeqCst);
    info!("rosbridge connection established");

    let (mut sink, mut stream) = ws.split();
    let mut closing = false;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if !closing {
                        warn!(error = %e, "rosbridge receive error");
                    }
                    break;
                }
            },
            command = outbound.recv(), if !closing => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(error = %e, "rosbridge send failed");
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    closing = true;
                    shared.connected.store(false, Ordering::SeqCst);
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!(error = %e, "close frame not delivered");
                        break;
                    }
                }
            },
        }
    }

    info!("rosbridge connection closed");
}

#[cfg(test)]
impl RosbridgeClient {
    /// A client that looks connected and writes into the returned channel
    /// instead of a socket.
    pub(crate) fn loopback() -> (Self, UnboundedReceiver<String>) {
        let client = Self::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        // Forward text frames so tests see plain JSON strings.
        thread::spawn(move || {
            while let Some(frame) = rx.blocking_recv() {
                match frame {
                    Outbound::Text(text) => {
                        if text_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Outbound::Close => break,
                }
            }
        });
        *lock(&client.outbound) = Some(tx);
        client.shared.connected.store(true, Ordering::SeqCst);
        (client, text_rx)
    }
}
