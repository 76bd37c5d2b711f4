use std::{
    collections::{HashMap, VecDeque},
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch, Notify},
    time::{self, MissedTickBehavior},
};
use tracing::{debug, trace, warn};

use super::{
    api::{Empty, Method, RpcMethod},
    ConnectionError, Event, Message, MessageType, ProtocolError, RpcError,
};
use crate::config::Config;

/// Request id of keepalive pings. Never handed out to callers.
pub const KEEPALIVE_ID: u64 = 0;

/// Called once when the connection closes, with the reason.
pub type CloseCallback = Box<dyn FnOnce(ConnectionError) + Send>;

type ResponseSender = oneshot::Sender<Result<Value, RpcError>>;

struct Shared {
    pending: Mutex<HashMap<u64, ResponseSender>>,
    events: Mutex<VecDeque<Event>>,
    event_capacity: usize,
    event_added: Notify,
    closed: watch::Sender<bool>,
    close_reason: Mutex<Option<ConnectionError>>,
    on_close: Mutex<Option<CloseCallback>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn register(&self, id: u64) -> Result<oneshot::Receiver<Result<Value, RpcError>>, RpcError> {
        let mut pending = self.pending.lock();
        // Checked under the lock, `close` drains it after setting the flag.
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        if id == KEEPALIVE_ID || pending.contains_key(&id) {
            return Err(ProtocolError::RequestIdCollision(id).into());
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    fn unregister(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    fn handle_incoming(&self, text: &str) {
        let msg = match Message::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "dropping undecodable message");
                return;
            }
        };

        if matches!(msg.kind, MessageType::Response | MessageType::ErrorResponse) {
            if msg.request_id == KEEPALIVE_ID {
                trace!("pong");
                return;
            }
            let sender = self.pending.lock().remove(&msg.request_id);
            if let Some(sender) = sender {
                let result = match msg.kind {
                    MessageType::ErrorResponse => Err(RpcError::Node(msg.error_text())),
                    _ => Ok(msg.payload),
                };
                trace!(id = msg.request_id, method = %msg.method, "response");
                // The caller may have given up in the meantime.
                let _ = sender.send(result);
                return;
            }
            debug!(id = msg.request_id, method = %msg.method, "response without request, queued as event");
        }

        match Event::decode(&msg.method, msg.payload) {
            Ok(event) => self.push_event(event),
            Err(e) => warn!(error = %e, "dropping malformed event"),
        }
    }

    fn push_event(&self, event: Event) {
        {
            let mut events = self.events.lock();
            while events.len() >= self.event_capacity {
                if let Some(dropped) = events.pop_front() {
                    debug!(event = dropped.name(), "event queue full, dropping oldest");
                }
            }
            events.push_back(event);
        }
        self.event_added.notify_one();
    }

    /// Fail everything in flight and run the close callback. Only the first
    /// call has an effect.
    fn close(&self, reason: ConnectionError) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!(%reason, "connection closed");
        *self.close_reason.lock() = Some(reason.clone());

        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (id, sender) in pending {
            trace!(id, "failing pending request");
            let _ = sender.send(Err(ConnectionError::Closed.into()));
        }
        self.event_added.notify_waiters();

        let callback = self.on_close.lock().take();
        if let Some(callback) = callback {
            callback(reason);
        }
    }
}

/// Client side of the RPC connection.
///
/// Cheap to share behind an `Arc`, all methods take `&self`. Dropping the
/// client closes the connection.
pub struct RpcClient {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("closed", &self.shared.is_closed())
            .field("pending", &self.shared.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Run the protocol over an established transport. Must be called from
    /// within a tokio runtime.
    pub fn new<T, E>(transport: T, config: &Config) -> Self
    where
        T: Sink<String> + Stream<Item = Result<String, E>> + Send + 'static,
        T::Error: fmt::Display + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (sink, stream) = transport.split();
        Self::from_parts(sink, stream, config)
    }

    /// Like [RpcClient::new], with the two directions given separately.
    pub fn from_parts<Si, St, E>(sink: Si, stream: St, config: &Config) -> Self
    where
        Si: Sink<String> + Send + 'static,
        Si::Error: fmt::Display + Send + 'static,
        St: Stream<Item = Result<String, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
            event_capacity: config.event_queue_capacity.max(1),
            event_added: Notify::new(),
            closed,
            close_reason: Mutex::new(None),
            on_close: Mutex::new(None),
        });
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        // Subscribed here so no task can miss a close that happens before it
        // first runs.
        tokio::spawn(write_loop(
            shared.clone(),
            shared.closed.subscribe(),
            Box::pin(sink),
            outgoing_rx,
        ));
        tokio::spawn(read_loop(
            shared.clone(),
            shared.closed.subscribe(),
            Box::pin(stream),
        ));
        tokio::spawn(keepalive_loop(
            shared.closed.subscribe(),
            outgoing.clone(),
            config.keepalive_interval.max(Duration::from_millis(1)),
        ));

        RpcClient {
            shared,
            outgoing,
            next_id: AtomicU64::new(KEEPALIVE_ID + 1),
        }
    }

    /// Install the callback run when the connection closes. Runs right away
    /// if it is closed already. Replaces a callback that has not run yet.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce(ConnectionError) + Send + 'static,
    {
        let mut slot = self.shared.on_close.lock();
        let reason = self.shared.close_reason.lock().clone();
        match reason {
            Some(reason) => {
                drop(slot);
                callback(reason);
            }
            None => *slot = Some(Box::new(callback)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Close the connection: pending requests fail, the close callback runs.
    pub fn close(&self) {
        self.shared.close(ConnectionError::Closed);
    }

    /// A fresh request id.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn call<M: RpcMethod>(&self, params: &M::Params) -> Result<M::Result, RpcError> {
        self.roundtrip::<M, _>(self.next_request_id(), params, std::future::pending::<()>())
            .await
    }

    /// Call with a caller chosen id, which must not be in flight.
    pub async fn request_with_id<M: RpcMethod>(&self, id: u64, params: &M::Params) -> Result<M::Result, RpcError> {
        self.roundtrip::<M, _>(id, params, std::future::pending::<()>())
            .await
    }

    /// Call, giving up with [RpcError::Cancelled] once `cancel` completes.
    /// The request is not retracted, the node may still act on it.
    pub async fn call_with_cancel<M, C>(&self, params: &M::Params, cancel: C) -> Result<M::Result, RpcError>
    where
        M: RpcMethod,
        C: Future,
    {
        self.roundtrip::<M, C>(self.next_request_id(), params, cancel)
            .await
    }

    async fn roundtrip<M, C>(&self, id: u64, params: &M::Params, cancel: C) -> Result<M::Result, RpcError>
    where
        M: RpcMethod,
        C: Future,
    {
        let payload = serde_json::to_value(params)
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;
        let result = self.call_raw(id, M::METHOD, payload, cancel).await?;
        serde_json::from_value(result).map_err(|e| {
            ProtocolError::MalformedMessage(format!("{} response: {}", M::METHOD, e)).into()
        })
    }

    /// Untyped request: register, send, then wait for the response, the
    /// connection closing or `cancel`.
    pub async fn call_raw<C>(&self, id: u64, method: Method, payload: Value, cancel: C) -> Result<Value, RpcError>
    where
        C: Future,
    {
        let text = Message::request(id, method.as_str(), payload).encode()?;
        // Registered before sending, the response may arrive right away.
        let response = self.shared.register(id)?;
        let mut guard = PendingGuard {
            shared: &self.shared,
            id,
            armed: true,
        };
        if self.outgoing.send(text).is_err() {
            return Err(ConnectionError::Closed.into());
        }
        debug!(id, %method, "request sent");

        tokio::pin!(cancel);
        tokio::select! {
            result = response => {
                // Removed by whoever completed or dropped the sender.
                guard.armed = false;
                match result {
                    Ok(result) => result,
                    // Dropped without answer, only happens while closing.
                    Err(_) => Err(ConnectionError::Closed.into()),
                }
            }
            _ = &mut cancel => {
                debug!(id, %method, "request cancelled");
                Err(RpcError::Cancelled)
            }
        }
    }

    /// Send an event style message without waiting for anything.
    pub fn notify(&self, method: &str, payload: Value) -> Result<(), RpcError> {
        let text = Message::event(method, payload).encode()?;
        self.outgoing
            .send(text)
            .map_err(|_| ConnectionError::Closed.into())
    }

    pub async fn ping(&self) -> Result<(), RpcError> {
        self.call::<super::api::Ping>(&Empty {}).await.map(|_| ())
    }

    /// Oldest queued event, without waiting.
    pub fn try_next_event(&self) -> Option<Event> {
        self.shared.events.lock().pop_front()
    }

    /// Wait for the next event. `None` once the connection is closed and the
    /// queue is drained.
    pub async fn next_event(&self) -> Option<Event> {
        loop {
            let added = self.shared.event_added.notified();
            if let Some(event) = self.try_next_event() {
                return Some(event);
            }
            if self.shared.is_closed() {
                return None;
            }
            added.await;
        }
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }
}

/// Forgets the pending entry of a request whose caller stopped waiting,
/// including when the call future is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.unregister(self.id);
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.shared.close(ConnectionError::Closed);
    }
}

async fn write_loop<Si>(
    shared: Arc<Shared>,
    mut closed: watch::Receiver<bool>,
    mut sink: Pin<Box<Si>>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) where
    Si: Sink<String> + Send + 'static,
    Si::Error: fmt::Display + Send + 'static,
{
    loop {
        tokio::select! {
            text = outgoing.recv() => {
                let Some(text) = text else { break };
                if let Err(e) = sink.send(text).await {
                    shared.close(ConnectionError::Transport(e.to_string()));
                    break;
                }
            }
            _ = closed.changed() => break,
        }
    }
    let _ = sink.close().await;
}

async fn read_loop<St, E>(shared: Arc<Shared>, mut closed: watch::Receiver<bool>, mut stream: Pin<Box<St>>)
where
    St: Stream<Item = Result<String, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let reason = loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(text)) => shared.handle_incoming(&text),
                Some(Err(e)) => break ConnectionError::Transport(e.to_string()),
                None => break ConnectionError::Closed,
            },
            _ = closed.changed() => return,
        }
    };
    shared.close(reason);
}

/// Ping on a fixed interval. Pongs are not tracked, a dead connection is
/// detected by the transport or the caller.
async fn keepalive_loop(mut closed: watch::Receiver<bool>, outgoing: mpsc::UnboundedSender<String>, period: Duration) {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let ping = Message::request(KEEPALIVE_ID, Method::Ping.as_str(), serde_json::json!({}));
                let Ok(text) = ping.encode() else { continue };
                if outgoing.send(text).is_err() {
                    break;
                }
                trace!("ping");
            }
            _ = closed.changed() => break,
        }
    }
}
