//! Realtime subscription channel
//!
//! One logical connection to the push broker. `connect` is not reentrant:
//! a second call while connecting or connected is a no-op, never a second
//! transport. Inbound frames are dispatched sequentially by a single task,
//! so delivery within one topic preserves arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::session::SessionManager;

use super::policy::ReconnectPolicy;
use super::transport::{BrokerConnection, BrokerTransport, ClientFrame, PushFrame, WsTransport};

/// Well-known broker topics.
pub mod topics {
    pub const SENSOR_READINGS: &str = "/topic/sensor-readings";
    pub const HEALTH_UPDATES: &str = "/topic/health-updates";
    pub const HEALTH_STATUS: &str = "/topic/health-status";
    pub const ALERTS: &str = "/topic/alerts";
}

/// Handle to a registered subscription.
///
/// The empty sentinel (`is_registered() == false`) is returned when a
/// subscribe call happened while the channel was not connected; it is
/// always safe to pass back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// The sentinel id: no subscription was registered.
    #[must_use]
    pub const fn none() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        !self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

pub type MessageCallback = Arc<dyn Fn(serde_json::Value) + Send + Sync>;
pub type ConnectCallback = Box<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&Error) + Send + Sync>;

struct SubscriptionEntry {
    topic: String,
    callback: MessageCallback,
}

struct ChannelShared {
    url: String,
    transport: Arc<dyn BrokerTransport>,
    policy: ReconnectPolicy,
    session: SessionManager,
    state: RwLock<ChannelState>,
    subscriptions: RwLock<HashMap<String, SubscriptionEntry>>,
    commands: Mutex<Option<mpsc::UnboundedSender<String>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct RealtimeChannel {
    shared: Arc<ChannelShared>,
}

impl RealtimeChannel {
    /// Channel over the production WebSocket transport.
    #[must_use]
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy, session: SessionManager) -> Self {
        Self::with_transport(url, policy, session, Arc::new(WsTransport))
    }

    /// Channel over an injected transport (test doubles).
    #[must_use]
    pub fn with_transport(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        session: SessionManager,
        transport: Arc<dyn BrokerTransport>,
    ) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                url: url.into(),
                transport,
                policy,
                session,
                state: RwLock::new(ChannelState::Disconnected),
                subscriptions: RwLock::new(HashMap::new()),
                commands: Mutex::new(None),
                cancel: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.shared.state.read()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Open the connection, presenting the current access token as the
    /// connect-time credential. No-op while already connecting/connected.
    ///
    /// `on_connect` fires after every successful (re)connect; `on_error`
    /// fires on every failed connect attempt. Protocol failures never
    /// panic the caller: the channel retries per its [`ReconnectPolicy`]
    /// and stays `Disconnected` once the budget is exhausted.
    pub fn connect(&self, on_connect: Option<ConnectCallback>, on_error: Option<ErrorCallback>) {
        {
            let mut state = self.shared.state.write();
            if *state != ChannelState::Disconnected {
                debug!(state = ?*state, "Realtime connect ignored, channel already active");
                return;
            }
            *state = ChannelState::Connecting;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        *self.shared.commands.lock() = Some(tx);
        *self.shared.cancel.lock() = Some(cancel.clone());

        let shared = self.shared.clone();
        tokio::spawn(run_loop(shared, rx, on_connect, on_error, cancel));
    }

    /// Register a callback for a topic. Only meaningful while connected;
    /// otherwise a warning is logged and the sentinel id is returned.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionId
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        if !self.is_connected() {
            warn!(topic, "Realtime channel not connected, subscription ignored");
            return SubscriptionId::none();
        }

        let id = SubscriptionId(format!("sub-{}", nanoid::nanoid!(10)));
        let first_for_topic = {
            let mut subscriptions = self.shared.subscriptions.write();
            let first = !subscriptions.values().any(|entry| entry.topic == topic);
            subscriptions.insert(
                id.0.clone(),
                SubscriptionEntry {
                    topic: topic.to_string(),
                    callback: Arc::new(callback),
                },
            );
            first
        };

        if first_for_topic {
            self.shared.send_frame(&ClientFrame::Subscribe {
                topic: topic.to_string(),
            });
        }
        id
    }

    /// Remove a subscription. No-op for unknown, sentinel, or
    /// already-released ids.
    pub fn unsubscribe(&self, id: &SubscriptionId) {
        if !id.is_registered() {
            return;
        }
        let Some(entry) = self.shared.subscriptions.write().remove(id.as_str()) else {
            return;
        };
        let last_for_topic = !self
            .shared
            .subscriptions
            .read()
            .values()
            .any(|other| other.topic == entry.topic);
        if last_for_topic {
            self.shared
                .send_frame(&ClientFrame::Unsubscribe { topic: entry.topic });
        }
    }

    /// Publish a message to a topic. Warning no-op while not connected.
    pub fn publish(&self, topic: &str, body: serde_json::Value) {
        if !self.is_connected() {
            warn!(topic, "Realtime channel not connected, publish ignored");
            return;
        }
        self.shared.send_frame(&ClientFrame::Send {
            topic: topic.to_string(),
            body,
        });
    }

    /// Tear down the connection and release every subscription. Always
    /// safe to call, including when already disconnected.
    pub fn disconnect(&self) {
        if let Some(cancel) = self.shared.cancel.lock().take() {
            cancel.cancel();
        }
        self.shared.teardown();
    }
}

impl ChannelShared {
    fn set_state(&self, state: ChannelState) {
        *self.state.write() = state;
    }

    fn teardown(&self) {
        self.set_state(ChannelState::Disconnected);
        self.subscriptions.write().clear();
        *self.commands.lock() = None;
        *self.cancel.lock() = None;
    }

    fn active_topics(&self) -> Vec<String> {
        let subscriptions = self.subscriptions.read();
        let mut topics: Vec<String> = subscriptions
            .values()
            .map(|entry| entry.topic.clone())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    fn send_frame(&self, frame: &ClientFrame) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode broker frame");
                return;
            }
        };
        if let Some(tx) = self.commands.lock().as_ref() {
            let _ = tx.send(text);
        }
    }

    /// Decode a push frame and fan it out to the topic's subscribers. A
    /// malformed frame is logged and dropped; other subscriptions and the
    /// connection are unaffected.
    fn dispatch(&self, text: &str) {
        let frame: PushFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed realtime message");
                return;
            }
        };

        // Clone the callbacks out so a callback can freely re-enter the
        // channel (subscribe/unsubscribe) without deadlocking.
        let callbacks: Vec<MessageCallback> = {
            let subscriptions = self.subscriptions.read();
            subscriptions
                .values()
                .filter(|entry| entry.topic == frame.topic)
                .map(|entry| entry.callback.clone())
                .collect()
        };
        for callback in callbacks {
            callback(frame.payload.clone());
        }
    }
}

enum DriveExit {
    Cancelled,
    Dropped,
}

async fn run_loop(
    shared: Arc<ChannelShared>,
    mut commands: mpsc::UnboundedReceiver<String>,
    on_connect: Option<ConnectCallback>,
    on_error: Option<ErrorCallback>,
    cancel: CancellationToken,
) {
    let mut attempts_remaining = shared.policy.max_attempts;

    loop {
        let bearer = shared.session.access_token();
        let connected = tokio::select! {
            _ = cancel.cancelled() => {
                shared.teardown();
                return;
            }
            result = shared.transport.connect(&shared.url, bearer.as_deref()) => result,
        };

        match connected {
            Ok(mut conn) => {
                // Budget resets on every successful connect.
                attempts_remaining = shared.policy.max_attempts;
                shared.set_state(ChannelState::Connected);
                info!(url = %shared.url, "Realtime channel connected");

                // Subscriptions that survived a reconnect are re-issued to
                // the broker before new traffic flows.
                for topic in shared.active_topics() {
                    let frame = ClientFrame::Subscribe { topic };
                    if let Ok(text) = serde_json::to_string(&frame) {
                        if let Err(e) = conn.send(text).await {
                            warn!(error = %e, "Failed to re-subscribe after reconnect");
                        }
                    }
                }
                if let Some(callback) = on_connect.as_ref() {
                    callback();
                }

                match drive(&shared, conn.as_mut(), &mut commands, &cancel).await {
                    DriveExit::Cancelled => {
                        conn.close().await;
                        shared.teardown();
                        return;
                    }
                    DriveExit::Dropped => {}
                }
            }
            Err(e) => {
                warn!(error = %e, url = %shared.url, "Realtime connect failed");
                if let Some(callback) = on_error.as_ref() {
                    callback(&e);
                }
            }
        }

        if attempts_remaining == 0 {
            error!(
                max_attempts = shared.policy.max_attempts,
                "Realtime reconnect budget exhausted, giving up"
            );
            shared.teardown();
            return;
        }
        attempts_remaining -= 1;
        shared.set_state(ChannelState::Reconnecting);

        tokio::select! {
            _ = cancel.cancelled() => {
                shared.teardown();
                return;
            }
            () = tokio::time::sleep(shared.policy.delay) => {}
        }
    }
}

async fn drive(
    shared: &ChannelShared,
    conn: &mut dyn BrokerConnection,
    commands: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> DriveExit {
    enum Event {
        Cancelled,
        Command(Option<String>),
        Inbound(Option<crate::error::Result<String>>),
    }

    loop {
        // The inbound future's borrow of `conn` must end before the event
        // is handled, since the command path writes to `conn` too.
        let event = tokio::select! {
            _ = cancel.cancelled() => Event::Cancelled,
            command = commands.recv() => Event::Command(command),
            inbound = conn.next() => Event::Inbound(inbound),
        };

        match event {
            Event::Cancelled | Event::Command(None) => return DriveExit::Cancelled,
            Event::Command(Some(frame)) => {
                if let Err(e) = conn.send(frame).await {
                    warn!(error = %e, "Send to broker failed, reconnecting");
                    return DriveExit::Dropped;
                }
            }
            Event::Inbound(Some(Ok(text))) => shared.dispatch(&text),
            Event::Inbound(Some(Err(e))) => {
                warn!(error = %e, "Broker read error, reconnecting");
                return DriveExit::Dropped;
            }
            Event::Inbound(None) => {
                info!("Broker connection closed");
                return DriveExit::Dropped;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Transport double: the test drives inbound frames through a handle
    /// and inspects what the channel sent.
    struct FakeTransport {
        fail_connects: u32,
        connects: AtomicU32,
        handles: Mutex<Vec<FakeHandle>>,
    }

    #[derive(Clone)]
    struct FakeHandle {
        inbound: mpsc::UnboundedSender<String>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Self::failing_first(0)
        }

        fn failing_first(fail_connects: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_connects,
                connects: AtomicU32::new(0),
                handles: Mutex::new(Vec::new()),
            })
        }

        fn connect_count(&self) -> u32 {
            self.connects.load(Ordering::SeqCst)
        }

        fn handle(&self, index: usize) -> FakeHandle {
            self.handles.lock()[index].clone()
        }
    }

    #[async_trait]
    impl BrokerTransport for FakeTransport {
        async fn connect(
            &self,
            _url: &str,
            _bearer: Option<&str>,
        ) -> crate::error::Result<Box<dyn BrokerConnection>> {
            let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_connects {
                return Err(Error::Realtime("connection refused".to_string()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let sent = Arc::new(Mutex::new(Vec::new()));
            self.handles.lock().push(FakeHandle {
                inbound: tx,
                sent: sent.clone(),
            });
            Ok(Box::new(FakeConnection { inbound: rx, sent }))
        }
    }

    struct FakeConnection {
        inbound: mpsc::UnboundedReceiver<String>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl BrokerConnection for FakeConnection {
        async fn send(&mut self, text: String) -> crate::error::Result<()> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn next(&mut self) -> Option<crate::error::Result<String>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) {}
    }

    fn channel_with(transport: Arc<FakeTransport>, policy: ReconnectPolicy) -> RealtimeChannel {
        let session = SessionManager::new(Arc::new(MemorySessionStore::new()));
        RealtimeChannel::with_transport("ws://broker.test/ws", policy, session, transport)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn push(handle: &FakeHandle, topic: &str, payload: serde_json::Value) {
        let frame = serde_json::to_string(&PushFrame {
            topic: topic.to_string(),
            payload,
        })
        .unwrap();
        handle.inbound.send(frame).unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_returns_sentinel() {
        let channel = channel_with(FakeTransport::new(), ReconnectPolicy::default());
        let id = channel.subscribe(topics::ALERTS, |_| {});
        assert!(!id.is_registered());
        // Safe no-ops
        channel.unsubscribe(&id);
        channel.unsubscribe(&SubscriptionId::none());
        channel.disconnect();
    }

    #[tokio::test]
    async fn test_connect_is_not_reentrant() {
        let transport = FakeTransport::new();
        let channel = channel_with(transport.clone(), ReconnectPolicy::default());

        channel.connect(None, None);
        channel.connect(None, None);
        wait_for(|| channel.is_connected()).await;
        channel.connect(None, None);

        assert_eq!(transport.connect_count(), 1);
        channel.disconnect();
    }

    #[tokio::test]
    async fn test_messages_dispatch_in_order_per_topic() {
        let transport = FakeTransport::new();
        let channel = channel_with(transport.clone(), ReconnectPolicy::default());
        channel.connect(None, None);
        wait_for(|| channel.is_connected()).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let id = channel.subscribe(topics::SENSOR_READINGS, move |payload| {
            received_clone.lock().push(payload["seq"].as_u64().unwrap());
        });
        assert!(id.is_registered());

        let handle = transport.handle(0);
        for seq in 0..5_u64 {
            push(&handle, topics::SENSOR_READINGS, serde_json::json!({"seq": seq}));
        }
        wait_for(|| received.lock().len() == 5).await;
        assert_eq!(*received.lock(), vec![0, 1, 2, 3, 4]);

        // The broker saw exactly one subscribe frame for the topic.
        wait_for(|| !handle.sent.lock().is_empty()).await;
        let sent = handle.sent.lock().clone();
        assert_eq!(
            sent,
            vec![r#"{"type":"subscribe","topic":"/topic/sensor-readings"}"#.to_string()]
        );
        channel.disconnect();
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let transport = FakeTransport::new();
        let channel = channel_with(transport.clone(), ReconnectPolicy::default());
        channel.connect(None, None);
        wait_for(|| channel.is_connected()).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        channel.subscribe(topics::ALERTS, move |payload| {
            received_clone.lock().push(payload);
        });

        let handle = transport.handle(0);
        handle.inbound.send("{not valid json".to_string()).unwrap();
        push(&handle, topics::ALERTS, serde_json::json!({"id": "a-1"}));

        wait_for(|| received.lock().len() == 1).await;
        assert!(channel.is_connected());
        channel.disconnect();
    }

    #[tokio::test]
    async fn test_disconnect_invalidates_all_subscriptions() {
        let transport = FakeTransport::new();
        let channel = channel_with(transport.clone(), ReconnectPolicy::default());
        channel.connect(None, None);
        wait_for(|| channel.is_connected()).await;

        let id = channel.subscribe(topics::ALERTS, |_| {});
        assert!(id.is_registered());

        channel.disconnect();
        assert!(!channel.is_connected());
        assert_eq!(channel.state(), ChannelState::Disconnected);
        // Previously valid id is now a safe no-op.
        channel.unsubscribe(&id);
        // Repeated disconnects are safe too.
        channel.disconnect();
    }

    #[tokio::test]
    async fn test_reconnect_restores_subscriptions() {
        let transport = FakeTransport::new();
        let channel = channel_with(
            transport.clone(),
            ReconnectPolicy::new(3, Duration::from_millis(10)),
        );
        channel.connect(None, None);
        wait_for(|| channel.is_connected()).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        channel.subscribe(topics::HEALTH_UPDATES, move |payload| {
            received_clone.lock().push(payload);
        });

        // Drop the first connection's sender: the channel reconnects and
        // re-issues the broker subscription.
        {
            let mut handles = transport.handles.lock();
            handles.remove(0);
        }
        wait_for(|| transport.connect_count() == 2 && channel.is_connected()).await;

        let handle = transport.handle(0);
        wait_for(|| !handle.sent.lock().is_empty()).await;
        assert_eq!(
            handle.sent.lock()[0],
            r#"{"type":"subscribe","topic":"/topic/health-updates"}"#
        );

        push(&handle, topics::HEALTH_UPDATES, serde_json::json!({"ok": true}));
        wait_for(|| received.lock().len() == 1).await;
        channel.disconnect();
    }

    #[tokio::test]
    async fn test_budget_exhaustion_gives_up() {
        let transport = FakeTransport::failing_first(10);
        let channel = channel_with(
            transport.clone(),
            ReconnectPolicy::new(2, Duration::from_millis(5)),
        );
        let errors = Arc::new(AtomicU32::new(0));
        let errors_clone = errors.clone();
        channel.connect(
            None,
            Some(Box::new(move |_| {
                errors_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );

        // Initial attempt + 2 retries, then the channel stays down.
        wait_for(|| channel.state() == ChannelState::Disconnected).await;
        assert_eq!(transport.connect_count(), 3);
        assert_eq!(errors.load(Ordering::SeqCst), 3);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_publish_when_disconnected_is_noop() {
        let channel = channel_with(FakeTransport::new(), ReconnectPolicy::default());
        channel.publish(topics::ALERTS, serde_json::json!({"id": "a-1"}));
        assert!(!channel.is_connected());
    }
}
