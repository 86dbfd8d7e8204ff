// ── Realtime synchronization bridge ──
//
// Reference-counted registry mapping a channel key (table plus row
// filter) to one transport channel and the callbacks fanned out from it.
// The channel is opened by the first `subscribe` and torn down when the
// last `Subscription` for it is dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::model::ChangeEvent;
use crate::services::RealtimeTransport;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

// ── ChannelSpec ──────────────────────────────────────────────────

/// A table change stream, optionally narrowed by a row filter such as
/// `farm_id=eq.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    pub table: String,
    pub filter: Option<String>,
}

impl ChannelSpec {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    /// Only rows whose `column` equals `value`.
    pub fn scoped(table: impl Into<String>, column: &str, value: &str) -> Self {
        Self {
            table: table.into(),
            filter: Some(format!("{column}=eq.{value}")),
        }
    }

    /// Registry key; one transport channel exists per key.
    pub fn key(&self) -> String {
        match &self.filter {
            Some(filter) => format!("{}:{filter}", self.table),
            None => self.table.clone(),
        }
    }
}

impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ── SubscriptionRegistry ─────────────────────────────────────────

/// Callback invoked for every change on a channel, in arrival order.
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

type CallbackSet = Arc<Mutex<IndexMap<u64, ChangeCallback>>>;

struct TableChannel {
    spec: ChannelSpec,
    callbacks: CallbackSet,
    cancel: CancellationToken,
}

struct RegistryInner {
    transport: Arc<dyn RealtimeTransport>,
    channels: DashMap<String, TableChannel>,
    next_id: AtomicU64,
}

/// Shares one transport channel per key across any number of callbacks.
///
/// Cheaply cloneable. Must be used from within a Tokio runtime: opening a
/// channel spawns the task that pumps its events to the callbacks.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback` for changes matching `spec`, opening the
    /// underlying channel if this is its first callback.
    pub fn subscribe<F>(&self, spec: ChannelSpec, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let key = spec.key();
        let callback: ChangeCallback = Arc::new(callback);

        match self.inner.channels.entry(key.clone()) {
            Entry::Occupied(entry) => {
                lock(&entry.get().callbacks).insert(id, callback);
                trace!(channel = %key, id, "added callback to open channel");
            }
            Entry::Vacant(entry) => {
                let rx = self.inner.transport.open(&spec);
                let callbacks: CallbackSet = Arc::new(Mutex::new(IndexMap::new()));
                lock(&callbacks).insert(id, callback);
                let cancel = CancellationToken::new();

                tokio::spawn(pump_task(
                    key.clone(),
                    rx,
                    Arc::clone(&callbacks),
                    cancel.clone(),
                ));
                entry.insert(TableChannel {
                    spec,
                    callbacks,
                    cancel,
                });
                debug!(channel = %key, "opened realtime channel");
            }
        }

        Subscription {
            registry: Arc::downgrade(&self.inner),
            key,
            id,
        }
    }

    /// Number of open transport channels.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Callbacks registered on the channel for `spec`.
    pub fn callback_count(&self, spec: &ChannelSpec) -> usize {
        self.inner
            .channels
            .get(&spec.key())
            .map_or(0, |ch| lock(&ch.callbacks).len())
    }

    /// Tear down every channel. Outstanding `Subscription`s become inert.
    pub fn close_all(&self) {
        let keys: Vec<String> = self
            .inner
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if let Some((_, channel)) = self.inner.channels.remove(&key) {
                self.inner.teardown(&channel);
            }
        }
    }
}

impl RegistryInner {
    fn release(&self, key: &str, id: u64) {
        let removed = self.channels.remove_if(key, |_, channel| {
            let mut callbacks = lock(&channel.callbacks);
            callbacks.shift_remove(&id);
            callbacks.is_empty()
        });
        if let Some((_, channel)) = removed {
            self.teardown(&channel);
        }
    }

    fn teardown(&self, channel: &TableChannel) {
        channel.cancel.cancel();
        self.transport.close(&channel.spec);
        debug!(channel = %channel.spec, "closed realtime channel");
    }
}

/// Handle for one registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<RegistryInner>,
    key: String,
    id: u64,
}

impl Subscription {
    /// Remove this callback. The channel closes if it was the last one.
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn channel_key(&self) -> &str {
        &self.key
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.release(&self.key, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

async fn pump_task(
    key: String,
    mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
    callbacks: CallbackSet,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else {
                    debug!(channel = %key, "transport channel closed");
                    break;
                };
                // Callbacks may subscribe or unsubscribe; never hold the lock
                // while invoking them.
                let targets: Vec<ChangeCallback> = lock(&callbacks).values().cloned().collect();
                for callback in targets {
                    callback(&event);
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::watch;

    use crate::model::ChangeKind;

    #[derive(Default)]
    struct FakeTransport {
        senders: Mutex<Vec<(ChannelSpec, mpsc::UnboundedSender<ChangeEvent>)>>,
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    impl FakeTransport {
        fn emit(&self, table: &str) {
            for (spec, tx) in lock(&self.senders).iter() {
                if spec.table == table {
                    let _ = tx.send(ChangeEvent {
                        kind: ChangeKind::Insert,
                        table: table.into(),
                        new: Some(serde_json::json!({ "id": "x" })),
                        old: None,
                        timestamp: None,
                    });
                }
            }
        }
    }

    impl RealtimeTransport for FakeTransport {
        fn open(&self, spec: &ChannelSpec) -> mpsc::UnboundedReceiver<ChangeEvent> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            lock(&self.senders).push((spec.clone(), tx));
            rx
        }

        fn close(&self, spec: &ChannelSpec) {
            self.closed.fetch_add(1, Ordering::SeqCst);
            lock(&self.senders).retain(|(s, _)| s != spec);
        }

        fn connection_state(&self) -> watch::Receiver<ConnectionState> {
            watch::channel(ConnectionState::Connected).1
        }

        fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn one_channel_per_key_shared_by_callbacks() {
        let transport = Arc::new(FakeTransport::default());
        let registry = SubscriptionRegistry::new(transport.clone());

        let first = registry.subscribe(ChannelSpec::table("racks"), |_| {});
        let second = registry.subscribe(ChannelSpec::table("racks"), |_| {});

        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
        assert_eq!(registry.callback_count(&ChannelSpec::table("racks")), 2);

        first.unsubscribe();
        assert_eq!(transport.closed.load(Ordering::SeqCst), 0);
        assert_eq!(registry.channel_count(), 1);

        second.unsubscribe();
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.channel_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_callback() {
        let transport = Arc::new(FakeTransport::default());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));

        let a = {
            let hits = Arc::clone(&hits_a);
            registry.subscribe(ChannelSpec::table("shelves"), move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let _b = {
            let hits = Arc::clone(&hits_b);
            registry.subscribe(ChannelSpec::table("shelves"), move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        transport.emit("shelves");
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        a.unsubscribe();
        transport.emit("shelves");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn filters_get_separate_channels() {
        let transport = Arc::new(FakeTransport::default());
        let registry = SubscriptionRegistry::new(transport.clone());

        let _a = registry.subscribe(ChannelSpec::scoped("rows", "farm_id", "f1"), |_| {});
        let _b = registry.subscribe(ChannelSpec::scoped("rows", "farm_id", "f2"), |_| {});

        assert_eq!(registry.channel_count(), 2);
        assert_eq!(
            ChannelSpec::scoped("rows", "farm_id", "f1").key(),
            "rows:farm_id=eq.f1"
        );
    }

    #[tokio::test]
    async fn close_all_makes_subscriptions_inert() {
        let transport = Arc::new(FakeTransport::default());
        let registry = SubscriptionRegistry::new(transport.clone());
        let sub = registry.subscribe(ChannelSpec::table("rows"), |_| {});

        registry.close_all();
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);

        drop(sub);
        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
    }
}
