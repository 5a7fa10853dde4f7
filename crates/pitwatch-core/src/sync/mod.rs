// ── State synchronizer ──
//
// Owns the live state cache and the pending one-shot watchers, and keeps
// one update-topic subscription per registered device. Inbound messages
// are applied here; everything else reads through the methods below.

pub(crate) mod session;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, broadcast, oneshot};
use tracing::{debug, warn};

use pitwatch_api::mqtt::update_topic;
use pitwatch_api::{InboundMessage, MqttLink};

use crate::model::{Device, DeviceState};

const UPDATE_CHANNEL_SIZE: usize = 256;

// ── TopicLink ────────────────────────────────────────────────────────

/// The subscribe side of the pub/sub transport.
#[async_trait]
pub trait TopicLink: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), pitwatch_api::Error>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), pitwatch_api::Error>;
}

#[async_trait]
impl TopicLink for MqttLink {
    async fn subscribe(&self, topic: &str) -> Result<(), pitwatch_api::Error> {
        MqttLink::subscribe(self, topic).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), pitwatch_api::Error> {
        MqttLink::unsubscribe(self, topic).await
    }
}

// ── Public types ─────────────────────────────────────────────────────

/// A state replacement, as broadcast to update subscribers.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub thing_id: String,
    pub state: Arc<DeviceState>,
}

/// Handle for deregistering a pending watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherId {
    pub thing_id: String,
    id: u64,
}

// ── Internal state ───────────────────────────────────────────────────

struct Watcher {
    id: u64,
    tx: oneshot::Sender<Arc<DeviceState>>,
}

#[derive(Default)]
struct SyncState {
    cache: HashMap<String, Arc<DeviceState>>,
    watchers: HashMap<String, Vec<Watcher>>,
}

#[derive(Default)]
struct Subscriptions {
    link: Option<Arc<dyn TopicLink>>,
    things: BTreeSet<String>,
}

// ── StateSynchronizer ────────────────────────────────────────────────

pub struct StateSynchronizer {
    state: RwLock<SyncState>,
    subscriptions: Mutex<Subscriptions>,
    /// Held for a whole reconcile, broker calls included.
    reconciling: Mutex<()>,
    updates: broadcast::Sender<StateUpdate>,
    next_watcher: AtomicU64,
}

impl Default for StateSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSynchronizer {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        Self {
            state: RwLock::new(SyncState::default()),
            subscriptions: Mutex::new(Subscriptions::default()),
            reconciling: Mutex::new(()),
            updates,
            next_watcher: AtomicU64::new(1),
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Handle one inbound publish. Malformed payloads are logged and
    /// dropped.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        match InboundMessage::parse(topic, payload) {
            InboundMessage::StateUpdate { thing_id, update } => {
                self.apply_state(&thing_id, DeviceState::from(&update)).await;
            }
            InboundMessage::Unparseable { thing_id, reason } => {
                warn!(thing_id, reason, "dropping malformed state update");
            }
            InboundMessage::Unrelated { topic } => {
                debug!(topic, "ignoring message on unrelated topic");
            }
        }
    }

    /// Replace a device's cached state and wake every pending watcher
    /// for it. Each watcher is consumed.
    pub async fn apply_state(&self, thing_id: &str, state: DeviceState) {
        let state = Arc::new(state);
        let woken = {
            let mut guard = self.state.write().await;
            guard.cache.insert(thing_id.to_owned(), Arc::clone(&state));
            let watchers = guard.watchers.remove(thing_id).unwrap_or_default();
            let count = watchers.len();
            for watcher in watchers {
                let _ = watcher.tx.send(Arc::clone(&state));
            }
            count
        };

        debug!(thing_id, grill = state.grill_temp, woken, "state updated");
        let _ = self.updates.send(StateUpdate {
            thing_id: thing_id.to_owned(),
            state,
        });
    }

    // ── Cache ────────────────────────────────────────────────────────

    pub async fn get_state(&self, thing_id: &str) -> Option<Arc<DeviceState>> {
        self.state.read().await.cache.get(thing_id).cloned()
    }

    /// Drop the cached state so staleness is observable as absence.
    pub async fn invalidate(&self, thing_id: &str) {
        self.state.write().await.cache.remove(thing_id);
    }

    // ── Watchers ─────────────────────────────────────────────────────

    /// Register a one-shot watcher for the next state of `thing_id`.
    pub async fn register_watcher(
        &self,
        thing_id: &str,
    ) -> (WatcherId, oneshot::Receiver<Arc<DeviceState>>) {
        let mut guard = self.state.write().await;
        Self::push_watcher(&mut guard, thing_id, self.allocate_id())
    }

    /// Invalidate the cache entry and register a watcher under one lock,
    /// so no update can slip in between the two.
    pub async fn invalidate_and_watch(
        &self,
        thing_id: &str,
    ) -> (WatcherId, oneshot::Receiver<Arc<DeviceState>>) {
        let mut guard = self.state.write().await;
        guard.cache.remove(thing_id);
        Self::push_watcher(&mut guard, thing_id, self.allocate_id())
    }

    /// Deregister a watcher that gave up. A no-op if it already fired.
    pub async fn cancel_watcher(&self, watcher: &WatcherId) {
        let mut guard = self.state.write().await;
        if let Some(list) = guard.watchers.get_mut(&watcher.thing_id) {
            list.retain(|w| w.id != watcher.id);
            if list.is_empty() {
                guard.watchers.remove(&watcher.thing_id);
            }
        }
    }

    /// Watchers still waiting on `thing_id`.
    pub async fn pending_watchers(&self, thing_id: &str) -> usize {
        self.state
            .read()
            .await
            .watchers
            .get(thing_id)
            .map_or(0, |list| list.iter().filter(|w| !w.tx.is_closed()).count())
    }

    fn allocate_id(&self) -> u64 {
        self.next_watcher.fetch_add(1, Ordering::Relaxed)
    }

    fn push_watcher(
        state: &mut SyncState,
        thing_id: &str,
        id: u64,
    ) -> (WatcherId, oneshot::Receiver<Arc<DeviceState>>) {
        let (tx, rx) = oneshot::channel();
        let list = state.watchers.entry(thing_id.to_owned()).or_default();
        // Receivers dropped without deregistering are pruned here.
        list.retain(|w| !w.tx.is_closed());
        list.push(Watcher { id, tx });

        (
            WatcherId {
                thing_id: thing_id.to_owned(),
                id,
            },
            rx,
        )
    }

    // ── Update broadcast ─────────────────────────────────────────────

    pub fn subscribe_updates(&self) -> broadcast::Receiver<StateUpdate> {
        self.updates.subscribe()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Bring subscriptions in line with `devices`: subscribe added ones,
    /// unsubscribe removed ones. Removed devices also lose their cached
    /// state and pending watchers.
    ///
    /// Reconciles run one at a time, so the broker sees their calls in
    /// the same order as the tracked set changed.
    pub async fn reconcile(&self, devices: &[Device]) {
        let _serial = self.reconciling.lock().await;
        let wanted: BTreeSet<String> = devices.iter().map(|d| d.thing_id.clone()).collect();

        let (link, added, removed) = {
            let mut subs = self.subscriptions.lock().await;
            let added: Vec<String> = wanted.difference(&subs.things).cloned().collect();
            let removed: Vec<String> = subs.things.difference(&wanted).cloned().collect();
            subs.things = wanted;
            (subs.link.clone(), added, removed)
        };

        if !removed.is_empty() {
            let mut guard = self.state.write().await;
            for thing_id in &removed {
                guard.cache.remove(thing_id);
                guard.watchers.remove(thing_id);
            }
        }

        // Link calls happen outside the subscriptions lock: they can wait
        // on the session loop, which itself needs that lock to attach.
        if let Some(link) = link {
            for thing_id in &added {
                if let Err(e) = link.subscribe(&update_topic(thing_id)).await {
                    warn!(thing_id, error = %e, "subscribe failed");
                }
            }
            for thing_id in &removed {
                if let Err(e) = link.unsubscribe(&update_topic(thing_id)).await {
                    warn!(thing_id, error = %e, "unsubscribe failed");
                }
            }
        }

        if !added.is_empty() || !removed.is_empty() {
            debug!(added = added.len(), removed = removed.len(), "subscriptions reconciled");
        }
    }

    /// Install the link of a freshly connected session.
    pub async fn attach_link(&self, link: Arc<dyn TopicLink>) {
        self.subscriptions.lock().await.link = Some(link);
    }

    /// Forget the link of a session that went away.
    pub async fn detach_link(&self) {
        self.subscriptions.lock().await.link = None;
    }

    /// Subscribe every tracked device on the current link. Called after
    /// each (re)connect; cached state is left untouched.
    pub async fn resubscribe_all(&self) {
        let (link, things) = {
            let subs = self.subscriptions.lock().await;
            (subs.link.clone(), subs.things.iter().cloned().collect::<Vec<_>>())
        };
        let Some(link) = link else { return };

        for thing_id in &things {
            if let Err(e) = link.subscribe(&update_topic(thing_id)).await {
                warn!(thing_id, error = %e, "resubscribe failed");
            }
        }
        debug!(count = things.len(), "resubscribed update topics");
    }

    /// Thing ids currently tracked for subscription.
    pub async fn subscribed_things(&self) -> Vec<String> {
        self.subscriptions.lock().await.things.iter().cloned().collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Records every subscribe/unsubscribe call.
    #[derive(Default)]
    pub(crate) struct RecordingLink {
        pub calls: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingLink {
        pub fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    #[async_trait]
    impl TopicLink for RecordingLink {
        async fn subscribe(&self, topic: &str) -> Result<(), pitwatch_api::Error> {
            self.calls.lock().unwrap().push(format!("+{topic}"));
            Ok(())
        }

        async fn unsubscribe(&self, topic: &str) -> Result<(), pitwatch_api::Error> {
            self.calls.lock().unwrap().push(format!("-{topic}"));
            Ok(())
        }
    }

    pub(crate) fn state(grill: i64) -> DeviceState {
        DeviceState {
            grill_temp: grill,
            set_temp: 225,
            pellet_level: None,
            connected: true,
            system_status: None,
            probes: Vec::new(),
        }
    }

    fn device(id: &str) -> Device {
        Device {
            thing_id: id.into(),
            friendly_name: id.to_uppercase(),
        }
    }

    #[tokio::test]
    async fn message_replaces_cached_state() {
        let sync = StateSynchronizer::new();
        sync.handle_message(
            "prod/thing/update/abc",
            br#"{"status":{"grill":225,"set":225,"connected":1}}"#,
        )
        .await;

        let cached = sync.get_state("abc").await.unwrap();
        assert_eq!(cached.grill_temp, 225);
        assert!(cached.connected);
    }

    #[tokio::test]
    async fn malformed_message_is_dropped() {
        let sync = StateSynchronizer::new();
        sync.apply_state("abc", state(200)).await;
        sync.handle_message("prod/thing/update/abc", b"{\"status\":").await;

        assert_eq!(sync.get_state("abc").await.unwrap().grill_temp, 200);
    }

    #[tokio::test]
    async fn update_wakes_every_watcher_once() {
        let sync = StateSynchronizer::new();
        let (_, rx1) = sync.register_watcher("abc").await;
        let (_, rx2) = sync.register_watcher("abc").await;
        let (_, other) = sync.register_watcher("def").await;
        assert_eq!(sync.pending_watchers("abc").await, 2);

        sync.apply_state("abc", state(230)).await;

        assert_eq!(rx1.await.unwrap().grill_temp, 230);
        assert_eq!(rx2.await.unwrap().grill_temp, 230);
        assert_eq!(sync.pending_watchers("abc").await, 0);
        assert_eq!(sync.pending_watchers("def").await, 1);
        drop(other);
    }

    #[tokio::test]
    async fn cancelled_watcher_is_not_woken() {
        let sync = StateSynchronizer::new();
        let (id, mut rx) = sync.register_watcher("abc").await;
        sync.cancel_watcher(&id).await;
        assert_eq!(sync.pending_watchers("abc").await, 0);

        sync.apply_state("abc", state(210)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sync.get_state("abc").await.unwrap().grill_temp, 210);
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let sync = StateSynchronizer::new();
        let (_, rx) = sync.register_watcher("abc").await;
        drop(rx);
        assert_eq!(sync.pending_watchers("abc").await, 0);

        let (_, _rx) = sync.register_watcher("abc").await;
        assert_eq!(sync.pending_watchers("abc").await, 1);
    }

    #[tokio::test]
    async fn invalidate_makes_state_absent() {
        let sync = StateSynchronizer::new();
        sync.apply_state("abc", state(200)).await;
        sync.invalidate("abc").await;
        assert!(sync.get_state("abc").await.is_none());
    }

    #[tokio::test]
    async fn updates_are_broadcast() {
        let sync = StateSynchronizer::new();
        let mut rx = sync.subscribe_updates();
        sync.apply_state("abc", state(180)).await;

        let update = rx.recv().await.unwrap();
        assert_eq!(update.thing_id, "abc");
        assert_eq!(update.state.grill_temp, 180);
    }

    #[tokio::test]
    async fn reconcile_subscribes_added_and_unsubscribes_removed() {
        let sync = StateSynchronizer::new();
        let link = Arc::new(RecordingLink::default());
        sync.attach_link(link.clone()).await;

        sync.reconcile(&[device("abc"), device("def")]).await;
        assert_eq!(
            link.take(),
            vec!["+prod/thing/update/abc", "+prod/thing/update/def"]
        );

        sync.apply_state("abc", state(200)).await;
        sync.reconcile(&[device("def"), device("ghi")]).await;
        assert_eq!(
            link.take(),
            vec!["+prod/thing/update/ghi", "-prod/thing/update/abc"]
        );
        assert!(sync.get_state("abc").await.is_none());
        assert_eq!(sync.subscribed_things().await, vec!["def", "ghi"]);
    }

    /// Unsubscribes take a while to reach the broker; calls are recorded
    /// when they land.
    #[derive(Default)]
    struct SlowUnsubscribeLink {
        landed: RecordingLink,
        unsubscribing: tokio::sync::Notify,
    }

    #[async_trait]
    impl TopicLink for SlowUnsubscribeLink {
        async fn subscribe(&self, topic: &str) -> Result<(), pitwatch_api::Error> {
            self.landed.subscribe(topic).await
        }

        async fn unsubscribe(&self, topic: &str) -> Result<(), pitwatch_api::Error> {
            self.unsubscribing.notify_one();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.landed.unsubscribe(topic).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_reconciles_reach_the_broker_in_order() {
        let sync = Arc::new(StateSynchronizer::new());
        let link = Arc::new(SlowUnsubscribeLink::default());
        sync.attach_link(link.clone()).await;
        sync.reconcile(&[device("abc")]).await;
        link.landed.take();

        let removal = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.reconcile(&[]).await })
        };
        link.unsubscribing.notified().await;

        // The grill comes back while its removal is still in flight.
        sync.reconcile(&[device("abc")]).await;
        removal.await.unwrap();

        assert_eq!(
            link.landed.take(),
            vec!["-prod/thing/update/abc", "+prod/thing/update/abc"]
        );
        assert_eq!(sync.subscribed_things().await, vec!["abc"]);
    }

    #[tokio::test]
    async fn reconnect_resubscribes_without_touching_cache() {
        let sync = StateSynchronizer::new();
        sync.reconcile(&[device("abc"), device("def")]).await;
        sync.apply_state("abc", state(200)).await;

        let link = Arc::new(RecordingLink::default());
        sync.attach_link(link.clone()).await;
        sync.resubscribe_all().await;

        assert_eq!(
            link.take(),
            vec!["+prod/thing/update/abc", "+prod/thing/update/def"]
        );
        assert_eq!(sync.get_state("abc").await.unwrap().grill_temp, 200);
    }
}
