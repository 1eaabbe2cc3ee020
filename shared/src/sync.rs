//! Remote sync bridge: one live place subscription for the current
//! (user, trip), forwarded into the journal as whole-list snapshots.

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capabilities::documents::{
    DocumentError, DocumentStore, PlaceSubscription, SubscriptionGuard,
};
use crate::model::{Place, TripId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SyncTarget {
    pub user: UserId,
    pub trip: TripId,
}

impl SyncTarget {
    pub fn new(user: UserId, trip: TripId) -> Self {
        Self { user, trip }
    }
}

/// Receives snapshots from the subscription task. Snapshots carry their
/// target so a receiver can drop ones that arrive after a switch.
pub trait SnapshotSink: Send + Sync + 'static {
    fn snapshot(&self, target: &SyncTarget, places: Vec<Place>);
    fn interrupted(&self, target: &SyncTarget, error: DocumentError);
}

struct ActiveSubscription {
    target: SyncTarget,
    guard: SubscriptionGuard,
    task: JoinHandle<()>,
}

pub struct RemoteSyncBridge {
    store: Arc<dyn DocumentStore>,
    active: Option<ActiveSubscription>,
}

impl RemoteSyncBridge {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            active: None,
        }
    }

    pub fn current(&self) -> Option<&SyncTarget> {
        self.active.as_ref().map(|a| &a.target)
    }

    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.task.is_finished())
    }

    /// Points the bridge at `target`. The old subscription is torn down
    /// before the new one opens. Returns false if the target is unchanged;
    /// an interrupted subscription stays down until [`Self::resync`].
    pub fn retarget(&mut self, target: Option<SyncTarget>, sink: Arc<dyn SnapshotSink>) -> bool {
        if self.current() == target.as_ref() {
            return false;
        }
        self.stop();
        if let Some(target) = target {
            self.open(target, sink);
        }
        true
    }

    /// Reopens the current subscription, e.g. after it was interrupted.
    pub fn resync(&mut self, sink: Arc<dyn SnapshotSink>) -> bool {
        let Some(target) = self.current().cloned() else {
            return false;
        };
        self.stop();
        self.open(target, sink);
        true
    }

    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(user = %active.target.user, trip = %active.target.trip, "closing place subscription");
            // Unsubscribe now; the aborted task may not be polled again soon.
            drop(active.guard);
            active.task.abort();
        }
    }

    fn open(&mut self, target: SyncTarget, sink: Arc<dyn SnapshotSink>) {
        info!(user = %target.user, trip = %target.trip, "opening place subscription");
        let PlaceSubscription {
            mut snapshots,
            guard,
        } = self.store.subscribe_places(&target.user, &target.trip);
        let task_target = target.clone();
        let task = tokio::spawn(async move {
            while let Some(next) = snapshots.next().await {
                match next {
                    Ok(records) => {
                        debug!(count = records.len(), "place snapshot");
                        let places = records.into_iter().map(Place::from_record).collect();
                        sink.snapshot(&task_target, places);
                    }
                    Err(e) => {
                        warn!(error = %e, trip = %task_target.trip, "place subscription failed");
                        sink.interrupted(&task_target, e);
                        return;
                    }
                }
            }
            debug!(trip = %task_target.trip, "place subscription ended");
        });
        self.active = Some(ActiveSubscription {
            target,
            guard,
            task,
        });
    }
}

impl Drop for RemoteSyncBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::memory::MemoryDocumentStore;
    use crate::model::{date_to_timestamp, Content, Coordinates, NewTrip, PlaceDocument, Tags};
    use chrono::NaiveDate;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        snapshots: Mutex<Vec<(SyncTarget, Vec<String>)>>,
        errors: Mutex<Vec<(SyncTarget, DocumentError)>>,
    }

    impl SnapshotSink for Recorder {
        fn snapshot(&self, target: &SyncTarget, places: Vec<Place>) {
            let names = places.into_iter().map(|p| p.name).collect();
            self.snapshots.lock().unwrap().push((target.clone(), names));
        }

        fn interrupted(&self, target: &SyncTarget, error: DocumentError) {
            self.errors.lock().unwrap().push((target.clone(), error));
        }
    }

    fn doc(name: &str) -> PlaceDocument {
        PlaceDocument {
            name: name.into(),
            coordinates: Coordinates::new(1.0, 1.0).unwrap(),
            address: String::new(),
            visited_date: NaiveDate::from_ymd_opt(2024, 3, 1).map(date_to_timestamp),
            content: Content::default(),
            tags: Tags::new(),
            rating: 4.5,
            color: String::new(),
            is_public: false,
            created_at: None,
            updated_at: None,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn trip(store: &MemoryDocumentStore, user: &UserId, title: &str) -> TripId {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        store
            .create_trip(user, NewTrip::single_day(title, day))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_one_subscription_per_target() {
        let store = Arc::new(MemoryDocumentStore::new());
        let user = UserId::new("u");
        let t1 = trip(&store, &user, "One").await;
        let sink = Arc::new(Recorder::default());
        let mut bridge = RemoteSyncBridge::new(store.clone());

        let target = SyncTarget::new(user.clone(), t1.clone());
        assert!(bridge.retarget(Some(target.clone()), sink.clone()));
        assert!(!bridge.retarget(Some(target.clone()), sink.clone()));
        settle().await;

        assert_eq!(store.subscriptions_opened(), 1);
        assert_eq!(store.live_subscribers(&user, &t1), 1);
        assert_eq!(sink.snapshots.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshots_follow_writes() {
        let store = Arc::new(MemoryDocumentStore::new());
        let user = UserId::new("u");
        let t1 = trip(&store, &user, "One").await;
        let sink = Arc::new(Recorder::default());
        let mut bridge = RemoteSyncBridge::new(store.clone());
        bridge.retarget(Some(SyncTarget::new(user.clone(), t1.clone())), sink.clone());
        settle().await;

        store.seed_place(&user, &t1, doc("Wat Pho"));
        settle().await;

        let snapshots = sink.snapshots.lock().unwrap();
        assert_eq!(snapshots.last().map(|(_, n)| n.clone()), Some(vec!["Wat Pho".to_string()]));
    }

    #[tokio::test]
    async fn test_switching_trips_tears_down_old_subscription() {
        let store = Arc::new(MemoryDocumentStore::new());
        let user = UserId::new("u");
        let t1 = trip(&store, &user, "One").await;
        let t2 = trip(&store, &user, "Two").await;
        let sink = Arc::new(Recorder::default());
        let mut bridge = RemoteSyncBridge::new(store.clone());

        bridge.retarget(Some(SyncTarget::new(user.clone(), t1.clone())), sink.clone());
        settle().await;
        bridge.retarget(Some(SyncTarget::new(user.clone(), t2.clone())), sink.clone());
        settle().await;

        assert_eq!(store.live_subscribers(&user, &t1), 0);
        assert_eq!(store.live_subscribers(&user, &t2), 1);

        // Writes to the old trip no longer reach the sink.
        let before = sink.snapshots.lock().unwrap().len();
        store.seed_place(&user, &t1, doc("late"));
        settle().await;
        assert_eq!(sink.snapshots.lock().unwrap().len(), before);

        bridge.retarget(None, sink.clone());
        settle().await;
        assert!(bridge.current().is_none());
        assert_eq!(store.live_subscribers(&user, &t2), 0);
    }

    #[tokio::test]
    async fn test_stop_releases_subscription_immediately() {
        let store = Arc::new(MemoryDocumentStore::new());
        let user = UserId::new("u");
        let t1 = trip(&store, &user, "One").await;
        let sink = Arc::new(Recorder::default());
        let mut bridge = RemoteSyncBridge::new(store.clone());
        bridge.retarget(Some(SyncTarget::new(user.clone(), t1.clone())), sink.clone());
        settle().await;
        assert_eq!(store.live_subscribers(&user, &t1), 1);

        // No yield between stop and the check.
        bridge.stop();
        assert_eq!(store.live_subscribers(&user, &t1), 0);
    }

    #[tokio::test]
    async fn test_interruption_and_resync() {
        let store = Arc::new(MemoryDocumentStore::new());
        let user = UserId::new("u");
        let t1 = trip(&store, &user, "One").await;
        let sink = Arc::new(Recorder::default());
        let mut bridge = RemoteSyncBridge::new(store.clone());
        bridge.retarget(Some(SyncTarget::new(user.clone(), t1.clone())), sink.clone());
        settle().await;

        store.fail_subscriptions(&user, &t1, DocumentError::Unavailable("network drop".into()));
        settle().await;
        assert_eq!(sink.errors.lock().unwrap().len(), 1);
        assert!(!bridge.is_running());

        // Same target does not silently reconnect.
        assert!(!bridge.retarget(Some(SyncTarget::new(user.clone(), t1.clone())), sink.clone()));
        assert_eq!(store.subscriptions_opened(), 1);

        assert!(bridge.resync(sink.clone()));
        settle().await;
        assert_eq!(store.subscriptions_opened(), 2);
        assert_eq!(store.live_subscribers(&user, &t1), 1);
    }
}
