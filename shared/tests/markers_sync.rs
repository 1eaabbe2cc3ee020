use chrono::NaiveDate;
use proptest::prelude::*;
use secrecy::SecretString;
use std::collections::BTreeSet;
use std::sync::Arc;

use traveldot::app::{SyncStatus, ToastKind};
use traveldot::capabilities::memory::{
    MemoryAuth, MemoryBackend, RecordingMap, StaticPlaceLookup,
};
use traveldot::capabilities::{DocumentError, DocumentStore, MarkerClick};
use traveldot::markers::{MarkerKey, MarkerReconciler};
use traveldot::model::{
    Content, Coordinates, MarkerColor, Place, PlaceDocument, PlaceId, PlacePatch, Tags,
    PLACE_RATING,
};
use traveldot::{Journal, JournalConfig};

const EMAIL: &str = "traveller@example.com";
const PASSWORD: &str = "correct-horse";

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn document(name: &str, lat: f64) -> PlaceDocument {
    PlaceDocument {
        name: name.into(),
        coordinates: Coordinates::new(lat, 100.5).unwrap(),
        address: String::new(),
        visited_date: None,
        content: Content::default(),
        tags: Tags::new(),
        rating: PLACE_RATING,
        color: MarkerColor::Red.hex().to_string(),
        is_public: false,
        created_at: None,
        updated_at: None,
    }
}

async fn journal() -> (Journal<RecordingMap>, Arc<RecordingMap>, MemoryBackend) {
    let backend = MemoryBackend::new(
        MemoryAuth::new().with_account(EMAIL, PASSWORD),
        StaticPlaceLookup::default(),
    );
    let map = Arc::new(RecordingMap::new());
    let journal = Journal::new(JournalConfig::default(), backend.services(), Arc::clone(&map)).unwrap();
    journal
        .sign_in(EMAIL, &SecretString::new(PASSWORD.into()))
        .await
        .unwrap();
    settle().await;
    (journal, map, backend)
}

#[tokio::test]
async fn test_switching_selection_keeps_one_selected_marker() {
    let (journal, map, backend) = journal().await;
    let (user, trip) = journal.with_model(|m| (m.user_id().cloned().unwrap(), m.current_trip.clone().unwrap()));
    let a = backend.documents.seed_place(&user, &trip, document("A", 13.0));
    let b = backend.documents.seed_place(&user, &trip, document("B", 14.0));
    settle().await;
    assert_eq!(map.regular_ids(), BTreeSet::from([a.clone(), b.clone()]));

    journal.select_place_by_id(&a);
    journal.select_place_by_id(&b);

    let selected = map.selected_markers();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].title, "B");
    // The selected place is drawn only once.
    assert_eq!(map.regular_ids(), BTreeSet::from([a]));
    assert_eq!(map.live_count(), 2);

    journal.map_clicked();
    assert!(map.selected_markers().is_empty());
    assert_eq!(map.regular_ids().len(), 2);
}

#[tokio::test]
async fn test_remote_edit_updates_marker_in_place() {
    let (journal, map, backend) = journal().await;
    let (user, trip) = journal.with_model(|m| (m.user_id().cloned().unwrap(), m.current_trip.clone().unwrap()));
    let id = backend.documents.seed_place(&user, &trip, document("Before", 13.0));
    settle().await;
    let created = map.op_counts().created;

    let mut patch_doc = document("After", 13.0);
    patch_doc.color = MarkerColor::Yellow.hex().to_string();
    backend
        .documents
        .update_place(
            &user,
            &trip,
            &id,
            PlacePatch {
                name: Some(patch_doc.name),
                visited_date: None,
                content: None,
                tags: None,
                rating: None,
                color: Some(patch_doc.color),
                is_public: None,
                updated_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
    settle().await;

    let spec = map.marker(&MarkerKey::Place(id)).unwrap();
    assert_eq!(spec.title, "After");
    assert_eq!(spec.color, MarkerColor::Yellow);
    assert_eq!(map.op_counts().created, created);
    assert!(map.op_counts().updated >= 1);
}

#[tokio::test]
async fn test_switching_trips_swaps_subscription_and_markers() {
    let (journal, map, backend) = journal().await;
    let (user, first) = journal.with_model(|m| (m.user_id().cloned().unwrap(), m.current_trip.clone().unwrap()));
    backend.documents.seed_place(&user, &first, document("First trip place", 13.0));
    settle().await;
    assert_eq!(map.live_count(), 1);

    let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let second = journal.create_trip("Islands", day, day).await.unwrap();
    journal.switch_trip(&second.id);
    settle().await;

    assert_eq!(backend.documents.live_subscribers(&user, &first), 0);
    assert_eq!(backend.documents.live_subscribers(&user, &second.id), 1);
    assert_eq!(map.live_count(), 0);

    // Late writes to the old trip stay off the map.
    backend.documents.seed_place(&user, &first, document("Late", 14.0));
    settle().await;
    assert_eq!(map.live_count(), 0);
    assert!(journal.view().places.is_empty());
}

#[tokio::test]
async fn test_interrupted_subscription_warns_and_resyncs() {
    let (journal, _map, backend) = journal().await;
    let (user, trip) = journal.with_model(|m| (m.user_id().cloned().unwrap(), m.current_trip.clone().unwrap()));

    backend.documents.fail_subscriptions(
        &user,
        &trip,
        DocumentError::Unavailable("connection lost".into()),
    );
    settle().await;
    let view = journal.view();
    assert!(matches!(view.sync, SyncStatus::Interrupted { .. }));
    assert!(view.toasts.iter().any(|t| t.kind == ToastKind::Warning));
    let opened = backend.documents.subscriptions_opened();

    // Unrelated events do not reconnect on their own.
    journal.toggle_layout();
    assert_eq!(backend.documents.subscriptions_opened(), opened);

    assert!(journal.resync());
    settle().await;
    assert_eq!(backend.documents.subscriptions_opened(), opened + 1);
    assert_eq!(journal.view().sync, SyncStatus::Live);
}

#[tokio::test]
async fn test_sign_out_tears_everything_down() {
    let (journal, map, backend) = journal().await;
    let (user, trip) = journal.with_model(|m| (m.user_id().cloned().unwrap(), m.current_trip.clone().unwrap()));
    backend.documents.seed_place(&user, &trip, document("Kept remotely", 13.0));
    settle().await;

    journal.sign_out().await.unwrap();
    settle().await;
    assert_eq!(map.live_count(), 0);
    assert_eq!(backend.documents.live_subscribers(&user, &trip), 0);
    assert_eq!(backend.documents.places(&user, &trip).len(), 1);
}

fn place(id: u8, lat: f64, color: MarkerColor) -> Place {
    let mut p = Place::unsaved(format!("p{id}"), Coordinates::new(lat, 100.0).unwrap(), None);
    p.id = Some(PlaceId::new(format!("p{id}")));
    p.color = color;
    p
}

fn arb_places() -> impl Strategy<Value = Vec<Place>> {
    prop::collection::vec(
        (0u8..12, -80.0f64..80.0, prop::sample::select(MarkerColor::ALL.to_vec())),
        0..10,
    )
    .prop_map(|raw| raw.into_iter().map(|(id, lat, c)| place(id, lat, c)).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reconciler_matches_store_after_any_sequence(
        steps in prop::collection::vec((arb_places(), prop::option::of(0usize..10)), 1..6)
    ) {
        let map = Arc::new(RecordingMap::new());
        let mut reconciler = MarkerReconciler::new(Arc::clone(&map));
        let noop = |_: PlaceId| -> MarkerClick { Arc::new(|| {}) };

        for (places, pick) in &steps {
            let selected = pick.and_then(|i| places.get(i));
            reconciler.reconcile(places, selected, noop);

            let selected_id = selected.and_then(|p| p.id.clone());
            let expected: BTreeSet<PlaceId> = places
                .iter()
                .filter_map(|p| p.id.clone())
                .filter(|id| Some(id) != selected_id.as_ref())
                .collect();
            prop_assert_eq!(map.regular_ids(), expected.clone());
            prop_assert_eq!(map.selected_markers().len(), usize::from(selected.is_some()));
            prop_assert_eq!(map.live_count(), expected.len() + usize::from(selected.is_some()));
        }

        reconciler.clear();
        prop_assert_eq!(map.live_count(), 0);
    }
}
