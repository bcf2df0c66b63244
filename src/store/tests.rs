use super::*;
use crate::db::schema;
use crate::optimal_hour::calculate_optimal_start_hour;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_stream::StreamExt;

fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

async fn open(location: StoreLocation) -> SessionStore {
    let store = SessionStore::new(location);
    store.initialize().await.unwrap();
    store
}

/// One initialized store per backend; every behavior must match on both
async fn stores() -> Vec<SessionStore> {
    vec![
        open(StoreLocation::SqliteInMemory).await,
        open(StoreLocation::Ephemeral).await,
    ]
}

fn count_calls(store: &SessionStore) -> (Arc<AtomicUsize>, Subscription) {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let sub = store.add_change_listener(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    (calls, sub)
}

async fn expected_hour(store: &SessionStore) -> u8 {
    calculate_optimal_start_hour(&store.get_all_sessions().await.unwrap())
}

#[tokio::test]
async fn test_operations_fail_before_initialize() {
    let store = SessionStore::new(StoreLocation::Ephemeral);
    assert!(!store.is_initialized());

    let session = Session::new("570", at(10, 1, 0), at(10, 2, 0));
    assert!(matches!(
        store.add_session(session.clone()).await,
        Err(CoreError::NotInitialized)
    ));
    assert!(matches!(
        store.add_sessions(vec![session.clone()]).await,
        Err(CoreError::NotInitialized)
    ));
    assert!(matches!(store.get_session(1).await, Err(CoreError::NotInitialized)));
    assert!(matches!(store.get_all_sessions().await, Err(CoreError::NotInitialized)));
    assert!(matches!(
        store.get_sessions_by_date_range(at(10, 0, 0), at(11, 0, 0)).await,
        Err(CoreError::NotInitialized)
    ));
    assert!(matches!(store.update_session(session).await, Err(CoreError::NotInitialized)));
    assert!(matches!(store.delete_session(1).await, Err(CoreError::NotInitialized)));
    assert!(matches!(store.clear_all_sessions().await, Err(CoreError::NotInitialized)));
    assert!(matches!(store.get_session_count().await, Err(CoreError::NotInitialized)));
    assert!(matches!(store.get_optimal_start_hour().await, Err(CoreError::NotInitialized)));
    assert!(matches!(
        store.recalculate_optimal_start_hour().await,
        Err(CoreError::NotInitialized)
    ));

    store.initialize().await.unwrap();
    assert!(store.is_initialized());
    assert_eq!(store.get_session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_add_and_get_session() {
    for store in stores().await {
        let session = Session::new("570", at(10, 20, 0), at(10, 21, 0)).with_account("1001");
        let id = store.add_session(session.clone()).await.unwrap();

        let stored = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.app_id, "570");
        assert_eq!(stored.account_id.as_deref(), Some("1001"));
        assert_eq!(stored.start_time, session.start_time);
        assert_eq!(stored.end_time, session.end_time);

        assert!(store.get_session(id + 100).await.unwrap().is_none());
        assert_eq!(store.get_session_count().await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_entries_survive_storage() {
    use crate::session::{AchievementEntry, MarkerEntry};

    for store in stores().await {
        let mut session = Session::new("1091500", at(10, 20, 0), at(10, 23, 0));
        session.achievement_entries.push(AchievementEntry {
            id: "ach-1".to_string(),
            time: at(10, 21, 15),
            achievement_id: "PROLOGUE_DONE".to_string(),
        });
        session.marker_entries.push(MarkerEntry {
            id: "mark-1".to_string(),
            time: at(10, 22, 0),
            marker_id: "clip".to_string(),
        });

        let id = store.add_session(session.clone()).await.unwrap();
        let stored = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(stored.achievement_entries, session.achievement_entries);
        assert_eq!(stored.marker_entries, session.marker_entries);
    }
}

#[tokio::test]
async fn test_update_requires_id() {
    for store in stores().await {
        let (calls, _sub) = count_calls(&store);
        let result = store
            .update_session(Session::new("570", at(10, 1, 0), at(10, 2, 0)))
            .await;

        assert!(matches!(result, Err(CoreError::InvalidArgument(_))));
        assert_eq!(store.get_session_count().await.unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_update_overwrites_record() {
    for store in stores().await {
        let id = store
            .add_session(Session::new("570", at(10, 20, 0), at(10, 20, 5)))
            .await
            .unwrap();

        let mut session = store.get_session(id).await.unwrap().unwrap();
        session.end_time = at(10, 23, 40);
        store.update_session(session).await.unwrap();

        let stored = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(stored.end_time, at(10, 23, 40));
        assert_eq!(store.get_session_count().await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_date_range_is_containment() {
    for store in stores().await {
        store
            .add_sessions(vec![
                // inside, added out of order
                Session::new("b", at(12, 14, 0), at(12, 17, 45)),
                Session::new("a", at(11, 9, 0), at(11, 10, 0)),
                // starts before the range
                Session::new("c", at(9, 23, 0), at(10, 1, 0)),
                // ends after the range
                Session::new("d", at(16, 22, 0), at(17, 2, 0)),
                // covers the whole range
                Session::new("e", at(9, 0, 0), at(18, 0, 0)),
                // exactly on both bounds
                Session::new("f", at(10, 0, 0), at(16, 23, 59)),
            ])
            .await
            .unwrap();

        let found = store
            .get_sessions_by_date_range(at(10, 0, 0), at(16, 23, 59))
            .await
            .unwrap();
        let apps: Vec<&str> = found.iter().map(|s| s.app_id.as_str()).collect();
        assert_eq!(apps, vec!["f", "a", "b"]);
        assert!(found
            .iter()
            .all(|s| s.start_time >= at(10, 0, 0) && s.end_time <= at(16, 23, 59)));
    }
}

#[tokio::test]
async fn test_lookup_by_app_and_account() {
    for store in stores().await {
        store
            .add_sessions(vec![
                Session::new("570", at(10, 1, 0), at(10, 2, 0)),
                Session::new("570", at(11, 1, 0), at(11, 2, 0)).with_account("1001"),
                Session::new("730", at(12, 1, 0), at(12, 2, 0)).with_account("1001"),
            ])
            .await
            .unwrap();

        assert_eq!(store.get_sessions_by_app("570").await.unwrap().len(), 2);
        assert_eq!(store.get_sessions_by_app("999").await.unwrap().len(), 0);

        let mine = store.get_sessions_by_account(None).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert!(mine[0].is_local());

        let friend = store.get_sessions_by_account(Some("1001")).await.unwrap();
        let apps: Vec<&str> = friend.iter().map(|s| s.app_id.as_str()).collect();
        assert_eq!(apps, vec!["570", "730"]);
    }
}

#[tokio::test]
async fn test_optimal_hour_tracks_every_mutation() {
    for store in stores().await {
        let id = store
            .add_session(Session::new("570", at(10, 1, 0), at(10, 2, 0)))
            .await
            .unwrap();
        assert_eq!(store.get_optimal_start_hour().await.unwrap(), 3);

        store
            .add_session(Session::new("570", at(10, 0, 0), at(10, 1, 0)))
            .await
            .unwrap();
        assert_eq!(store.get_optimal_start_hour().await.unwrap(), expected_hour(&store).await);
        assert_eq!(store.get_optimal_start_hour().await.unwrap(), 5);

        let mut first = store.get_session(id).await.unwrap().unwrap();
        first.start_time = at(10, 18, 0);
        first.end_time = at(11, 1, 30);
        store.update_session(first).await.unwrap();
        assert_eq!(store.get_optimal_start_hour().await.unwrap(), expected_hour(&store).await);

        store.delete_session(id).await.unwrap();
        assert_eq!(store.get_optimal_start_hour().await.unwrap(), expected_hour(&store).await);

        store.clear_all_sessions().await.unwrap();
        assert_eq!(store.get_optimal_start_hour().await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_metadata_created_lazily() {
    for store in stores().await {
        let metadata = store.get_timeline_metadata().await.unwrap();
        assert_eq!(metadata.optimal_start_hour, 0);

        // Second read returns the cached record
        let again = store.get_timeline_metadata().await.unwrap();
        assert_eq!(again.last_calculated, metadata.last_calculated);
    }
}

#[tokio::test]
async fn test_manual_recalculation_matches_automatic() {
    for store in stores().await {
        let (calls, _sub) = count_calls(&store);
        store
            .add_session(Session::new("570", at(10, 22, 0), at(11, 3, 0)))
            .await
            .unwrap();
        let automatic = store.get_optimal_start_hour().await.unwrap();

        assert_eq!(store.recalculate_optimal_start_hour().await.unwrap(), automatic);
        assert_eq!(store.recalculate_optimal_start_hour().await.unwrap(), automatic);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_one_notification_per_mutation() {
    for store in stores().await {
        let (calls, _sub) = count_calls(&store);

        let id = store
            .add_session(Session::new("570", at(10, 1, 0), at(10, 2, 0)))
            .await
            .unwrap();
        store
            .add_sessions(vec![
                Session::new("570", at(11, 1, 0), at(11, 2, 0)),
                Session::new("570", at(12, 1, 0), at(12, 2, 0)),
                Session::new("570", at(13, 1, 0), at(13, 2, 0)),
            ])
            .await
            .unwrap();
        let mut session = store.get_session(id).await.unwrap().unwrap();
        session.end_time = at(10, 3, 0);
        store.update_session(session).await.unwrap();
        store.delete_session(id).await.unwrap();
        store.clear_all_sessions().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}

#[tokio::test]
async fn test_panicking_listener_is_isolated() {
    for store in stores().await {
        let _bad = store.add_change_listener(|| panic!("listener failure"));
        let (calls, _sub) = count_calls(&store);

        store
            .add_session(Session::new("570", at(10, 1, 0), at(10, 2, 0)))
            .await
            .unwrap();
        store
            .add_session(Session::new("570", at(11, 1, 0), at(11, 2, 0)))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

#[tokio::test]
async fn test_unsubscribed_listener_stops_receiving() {
    for store in stores().await {
        let (calls, sub) = count_calls(&store);
        store
            .add_session(Session::new("570", at(10, 1, 0), at(10, 2, 0)))
            .await
            .unwrap();

        sub.unsubscribe();
        sub.unsubscribe();
        store.clear_all_sessions().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_change_stream_sees_consistent_state() {
    for store in stores().await {
        let store = Arc::new(store);
        let mut changes = Box::pin(store.changes());

        let writer = Arc::clone(&store);
        tokio::spawn(async move {
            writer
                .add_session(Session::new("570", at(10, 23, 30), at(11, 2, 15)))
                .await
                .unwrap();
        });

        changes.next().await.unwrap();
        assert_eq!(store.get_session_count().await.unwrap(), 1);
        assert_eq!(
            store.get_optimal_start_hour().await.unwrap(),
            expected_hour(&store).await
        );
    }
}

#[tokio::test]
async fn test_failed_batch_is_all_or_nothing() {
    for store in stores().await {
        let existing = store
            .add_session(Session::new("570", at(10, 1, 0), at(10, 2, 0)))
            .await
            .unwrap();
        let hour_before = store.get_optimal_start_hour().await.unwrap();
        let (calls, _sub) = count_calls(&store);

        let mut clash = Session::new("730", at(12, 20, 0), at(12, 23, 0));
        clash.id = Some(existing);
        let result = store
            .add_sessions(vec![
                Session::new("730", at(11, 8, 0), at(11, 12, 0)),
                Session::new("730", at(11, 13, 0), at(11, 18, 0)),
                clash,
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(store.get_session_count().await.unwrap(), 1);
        assert_eq!(store.get_optimal_start_hour().await.unwrap(), hour_before);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_duplicate_explicit_id_is_rejected() {
    for store in stores().await {
        let id = store
            .add_session(Session::new("570", at(10, 1, 0), at(10, 2, 0)))
            .await
            .unwrap();
        let mut again = Session::new("570", at(11, 1, 0), at(11, 2, 0));
        again.id = Some(id);

        assert!(store.add_session(again).await.is_err());
        assert_eq!(store.get_session_count().await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_delete_missing_session_is_not_an_error() {
    for store in stores().await {
        store.delete_session(42).await.unwrap();
        assert_eq!(store.get_session_count().await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_concurrent_initialize_seeds_once() {
    let seed = vec![
        Session::new("570", at(10, 20, 0), at(10, 22, 0)),
        Session::new("730", at(11, 23, 0), at(12, 1, 0)),
    ];

    for location in [StoreLocation::SqliteInMemory, StoreLocation::Ephemeral] {
        let store = SessionStore::new(location).with_seed(seed.clone());
        let (a, b) = tokio::join!(store.initialize(), store.initialize());
        a.unwrap();
        b.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.get_session_count().await.unwrap(), seed.len());
        assert_eq!(
            store.get_optimal_start_hour().await.unwrap(),
            calculate_optimal_start_hour(&seed)
        );
    }
}

#[tokio::test]
async fn test_backends_agree() {
    let sqlite = open(StoreLocation::SqliteInMemory).await;
    let memory = open(StoreLocation::Ephemeral).await;

    for store in [&sqlite, &memory] {
        store
            .add_sessions(vec![
                Session::new("570", at(10, 20, 0), at(10, 23, 0)),
                Session::new("730", at(11, 23, 30), at(12, 2, 15)).with_account("1001"),
                Session::new("440", at(12, 8, 0), at(12, 9, 30)),
            ])
            .await
            .unwrap();
        let id = store
            .add_session(Session::new("570", at(13, 19, 0), at(13, 21, 0)))
            .await
            .unwrap();
        store.delete_session(id - 2).await.unwrap();
    }

    assert_eq!(
        sqlite.get_all_sessions().await.unwrap(),
        memory.get_all_sessions().await.unwrap()
    );
    assert_eq!(
        sqlite
            .get_sessions_by_date_range(at(11, 0, 0), at(13, 23, 59))
            .await
            .unwrap(),
        memory
            .get_sessions_by_date_range(at(11, 0, 0), at(13, 23, 59))
            .await
            .unwrap()
    );
    assert_eq!(
        sqlite.get_optimal_start_hour().await.unwrap(),
        memory.get_optimal_start_hour().await.unwrap()
    );
}

#[tokio::test]
async fn test_file_store_persists_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timekeeper.db");

    let id = {
        let store = open(StoreLocation::File(path.clone())).await;
        store
            .add_session(Session::new("570", at(10, 1, 0), at(10, 2, 0)))
            .await
            .unwrap()
    };

    let store = open(StoreLocation::File(path)).await;
    assert_eq!(store.get_session_count().await.unwrap(), 1);
    assert!(store.get_session(id).await.unwrap().is_some());
    assert_eq!(store.get_optimal_start_hour().await.unwrap(), 3);
}

#[tokio::test]
async fn test_initialize_backfills_legacy_account_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");

    {
        let mut conn = rusqlite::Connection::open(&path).unwrap();
        schema::migrate_to(&mut conn, 1).unwrap();
        conn.execute(
            "INSERT INTO sessions (app_id, start_time, end_time) VALUES ('570', ?1, ?2)",
            [
                crate::session::to_millis(at(10, 1, 0)),
                crate::session::to_millis(at(10, 2, 0)),
            ],
        )
        .unwrap();
    }

    let store = open(StoreLocation::File(path)).await;
    let sessions = store.get_all_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].account_id.is_none());
    assert_eq!(sessions[0].start_time, at(10, 1, 0));
}

#[tokio::test]
async fn test_failed_recompute_leaves_no_stale_hour() {
    let store = open(StoreLocation::SqliteInMemory).await;
    store
        .add_session(Session::new("570", at(10, 1, 0), at(10, 2, 0)))
        .await
        .unwrap();
    assert_eq!(store.get_optimal_start_hour().await.unwrap(), 3);
    let (calls, _sub) = count_calls(&store);

    let Backend::Db(db) = store.backend().unwrap() else {
        panic!("expected sqlite backend");
    };
    db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER block_metadata_insert BEFORE INSERT ON metadata
             BEGIN SELECT RAISE(ABORT, 'metadata is read-only'); END;
             CREATE TRIGGER block_metadata_update BEFORE UPDATE ON metadata
             BEGIN SELECT RAISE(ABORT, 'metadata is read-only'); END;",
        )?;
        Ok(())
    })
    .await
    .unwrap();

    // The session commits even though the metadata write is rejected
    let result = store
        .add_session(Session::new("570", at(10, 0, 0), at(10, 1, 0)))
        .await;
    assert!(result.is_err());
    assert_eq!(store.get_session_count().await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.backend().unwrap().read_metadata().await.unwrap().is_none());

    db.with_conn(|conn| {
        conn.execute_batch(
            "DROP TRIGGER block_metadata_insert; DROP TRIGGER block_metadata_update;",
        )?;
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(store.get_optimal_start_hour().await.unwrap(), 5);
    assert_eq!(store.get_optimal_start_hour().await.unwrap(), expected_hour(&store).await);
}
