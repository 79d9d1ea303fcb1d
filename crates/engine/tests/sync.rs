use std::time::Duration;

use engine::{
    AccountOutcome, ConnectionStatus, Credential, EngineError, EngineSettings, FeedPage,
    MoneyCents, SyncStatus, TransactionListFilter,
};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use uuid::Uuid;

mod common;

use common::{Harness, USER, date, feed_tx, page};

#[tokio::test]
async fn link_refreshes_accounts_and_runs_first_sync() {
    let h = Harness::new().await;
    let (connection_id, accounts) = h.link("sandbox", &["chk", "sav"]).await;

    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].current_balance, Some(MoneyCents::new(100_000)));
    for account in &accounts {
        let state = h.engine.sync_state(account.id).await.unwrap();
        assert_eq!(state.status, SyncStatus::Synced);
        assert_eq!(state.cursor, None);
        assert!(state.last_synced_at.is_some());
    }

    let connection = h.engine.connection(connection_id, USER).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Active);
    assert_eq!(connection.institution_name, "First Bank");
}

#[tokio::test]
async fn sync_walks_every_page_and_persists_the_cursor() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    let account = &accounts[0];
    h.classifier.categorize("Coffee Shop", "Food & Drink");

    h.feed.script(
        "chk",
        None,
        page(
            vec![
                feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450),
                feed_tx("t2", "chk", date(2025, 10, 2), "Rent", 120_000),
            ],
            "c1",
            true,
        ),
    );
    h.feed.script(
        "chk",
        Some("c1"),
        page(
            vec![feed_tx("t3", "chk", date(2025, 10, 3), "Salary", -300_000)],
            "c2",
            false,
        ),
    );

    let report = h.sync(account).await.unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.added, 3);
    assert_eq!(report.newly_stored, 3);

    let state = h.engine.sync_state(account.id).await.unwrap();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.cursor.as_deref(), Some("c2"));
    assert_eq!(state.total_synced, 3);
    assert_eq!(state.last_error, None);

    let stored = h
        .engine
        .list_transactions(USER, &TransactionListFilter::default())
        .await
        .unwrap();
    let ids: Vec<&str> = stored.iter().map(|tx| tx.id.as_str()).collect();
    assert_eq!(ids, vec!["t3", "t2", "t1"]);

    let coffee = h.engine.transaction("t1", USER).await.unwrap();
    assert_eq!(coffee.category.as_deref(), Some("Food & Drink"));
    assert!(coffee.categorized_at.is_some());
    assert_eq!(coffee.account_name.as_deref(), Some("Account chk"));
    assert_eq!(coffee.institution_name.as_deref(), Some("First Bank"));
    let rent = h.engine.transaction("t2", USER).await.unwrap();
    assert_eq!(rent.category, None);

    let calls = h.feed.calls();
    assert_eq!(
        calls,
        vec![
            ("chk".to_string(), None),
            ("chk".to_string(), Some("c1".to_string()))
        ]
    );
}

#[tokio::test]
async fn replaying_a_page_does_not_duplicate_or_inflate() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    let account = &accounts[0];

    let first = page(
        vec![
            feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450),
            feed_tx("t2", "chk", date(2025, 10, 2), "Books", 2_000),
        ],
        "c1",
        false,
    );
    h.feed.script("chk", None, first.clone());
    h.sync(account).await.unwrap();

    // The provider hands the same delta out again after the stored cursor.
    h.feed.script("chk", Some("c1"), FeedPage {
        next_cursor: Some("c2".to_string()),
        ..first
    });
    let report = h.sync(account).await.unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.newly_stored, 0);

    let state = h.engine.sync_state(account.id).await.unwrap();
    assert_eq!(state.total_synced, 2);
    assert_eq!(state.cursor.as_deref(), Some("c2"));

    let stored = h
        .engine
        .list_transactions(USER, &TransactionListFilter::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn failed_sync_keeps_progress_and_resumes_at_the_failed_page() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    let account = &accounts[0];

    h.feed.script(
        "chk",
        None,
        page(
            vec![feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450)],
            "c1",
            true,
        ),
    );
    h.feed.fail_at("chk", Some("c1"));

    let err = h.sync(account).await.unwrap_err();
    assert_eq!(err, EngineError::Feed("provider unavailable".to_string()));

    let state = h.engine.sync_state(account.id).await.unwrap();
    assert_eq!(state.status, SyncStatus::Error);
    assert_eq!(state.cursor.as_deref(), Some("c1"));
    assert_eq!(state.total_synced, 1);
    assert!(state.last_error.unwrap().contains("provider unavailable"));
    assert!(h.engine.transaction("t1", USER).await.is_ok());

    h.feed.heal();
    h.feed.clear_calls();
    h.feed.script(
        "chk",
        Some("c1"),
        page(
            vec![feed_tx("t2", "chk", date(2025, 10, 2), "Books", 2_000)],
            "c2",
            false,
        ),
    );
    let report = h.sync(account).await.unwrap();
    assert_eq!(report.pages, 1);

    assert_eq!(h.feed.calls(), vec![("chk".to_string(), Some("c1".to_string()))]);
    let state = h.engine.sync_state(account.id).await.unwrap();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.cursor.as_deref(), Some("c2"));
    assert_eq!(state.total_synced, 2);
    assert_eq!(state.last_error, None);
}

#[tokio::test]
async fn interrupted_sync_resumes_from_the_stored_cursor() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    let account = &accounts[0];

    // Row as left behind by a process that died mid-sync after page c1.
    h.db.execute(Statement::from_sql_and_values(
        DbBackend::Sqlite,
        "UPDATE sync_states SET status = 'syncing', cursor = 'c1' WHERE account_id = ?",
        [account.id.into()],
    ))
    .await
    .unwrap();
    h.feed.script(
        "chk",
        Some("c1"),
        page(
            vec![feed_tx("t2", "chk", date(2025, 10, 2), "Books", 2_000)],
            "c2",
            false,
        ),
    );

    h.sync(account).await.unwrap();

    assert_eq!(h.feed.calls(), vec![("chk".to_string(), Some("c1".to_string()))]);
    let state = h.engine.sync_state(account.id).await.unwrap();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.cursor.as_deref(), Some("c2"));
    assert!(h.engine.transaction("t2", USER).await.is_ok());
}

#[tokio::test]
async fn slow_feed_times_out_as_a_feed_error() {
    let h = Harness::with_settings(EngineSettings {
        feed_timeout: Duration::from_millis(50),
        ..EngineSettings::default()
    })
    .await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    h.feed.set_delay(Duration::from_millis(200));

    let err = h.sync(&accounts[0]).await.unwrap_err();
    assert!(matches!(&err, EngineError::Feed(message) if message.contains("timed out")));

    let state = h.engine.sync_state(accounts[0].id).await.unwrap();
    assert_eq!(state.status, SyncStatus::Error);
    assert!(state.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn modified_transactions_keep_their_category() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    let account = &accounts[0];
    h.classifier.categorize("Coffee Shop", "Food & Drink");

    h.feed.script(
        "chk",
        None,
        page(
            vec![feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450)],
            "c1",
            false,
        ),
    );
    h.sync(account).await.unwrap();

    h.classifier.categorize("Coffee Shop", "Travel");
    let mut changed = feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 475);
    changed.pending = true;
    h.feed.script("chk", Some("c1"), FeedPage {
        modified: vec![changed],
        next_cursor: Some("c2".to_string()),
        ..FeedPage::default()
    });
    let report = h.sync(account).await.unwrap();
    assert_eq!(report.modified, 1);

    let tx = h.engine.transaction("t1", USER).await.unwrap();
    assert_eq!(tx.amount, MoneyCents::new(475));
    assert!(tx.pending);
    assert_eq!(tx.category.as_deref(), Some("Food & Drink"));
}

#[tokio::test]
async fn removed_transactions_are_hidden_but_kept() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    let account = &accounts[0];

    h.feed.script(
        "chk",
        None,
        page(
            vec![
                feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450),
                feed_tx("t2", "chk", date(2025, 10, 2), "Books", 2_000),
            ],
            "c1",
            false,
        ),
    );
    h.sync(account).await.unwrap();

    h.feed.script("chk", Some("c1"), FeedPage {
        removed: vec!["t1".to_string(), "unknown".to_string()],
        next_cursor: Some("c2".to_string()),
        ..FeedPage::default()
    });
    let report = h.sync(account).await.unwrap();
    assert_eq!(report.removed, 1);

    let live = h
        .engine
        .list_transactions(USER, &TransactionListFilter::default())
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, "t2");

    let everything = h
        .engine
        .list_transactions(
            USER,
            &TransactionListFilter {
                include_removed: true,
                ..TransactionListFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(everything.len(), 2);
    let removed = h.engine.transaction("t1", USER).await.unwrap();
    assert!(removed.removed_at.is_some());

    // Delivered again: the row comes back.
    h.feed.script(
        "chk",
        Some("c2"),
        page(
            vec![feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450)],
            "c3",
            false,
        ),
    );
    h.sync(account).await.unwrap();
    let restored = h.engine.transaction("t1", USER).await.unwrap();
    assert_eq!(restored.removed_at, None);
}

#[tokio::test]
async fn classifier_outage_does_not_fail_the_sync() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    let account = &accounts[0];
    h.classifier.categorize("Coffee Shop", "Food & Drink");
    h.classifier.fail_classify(true);

    h.feed.script(
        "chk",
        None,
        page(
            vec![feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450)],
            "c1",
            false,
        ),
    );
    h.sync(account).await.unwrap();

    let tx = h.engine.transaction("t1", USER).await.unwrap();
    assert_eq!(tx.category, None);
    assert_eq!(
        h.engine.sync_state(account.id).await.unwrap().status,
        SyncStatus::Synced
    );
}

#[tokio::test]
async fn entries_of_other_accounts_are_ignored() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;

    h.feed.script(
        "chk",
        None,
        page(
            vec![
                feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450),
                feed_tx("x1", "elsewhere", date(2025, 10, 1), "Stray", 100),
            ],
            "c1",
            false,
        ),
    );
    let report = h.sync(&accounts[0]).await.unwrap();
    assert_eq!(report.added, 1);
    assert!(matches!(
        h.engine.transaction("x1", USER).await,
        Err(EngineError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn stalled_cursor_is_a_feed_error() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;

    h.feed.script("chk", None, FeedPage {
        has_more: true,
        ..FeedPage::default()
    });
    let err = h.sync(&accounts[0]).await.unwrap_err();
    assert!(matches!(err, EngineError::Feed(_)));
    assert_eq!(
        h.engine.sync_state(accounts[0].id).await.unwrap().status,
        SyncStatus::Error
    );
}

#[tokio::test]
async fn account_of_another_connection_is_rejected() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;

    let err = h
        .engine
        .sync_account(
            accounts[0].id,
            &Credential::new("access-token"),
            USER,
            Uuid::new_v4(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)));
}

#[tokio::test]
async fn concurrent_syncs_of_one_account_run_one_at_a_time() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    let account = accounts[0].clone();
    h.feed.set_delay(Duration::from_millis(50));
    h.feed.script(
        "chk",
        None,
        page(
            vec![feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450)],
            "c1",
            false,
        ),
    );

    let credential = Credential::new("access-token");
    let first = h
        .engine
        .sync_account(account.id, &credential, USER, account.connection_id);
    let second = h
        .engine
        .sync_account(account.id, &credential, USER, account.connection_id);
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();

    assert_eq!(h.feed.max_in_flight(), 1);
    assert!(!h.engine.is_syncing(account.id));
    // The second run started from the cursor the first one stored.
    assert_eq!(
        h.feed.calls(),
        vec![
            ("chk".to_string(), None),
            ("chk".to_string(), Some("c1".to_string()))
        ]
    );
}

#[tokio::test]
async fn connection_sync_isolates_account_failures() {
    let h = Harness::new().await;
    let (connection_id, accounts) = h.link("sandbox", &["chk", "sav"]).await;
    let credential = h.credential(connection_id).await;

    h.feed.fail_at("chk", None);
    h.feed.script(
        "sav",
        None,
        page(
            vec![feed_tx("s1", "sav", date(2025, 10, 1), "Interest", -120)],
            "c1",
            false,
        ),
    );

    let report = h
        .engine
        .sync_connection(connection_id, USER, &credential)
        .await
        .unwrap();
    assert_eq!(report.accounts.len(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.connection_error, None);

    let chk = accounts.iter().find(|a| a.external_id == "chk").unwrap();
    let sav = accounts.iter().find(|a| a.external_id == "sav").unwrap();
    let failed = report
        .accounts
        .iter()
        .find(|outcome| outcome.account_id() == chk.id)
        .unwrap();
    assert!(matches!(failed, AccountOutcome::Failed { .. }));

    assert_eq!(
        h.engine.sync_state(chk.id).await.unwrap().status,
        SyncStatus::Error
    );
    assert_eq!(
        h.engine.sync_state(sav.id).await.unwrap().status,
        SyncStatus::Synced
    );
    assert!(h.engine.transaction("s1", USER).await.is_ok());
}

#[tokio::test]
async fn balance_refresh_failure_is_recorded_and_sync_continues() {
    let h = Harness::new().await;
    let (connection_id, accounts) = h.link("sandbox", &["chk"]).await;
    let credential = h.credential(connection_id).await;

    h.feed.fail_accounts(true);
    h.feed.script(
        "chk",
        None,
        page(
            vec![feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450)],
            "c1",
            false,
        ),
    );
    let report = h
        .engine
        .sync_connection(connection_id, USER, &credential)
        .await
        .unwrap();
    assert!(report.connection_error.is_some());
    assert_eq!(report.failed(), 0);

    let connection = h.engine.connection(connection_id, USER).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Error);
    assert!(connection.last_error.unwrap().contains("balance endpoint down"));
    assert!(h.engine.transaction("t1", USER).await.is_ok());

    h.feed.fail_accounts(false);
    h.engine
        .sync_connection(connection_id, USER, &credential)
        .await
        .unwrap();
    let connection = h.engine.connection(connection_id, USER).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Active);
    assert_eq!(connection.last_error, None);
    assert_eq!(accounts.len(), 1);
}

#[tokio::test]
async fn unknown_connection_is_the_only_coordinator_error() {
    let h = Harness::new().await;
    let err = h
        .engine
        .sync_connection(Uuid::new_v4(), USER, &Credential::new("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::KeyNotFound(_)));
}

#[tokio::test]
async fn batch_sync_covers_one_environment_and_survives_failures() {
    let h = Harness::new().await;
    let (_, broken) = h.link("sandbox", &["chk"]).await;
    let (_, healthy) = h.link("sandbox", &["sav"]).await;
    let (_, other_env) = h.link("production", &["biz"]).await;

    h.feed.fail_at("chk", None);
    h.feed.script(
        "sav",
        None,
        page(
            vec![feed_tx("s1", "sav", date(2025, 10, 1), "Interest", -120)],
            "c1",
            false,
        ),
    );

    let report = h.engine.sync_environment("sandbox").await.unwrap();
    assert_eq!(report.connections, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, broken[0].connection_id);

    assert_eq!(
        h.engine.sync_state(healthy[0].id).await.unwrap().cursor.as_deref(),
        Some("c1")
    );
    assert!(
        h.feed
            .calls()
            .iter()
            .all(|(account, _)| account != &other_env[0].external_id)
    );
}

#[tokio::test]
async fn custom_batch_function_sees_each_connection_once() {
    let h = Harness::new().await;
    h.link("sandbox", &["a"]).await;
    h.link("sandbox", &["b"]).await;

    let seen = std::sync::Mutex::new(Vec::new());
    let report = h
        .engine
        .sync_all_users("sandbox", |connection| {
            seen.lock().unwrap().push(connection.id);
            async move {
                if connection.environment == "sandbox" {
                    Ok(())
                } else {
                    Err(EngineError::InvalidState("wrong environment".to_string()))
                }
            }
        })
        .await
        .unwrap();
    assert_eq!(report.connections, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn deleting_a_connection_removes_its_data() {
    let h = Harness::new().await;
    let (connection_id, accounts) = h.link("sandbox", &["chk"]).await;
    h.feed.script(
        "chk",
        None,
        page(
            vec![feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450)],
            "c1",
            false,
        ),
    );
    h.sync(&accounts[0]).await.unwrap();

    h.engine.delete_connection(connection_id, USER).await.unwrap();

    assert!(h.engine.list_connections(USER).await.unwrap().is_empty());
    assert!(matches!(
        h.engine.account(accounts[0].id, USER).await,
        Err(EngineError::KeyNotFound(_))
    ));
    assert!(matches!(
        h.engine.sync_state(accounts[0].id).await,
        Err(EngineError::KeyNotFound(_))
    ));
    let remaining = h
        .engine
        .list_transactions(
            USER,
            &TransactionListFilter {
                include_removed: true,
                ..TransactionListFilter::default()
            },
        )
        .await
        .unwrap();
    assert!(remaining.is_empty());

    let again = h.engine.delete_connection(connection_id, USER).await;
    assert!(matches!(again, Err(EngineError::KeyNotFound(_))));
}

#[tokio::test]
async fn relinked_account_keeps_its_history_when_the_old_connection_goes() {
    let h = Harness::new().await;
    let (first, accounts) = h.link("sandbox", &["chk"]).await;
    h.feed.script(
        "chk",
        None,
        page(
            vec![feed_tx("t1", "chk", date(2025, 10, 1), "Coffee Shop", 450)],
            "c1",
            false,
        ),
    );
    h.sync(&accounts[0]).await.unwrap();

    let (second, relinked) = h.link("sandbox", &["chk"]).await;
    assert_eq!(relinked[0].id, accounts[0].id);
    assert_eq!(
        h.engine.transaction("t1", USER).await.unwrap().connection_id,
        second
    );

    h.engine.delete_connection(first, USER).await.unwrap();

    let account = h.engine.account(accounts[0].id, USER).await.unwrap();
    assert_eq!(account.connection_id, second);
    let state = h.engine.sync_state(account.id).await.unwrap();
    assert_eq!(state.cursor.as_deref(), Some("c1"));
    let t1 = h.engine.transaction("t1", USER).await.unwrap();
    assert_eq!(t1.connection_id, second);
    assert_eq!(t1.institution_name.as_deref(), Some("First Bank"));
}

#[tokio::test]
async fn transactions_filter_by_date_range() {
    let h = Harness::new().await;
    let (_, accounts) = h.link("sandbox", &["chk"]).await;
    h.feed.script(
        "chk",
        None,
        page(
            vec![
                feed_tx("t1", "chk", date(2025, 9, 30), "Old", 100),
                feed_tx("t2", "chk", date(2025, 10, 1), "In", 200),
                feed_tx("t3", "chk", date(2025, 10, 31), "Edge", 300),
            ],
            "c1",
            false,
        ),
    );
    h.sync(&accounts[0]).await.unwrap();

    let october = h
        .engine
        .list_transactions(
            USER,
            &TransactionListFilter {
                from: Some(date(2025, 10, 1)),
                to: Some(date(2025, 10, 31)),
                ..TransactionListFilter::default()
            },
        )
        .await
        .unwrap();
    let ids: Vec<&str> = october.iter().map(|tx| tx.id.as_str()).collect();
    assert_eq!(ids, vec!["t3", "t2"]);

    let inverted = h
        .engine
        .list_transactions(
            USER,
            &TransactionListFilter {
                from: Some(date(2025, 11, 1)),
                to: Some(date(2025, 10, 1)),
                ..TransactionListFilter::default()
            },
        )
        .await;
    assert!(matches!(inverted, Err(EngineError::Configuration(_))));
}
