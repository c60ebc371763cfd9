//! Cross-component scenarios: ledger, sessions, locks and the scheduler wired
//! together the way a game host uses them.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LeaderboardConfig;
use crate::db::Database;
use crate::economy::EconomyService;
use crate::leaderboard::{
    Board, LeaderboardPostsRepository, LeaderboardPublisher, LeaderboardRepository,
    LeaderboardSink,
};
use crate::ledger::{AccountId, Ledger};
use crate::lock::{LockKey, LockManager};
use crate::results::GameResultsRepository;
use crate::rewards::{RewardKey, RewardsService};
use crate::round::{RoundHost, StartPolicy};
use crate::scheduler::{CoalescingScheduler, RefreshAction};
use crate::session::{SessionId, SessionScope, SessionState, SessionStatus, SessionStore};
use crate::users::UsersRepository;

#[derive(Default)]
struct CountingRefresh {
    runs: AtomicUsize,
}

#[async_trait]
impl RefreshAction for CountingRefresh {
    async fn refresh(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_concurrent_credits_are_all_recorded() {
    let ledger = Ledger::new(Database::open_in_memory().await.unwrap());
    let account = AccountId(1);

    let credits = (0..3).map(|_| {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .apply_transaction(account, 5, "wordle.solve", Some("wordle"), None)
                .await
        })
    });
    for credit in credits.collect::<Vec<_>>() {
        credit.await.unwrap().unwrap();
    }

    assert_eq!(ledger.get_balance(account).await.unwrap(), 15);
    assert_eq!(ledger.transaction_count(account).await.unwrap(), 3);
}

#[tokio::test]
async fn test_session_lifecycle_round_trip() {
    let sessions = SessionStore::new(Database::open_in_memory().await.unwrap());
    let scope = SessionScope::new("discord", "general", "word_chain");
    let id = SessionId::generate();

    assert!(sessions.get_active(&scope).await.unwrap().is_none());

    let state = serde_json::json!({"x": 1}).encode().unwrap();
    sessions.upsert_active(&id, &scope, state, None).await.unwrap();

    let active = sessions.get_active(&scope).await.unwrap().unwrap();
    assert_eq!(active.id, id);
    assert_eq!(active.status, SessionStatus::Active);
    assert_eq!(active.decode::<serde_json::Value>().unwrap()["x"], 1);

    sessions.end(&id, SessionStatus::Ended).await.unwrap();
    assert!(sessions.get_active(&scope).await.unwrap().is_none());
    assert_eq!(
        sessions
            .end_active_in_scope(&scope, SessionStatus::Ended)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_locked_round_updates_lose_nothing() {
    let sessions = SessionStore::new(Database::open_in_memory().await.unwrap());
    let locks: LockManager = LockManager::new();
    let scope = SessionScope::new("discord", "c9", "unscramble");
    let id = SessionId::from("round-1");
    sessions
        .upsert_active(&id, &scope, serde_json::json!({"n": 0}).encode().unwrap(), None)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let sessions = sessions.clone();
            let locks = locks.clone();
            let scope = scope.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let key = LockKey::from(&scope);
                locks
                    .with_lock(&key, || async {
                        let current = sessions.get_active(&scope).await?.expect("active round");
                        let mut state: serde_json::Value = current.decode()?;
                        state["n"] = (state["n"].as_i64().unwrap_or(0) + 1).into();
                        sessions
                            .upsert_active(&id, &scope, state.encode()?, None)
                            .await
                    })
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let round = sessions.get_active(&scope).await.unwrap().unwrap();
    assert_eq!(round.decode::<serde_json::Value>().unwrap()["n"], 100);
}

#[tokio::test]
async fn test_ledger_bursts_coalesce_into_one_refresh() {
    let ledger = Ledger::new(Database::open_in_memory().await.unwrap());
    let action = Arc::new(CountingRefresh::default());
    let scheduler = CoalescingScheduler::new(action.clone(), Duration::from_millis(150)).unwrap();
    ledger.subscribe(Arc::new(scheduler.clone()));

    for i in 0..10 {
        ledger
            .apply_transaction(AccountId(i % 3), 1, "work", None, None)
            .await
            .unwrap();
    }
    assert!(scheduler.has_pending());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(action.runs.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.stats().generation, 10);

    // A later movement schedules again
    ledger
        .apply_transaction(AccountId(1), 1, "work", None, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(action.runs.load(Ordering::SeqCst), 2);
}

#[derive(Default)]
struct RecordingSink {
    posted: Mutex<Vec<Board>>,
}

#[async_trait]
impl LeaderboardSink for RecordingSink {
    async fn edit(&self, _channel_id: &str, _message_id: &str, board: &Board) -> anyhow::Result<()> {
        self.posted.lock().push(board.clone());
        Ok(())
    }

    async fn post(&self, _channel_id: &str, board: &Board) -> anyhow::Result<String> {
        self.posted.lock().push(board.clone());
        Ok("msg-1".to_string())
    }
}

#[tokio::test]
async fn test_awards_drive_the_published_leaderboard() {
    let db = Database::open_in_memory().await.unwrap();
    let economy = EconomyService::new(UsersRepository::new(db.clone()), Ledger::new(db.clone()));
    let sink = Arc::new(RecordingSink::default());
    let publisher = LeaderboardPublisher::new(
        LeaderboardConfig {
            channel_id: "leaderboard".to_string(),
            ..LeaderboardConfig::default()
        },
        LeaderboardRepository::new(db.clone()),
        LeaderboardPostsRepository::new(db),
        sink.clone(),
    );
    let scheduler = CoalescingScheduler::new(Arc::new(publisher), Duration::from_millis(100)).unwrap();
    economy.ledger().subscribe(Arc::new(scheduler.clone()));

    economy
        .award_player("discord", "1", Some("ana"), 20, "wordle.solve", Some("wordle"))
        .await
        .unwrap();
    economy
        .award_player("discord", "2", Some("bo"), 5, "unscramble.solve", Some("unscramble"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let posted = sink.posted.lock().clone();
    assert_eq!(posted.len(), 1);
    let names: Vec<_> = posted[0].rows.iter().map(|r| r.display_name.as_str()).collect();
    assert_eq!(names, vec!["ana", "bo"]);
    assert_eq!(scheduler.stats().failures, 0);
}

#[tokio::test]
async fn test_finished_round_pays_from_the_table_and_records_results() {
    let db = Database::open_in_memory().await.unwrap();
    let economy = EconomyService::new(UsersRepository::new(db.clone()), Ledger::new(db.clone()))
        .with_rewards(RewardsService::default());
    let results = GameResultsRepository::new(db.clone());
    let host = RoundHost::new(SessionStore::new(db), LockManager::new());
    let scope = SessionScope::new("discord", "c1", "wordle");

    host.start(&scope, StartPolicy::HardReset, serde_json::json!({"guesses": 0}))
        .await
        .unwrap();
    host.update(&scope, |state: &mut serde_json::Value| {
        state["guesses"] = 3.into();
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(host.finish(&scope).await.unwrap(), 1);

    let winner = economy.player("discord", "11", Some("ana")).await.unwrap();
    let balance = economy
        .reward(winner.id, RewardKey::WORDLE_SOLVE, 1, Some("wordle"))
        .await
        .unwrap();
    let earned = economy.rewards().amount(RewardKey::WORDLE_SOLVE).unwrap();
    results
        .record(winner.id, "wordle", Some(3), earned, Some(r#"{"guesses":3}"#))
        .await
        .unwrap();

    assert_eq!(balance, 20);
    let summary = results.summary(winner.id, "wordle").await.unwrap();
    assert_eq!(summary.played, 1);
    assert_eq!(summary.beans_earned, 20);
    assert!(host.sessions().get_active(&scope).await.unwrap().is_none());
}
