use std::collections::HashSet;
use std::sync::Arc;

use sqlx::{AnyPool, Row};
use tokio::task::JoinSet;
use uuid::Uuid;

use waybill::db::Db;
use waybill::pool::model::{MarkOutcome, NewWaybill, PoolKey, ReleaseOutcome, TakeOutcome};
use waybill::pool::repository::WaybillRepository;
use waybill::pool::repository_sqlx::SqlxWaybillRepository;

/// Isolated shared-cache in-memory SQLite database with the schema applied.
async fn setup_db() -> AnyPool {
    let conn_str = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());

    let db = Db::connect(&conn_str, 5).await.unwrap();
    db.migrate().await.unwrap();
    db.pool
}

fn key() -> PoolKey {
    PoolKey::new("NAQUEL", "PRIME")
}

async fn seeded(codes: &[&str]) -> (AnyPool, SqlxWaybillRepository) {
    let pool = setup_db().await;
    let repo = SqlxWaybillRepository::new(pool.clone());

    let batch: Vec<NewWaybill> = codes.iter().map(|c| NewWaybill::live(*c)).collect();
    repo.provision(&key(), &batch, 1).await.unwrap();

    (pool, repo)
}

fn taken_code(outcome: TakeOutcome) -> String {
    match outcome {
        TakeOutcome::Taken(a) => a.code,
        other => panic!("expected a waybill, got {other:?}"),
    }
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let pool = setup_db().await;
    waybill::db::schema::migrate(&pool).await.unwrap();
}

#[tokio::test]
async fn take_returns_lowest_code_and_stamps_it() {
    let (_pool, repo) = seeded(&["1003", "1001", "1002"]).await;

    let first = repo.take_next(&key(), 42).await.unwrap();
    assert_eq!(taken_code(first), "1001");

    let rec = repo.find("1001", "NAQUEL").await.unwrap().unwrap();
    assert!(rec.is_used);
    assert!(!rec.reconciled);
    assert_eq!(rec.used_at.map(|t| t.timestamp_millis()), Some(42));
    assert_eq!(rec.modified_at.map(|t| t.timestamp_millis()), Some(42));

    assert_eq!(taken_code(repo.take_next(&key(), 43).await.unwrap()), "1002");
}

#[tokio::test]
async fn test_records_and_other_series_are_not_taken() {
    let (_pool, repo) = seeded(&["2001"]).await;
    repo.provision(&key(), &[NewWaybill::test("0001")], 1)
        .await
        .unwrap();
    repo.provision(&PoolKey::new("NAQUEL", "ECONOMY"), &[NewWaybill::live("0002")], 1)
        .await
        .unwrap();

    assert_eq!(taken_code(repo.take_next(&key(), 5).await.unwrap()), "2001");
    assert!(matches!(
        repo.take_next(&key(), 6).await.unwrap(),
        TakeOutcome::Exhausted { total: 1, used: 1 }
    ));
}

#[tokio::test]
async fn empty_sub_pool_is_not_configured() {
    let (_pool, repo) = seeded(&[]).await;

    assert_eq!(
        repo.take_next(&key(), 1).await.unwrap(),
        TakeOutcome::NotConfigured
    );
}

#[tokio::test]
async fn release_returns_code_and_is_idempotent() {
    let (_pool, repo) = seeded(&["3001"]).await;
    taken_code(repo.take_next(&key(), 1).await.unwrap());

    assert_eq!(
        repo.release("3001", "NAQUEL", 2).await.unwrap(),
        ReleaseOutcome::Released
    );
    assert_eq!(
        repo.release("3001", "NAQUEL", 3).await.unwrap(),
        ReleaseOutcome::Released
    );
    assert_eq!(
        repo.release("9999", "NAQUEL", 3).await.unwrap(),
        ReleaseOutcome::Unknown
    );

    assert_eq!(taken_code(repo.take_next(&key(), 4).await.unwrap()), "3001");
}

#[tokio::test]
async fn reconciled_code_cannot_be_released() {
    let (pool, repo) = seeded(&["4001", "4002"]).await;
    taken_code(repo.take_next(&key(), 1).await.unwrap());

    assert_eq!(
        repo.mark_consumed("4001", "NAQUEL", 2).await.unwrap(),
        MarkOutcome::AlreadyConsumed
    );
    assert_eq!(
        repo.release("4001", "NAQUEL", 3).await.unwrap(),
        ReleaseOutcome::Pinned
    );

    let row = sqlx::query("SELECT is_used, reconciled FROM awb_pool WHERE code = ?")
        .bind("4001")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("is_used"), 1);
    assert_eq!(row.get::<i64, _>("reconciled"), 1);

    // An available code flips straight to consumed.
    assert_eq!(
        repo.mark_consumed("4002", "NAQUEL", 4).await.unwrap(),
        MarkOutcome::Consumed
    );
    assert!(matches!(
        repo.take_next(&key(), 5).await.unwrap(),
        TakeOutcome::Exhausted { total: 2, used: 2 }
    ));

    assert_eq!(
        repo.mark_consumed("ghost", "NAQUEL", 6).await.unwrap(),
        MarkOutcome::Unknown
    );
}

#[tokio::test]
async fn stats_exclude_test_records() {
    let (_pool, repo) = seeded(&["5001", "5002", "5003"]).await;
    repo.provision(&key(), &[NewWaybill::test("5000")], 1)
        .await
        .unwrap();
    taken_code(repo.take_next(&key(), 1).await.unwrap());

    let s = repo.stats(&key()).await.unwrap();
    assert_eq!((s.total, s.used, s.available), (3, 1, 2));
    assert_eq!(s.next_available.as_deref(), Some("5002"));
    assert_eq!(s.last_used.as_deref(), Some("5001"));
}

#[tokio::test]
async fn provision_skips_codes_already_present() {
    let (_pool, repo) = seeded(&["6001", "6002"]).await;

    let inserted = repo
        .provision(
            &key(),
            &[NewWaybill::live("6002"), NewWaybill::live("6003")],
            2,
        )
        .await
        .unwrap();

    assert_eq!(inserted, 1);
    assert_eq!(repo.stats(&key()).await.unwrap().total, 3);
}

#[tokio::test]
async fn concurrent_takes_hand_out_distinct_codes() {
    let codes: Vec<String> = (0..40).map(|i| format!("{}", 700_000 + i)).collect();
    let refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let (_pool, repo) = seeded(&refs).await;
    let repo = Arc::new(repo);

    let mut set = JoinSet::new();
    for i in 0..25 {
        let r = Arc::clone(&repo);
        set.spawn(async move { r.take_next(&key(), i).await });
    }

    let mut seen = HashSet::new();
    while let Some(res) = set.join_next().await {
        let code = taken_code(res.unwrap().unwrap());
        assert!(seen.insert(code.clone()), "code {code} handed out twice");
    }

    assert_eq!(seen.len(), 25);
    let s = repo.stats(&key()).await.unwrap();
    assert_eq!((s.used, s.available), (25, 15));
}
