use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use eavql::backend::{Cell, Params, Statements};
use eavql::keeper::Caches;
use eavql::retry::RetryPolicy;
use eavql::{Context, Define, EavError, GetRequest, Intent, Scalar, Settings, Transaction};

async fn ghost_count(ctx: &Context) -> Option<Cell> {
    ctx.backend()
        .scalar(
            "SELECT COUNT(*) FROM tables WHERE name = @name",
            &Params::new().bind("@name", "ghost".to_string()),
        )
        .await
        .expect("count")
}

async fn insert_ghost(scope: &Transaction) {
    scope
        .execute(
            "INSERT INTO tables (name, isNumeric) VALUES ('ghost', 0)",
            &Params::new(),
        )
        .await
        .expect("insert");
}

#[tokio::test]
async fn only_the_outermost_scope_commits() {
    let ctx = Context::open_in_memory().await.expect("open");
    let outer = ctx.begin_transaction().await.expect("outer");
    assert_eq!(outer.depth(), 1);
    assert!(ctx.backend().in_transaction());
    {
        let inner = outer.nested();
        assert_eq!(inner.depth(), 2);
        insert_ghost(&inner).await;
        inner.commit().await.expect("inner commit is a no-op");
        assert!(ctx.backend().in_transaction(), "still open after inner commit");
    }
    assert_eq!(outer.depth(), 1);
    outer.commit().await.expect("outer commit");
    assert!(!ctx.backend().in_transaction());
    drop(outer);
    assert_eq!(ghost_count(&ctx).await, Some(Cell::Integer(1)));
}

#[tokio::test]
async fn dropping_an_uncommitted_scope_rolls_back() {
    let ctx = Context::open_in_memory().await.expect("open");
    {
        let scope = ctx.begin_transaction().await.expect("begin");
        insert_ghost(&scope).await;
        assert_eq!(scope.depth(), 1);
    }
    assert!(!ctx.backend().in_transaction());
    assert_eq!(ghost_count(&ctx).await, Some(Cell::Integer(0)));
}

#[tokio::test]
async fn inner_commits_do_not_survive_an_outer_rollback() {
    let ctx = Context::open_in_memory().await.expect("open");
    {
        let outer = ctx.begin_transaction().await.expect("outer");
        let inner = outer.nested();
        insert_ghost(&inner).await;
        inner.commit().await.expect("inner");
    }
    assert_eq!(ghost_count(&ctx).await, Some(Cell::Integer(0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn defines_wait_for_an_open_scope_and_outlive_its_rollback() {
    let ctx = Context::open_in_memory().await.expect("open");
    let scope = ctx.begin_transaction().await.expect("begin");
    insert_ghost(&scope).await;
    let writer = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            ctx.define(&Define::new("fresh", "k").set("color", "red"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!writer.is_finished(), "the define waits for the open scope");
    drop(scope);

    let item = writer.await.expect("join").expect("define");
    assert_eq!(ghost_count(&ctx).await, Some(Cell::Integer(0)), "scope rolled back");
    let schema = ctx.schema(None).await.unwrap();
    assert_eq!(schema.tables["fresh"], vec!["color"]);
    let response = ctx
        .get(&GetRequest {
            table: "fresh".to_string(),
            values: vec![Scalar::from("k")],
        })
        .await
        .unwrap();
    let metadata = response.metadata[0].as_ref().expect("the define was stored");
    assert_eq!(metadata.get("color"), Some(&Scalar::from("red")));
    assert_eq!(ctx.get_row_id("fresh", "k").await.unwrap(), Some(item));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_defines_keep_their_own_outcome() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(&Define::new("mixed", "seed").set("n", 0))
        .await
        .expect("n is numeric from here on");
    let mut handles = Vec::new();
    for i in 1..=16 {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("k{i}");
            let define = if i % 2 == 0 {
                Define::new("mixed", key).set("n", i)
            } else {
                Define::new("mixed", key).set("label", "odd").set("n", "oops")
            };
            (i, ctx.define(&define).await)
        }));
    }
    for handle in handles {
        let (i, outcome) = handle.await.expect("join");
        if i % 2 == 0 {
            outcome.expect("even keys are valid");
        } else {
            assert!(matches!(outcome, Err(EavError::TypeMismatch { .. })), "key {i}");
        }
    }

    let keys: Vec<Scalar> = (1..=16).map(|i| Scalar::from(format!("k{i}"))).collect();
    let response = ctx
        .get(&GetRequest {
            table: "mixed".to_string(),
            values: keys,
        })
        .await
        .unwrap();
    for (idx, metadata) in response.metadata.iter().enumerate() {
        let i = idx as i32 + 1;
        let written = metadata.clone().unwrap_or_default();
        if i % 2 == 0 {
            assert_eq!(written.get("n"), Some(&Scalar::from(i)), "key k{i}");
        } else {
            assert!(written.is_empty(), "failed define wrote nothing: {written:?}");
        }
    }

    // a session with empty caches reads the same ids from the store
    let fresh = Context::with_backend(ctx.backend(), Arc::new(Caches::new()), &Settings::default());
    let cached = ctx.tables().get_id("mixed", Intent::Lookup, false).await.unwrap();
    let stored = fresh.tables().get_id("mixed", Intent::Lookup, false).await.unwrap();
    assert_eq!(cached, stored);
    let table = stored.required("mixed").unwrap();
    for name in ["n", "label"] {
        let cached = ctx.names().get_id(table, name, Intent::Lookup, false).await.unwrap();
        let stored = fresh.names().get_id(table, name, Intent::Lookup, false).await.unwrap();
        assert!(stored.is_found(), "{name} is in the store");
        assert_eq!(cached, stored);
    }
}

#[tokio::test]
async fn retries_stop_at_the_configured_bound() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new(3, Duration::ZERO);
    let result: eavql::Result<()> = policy
        .run("always fails", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EavError::Persistence("UNIQUE constraint failed".to_string())) }
        })
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match result {
        Err(EavError::RetriesExhausted { attempts, source, .. }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, EavError::Persistence(_)));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}

#[tokio::test]
async fn retries_recover_from_a_transient_failure() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new(4, Duration::from_millis(1));
    let result = policy
        .run("second time lucky", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(EavError::Persistence("busy".to_string()))
                } else {
                    Ok(call)
                }
            }
        })
        .await;
    assert_eq!(result.expect("recovered"), 1);
}

#[tokio::test]
async fn validation_failures_are_not_retried() {
    let calls = AtomicU32::new(0);
    let result: eavql::Result<()> = RetryPolicy::default()
        .run("invalid", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EavError::validation("bad name")) }
        })
        .await;
    assert!(matches!(result, Err(EavError::Validation { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
