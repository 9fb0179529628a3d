//! Integration tests for WorkerPool
//!
//! Run with: cargo test -p workpool --test pool_test

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use workpool::prelude::*;

/// Computations shared by every test
fn registry() -> ComputationRegistry {
    let mut registry = ComputationRegistry::new();
    registry
        .register_fn("double", |_ctx, args| async move {
            Ok(json!(args[0].as_i64().unwrap_or_default() * 2))
        })
        .register_fn("whoami", |ctx, _args| async move { Ok(json!(ctx.slot)) })
        .register_fn("sleep", |_ctx, args| async move {
            let ms = args[0].as_u64().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        })
        .register_fn("block", |_ctx, args| async move {
            let ms = args[0].as_u64().unwrap_or_default();
            std::thread::sleep(Duration::from_millis(ms));
            Ok(json!(ms))
        })
        .register_fn("fail", |_ctx, _args| async move {
            Err(anyhow::anyhow!("division by zero"))
        })
        .register_fn("panic", |_ctx, _args| explode());
    registry
}

async fn explode() -> anyhow::Result<Value> {
    panic!("worker blew up")
}

fn start_pool(config: PoolConfig) -> WorkerPool {
    WorkerPool::new(config, Arc::new(registry())).unwrap()
}

/// Poll pool stats until `restarts` reaches `expected`
async fn wait_for_restarts(pool: &WorkerPool, expected: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if pool.stats().await.unwrap().restarts >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker was not replaced in time");
}

// ============================================
// Routing and results
// ============================================

#[tokio::test]
async fn test_tasks_route_by_id_modulo_worker_count() {
    let pool = start_pool(PoolConfig::new().with_worker_count(4));

    let handles: Vec<_> = (0..8).map(|_| pool.submit("whoami", vec![]).unwrap()).collect();
    for handle in handles {
        let expected = handle.id().0 % 4;
        assert_eq!(handle.await.unwrap(), json!(expected));
    }

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_execute_batch_preserves_input_order() {
    let pool = start_pool(PoolConfig::new().with_worker_count(2));

    let results = pool
        .execute_batch("double", vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]])
        .await
        .unwrap();
    assert_eq!(results, vec![json!(2), json!(4), json!(6)]);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_execute_batch_fails_with_first_error() {
    let pool = start_pool(PoolConfig::new().with_worker_count(2));

    let err = pool
        .execute_batch("fail", vec![vec![], vec![]])
        .await
        .unwrap_err();
    assert_eq!(err.execution_message(), Some("division by zero"));
    assert!(pool.execute_batch("double", Vec::<Vec<Value>>::new()).await.unwrap().is_empty());

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_execute_batch_settled_reports_each_outcome() {
    let pool = start_pool(PoolConfig::new().with_worker_count(2));

    let outcomes = pool
        .execute_batch_settled("double", vec![vec![json!(5)], vec![json!("x")]])
        .await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0], Ok(json!(10)));
    // Non-numeric input falls back to 0 inside the computation
    assert_eq!(outcomes[1], Ok(json!(0)));

    let outcomes = pool
        .execute_batch_settled("fail", vec![vec![], vec![]])
        .await;
    assert!(outcomes.iter().all(|o| o.is_err()));

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_computation_is_a_task_error() {
    let pool = start_pool(PoolConfig::new().with_worker_count(1));

    let err = pool.execute("nope", vec![]).await.unwrap_err();
    assert_eq!(err.execution_message(), Some("unknown computation: nope"));

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tasks_complete_out_of_order_within_one_worker() {
    let pool = start_pool(PoolConfig::new().with_worker_count(1));

    let slow = pool.submit("sleep", vec![json!(300)]).unwrap();
    let fast = pool.submit("sleep", vec![json!(10)]).unwrap();

    tokio::select! {
        biased;
        _ = slow => panic!("slow task finished first"),
        result = fast => assert_eq!(result.unwrap(), json!(10)),
    }

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_least_pending_routing_avoids_busy_slot() {
    let pool = start_pool(
        PoolConfig::new()
            .with_worker_count(2)
            .with_routing(RoutingStrategy::LeastPending),
    );

    let slow = pool.submit("sleep", vec![json!(300)]).unwrap();
    let slot = pool.execute("whoami", vec![]).await.unwrap();
    assert_eq!(slot, json!(1));
    assert_eq!(slow.await.unwrap(), json!(300));

    pool.shutdown().await.unwrap();
}

// ============================================
// Timeouts and failures
// ============================================

#[test_log::test(tokio::test)]
async fn test_timeout_rejects_and_pool_keeps_working() {
    let pool = start_pool(
        PoolConfig::new()
            .with_worker_count(1)
            .with_task_timeout(Duration::from_millis(50)),
    );

    let err = pool.execute("sleep", vec![json!(500)]).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, TaskError::TaskTimeout { id: TaskId(0), .. }));

    // The late result is discarded without disturbing later tasks
    tokio::time::sleep(Duration::from_millis(550)).await;
    assert_eq!(pool.execute("double", vec![json!(4)]).await.unwrap(), json!(8));
    assert_eq!(pool.stats().await.unwrap().pending_tasks, 0);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_execution_error_counts_against_its_slot_only() {
    let pool = start_pool(PoolConfig::new().with_worker_count(2));

    // Task 0 runs on slot 0
    let err = pool.execute("fail", vec![]).await.unwrap_err();
    assert_eq!(
        err,
        TaskError::TaskExecution {
            id: TaskId(0),
            message: "division by zero".into()
        }
    );

    let metrics = pool.metrics().await.unwrap();
    let slot0 = metrics.slot(0).unwrap();
    assert_eq!(slot0.total_tasks, 1);
    assert_eq!(slot0.failed_tasks, 1);
    assert_eq!(slot0.successful_tasks, 0);
    assert!(metrics.slot(1).unwrap().is_zero());
    assert_eq!(pool.stats().await.unwrap().restarts, 0);

    pool.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_panicking_worker_is_replaced_with_fresh_metrics() {
    let pool = start_pool(PoolConfig::new().with_worker_count(2));

    for round in 1..=3u64 {
        // Even ids land on slot 0
        let handle = pool.submit("panic", vec![]).unwrap();
        assert_eq!(handle.id().0 % 2, 0);
        let err = handle.await.unwrap_err();
        assert_eq!(
            err.execution_message(),
            Some("computation panicked: worker blew up")
        );
        wait_for_restarts(&pool, round).await;

        // Odd ids keep slot 1 busy and healthy
        assert_eq!(pool.execute("whoami", vec![]).await.unwrap(), json!(1));
    }

    let metrics = pool.metrics().await.unwrap();
    assert!(metrics.slot(0).unwrap().is_zero());
    assert_eq!(metrics.slot(1).unwrap().successful_tasks, 3);

    // The replacement in slot 0 serves tasks normally
    let handle = pool.submit("whoami", vec![]).unwrap();
    assert_eq!(handle.id().0 % 2, 0);
    assert_eq!(handle.await.unwrap(), json!(0));

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.restarts, 3);
    assert_eq!(stats.live_workers, 2);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_in_flight_tasks_fail_fast_when_enabled() {
    let pool = start_pool(
        PoolConfig::new()
            .with_worker_count(1)
            .with_fail_in_flight_on_crash(true),
    );

    let sleeper = pool.submit("sleep", vec![json!(2_000)]).unwrap();
    let crasher = pool.submit("panic", vec![]).unwrap();

    assert!(crasher.await.is_err());
    assert_eq!(
        sleeper.await.unwrap_err(),
        TaskError::WorkerLost {
            id: TaskId(0),
            slot: 0
        }
    );

    pool.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_unresponsive_worker_is_replaced() {
    let pool = start_pool(
        PoolConfig::new()
            .with_worker_count(1)
            .with_health_check_interval(Duration::from_millis(50))
            .with_max_missed_health_checks(2),
    );

    let blocked = pool.submit("block", vec![json!(600)]).unwrap();
    wait_for_restarts(&pool, 1).await;

    // The blocked worker still delivers its result once it wakes up
    assert_eq!(blocked.await.unwrap(), json!(600));
    assert_eq!(pool.execute("double", vec![json!(3)]).await.unwrap(), json!(6));

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_backpressure_rejects_when_queue_is_full() {
    let pool = start_pool(
        PoolConfig::new()
            .with_worker_count(1)
            .with_backpressure(BackpressureConfig::new().with_max_pending(2)),
    );

    let first = pool.submit("sleep", vec![json!(200)]).unwrap();
    let second = pool.submit("sleep", vec![json!(200)]).unwrap();
    let third = pool.submit("sleep", vec![json!(200)]).unwrap();

    assert_eq!(third.await.unwrap_err(), TaskError::QueueFull { limit: 2 });
    assert!(!pool.stats().await.unwrap().accepting);

    assert_eq!(first.await.unwrap(), json!(200));
    assert_eq!(second.await.unwrap(), json!(200));
    assert_eq!(pool.execute("double", vec![json!(1)]).await.unwrap(), json!(2));

    pool.shutdown().await.unwrap();
}

// ============================================
// Metrics
// ============================================

#[tokio::test]
async fn test_metrics_totals_stay_consistent() {
    let pool = start_pool(PoolConfig::new().with_worker_count(3));

    let computations = ["double", "fail", "whoami", "double", "fail", "sleep"];
    let handles: Vec<_> = (0..30)
        .map(|i| {
            let name = computations[i % computations.len()];
            pool.submit(name, vec![json!(1)]).unwrap()
        })
        .collect();
    for handle in handles {
        let _ = handle.await;
    }

    let metrics = pool.metrics().await.unwrap();
    assert_eq!(metrics.len(), 3);
    for (_, record) in metrics.iter() {
        assert!(record.is_consistent());
        assert_eq!(record.total_tasks, 10);
    }
    let total = metrics.total();
    assert_eq!(total.total_tasks, 30);
    assert_eq!(total.failed_tasks, 10);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_metrics_snapshot_is_detached() {
    let pool = start_pool(PoolConfig::new().with_worker_count(1));

    let before = pool.metrics().await.unwrap();
    pool.execute("double", vec![json!(1)]).await.unwrap();
    let after = pool.metrics().await.unwrap();

    assert!(before.slot(0).unwrap().is_zero());
    assert_eq!(after.slot(0).unwrap().total_tasks, 1);

    pool.shutdown().await.unwrap();
}

// ============================================
// Shutdown
// ============================================

/// Counts live execution contexts through the lifecycle hooks
struct Tracked {
    inner: ComputationRegistry,
    live: Arc<AtomicIsize>,
}

#[async_trait]
impl ExecutionAdapter for Tracked {
    async fn execute(&self, ctx: &TaskContext, payload: TaskPayload) -> anyhow::Result<Value> {
        self.inner.execute(ctx, payload).await
    }

    fn on_worker_start(&self, _worker: &WorkerContext) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    fn on_worker_stop(&self, _worker: &WorkerContext) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test_log::test(tokio::test)]
async fn test_shutdown_stops_every_worker() {
    let live = Arc::new(AtomicIsize::new(0));
    let adapter = Arc::new(Tracked {
        inner: registry(),
        live: Arc::clone(&live),
    });
    let pool = WorkerPool::new(PoolConfig::new().with_worker_count(3), adapter).unwrap();

    // Make sure every worker has started
    pool.execute_batch("whoami", vec![vec![], vec![], vec![]])
        .await
        .unwrap();
    assert_eq!(live.load(Ordering::SeqCst), 3);

    let pending = pool.submit("sleep", vec![json!(5_000)]).unwrap();
    pool.shutdown().await.unwrap();

    assert_eq!(pending.await.unwrap_err(), TaskError::PoolClosed);
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert_eq!(
        pool.submit("double", vec![json!(1)]).unwrap_err(),
        TaskError::PoolClosed
    );
    assert!(matches!(
        pool.execute("double", vec![json!(1)]).await,
        Err(TaskError::PoolClosed)
    ));
}

#[tokio::test]
async fn test_dropping_pool_stops_workers() {
    let live = Arc::new(AtomicIsize::new(0));
    let adapter = Arc::new(Tracked {
        inner: registry(),
        live: Arc::clone(&live),
    });
    let pool = WorkerPool::new(PoolConfig::new().with_worker_count(2), adapter).unwrap();
    pool.execute_batch("whoami", vec![vec![], vec![]])
        .await
        .unwrap();

    drop(pool);

    tokio::time::timeout(Duration::from_secs(5), async {
        while live.load(Ordering::SeqCst) != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workers kept running after the pool was dropped");
}
