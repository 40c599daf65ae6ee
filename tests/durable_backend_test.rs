//! Integration tests for the durable backend adapter and the JSONL store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use taskhook::builders::SchedulerBuilder;
use taskhook::config::SchedulerConfig;
use taskhook::core::{Handler, TaskArgs, TaskQueue, TaskRecord, TaskSink};
use taskhook::infra::{enqueue_performer, DurableBackend, DurableStore, JsonlStore};
use taskhook::runtime::TokioSpawner;

fn temp_store_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "taskhook-it-{tag}-{}-{}",
        std::process::id(),
        taskhook::util::clock::now_ms()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn jsonl_records_survive_a_reopen() {
    let dir = temp_store_dir("reopen");
    let noop: taskhook::infra::Performer = Arc::new(|_| Ok(()));

    {
        let store = JsonlStore::open(&dir, "orders", Arc::clone(&noop)).unwrap();
        store
            .put(&TaskRecord {
                event: "charge_card".into(),
                args: TaskArgs::new().kw("order", 42),
                priority: 0,
                seq: 0,
            })
            .unwrap();
        store
            .put(&TaskRecord {
                event: "charge_card".into(),
                args: TaskArgs::new().kw("order", 43),
                priority: 0,
                seq: 1,
            })
            .unwrap();
    }

    // New process, same directory.
    let store = JsonlStore::open(&dir, "orders", noop).unwrap();
    assert_eq!(store.len(), 2);
    let first = store.get(false).unwrap().unwrap();
    assert_eq!(first.args.kwargs["order"], 42);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn backend_worker_drains_a_preloaded_store() {
    let dir = temp_store_dir("drain");
    let performed = Arc::new(AtomicUsize::new(0));

    {
        let noop: taskhook::infra::Performer = Arc::new(|_| Ok(()));
        let store = JsonlStore::open(&dir, "mail", noop).unwrap();
        for seq in 0..3 {
            store
                .put(&TaskRecord {
                    event: "send_email".into(),
                    args: TaskArgs::new(),
                    priority: 0,
                    seq,
                })
                .unwrap();
        }
    }

    let p = Arc::clone(&performed);
    let performer: taskhook::infra::Performer = Arc::new(move |_record| {
        p.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let store = Arc::new(JsonlStore::open(&dir, "mail", performer).unwrap());
    let backend = DurableBackend::new(store, Duration::from_millis(10));
    backend.start();

    assert!(wait_until(Duration::from_secs(2), || {
        performed.load(Ordering::SeqCst) == 3
    }));
    backend.shutdown();

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn enqueue_performer_feeds_the_in_memory_queue() {
    let queue = Arc::new(TaskQueue::new());
    let performer = enqueue_performer(Arc::clone(&queue) as Arc<dyn TaskSink>);

    performer(TaskRecord {
        event: "reindex".into(),
        args: TaskArgs::new().arg("shard-7"),
        priority: 3,
        seq: 0,
    })
    .unwrap();

    let record = queue.try_dequeue().unwrap();
    assert_eq!(record.event, "reindex");
    assert_eq!(record.priority, 3);
    assert_eq!(record.args.args[0], "shard-7");
}

#[tokio::test]
async fn durable_put_reaches_handlers_through_the_facade() {
    let dir = temp_store_dir("facade");
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    // Store performs by re-enqueueing into the scheduler's in-memory queue,
    // so durable records flow through the normal dispatch path.
    let queue_slot: Arc<Mutex<Option<Arc<TaskQueue>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&queue_slot);
    let performer: taskhook::infra::Performer = Arc::new(move |record: TaskRecord| {
        let queue = slot.lock().clone().ok_or_else(|| anyhow::anyhow!("queue not wired"))?;
        queue.put(&record.event, record.args, record.priority)?;
        Ok(())
    });
    let store = Arc::new(JsonlStore::open(&dir, "jobs", performer).unwrap());

    let config = SchedulerConfig {
        max_thread_worker: 2,
        poll_interval_ms: 10,
        ..SchedulerConfig::default()
    };
    let scheduler = SchedulerBuilder::new(config)
        .with_durable(store)
        .build()
        .unwrap();
    *queue_slot.lock() = Some(Arc::clone(scheduler.queue()));

    let s = Arc::clone(&seen);
    scheduler.on(
        "notify",
        0,
        Handler::blocking(move |args| {
            s.lock().push(args.kwargs["channel"].as_str().unwrap_or_default().to_owned());
            Ok(())
        }),
    );

    let spawner = TokioSpawner::current();
    scheduler.start(&spawner).await.unwrap();
    scheduler
        .put_durable("notify", TaskArgs::new().kw("channel", "ops"), 0)
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while seen.lock().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    scheduler.drain().await;
    scheduler.shutdown().await;

    assert_eq!(*seen.lock(), vec!["ops"]);
    std::fs::remove_dir_all(&dir).ok();
}
