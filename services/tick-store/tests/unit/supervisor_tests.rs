//! Lifecycle supervision: re-subscription, tick forwarding and give-up

use anyhow::Result;
use pretty_assertions::assert_eq;
use rstest::*;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{kite_tick, session_start, FeedCall, MockFeed, MockTickStore, INFY_TOKEN, NIFTY_TOKEN};
use tick_store::{
    ConnectionState, FeedAdapter, FeedEvent, LifecycleSupervisor, Mode, PipelineConfig,
    PipelineMetrics, SupervisorError, TickPipeline,
};
use tokio::sync::mpsc;

type Supervisor = LifecycleSupervisor<MockFeed, MockTickStore>;

struct Harness {
    feed: MockFeed,
    store: MockTickStore,
    pipeline: Arc<TickPipeline<MockTickStore>>,
    supervisor: Supervisor,
}

#[fixture]
fn harness() -> Harness {
    let feed = MockFeed::new();
    let store = MockTickStore::new();
    let config = PipelineConfig {
        batch_threshold: 100,
        flush_interval_secs: 0,
        ..PipelineConfig::default()
    };
    let metrics = PipelineMetrics::new().expect("metrics registry");
    let pipeline = Arc::new(TickPipeline::new(store.clone(), "tickdata", config, metrics));
    let adapter = FeedAdapter::new(vec![INFY_TOKEN, NIFTY_TOKEN], Mode::Full, Arc::clone(&pipeline));

    Harness {
        supervisor: LifecycleSupervisor::new(feed.clone(), adapter),
        feed,
        store,
        pipeline,
    }
}

fn subscription_calls() -> Vec<FeedCall> {
    vec![
        FeedCall::Subscribe(vec![INFY_TOKEN, NIFTY_TOKEN]),
        FeedCall::SetMode(Mode::Full, vec![INFY_TOKEN, NIFTY_TOKEN]),
    ]
}

#[rstest]
#[tokio::test]
async fn test_connect_subscribes_and_sets_mode(harness: Harness) -> Result<()> {
    let Harness { feed, mut supervisor, .. } = harness;
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);

    supervisor.handle(FeedEvent::Connected).await?;

    assert_eq!(supervisor.state(), ConnectionState::Connected);
    assert_eq!(feed.calls(), subscription_calls());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_reconnect_resubscribes_identical_set(harness: Harness) -> Result<()> {
    let Harness { feed, pipeline, mut supervisor, .. } = harness;
    let events = vec![
        FeedEvent::Connected,
        FeedEvent::Tick(kite_tick(INFY_TOKEN, 1500.25, None)),
        FeedEvent::Closed { code: 1006, reason: "connection dropped".to_string() },
        FeedEvent::Reconnecting { attempt: 1, delay: Duration::from_secs(2) },
        FeedEvent::Connected,
        FeedEvent::Tick(kite_tick(INFY_TOKEN, 1500.50, None)),
    ];

    for event in events {
        supervisor.handle(event).await?;
    }

    let mut expected = subscription_calls();
    expected.extend(subscription_calls());
    assert_eq!(feed.calls(), expected);
    assert_eq!(pipeline.buffered(), 2);
    assert_eq!(pipeline.metrics().feed_reconnects.get(), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_close_and_error_do_not_touch_the_buffer(harness: Harness) -> Result<()> {
    let Harness { store, pipeline, mut supervisor, .. } = harness;
    supervisor.handle(FeedEvent::Tick(kite_tick(INFY_TOKEN, 1500.0, None))).await?;

    supervisor.handle(FeedEvent::Closed { code: 1000, reason: String::new() }).await?;
    assert_eq!(supervisor.state(), ConnectionState::Closed);

    supervisor.handle(FeedEvent::Error("token expired".to_string())).await?;
    assert_eq!(supervisor.state(), ConnectionState::Errored);

    assert_eq!(pipeline.buffered(), 1);
    assert_eq!(store.transactions_begun(), 0);
    assert_eq!(pipeline.metrics().feed_errors.get(), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_give_up_is_reported_once(harness: Harness) {
    let Harness { pipeline, mut supervisor, .. } = harness;

    let first = supervisor.handle(FeedEvent::GaveUp { attempt: 5 }).await;
    assert_eq!(first, Err(SupervisorError::ReconnectExhausted { attempts: 5 }));
    assert_eq!(supervisor.state(), ConnectionState::GivenUp);

    assert_eq!(supervisor.handle(FeedEvent::GaveUp { attempt: 5 }).await, Ok(()));
    assert_eq!(
        supervisor.handle(FeedEvent::Tick(kite_tick(INFY_TOKEN, 1500.0, None))).await,
        Ok(())
    );
    assert_eq!(supervisor.state(), ConnectionState::GivenUp);
    assert_eq!(pipeline.buffered(), 0);
}

#[rstest]
#[tokio::test]
async fn test_subscription_failure_is_not_fatal(harness: Harness) -> Result<()> {
    let Harness { feed, mut supervisor, .. } = harness;
    feed.set_fail_subscribe(true);

    supervisor.handle(FeedEvent::Connected).await?;

    assert!(feed.calls().is_empty());
    assert_eq!(supervisor.state(), ConnectionState::Connected);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_ticks_use_exchange_time_when_present(harness: Harness) -> Result<()> {
    let Harness { store, pipeline, mut supervisor, .. } = harness;
    let exchange_time = session_start() - chrono::Duration::seconds(1);

    supervisor
        .handle(FeedEvent::Tick(kite_tick(INFY_TOKEN, 1500.0, Some(exchange_time))))
        .await?;
    supervisor.handle(FeedEvent::Tick(kite_tick(NIFTY_TOKEN, 21_731.4, None))).await?;
    pipeline.flush_pending().await;

    let committed = store.committed();
    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].observed_at(), exchange_time);
    assert_eq!(committed[1].observed_at(), session_start());
    assert_eq!(committed[1].instrument_id(), NIFTY_TOKEN);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_run_returns_error_on_give_up(harness: Harness) {
    let Harness { feed, mut supervisor, .. } = harness;
    let (tx, rx) = mpsc::channel(8);
    tx.send(FeedEvent::Connected).await.unwrap();
    tx.send(FeedEvent::GaveUp { attempt: 3 }).await.unwrap();
    tx.send(FeedEvent::Connected).await.unwrap();

    let result = supervisor.run(rx).await;

    assert_eq!(result, Err(SupervisorError::ReconnectExhausted { attempts: 3 }));
    assert_eq!(feed.calls(), subscription_calls());
}

#[rstest]
#[tokio::test]
async fn test_run_ends_cleanly_with_the_stream(harness: Harness) -> Result<()> {
    let Harness { pipeline, mut supervisor, .. } = harness;
    let (tx, rx) = mpsc::channel(8);
    tx.send(FeedEvent::Connected).await?;
    tx.send(FeedEvent::Tick(kite_tick(INFY_TOKEN, 1500.0, None))).await?;
    drop(tx);

    supervisor.run(rx).await?;

    assert_eq!(pipeline.buffered(), 1);
    Ok(())
}

#[tokio::test]
async fn test_closed_stream_lets_inline_flush_commit() -> Result<()> {
    let store = MockTickStore::new();
    store.set_commit_delay(Duration::from_millis(200));
    let config = PipelineConfig {
        batch_threshold: 2,
        flush_interval_secs: 0,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(TickPipeline::new(
        store.clone(),
        "tickdata",
        config,
        PipelineMetrics::new()?,
    ));
    let adapter = FeedAdapter::new(vec![INFY_TOKEN], Mode::Full, Arc::clone(&pipeline));
    let mut supervisor = LifecycleSupervisor::new(MockFeed::new(), adapter);

    let (tx, rx) = mpsc::channel(8);
    tx.send(FeedEvent::Connected).await?;
    for price in [1500.0, 1500.05, 1500.10] {
        tx.send(FeedEvent::Tick(kite_tick(INFY_TOKEN, price, None))).await?;
    }
    // Close the stream while the first batch is still committing.
    let close = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
    };

    let (result, ()) = tokio::join!(supervisor.run(rx), close);
    result?;
    pipeline.shutdown().await;

    assert_eq!(store.batch_sizes(), vec![2, 1]);
    assert_eq!(pipeline.stats().dropped, 0);
    Ok(())
}
