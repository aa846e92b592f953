//! Threshold triggering, ordering and failure handling of the pipeline flush

use anyhow::{bail, Result};
use pretty_assertions::assert_eq;
use rstest::*;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{records, wait_for, MockTickStore, RecordFactory};
use tick_store::flush::CANCELLED_STAGE;
use tick_store::{FlushOutcome, PipelineConfig, PipelineError, PipelineMetrics, TickPipeline};
use tokio::sync::watch;

fn pipeline(
    store: &MockTickStore,
    threshold: usize,
    flush_interval_secs: u64,
) -> Result<Arc<TickPipeline<MockTickStore>>> {
    let config = PipelineConfig {
        batch_threshold: threshold,
        buffer_multiplier: 4,
        write_timeout_secs: 5,
        flush_interval_secs,
    };
    Ok(Arc::new(TickPipeline::new(
        store.clone(),
        "tickdata",
        config,
        PipelineMetrics::new()?,
    )))
}

#[rstest]
#[case(1)]
#[case(5)]
#[case(64)]
#[tokio::test]
async fn test_exact_threshold_flushes_once(#[case] threshold: usize) -> Result<()> {
    let store = MockTickStore::new();
    let pipeline = pipeline(&store, threshold, 0)?;

    for record in records(threshold) {
        pipeline.submit(record).await?;
    }

    assert_eq!(store.batch_sizes(), vec![threshold]);
    assert_eq!(pipeline.buffered(), 0);
    Ok(())
}

#[tokio::test]
async fn test_below_threshold_does_not_flush() -> Result<()> {
    let store = MockTickStore::new();
    let pipeline = pipeline(&store, 5, 0)?;

    for record in records(4) {
        pipeline.submit(record).await?;
    }

    assert!(store.batch_sizes().is_empty());
    assert_eq!(pipeline.buffered(), 4);
    Ok(())
}

#[tokio::test]
async fn test_order_preserved_across_batches() -> Result<()> {
    let store = MockTickStore::new();
    let pipeline = pipeline(&store, 4, 0)?;

    for record in records(10) {
        pipeline.submit(record).await?;
    }
    assert_eq!(store.batch_sizes(), vec![4, 4]);
    assert_eq!(pipeline.buffered(), 2);

    let outcome = pipeline.flush_pending().await;
    assert_eq!(outcome.records, 2);
    assert_eq!(store.batch_sizes(), vec![4, 4, 2]);
    assert_eq!(store.committed(), records(10));
    Ok(())
}

#[tokio::test]
async fn test_failed_batch_is_dropped_and_pipeline_continues() -> Result<()> {
    let store = MockTickStore::new();
    let pipeline = pipeline(&store, 3, 0)?;
    let factory = RecordFactory::new();

    store.set_fail_on_row(Some(1));
    for record in factory.build_range(0, 3) {
        pipeline.submit(record).await?;
    }
    assert!(store.committed().is_empty());
    assert_eq!(pipeline.buffered(), 0);

    store.set_fail_on_row(None);
    for record in factory.build_range(3, 3) {
        pipeline.submit(record).await?;
    }

    assert_eq!(store.committed(), factory.build_range(3, 3));
    let stats = pipeline.stats();
    assert_eq!(stats.enqueued, 6);
    assert_eq!(stats.committed, 3);
    assert_eq!(stats.dropped, 3);
    assert!(pipeline
        .metrics()
        .render()
        .contains("tick_store_batches_failed_total{stage=\"insert\"} 1"));
    Ok(())
}

#[tokio::test]
async fn test_flush_pending_on_empty_buffer() -> Result<()> {
    let store = MockTickStore::new();
    let pipeline = pipeline(&store, 3, 0)?;

    assert!(pipeline.flush_pending().await.is_empty());
    assert_eq!(store.transactions_begun(), 0);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_flushes_and_rejects_new_records() -> Result<()> {
    let store = MockTickStore::new();
    let pipeline = pipeline(&store, 5, 0)?;
    let factory = RecordFactory::new();

    for record in factory.build_range(0, 2) {
        pipeline.submit(record).await?;
    }
    let outcome = pipeline.shutdown().await;

    assert_eq!(outcome.records, 2);
    assert_eq!(store.committed(), factory.build_range(0, 2));
    assert_eq!(
        pipeline.submit(factory.build(2)).await,
        Err(PipelineError::Closed)
    );
    Ok(())
}

#[tokio::test]
async fn test_periodic_flush_persists_records_below_threshold() -> Result<()> {
    let store = MockTickStore::new();
    let pipeline = pipeline(&store, 100, 1)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = pipeline
        .spawn_periodic_flush(shutdown_rx)
        .expect("interval enabled");

    for record in records(3) {
        pipeline.submit(record).await?;
    }

    let probe = store.clone();
    wait_for(
        move || probe.committed_len() == 3,
        Duration::from_secs(5),
        Duration::from_millis(20),
    )
    .await?;

    shutdown_tx.send(true)?;
    task.await?;
    assert_eq!(store.batch_sizes(), vec![3]);
    Ok(())
}

#[tokio::test]
async fn test_periodic_flush_disabled_with_zero_interval() -> Result<()> {
    let store = MockTickStore::new();
    let pipeline = pipeline(&store, 100, 0)?;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    assert!(pipeline.spawn_periodic_flush(shutdown_rx).is_none());
    Ok(())
}

#[tokio::test]
async fn test_cancelled_inline_flush_counts_dropped_batch() -> Result<()> {
    let store = MockTickStore::new();
    store.set_commit_delay(Duration::from_millis(500));
    let pipeline = pipeline(&store, 4, 0)?;

    let submit_all = async {
        for record in records(4) {
            pipeline.submit(record).await?;
        }
        Ok::<_, PipelineError>(())
    };
    tokio::select! {
        result = submit_all => bail!("flush finished before being cancelled: {result:?}"),
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }

    let outcome = pipeline.shutdown().await;
    let stats = pipeline.stats();

    assert_eq!(outcome, FlushOutcome::default());
    assert_eq!(store.committed_len(), 0);
    assert_eq!(store.rollbacks(), 1);
    assert_eq!(stats.enqueued, 4);
    assert_eq!(stats.dropped, 4);
    assert_eq!(stats.committed + stats.dropped, stats.enqueued);
    assert_eq!(
        pipeline
            .metrics()
            .batches_failed
            .with_label_values(&[CANCELLED_STAGE])
            .get(),
        1
    );
    Ok(())
}
