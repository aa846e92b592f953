//! Integration tests for many producers feeding one pipeline

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{init_test_logging, MockTickStore, RecordFactory};
use tick_store::{PipelineConfig, PipelineMetrics, TickPipeline};
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_never_overlap_flushes() -> Result<()> {
    init_test_logging();
    let store = MockTickStore::new();
    store.set_commit_delay(Duration::from_millis(1));
    let threshold = 50;
    let config = PipelineConfig {
        batch_threshold: threshold,
        buffer_multiplier: 4,
        write_timeout_secs: 10,
        flush_interval_secs: 0,
    };
    let pipeline = Arc::new(TickPipeline::new(
        store.clone(),
        "tickdata",
        config,
        PipelineMetrics::new()?,
    ));

    let producers = 8u32;
    let per_producer = 250;
    let mut join_set = JoinSet::new();
    for producer in 0..producers {
        let pipeline = Arc::clone(&pipeline);
        join_set.spawn(async move {
            let factory = RecordFactory::new().with_instruments(vec![producer + 1]);
            for record in factory.build_range(0, per_producer) {
                pipeline.submit(record).await?;
            }
            Ok::<_, tick_store::PipelineError>(())
        });
    }
    while let Some(joined) = join_set.join_next().await {
        joined??;
    }
    pipeline.flush_pending().await;

    let committed = store.committed();
    assert_eq!(committed.len(), producers as usize * per_producer);
    assert_eq!(store.max_concurrent_transactions(), 1);
    assert!(store.batch_sizes().iter().all(|&size| size <= threshold));

    // Each producer's records keep their submission order.
    let mut by_producer: HashMap<u32, Vec<_>> = HashMap::new();
    for record in &committed {
        by_producer
            .entry(record.instrument_id())
            .or_default()
            .push(record.observed_at());
    }
    assert_eq!(by_producer.len(), producers as usize);
    for times in by_producer.values() {
        assert_eq!(times.len(), per_producer);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_pending_concurrent_with_producers() -> Result<()> {
    let store = MockTickStore::new();
    let config = PipelineConfig {
        batch_threshold: 16,
        buffer_multiplier: 2,
        write_timeout_secs: 10,
        flush_interval_secs: 0,
    };
    let pipeline = Arc::new(TickPipeline::new(
        store.clone(),
        "tickdata",
        config,
        PipelineMetrics::new()?,
    ));

    let producer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            for record in RecordFactory::new().build_range(0, 500) {
                pipeline.submit(record).await?;
            }
            Ok::<_, tick_store::PipelineError>(())
        })
    };
    let flusher = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            for _ in 0..20 {
                pipeline.flush_pending().await;
                tokio::task::yield_now().await;
            }
        })
    };

    producer.await??;
    flusher.await?;
    pipeline.shutdown().await;

    assert_eq!(store.committed(), RecordFactory::new().build_range(0, 500));
    assert_eq!(store.max_concurrent_transactions(), 1);
    Ok(())
}
