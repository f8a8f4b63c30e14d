#[cfg(test)]
mod tests {
    use crate::{
        Harness, at, records,
        utils::{BrokerOp, ObservedStore},
    };
    use chrono::Duration;
    use harvest_core::{
        error::{BrokerError, StoreError},
        models::{HarvestStatus, StateUpdate},
        retry::RetryPolicy,
    };
    use harvest_sync::{
        buffer::DrainReport, checkpoint::CheckpointStore, config::ReconcilerConfig,
        error::ReconcileError,
    };
    use serde_json::json;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration as StdDuration,
    };
    use tracing_test::traced_test;

    fn batch_of(payloads: &[serde_json::Value]) -> Vec<&str> {
        payloads
            .iter()
            .map(|p| p["batch"].as_str().unwrap_or_default())
            .collect()
    }

    // Scenario: checkpoint written at 10:03, one record staged at 10:00 and one at 10:05,
    // then the process restarts.
    // Expected Outcome: recovery forwards the 10:00 record, drops the 10:05 one and leaves
    // the checkpoint untouched.
    #[traced_test]
    #[tokio::test]
    async fn recover_splits_backlog_on_stored_fence() {
        let h = Harness::new();
        let reconciler = h.reconciler();

        h.clock.set(at(10, 3, 0));
        reconciler
            .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestDone), &[])
            .await
            .unwrap();
        h.clock.set(at(10, 0, 0));
        h.producer().stage(&records("early", 1)).await.unwrap();
        h.clock.set(at(10, 5, 0));
        h.producer().stage(&records("late", 1)).await.unwrap();
        drop(reconciler);

        let restarted = h.reconciler();
        let report = restarted.recover().await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                forwarded: 1,
                discarded: 1
            }
        );
        assert_eq!(batch_of(&h.payloads("records").await), vec!["early"]);
        assert_eq!(h.depth("records-temp").await, 0);

        let cp = restarted.checkpoint().await.unwrap();
        assert_eq!(cp.status, HarvestStatus::HarvestDone);
        assert_eq!(cp.timestamp, Some(at(10, 3, 0)));
        assert!(logs_contain("Forwarded 1 messages, discarded 1"));
    }

    // Scenario: a batch is staged but the process dies before the checkpoint is written.
    // Expected Outcome: the orphaned batch postdates the previous fence and is discarded.
    #[traced_test]
    #[tokio::test]
    async fn crash_before_checkpoint_discards_orphaned_batch() {
        let h = Harness::new();
        let reconciler = h.reconciler();

        h.clock.set(at(10, 0, 0));
        let first = reconciler
            .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestPending), &records("a", 2))
            .await
            .unwrap();
        assert_eq!(first.main_queue_depth, Some(2));

        h.producer().stage(&records("orphan", 3)).await.unwrap();
        drop(reconciler);

        let report = h.reconciler().recover().await.unwrap();

        assert_eq!(report.forwarded, 0);
        assert_eq!(report.discarded, 3);
        assert_eq!(batch_of(&h.payloads("records").await), vec!["a", "a"]);
        assert_eq!(h.depth("records-temp").await, 0);
    }

    // Scenario: the batch is staged and the checkpoint written, then the process dies
    // before draining.
    // Expected Outcome: the batch predates the new fence and recovery forwards all of it.
    #[traced_test]
    #[tokio::test]
    async fn crash_after_checkpoint_replays_batch() {
        let h = Harness::new();
        let reconciler = h.reconciler();

        h.clock.set(at(10, 0, 0));
        h.producer().ensure_queues().await.unwrap();
        h.producer().stage(&records("b", 2)).await.unwrap();
        let committed_at = CheckpointStore::new(h.store.clone(), h.clock.clone(), None)
            .write(StateUpdate::new(HarvestStatus::HarvestDone))
            .await
            .unwrap();
        assert_eq!(committed_at, at(10, 0, 1));
        drop(reconciler);

        let report = h.reconciler().recover().await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                forwarded: 2,
                discarded: 0
            }
        );
        assert_eq!(h.payloads("records").await, vec![
            json!({ "batch": "b", "seq": 0 }),
            json!({ "batch": "b", "seq": 1 }),
        ]);
    }

    // Scenario: the broker rejects the second forward into the main queue.
    // Expected Outcome: the commit fails with BufferUnavailable, the unforwarded records stay
    // in staging and a later recovery completes the drain in order.
    #[traced_test]
    #[tokio::test]
    async fn drain_interrupted_mid_scan_resumes_on_recover() {
        let h = Harness::new();
        let flaky = h.flaky_broker();
        flaky.fail(BrokerOp::Publish, Some("records"), 1);
        let reconciler =
            h.reconciler_over(h.store.clone(), flaky.clone(), ReconcilerConfig::default());

        let err = reconciler
            .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestPending), &records("c", 3))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::BufferUnavailable(BrokerError::Unavailable(_))
        ));
        assert_eq!(h.depth("records").await, 1);
        assert_eq!(h.depth("records-temp").await, 2);
        assert!(reconciler.checkpoint().await.unwrap().timestamp.is_some());

        flaky.heal();
        drop(reconciler);
        let report = h.reconciler().recover().await.unwrap();

        assert_eq!(report.forwarded, 2);
        assert_eq!(report.discarded, 0);
        let seqs: Vec<_> = h
            .payloads("records")
            .await
            .iter()
            .map(|p| p["seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    // Scenario: the staging queue accepts two of five records before the broker drops.
    // Expected Outcome: PartialBatchStaged reports 2/5 and no checkpoint is written. Retrying
    // the whole batch delivers the stranded records along with the full retry.
    #[traced_test]
    #[tokio::test]
    async fn partial_staging_is_reported_and_retry_delivers_at_least_once() {
        let h = Harness::new();
        let flaky = h.flaky_broker();
        flaky.fail(BrokerOp::Publish, Some("records-temp"), 2);
        let reconciler =
            h.reconciler_over(h.store.clone(), flaky.clone(), ReconcilerConfig::default());
        let batch = records("d", 5);

        let err = reconciler
            .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestPending), &batch)
            .await
            .unwrap_err();

        match err {
            ReconcileError::PartialBatchStaged {
                confirmed, total, ..
            } => {
                assert_eq!(confirmed, 2);
                assert_eq!(total, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(reconciler.checkpoint().await.unwrap().timestamp.is_none());
        assert_eq!(h.depth("records-temp").await, 2);
        assert_eq!(h.depth("records").await, 0);

        flaky.heal();
        let report = reconciler
            .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestPending), &batch)
            .await
            .unwrap();

        assert_eq!(report.staged, 5);
        assert_eq!(
            report.drain,
            Some(DrainReport {
                forwarded: 7,
                discarded: 0
            })
        );
        assert_eq!(report.main_queue_depth, Some(7));
        assert_eq!(h.depth("records-temp").await, 0);
    }

    // Scenario: the very first publish to staging fails.
    // Expected Outcome: BufferUnavailable, nothing staged, no checkpoint written.
    #[traced_test]
    #[tokio::test]
    async fn staging_failure_before_any_record_leaves_no_trace() {
        let h = Harness::new();
        let flaky = h.flaky_broker();
        flaky.fail(BrokerOp::Publish, Some("records-temp"), 0);
        let reconciler =
            h.reconciler_over(h.store.clone(), flaky.clone(), ReconcilerConfig::default());

        let err = reconciler
            .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestDone), &records("e", 3))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::BufferUnavailable(_)));
        assert_eq!(h.depth("records-temp").await, 0);
        let cp = reconciler.checkpoint().await.unwrap();
        assert_eq!(cp.status, HarvestStatus::HarvestPending);
        assert!(cp.timestamp.is_none());
    }

    // Scenario: the checkpoint store answers slower than the configured call deadline.
    // Expected Outcome: recovery gives up with StoreUnavailable(Timeout) and writes nothing.
    #[traced_test]
    #[tokio::test]
    async fn slow_store_trips_call_deadline() {
        let h = Harness::new();
        let store = h.observed_store(StdDuration::from_millis(200));
        let config = ReconcilerConfig {
            call_timeout: Some(StdDuration::from_millis(20)),
            ..Default::default()
        };
        let reconciler = h.reconciler_over(store.clone(), h.broker.clone(), config);

        let err = reconciler.recover().await.unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::StoreUnavailable(StoreError::Timeout(_))
        ));
        assert_eq!(store.upserts(), 0);
    }

    // Scenario: recovery runs against an empty staging queue after a normal commit.
    // Expected Outcome: nothing moves and the checkpoint is never written.
    #[traced_test]
    #[tokio::test]
    async fn recover_with_empty_backlog_is_a_no_op() {
        let h = Harness::new();
        h.reconciler()
            .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestDone), &records("f", 2))
            .await
            .unwrap();

        let store = Arc::new(ObservedStore::new(h.store.clone()));
        let reconciler =
            h.reconciler_over(store.clone(), h.broker.clone(), ReconcilerConfig::default());
        let report = reconciler.recover().await.unwrap();

        assert_eq!(report, DrainReport::default());
        assert_eq!(store.upserts(), 0);
        assert_eq!(h.depth("records").await, 2);
    }

    // Scenario: three harvest runs commit one after another through the same reconciler.
    // Expected Outcome: each run drains exactly its own batch, fences only move forward and
    // the last run's fields win.
    #[traced_test]
    #[tokio::test]
    async fn consecutive_commits_drain_their_own_batches() {
        let h = Harness::new();
        let reconciler = h.reconciler();
        let mut last_fence = None;

        for batch in ["x", "y", "z"] {
            let recs = records(batch, 2);
            let report = reconciler
                .commit_and_drain(
                    StateUpdate::new(HarvestStatus::HarvestPending).with_field("batch", batch),
                    &recs,
                )
                .await
                .unwrap();

            assert_eq!(report.drain.map(|d| d.total()), Some(recs.len() as u64));
            assert_eq!(report.drain.map(|d| d.discarded), Some(0));
            assert_eq!(h.depth("records-temp").await, 0);
            if let Some(prev) = last_fence {
                assert!(report.committed_at > prev);
            }
            last_fence = Some(report.committed_at);
        }

        assert_eq!(
            batch_of(&h.payloads("records").await),
            vec!["x", "x", "y", "y", "z", "z"]
        );
        let cp = reconciler.checkpoint().await.unwrap();
        assert_eq!(cp.get("batch"), Some(&json!("z")));
        assert_eq!(cp.timestamp, last_fence);
    }

    // Scenario: single records staged two seconds either side of the fence.
    // Expected Outcome: only records stamped strictly before the fence are forwarded.
    #[traced_test]
    #[tokio::test]
    async fn fence_boundary_is_strict() {
        let fence = at(12, 0, 0);

        for offset in -2..=2i64 {
            let h = Harness::new();
            let reconciler = h.reconciler();

            h.clock.set(fence);
            reconciler
                .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestDone), &[])
                .await
                .unwrap();
            h.clock.set(fence + Duration::seconds(offset));
            h.producer().stage(&records("edge", 1)).await.unwrap();

            let report = reconciler.recover().await.unwrap();
            let expected = if offset < 0 { (1, 0) } else { (0, 1) };

            assert_eq!(
                (report.forwarded, report.discarded),
                expected,
                "offset {offset}s"
            );
        }
    }

    // Scenario: records sit in staging before any checkpoint exists.
    // Expected Outcome: with no fence to compare against, recovery forwards everything.
    #[traced_test]
    #[tokio::test]
    async fn first_run_recover_forwards_whole_backlog() {
        let h = Harness::new();
        let reconciler = h.reconciler();
        h.producer().ensure_queues().await.unwrap();
        h.producer().stage(&records("g", 2)).await.unwrap();
        h.clock.set(at(23, 59, 59));
        h.producer().stage(&records("h", 1)).await.unwrap();

        let report = reconciler.recover().await.unwrap();

        assert_eq!(report.forwarded, 3);
        assert_eq!(report.discarded, 0);
        assert_eq!(batch_of(&h.payloads("records").await), vec!["g", "g", "h"]);
        assert!(logs_contain("Forwarded 3 messages, discarded 0"));
    }

    // Scenario: the first staging attempt fails outright and the caller wraps the commit in a
    // retry policy; the broker recovers before the second attempt.
    // Expected Outcome: the second attempt succeeds and the batch lands exactly once.
    #[traced_test]
    #[tokio::test]
    async fn caller_retry_recovers_transient_staging_failure() {
        let h = Harness::new();
        let flaky = h.flaky_broker();
        flaky.fail(BrokerOp::Publish, Some("records-temp"), 0);
        let reconciler =
            h.reconciler_over(h.store.clone(), flaky.clone(), ReconcilerConfig::default());
        let policy = RetryPolicy::new(3, StdDuration::ZERO, StdDuration::ZERO);
        let batch = records("i", 2);
        let counter = AtomicUsize::new(0);

        let (flaky, reconciler, batch, calls) = (&flaky, &reconciler, &batch, &counter);
        let report = policy
            .run(
                move || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                        flaky.heal();
                    }
                    reconciler
                        .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestDone), batch)
                        .await
                },
                ReconcileError::disposition,
            )
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(report.main_queue_depth, Some(2));
        assert!(logs_contain("Retrying after transient failure"));
    }

    // Scenario: the staging queue stalls on every fetch for longer than the call deadline.
    // Expected Outcome: recovery fails with BufferUnavailable(Timeout) and the backlog is intact.
    #[traced_test]
    #[tokio::test]
    async fn slow_broker_trips_call_deadline() {
        let h = Harness::new();
        h.producer().ensure_queues().await.unwrap();
        h.producer().stage(&records("j", 2)).await.unwrap();

        let broker = h.slow_broker(BrokerOp::Get, StdDuration::from_millis(200));
        let config = ReconcilerConfig {
            call_timeout: Some(StdDuration::from_millis(20)),
            ..Default::default()
        };
        let err = h
            .reconciler_over(h.store.clone(), broker, config)
            .recover()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::BufferUnavailable(BrokerError::Timeout(_))
        ));
        assert_eq!(h.depth("records-temp").await, 2);
        assert_eq!(h.depth("records").await, 0);
    }

    // Scenario: fence at 10:03, one record staged at 10:00 and two at 10:05; the broker
    // refuses the acknowledgement of the first discarded record.
    // Expected Outcome: the forwarded 10:00 record stays final, both 10:05 records remain in
    // staging, and a later recovery discards them without forwarding anything twice.
    #[traced_test]
    #[tokio::test]
    async fn ack_failure_on_discard_keeps_acked_prefix() {
        let h = Harness::new();
        h.clock.set(at(10, 3, 0));
        h.reconciler()
            .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestDone), &[])
            .await
            .unwrap();
        h.clock.set(at(10, 0, 0));
        h.producer().stage(&records("early", 1)).await.unwrap();
        h.clock.set(at(10, 5, 0));
        h.producer().stage(&records("late", 2)).await.unwrap();

        let flaky = h.flaky_broker();
        flaky.fail(BrokerOp::Ack, Some("records-temp"), 1);
        let reconciler =
            h.reconciler_over(h.store.clone(), flaky.clone(), ReconcilerConfig::default());

        let err = reconciler.recover().await.unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::BufferUnavailable(BrokerError::Unavailable(_))
        ));
        assert_eq!(batch_of(&h.payloads("records").await), vec!["early"]);
        assert_eq!(batch_of(&h.payloads("records-temp").await), vec![
            "late", "late"
        ]);

        flaky.heal();
        let report = reconciler.recover().await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                forwarded: 0,
                discarded: 2
            }
        );
        assert_eq!(h.depth("records").await, 1);
        assert_eq!(h.depth("records-temp").await, 0);
    }

    // Scenario: fetching from staging fails after the first message has been handled.
    // Expected Outcome: BufferUnavailable; the first record is forwarded, the rest wait in
    // staging in their original order.
    #[traced_test]
    #[tokio::test]
    async fn get_failure_stops_drain_before_next_message() {
        let h = Harness::new();
        h.producer().ensure_queues().await.unwrap();
        h.producer().stage(&records("k", 3)).await.unwrap();

        let flaky = h.flaky_broker();
        flaky.fail(BrokerOp::Get, Some("records-temp"), 1);
        let reconciler =
            h.reconciler_over(h.store.clone(), flaky.clone(), ReconcilerConfig::default());

        let err = reconciler.recover().await.unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::BufferUnavailable(BrokerError::Unavailable(_))
        ));
        assert_eq!(h.payloads("records").await, vec![json!({ "batch": "k", "seq": 0 })]);
        assert_eq!(h.payloads("records-temp").await, vec![
            json!({ "batch": "k", "seq": 1 }),
            json!({ "batch": "k", "seq": 2 }),
        ]);
    }

    // Scenario: a commit carries no status of its own but a free-form "status" field.
    // Expected Outcome: the field is ignored, the stored status is kept and later reads and
    // recoveries keep working.
    #[traced_test]
    #[tokio::test]
    async fn status_field_cannot_poison_checkpoint() {
        let h = Harness::new();
        let reconciler = h.reconciler();
        reconciler
            .commit_and_drain(StateUpdate::new(HarvestStatus::HarvestDone), &[])
            .await
            .unwrap();

        reconciler
            .commit_and_drain(
                StateUpdate::default()
                    .with_field("status", "sleeping")
                    .with_field("cursor", 9),
                &[],
            )
            .await
            .unwrap();

        let cp = reconciler.checkpoint().await.unwrap();
        assert_eq!(cp.status, HarvestStatus::HarvestDone);
        assert_eq!(cp.get("cursor"), Some(&json!(9)));
        assert_eq!(reconciler.recover().await.unwrap(), DrainReport::default());
    }
}
