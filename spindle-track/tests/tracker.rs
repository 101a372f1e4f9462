use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spindle_context::{ContextOverrides, KernelContext};
use spindle_graph::NodeStatus;
use spindle_track::{ExecutionBoundary, ExecutionTracker, TrackOptions};
use spindle_types::{ProcedureError, ProcedureOutput, ValueStream, event_type};

fn collect_events(ctx: &KernelContext) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = ctx.events.subscribe(event_type::WILDCARD, move |event| {
        sink.lock().unwrap().push(event.event_type.clone());
    });
    seen
}

#[tokio::test]
async fn value_result_completes_node_and_emits_lifecycle() {
    let ctx = KernelContext::create(ContextOverrides::default());
    let events = collect_events(&ctx);

    let output = ExecutionTracker::track(&ctx, TrackOptions::new("engine:run"), |_node| async {
        Ok(ProcedureOutput::Value(json!("done")))
    })
    .await
    .unwrap();

    assert_eq!(output.into_value().unwrap(), json!("done"));
    let graph = ctx.graph.as_ref().unwrap();
    let root = graph.root().unwrap();
    assert_eq!(root.name, "engine:run");
    assert_eq!(root.status(), NodeStatus::Completed);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["procedure:start", "procedure:end"]
    );
}

#[tokio::test]
async fn metric_writes_through_the_view_track_deltas() {
    let ctx = KernelContext::create(ContextOverrides::default());

    ExecutionTracker::track(&ctx, TrackOptions::new("model:generate"), |_node| async {
        let forked = spindle_context::current().unwrap();
        forked.metrics.set("k", 100.0);
        forked.metrics.set("k", 150.0);
        Ok(ProcedureOutput::Value(Value::Null))
    })
    .await
    .unwrap();

    let root = ctx.graph.as_ref().unwrap().root().unwrap();
    assert_eq!(root.metric("k"), Some(150.0));
}

#[tokio::test]
async fn nested_tracks_propagate_metrics_upward() {
    let ctx = KernelContext::create(ContextOverrides::default());

    ExecutionTracker::track(&ctx, TrackOptions::new("engine:outer"), |_node| async {
        let outer_ctx = spindle_context::current().unwrap();
        ExecutionTracker::track(&outer_ctx, TrackOptions::new("model:inner"), |_node| async {
            spindle_context::current().unwrap().metrics.set("tokens", 50.0);
            Ok(ProcedureOutput::Value(json!(2)))
        })
        .await?;
        Ok(ProcedureOutput::Value(json!(1)))
    })
    .await
    .unwrap();

    let graph = ctx.graph.as_ref().unwrap();
    assert_eq!(graph.len(), 2);
    let outer = graph.root().unwrap();
    assert_eq!(outer.metric("tokens"), Some(50.0));
}

#[tokio::test]
async fn sibling_forks_sum_into_parent() {
    let ctx = KernelContext::create(ContextOverrides::default());

    ExecutionTracker::track(&ctx, TrackOptions::new("engine:parent"), |_node| async {
        let parent_ctx = spindle_context::current().unwrap();
        let left = ExecutionTracker::track(&parent_ctx, TrackOptions::new("tool:left"), |_| async {
            spindle_context::current().unwrap().metrics.set("k", 100.0);
            Ok(ProcedureOutput::Value(Value::Null))
        });
        let right =
            ExecutionTracker::track(&parent_ctx, TrackOptions::new("tool:right"), |_| async {
                spindle_context::current().unwrap().metrics.set("k", 200.0);
                Ok(ProcedureOutput::Value(Value::Null))
            });
        let (left, right) = tokio::join!(left, right);
        left?;
        right?;
        Ok(ProcedureOutput::Value(Value::Null))
    })
    .await
    .unwrap();

    let parent = ctx.graph.as_ref().unwrap().root().unwrap();
    assert_eq!(parent.metric("k"), Some(300.0));
}

#[tokio::test]
async fn stream_emits_one_chunk_per_item() {
    let ctx = KernelContext::create(ContextOverrides::default());
    let events = collect_events(&ctx);

    let output = ExecutionTracker::track(&ctx, TrackOptions::new("engine:stream"), |_| async {
        let stream: ValueStream =
            Box::pin(futures::stream::iter([1, 2, 3].map(|n| Ok(json!(n)))));
        Ok(ProcedureOutput::Stream(stream))
    })
    .await
    .unwrap();

    let items: Vec<Value> = output
        .into_stream()
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(items, vec![json!(1), json!(2), json!(3)]);

    // Give the producer task a beat to settle the node.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let root = ctx.graph.as_ref().unwrap().root().unwrap();
    assert_eq!(root.status(), NodeStatus::Completed);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "procedure:start",
            "stream:chunk",
            "stream:chunk",
            "stream:chunk",
            "procedure:end"
        ]
    );
}

#[tokio::test]
async fn aborted_signal_prevents_handler_invocation() {
    let ctx = KernelContext::create(ContextOverrides::default());
    ctx.signal.cancel();
    let invoked = Arc::new(AtomicBool::new(false));
    let witness = invoked.clone();

    let result = ExecutionTracker::track(&ctx, TrackOptions::new("tool:run"), |_| async move {
        witness.store(true, Ordering::SeqCst);
        Ok(ProcedureOutput::Value(Value::Null))
    })
    .await;

    assert!(matches!(result, Err(ProcedureError::Aborted)));
    assert!(!invoked.load(Ordering::SeqCst));
    let root = ctx.graph.as_ref().unwrap().root().unwrap();
    assert_eq!(root.status(), NodeStatus::Cancelled);
}

#[tokio::test]
async fn abort_mid_stream_cancels_the_node() {
    let ctx = KernelContext::create(ContextOverrides::default());

    let output = ExecutionTracker::track(&ctx, TrackOptions::new("engine:stream"), |_| async {
        let stream: ValueStream = Box::pin(futures::stream::unfold(0u64, |n| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Some((Ok(json!(n + 1)), n + 1))
        }));
        Ok(ProcedureOutput::Stream(stream))
    })
    .await
    .unwrap();

    let mut stream = output.into_stream().unwrap();
    let mut seen = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(value) => {
                seen.push(value);
                if seen.len() == 2 {
                    ctx.signal.cancel();
                }
            }
            Err(error) => {
                assert!(error.is_abort());
                break;
            }
        }
    }
    assert_eq!(seen, vec![json!(1), json!(2)]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let root = ctx.graph.as_ref().unwrap().root().unwrap();
    assert_eq!(root.status(), NodeStatus::Cancelled);
    // Cancellation does not propagate metrics; the root has no parent
    // here, but its own metrics stay untouched by the abort.
    assert!(root.metrics().is_empty());
}

#[tokio::test]
async fn stream_error_fails_the_node() {
    let ctx = KernelContext::create(ContextOverrides::default());
    let events = collect_events(&ctx);

    let output = ExecutionTracker::track(&ctx, TrackOptions::new("engine:stream"), |_| async {
        let stream: ValueStream = Box::pin(futures::stream::iter(vec![
            Ok(json!(1)),
            Err(ProcedureError::Handler("midstream failure".into())),
        ]));
        Ok(ProcedureOutput::Stream(stream))
    })
    .await
    .unwrap();

    let collected: Vec<Result<Value, ProcedureError>> =
        output.into_stream().unwrap().collect().await;
    assert_eq!(collected.len(), 2);
    assert!(collected[1].is_err());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let root = ctx.graph.as_ref().unwrap().root().unwrap();
    assert_eq!(root.status(), NodeStatus::Failed);
    assert!(
        events
            .lock()
            .unwrap()
            .iter()
            .any(|t| t == "procedure:error")
    );
}

#[tokio::test]
async fn root_call_mints_an_execution_boundary() {
    let ctx = KernelContext::create(ContextOverrides::default());

    ExecutionTracker::track(&ctx, TrackOptions::new("engine:run"), |node| async move {
        assert!(node.is_execution_boundary);
        assert_eq!(
            node.execution_id.as_ref().map(|id| id.as_str()),
            Some(node.pid.as_str())
        );
        assert_eq!(node.execution_type.as_deref(), Some("engine"));

        // A nested call under the default policy inherits the boundary.
        let inner_ctx = spindle_context::current().unwrap();
        ExecutionTracker::track(&inner_ctx, TrackOptions::new("tool:run"), |inner| async move {
            assert!(!inner.is_execution_boundary);
            assert_eq!(inner.execution_id, node.execution_id);
            Ok(ProcedureOutput::Value(Value::Null))
        })
        .await?;
        Ok(ProcedureOutput::Value(Value::Null))
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn child_boundary_mints_under_the_ambient_execution() {
    let ctx = KernelContext::create(ContextOverrides::default());

    ExecutionTracker::track(&ctx, TrackOptions::new("engine:run"), |outer| async move {
        let inner_ctx = spindle_context::current().unwrap();
        let ambient_execution = inner_ctx.execution_id.clone();
        ExecutionTracker::track(
            &inner_ctx,
            TrackOptions::new("engine:spawn").with_boundary(ExecutionBoundary::Child),
            |spawned| async move {
                assert!(spawned.is_execution_boundary);
                assert_ne!(spawned.execution_id, outer.execution_id);
                let spawned_ctx = spindle_context::current().unwrap();
                assert_eq!(spawned_ctx.parent_execution_id, ambient_execution);
                Ok(ProcedureOutput::Value(Value::Null))
            },
        )
        .await?;
        Ok(ProcedureOutput::Value(Value::Null))
    })
    .await
    .unwrap();
}
