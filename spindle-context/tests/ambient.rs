use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use spindle_context::{ContextOverrides, KernelContext, current, emit, fork, run, try_current};
use spindle_types::{ContextError, Pid, event_type};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trace_id_survives_await_points() {
    let ctx = KernelContext::create(ContextOverrides::default());
    let trace_id = ctx.trace_id.clone();
    run(ctx, async move {
        assert_eq!(current().unwrap().trace_id, trace_id);
        tokio::task::yield_now().await;
        // After potential thread migration:
        assert_eq!(current().unwrap().trace_id, trace_id);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(current().unwrap().trace_id, trace_id);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_tasks_are_isolated() {
    let mut handles = Vec::new();
    for i in 0..5 {
        handles.push(tokio::spawn(async move {
            let ctx = KernelContext::create(ContextOverrides {
                trace_id: Some(format!("trace-{i}").into()),
                ..Default::default()
            });
            run(ctx, async move {
                tokio::task::yield_now().await;
                current().unwrap().trace_id.to_string()
            })
            .await
        }));
    }
    let mut ids: Vec<String> = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort();
    assert_eq!(
        ids,
        vec!["trace-0", "trace-1", "trace-2", "trace-3", "trace-4"]
    );
}

#[tokio::test]
async fn current_outside_any_scope_fails() {
    assert!(matches!(current(), Err(ContextError::NotFound)));
    assert!(try_current().is_none());
}

#[tokio::test]
async fn fork_overrides_do_not_leak_to_parent() {
    let ctx = KernelContext::create(ContextOverrides::default());
    run(ctx, async {
        let parent_pid = current().unwrap().procedure_pid.clone();
        assert!(parent_pid.is_none());

        fork(
            ContextOverrides {
                procedure_pid: Some(Pid::new("child-pid")),
                execution_type: Some("tool".into()),
                ..Default::default()
            },
            async {
                let forked = current().unwrap();
                assert_eq!(forked.procedure_pid, Some(Pid::new("child-pid")));
                assert_eq!(forked.execution_type.as_deref(), Some("tool"));
            },
        )
        .await
        .unwrap();

        let after = current().unwrap();
        assert!(after.procedure_pid.is_none());
        assert!(after.execution_type.is_none());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sibling_forks_do_not_observe_each_other() {
    let ctx = KernelContext::create(ContextOverrides::default());
    run(ctx, async {
        let left = fork(
            ContextOverrides {
                procedure_pid: Some(Pid::new("left")),
                ..Default::default()
            },
            async {
                tokio::task::yield_now().await;
                current().unwrap().procedure_pid.clone().unwrap()
            },
        );
        let right = fork(
            ContextOverrides {
                procedure_pid: Some(Pid::new("right")),
                ..Default::default()
            },
            async {
                tokio::task::yield_now().await;
                current().unwrap().procedure_pid.clone().unwrap()
            },
        );
        let (left, right) = tokio::join!(left, right);
        assert_eq!(left.unwrap(), Pid::new("left"));
        assert_eq!(right.unwrap(), Pid::new("right"));
    })
    .await;
}

#[tokio::test]
async fn shared_fields_alias_across_forks() {
    let ctx = KernelContext::create(ContextOverrides::default());
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let _sub = ctx.events.subscribe(event_type::WILDCARD, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    run(ctx.clone(), async {
        fork(ContextOverrides::default(), async {
            emit("status", json!({"ok": true}), Some("test")).unwrap();
        })
        .await
        .unwrap();
    })
    .await;

    // The fork published on the same bus the parent subscribed to.
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // The signal is shared by reference: cancelling the parent's token
    // is visible to children created before or after.
    let child = ctx.child(ContextOverrides::default());
    ctx.signal.cancel();
    assert!(child.signal.is_cancelled());
}

#[tokio::test]
async fn emit_reaches_execution_handle_too() {
    let handle_bus = spindle_context::EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _sub = handle_bus.subscribe("status", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let ctx = KernelContext::create(
        ContextOverrides::default().with_execution_handle(handle_bus.clone()),
    );
    run(ctx, async {
        emit("status", json!(null), None).unwrap();
    })
    .await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
