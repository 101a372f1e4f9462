//! End-to-end scenarios across the whole kernel.

use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spindle::prelude::*;

#[tokio::test]
async fn greet_procedure_with_handle_end_to_end() {
    let greet = Procedure::builder("greet:run")
        .handler(|args: Value| async move {
            Ok(json!(format!(
                "Hi, {}",
                args["name"].as_str().unwrap_or("stranger")
            )))
        })
        .build()
        .unwrap();

    let invocation = greet.with_handle().call(json!({"name": "World"}));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _sub = invocation
        .handle
        .events
        .subscribe(event_type::WILDCARD, move |event| {
            sink.lock().unwrap().push(event.event_type.clone());
        });

    let result = invocation.result.await.unwrap().into_value().unwrap();
    assert_eq!(result, json!("Hi, World"));

    let seen = events.lock().unwrap();
    let start = seen.iter().position(|t| t == "procedure:start").unwrap();
    let end = seen.iter().position(|t| t == "procedure:end").unwrap();
    assert!(start < end);
}

#[tokio::test]
async fn inner_metrics_surface_on_the_outer_node() {
    let inner = Procedure::builder("math:double")
        .handler(|args: Value| async move {
            let ctx = spindle::context::current().unwrap();
            ctx.metrics.set("tokens", 50.0);
            Ok(json!(args.as_i64().unwrap_or(0) * 2))
        })
        .build()
        .unwrap();

    let outer = {
        let inner = inner.clone();
        Procedure::builder("engine:outer")
            .handler(move |args: Value| {
                let inner = inner.clone();
                async move { inner.call(args).await }
            })
            .build()
            .unwrap()
    };

    let ctx = KernelContext::create(ContextOverrides::default());
    let result = spindle::context::run(ctx.clone(), outer.call(json!(21)))
        .await
        .unwrap();
    assert_eq!(result, json!(42));

    let graph = ctx.graph.as_ref().unwrap();
    assert_eq!(graph.len(), 2);
    let outer_node = graph.root().unwrap();
    assert_eq!(outer_node.name, "engine:outer");
    assert_eq!(outer_node.metric("tokens"), Some(50.0));
    assert_eq!(outer_node.status(), NodeStatus::Completed);
}

#[tokio::test]
async fn cached_response_resolves_a_slightly_late_waiter() {
    let channel = Channel::new("c");
    channel.publish(KernelEvent::response("R", json!(42)));

    tokio::time::sleep(Duration::from_millis(10)).await;
    let event = channel.wait_for_response("R", None).await.unwrap();
    assert_eq!(event.payload, json!(42));
    assert_eq!(event.channel.as_deref(), Some("c"));
}

#[tokio::test]
async fn aborting_mid_stream_cancels_the_node() {
    let ticker = Procedure::builder("engine:stream")
        .stream_handler(|_args: Value| async move {
            let stream: spindle::types::ValueStream =
                Box::pin(futures::stream::unfold(0u64, |n| async move {
                    if n >= 3 {
                        return None;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((Ok(json!(n + 1)), n + 1))
                }));
            Ok(stream)
        })
        .build()
        .unwrap();

    let invocation = ticker.with_handle().call(json!(null));
    let handle = invocation.handle.clone();

    let mut stream = invocation.result.await.unwrap().into_stream().unwrap();
    let mut seen = Vec::new();
    let mut aborted = false;
    while let Some(item) = stream.next().await {
        match item {
            Ok(value) => {
                seen.push(value);
                if seen.len() == 2 {
                    handle.cancel();
                }
            }
            Err(error) => {
                aborted = matches!(error, ProcedureError::Aborted);
                break;
            }
        }
    }

    assert_eq!(seen, vec![json!(1), json!(2)]);
    assert!(aborted);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handle.status(), Some(NodeStatus::Cancelled));
}

#[tokio::test]
async fn denied_tool_never_runs_its_handler() {
    let invoked = Arc::new(AtomicBool::new(false));
    let witness = invoked.clone();

    let mut registry = ToolRegistry::new();
    registry.register(
        ToolSpec::server("rm", "Removes things")
            .with_confirmation()
            .with_handler(move |_input| {
                let witness = witness.clone();
                async move {
                    witness.store(true, Ordering::SeqCst);
                    Ok(json!("removed"))
                }
            }),
    );
    let executor = Arc::new(ToolExecutor::new(registry));

    let resolver = {
        let executor = executor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            executor
                .confirmations()
                .resolve_confirmation(&ToolUseId::new("t-1"), false, false)
        })
    };

    let processed = executor
        .process_tool_with_confirmation(
            &ToolCallRequest::new(ToolUseId::new("t-1"), "rm", json!({})),
            &ProcessCallbacks::new(),
        )
        .await;
    resolver.await.unwrap().unwrap();

    assert!(!processed.result.success);
    assert_eq!(
        processed.result.error.as_deref(),
        Some("User denied tool execution")
    );
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn sibling_fork_metrics_sum_on_the_parent() {
    let worker = |value: f64| {
        Procedure::builder("tool:write")
            .handler(move |_args: Value| async move {
                let ctx = spindle::context::current().unwrap();
                ctx.metrics.set("k", value);
                Ok(Value::Null)
            })
            .build()
            .unwrap()
    };
    let left = worker(100.0);
    let right = worker(200.0);

    let parent = Procedure::builder("engine:parent")
        .handler(move |_args: Value| {
            let left = left.clone();
            let right = right.clone();
            async move {
                let (a, b) = tokio::join!(left.call(Value::Null), right.call(Value::Null));
                a?;
                b?;
                Ok(Value::Null)
            }
        })
        .build()
        .unwrap();

    let ctx = KernelContext::create(ContextOverrides::default());
    spindle::context::run(ctx.clone(), parent.call(Value::Null))
        .await
        .unwrap();

    let parent_node = ctx.graph.as_ref().unwrap().root().unwrap();
    assert_eq!(parent_node.metric("k"), Some(300.0));
}

#[tokio::test]
async fn channels_are_reachable_from_procedure_handlers() {
    let service: Arc<SessionChannelService> = Arc::new(SessionChannelService::new());

    let notify = Procedure::builder("engine:notify")
        .handler(|_args: Value| async move {
            let ctx = spindle::context::current().unwrap();
            let channels = ctx.channels.clone().expect("channels attached");
            channels.publish(
                &ctx,
                "updates",
                KernelEvent::new("progress", json!({"pct": 100})),
            );
            Ok(json!("sent"))
        })
        .build()
        .unwrap();

    let ctx = KernelContext::create(ContextOverrides::default().with_channels(service.clone()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _unsub = service.session_for(&ctx).channel("updates").subscribe(Arc::new(
        move |event: &KernelEvent| {
            sink.lock().unwrap().push(event.payload.clone());
        },
    ));

    spindle::context::run(ctx.clone(), notify.call(Value::Null))
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![json!({"pct": 100})]);
}
