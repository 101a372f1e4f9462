//! Property-based tests: middleware chain ordering and composition.

use futures::future::BoxFuture;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use spindle_procedure::{Envelope, Next, Procedure, ProcedureMiddleware, ProcedureResult};

/// A middleware that records its index on the way in.
struct OrderMiddleware {
    index: usize,
    log: Arc<Mutex<Vec<usize>>>,
}

impl ProcedureMiddleware for OrderMiddleware {
    fn process<'a>(
        &'a self,
        args: Value,
        envelope: &'a Envelope,
        next: Next<'a>,
    ) -> BoxFuture<'a, ProcedureResult> {
        Box::pin(async move {
            self.log.lock().unwrap().push(self.index);
            next.run(args, envelope).await
        })
    }
}

/// A middleware that adds a constant to the integer args.
struct AddMiddleware {
    delta: i64,
}

impl ProcedureMiddleware for AddMiddleware {
    fn process<'a>(
        &'a self,
        args: Value,
        envelope: &'a Envelope,
        next: Next<'a>,
    ) -> BoxFuture<'a, ProcedureResult> {
        Box::pin(async move {
            let n = args.as_i64().unwrap_or(0);
            next.run(json!(n + self.delta), envelope).await
        })
    }
}

fn identity() -> Procedure {
    Procedure::builder("prop:identity")
        .handler(|args: Value| async move { Ok(args) })
        .build()
        .unwrap()
}

fn add_constant(delta: i64) -> Procedure {
    Procedure::builder("prop:add")
        .handler(move |args: Value| async move { Ok(json!(args.as_i64().unwrap_or(0) + delta)) })
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn middleware_enters_in_registration_order(n_middleware in 2usize..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut proc = identity();
            for index in 0..n_middleware {
                proc = proc.use_mw(OrderMiddleware {
                    index,
                    log: log.clone(),
                });
            }

            proc.call(json!(0)).await.unwrap();

            let recorded = log.lock().unwrap().clone();
            assert_eq!(recorded.len(), n_middleware,
                "Expected {} middleware calls, got {}", n_middleware, recorded.len());
            for (position, &index) in recorded.iter().enumerate() {
                assert_eq!(position, index,
                    "Middleware {} ran at position {}", index, position);
            }
        });
    }

    #[test]
    fn input_transforms_compose_additively(
        deltas in proptest::collection::vec(-50i64..50, 1..5),
        input in -1_000i64..1_000,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let tenfold = Procedure::builder("prop:tenfold")
                .handler(|args: Value| async move {
                    Ok(json!(args.as_i64().unwrap_or(0) * 10))
                })
                .build()
                .unwrap();

            let mut proc = tenfold;
            for &delta in &deltas {
                proc = proc.use_mw(AddMiddleware { delta });
            }

            let expected = (input + deltas.iter().sum::<i64>()) * 10;
            let result = proc.call(json!(input)).await.unwrap();
            assert_eq!(result, json!(expected));
        });
    }

    #[test]
    fn pipe_matches_sequential_invocation(
        offsets in proptest::collection::vec(-100i64..100, 1..4),
        input in -1_000i64..1_000,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut chained = add_constant(offsets[0]);
            for &offset in &offsets[1..] {
                chained = chained.pipe(&add_constant(offset));
            }

            let expected = input + offsets.iter().sum::<i64>();
            let result = chained.call(json!(input)).await.unwrap();
            assert_eq!(result, json!(expected));
        });
    }

    #[test]
    fn use_mw_never_mutates_the_original(delta in 1i64..100, input in -1_000i64..1_000) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let base = identity();
            let wrapped = base.use_mw(AddMiddleware { delta });

            assert_eq!(base.call(json!(input)).await.unwrap(), json!(input));
            assert_eq!(wrapped.call(json!(input)).await.unwrap(), json!(input + delta));
        });
    }
}
