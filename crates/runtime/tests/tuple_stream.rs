mod common;

use std::time::Duration;

use anyhow::Result;
use datafusion::common::ScalarValue;
use ferry_common::{Command, NodeId, RequestId};
use ferry_error::{ErrorCode, FerryError};
use ferry_runtime::{Pull, RequestContext, RequestOptions, StreamStatus, TupleStream};
use futures::TryStreamExt;
use proptest::prelude::*;

use common::{dispatcher_on, dispatcher_with, numbered_batches, settings, Script, ScriptedGateway};

fn request(partial_results: bool) -> RequestContext {
    RequestContext::new(
        RequestId(1),
        RequestOptions::default().with_partial_results(partial_results),
    )
}

fn open_numbers(
    dispatcher: &std::sync::Arc<ferry_runtime::Dispatcher>,
    ctx: &RequestContext,
) -> ferry_error::Result<TupleStream> {
    dispatcher.open(ctx, Command::select("numbers", &["n"]), "sales", NodeId::Plan(1))
}

fn value(row: &[ScalarValue]) -> i64 {
    match row[0] {
        ScalarValue::Int64(Some(v)) => v,
        ref other => panic!("unexpected value {:?}", other),
    }
}

#[tokio::test]
async fn test_rows_arrive_in_order() -> Result<()> {
    let gateway = ScriptedGateway::auto();
    gateway.script("numbers", Script::rows(numbered_batches(&[4, 4, 4])));
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(false);

    let stream = open_numbers(&dispatcher, &ctx)?;
    let mut seen = Vec::new();
    while let Some(row) = stream.next_row().await? {
        seen.push(value(&row));
    }

    assert_eq!(seen, (1..=12).collect::<Vec<_>>());
    assert_eq!(stream.rows_delivered(), 12);
    assert_eq!(stream.status(), StreamStatus::Drained);
    assert_eq!(gateway.log().violations, 0);

    stream.close()?;
    assert_eq!(gateway.log().closed, vec![stream.id()]);
    Ok(())
}

#[tokio::test]
async fn test_would_block_until_delivered() -> Result<()> {
    let gateway = ScriptedGateway::manual();
    gateway.script("numbers", Script::rows(numbered_batches(&[2, 1])));
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(false);

    let stream = open_numbers(&dispatcher, &ctx)?;
    let id = stream.id();
    assert_eq!(stream.status(), StreamStatus::AwaitingFirst);
    assert!(stream.next()?.is_would_block());

    assert!(gateway.deliver(&id));
    tokio::time::timeout(Duration::from_secs(1), ctx.work_available()).await?;
    assert!(matches!(stream.next()?, Pull::Ready(_)));
    // Swapping in the first batch already asked for the second.
    assert_eq!(gateway.outstanding(&id), 1);
    assert!(matches!(stream.next()?, Pull::Ready(_)));
    assert!(stream.next()?.is_would_block());
    assert_eq!(stream.status(), StreamStatus::AwaitingNext);

    assert!(gateway.deliver(&id));
    assert!(matches!(stream.next()?, Pull::Ready(_)));
    assert_eq!(stream.next()?, Pull::EndOfStream);
    assert_eq!(gateway.outstanding(&id), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streams_of_one_request_progress_on_separate_tasks() -> Result<()> {
    let gateway = ScriptedGateway::manual();
    gateway.script("numbers", Script::rows(numbered_batches(&[2, 2, 2])));
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(false);

    let streams = [NodeId::Plan(1), NodeId::Plan(2)]
        .into_iter()
        .map(|node| dispatcher.open(&ctx, Command::select("numbers", &["n"]), "sales", node))
        .collect::<ferry_error::Result<Vec<_>>>()?;
    let ids: Vec<_> = streams.iter().map(TupleStream::id).collect();

    let readers: Vec<_> = streams
        .into_iter()
        .map(|stream| {
            tokio::spawn(async move {
                stream
                    .into_rows()
                    .map_ok(|row| value(&row))
                    .try_collect::<Vec<_>>()
                    .await
            })
        })
        .collect();

    let feeder = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            loop {
                for id in &ids {
                    gateway.deliver(id);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    for reader in readers {
        let rows = tokio::time::timeout(Duration::from_secs(5), reader).await???;
        assert_eq!(rows, (1..=6).collect::<Vec<_>>());
    }
    feeder.abort();
    assert_eq!(gateway.log().violations, 0);
    Ok(())
}

#[tokio::test]
async fn test_partial_results_end_stream_early() -> Result<()> {
    let gateway = ScriptedGateway::auto();
    gateway.script(
        "numbers",
        Script::rows(numbered_batches(&[5, 5])).then_fail(FerryError::connector("link down")),
    );
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(true);

    let stream = open_numbers(&dispatcher, &ctx)?;
    let mut rows = 0;
    loop {
        match stream.next()? {
            Pull::Ready(_) => rows += 1,
            Pull::EndOfStream => break,
            Pull::WouldBlock => panic!("auto gateway never leaves a request pending"),
        }
    }

    assert_eq!(rows, 10);
    let warnings = ctx.warnings.snapshot();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].model, "sales");
    assert_eq!(warnings[0].binding, "pg");
    assert_eq!(warnings[0].cause.message, "link down");
    assert!(gateway.log().closed.contains(&stream.id()));
    Ok(())
}

#[tokio::test]
async fn test_failure_raised_after_buffered_rows() -> Result<()> {
    let gateway = ScriptedGateway::auto();
    gateway.script(
        "numbers",
        Script::rows(numbered_batches(&[5, 5])).then_fail(FerryError::connector("link down")),
    );
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(false);

    let stream = open_numbers(&dispatcher, &ctx)?;
    for _ in 0..10 {
        assert!(matches!(stream.next()?, Pull::Ready(_)));
    }
    let err = stream.next().unwrap_err();
    assert_eq!(err.code, ErrorCode::ConnectorFailure);
    assert_eq!(err.message, "link down");
    assert_eq!(stream.status(), StreamStatus::Failed);
    assert!(ctx.warnings.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_implicit_close_skips_close_call() -> Result<()> {
    let gateway = ScriptedGateway::auto();
    gateway.script(
        "numbers",
        Script::rows(numbered_batches(&[3])).with_implicit_close(),
    );
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(false);

    let stream = open_numbers(&dispatcher, &ctx)?;
    let rows: Vec<_> = stream.into_rows().try_collect().await?;
    assert_eq!(rows.len(), 3);
    assert!(gateway.log().closed.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancel_discards_late_batches() -> Result<()> {
    let gateway = ScriptedGateway::manual();
    gateway.script("numbers", Script::rows(numbered_batches(&[2, 2])));
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(false);

    let stream = open_numbers(&dispatcher, &ctx)?;
    let id = stream.id();
    stream.cancel();

    assert_eq!(stream.status(), StreamStatus::Closed);
    assert_eq!(gateway.log().cancelled, vec![id]);
    assert!(!gateway.deliver(&id));
    assert_eq!(stream.next().unwrap_err().code, ErrorCode::QueryCancelled);

    // Nothing more goes to the gateway on drop.
    drop(stream);
    assert!(gateway.log().closed.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_closed_stream_rejects_pulls() -> Result<()> {
    let gateway = ScriptedGateway::auto();
    gateway.script("numbers", Script::rows(numbered_batches(&[2, 2])));
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(false);

    let stream = open_numbers(&dispatcher, &ctx)?;
    assert!(matches!(stream.next()?, Pull::Ready(_)));
    stream.close()?;
    stream.close()?;

    assert_eq!(stream.next().unwrap_err().code, ErrorCode::StreamClosed);
    assert_eq!(gateway.log().closed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_drop_closes_open_stream() -> Result<()> {
    let gateway = ScriptedGateway::manual();
    gateway.script("numbers", Script::rows(numbered_batches(&[2])));
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(false);

    let stream = open_numbers(&dispatcher, &ctx)?;
    let id = stream.id();
    drop(stream);

    assert_eq!(gateway.log().closed, vec![id]);
    assert!(gateway.active_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_open_fails_for_unknown_model() -> Result<()> {
    let gateway = ScriptedGateway::auto();
    let dispatcher = dispatcher_with(gateway.clone(), settings(10));
    let ctx = request(false);

    let err = dispatcher
        .open(&ctx, Command::native("SELECT 1"), "sale", NodeId::Plan(0))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ModelNotFound);
    assert!(gateway.log().executed.is_empty());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prefetch_keeps_at_most_one_request_outstanding(
        sizes in prop::collection::vec(0usize..5, 1..6),
        ops in prop::collection::vec(any::<bool>(), 0..60),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let gateway = ScriptedGateway::manual();
        gateway.script("numbers", Script::rows(numbered_batches(&sizes)));
        let dispatcher = dispatcher_on(gateway.clone(), runtime.handle().clone());
        let ctx = request(false);

        let stream = open_numbers(&dispatcher, &ctx).unwrap();
        let id = stream.id();
        let mut seen = Vec::new();

        for pull in ops {
            if pull {
                if let Pull::Ready(row) = stream.next().unwrap() {
                    seen.push(value(&row));
                }
            } else {
                gateway.deliver(&id);
            }
            prop_assert!(gateway.outstanding(&id) <= 1);
        }

        loop {
            match stream.next().unwrap() {
                Pull::Ready(row) => seen.push(value(&row)),
                Pull::EndOfStream => break,
                Pull::WouldBlock => prop_assert!(gateway.deliver(&id)),
            }
            prop_assert!(gateway.outstanding(&id) <= 1);
        }

        let total: usize = sizes.iter().sum();
        prop_assert_eq!(seen, (1..=total as i64).collect::<Vec<_>>());
        prop_assert_eq!(gateway.log().violations, 0);
        prop_assert_eq!(gateway.log().max_outstanding, 1);
    }
}
