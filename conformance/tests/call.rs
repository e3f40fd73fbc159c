//! S2 Simple call, S3 Error call, and the "at-most-one terminal response"
//! universal property.

mod support;

use std::sync::Arc;

use rapace::ChannelClient;
use rapace_core::header::ResponseHeader;
use rapace_core::Value;
use rapace_transport::MemTransport;

use support::{Echo, Failing};

#[tokio::test]
async fn simple_call_returns_its_argument_unchanged() {
    let (left, right) = support::connect_pair().await;
    right.server.register_channel("ping", Arc::new(Echo));

    let outcome = left.client.call("ping", "echo", Value::Text("hi".into()), rapace::never_cancelled()).await;
    assert_eq!(outcome.unwrap(), Value::Text("hi".into()));
}

#[tokio::test]
async fn failing_call_surfaces_the_standard_error_shape() {
    let (left, right) = support::connect_pair().await;
    right.server.register_channel("broken", Arc::new(Failing));

    let err = left.client.call("broken", "go", Value::Absent, rapace::never_cancelled()).await.unwrap_err();
    match err {
        rapace::CallError::Handler(payload) => {
            assert_eq!(payload.name, "Error");
            assert_eq!(payload.message, "bad");
            assert_eq!(
                payload.stack,
                Some(rapace_core::Stack::Lines(vec!["line1".into(), "line2".into(), "line3".into()]))
            );
        }
        other => panic!("expected a standard Handler error, got {other:?}"),
    }
}

/// N concurrent calls over one connection never collide on a request id:
/// each sees its own argument echoed back, never another's.
#[tokio::test]
async fn concurrent_calls_never_cross_wires() {
    let (left, right) = support::connect_pair().await;
    right.server.register_channel("ping", Arc::new(Echo));

    let client = left.client.clone();
    let calls = (0..32).map(|i| {
        let client = client.clone();
        tokio::spawn(async move {
            let arg = Value::Text(format!("marker-{i}"));
            let outcome = client.call("ping", "echo", arg.clone(), rapace::never_cancelled()).await.unwrap();
            assert_eq!(outcome, arg);
        })
    });
    for call in calls {
        call.await.unwrap();
    }
}

/// A second terminal frame for an id whose request already resolved is
/// silently ignored: the pending entry is gone, so there is nothing left
/// to confuse.
#[tokio::test]
async fn a_late_duplicate_terminal_frame_is_ignored() {
    let (transport, _peer) = MemTransport::pair();
    let client = ChannelClient::new(Arc::new(transport));
    client.handle_frame(ResponseHeader::Initialize, Value::Absent);

    let outcome_task = {
        let client = client.clone();
        tokio::spawn(async move { client.call("ping", "echo", Value::Text("hi".into()), rapace::never_cancelled()).await })
    };

    // Let the queued dispatch mark itself sent before resolving it.
    tokio::task::yield_now().await;
    client.handle_frame(ResponseHeader::CallOk { id: 1 }, Value::Text("hi".into()));
    client.handle_frame(
        ResponseHeader::CallErr { id: 1 },
        Value::Structured(serde_json::json!({"message": "late", "name": "Error"})),
    );

    let outcome = outcome_task.await.unwrap();
    assert_eq!(outcome.unwrap(), Value::Text("hi".into()));
}
