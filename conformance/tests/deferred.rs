//! S5 Deferred then registered, and the "deferred delivery"/"deferred
//! timeout" universal properties.

mod support;

use std::sync::Arc;
use std::time::Duration;

use rapace::ChannelServerConfig;
use rapace_core::Value;

use support::Echo;

#[tokio::test]
async fn a_call_to_an_unregistered_channel_is_served_once_it_registers() {
    let config = ChannelServerConfig {
        deferred_timeout: Duration::from_millis(500),
    };
    let (left, right) = support::connect_pair_with(config).await;

    let client = left.client.clone();
    let call = tokio::spawn(async move { client.call("late", "echo", Value::Text("hi".into()), rapace::never_cancelled()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    right.server.register_channel("late", Arc::new(Echo));

    let outcome = tokio::time::timeout(Duration::from_secs(1), call).await.unwrap().unwrap();
    assert_eq!(outcome.unwrap(), Value::Text("hi".into()));
}

#[tokio::test]
async fn a_call_to_a_never_registered_channel_times_out_with_unknown_channel() {
    let config = ChannelServerConfig {
        deferred_timeout: Duration::from_millis(50),
    };
    let (left, _right) = support::connect_pair_with(config).await;

    let started = std::time::Instant::now();
    let err = left
        .client
        .call("never", "echo", Value::Absent, rapace::never_cancelled())
        .await
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(50));
    match err {
        rapace::CallError::Handler(payload) => assert_eq!(payload.name, "Unknown channel"),
        other => panic!("expected an Unknown channel error, got {other:?}"),
    }
}
