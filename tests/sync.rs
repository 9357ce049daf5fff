#![allow(dead_code)]

use crate::utils::{
    beta_ui_flag, discount_flag, flag_upsert, full_sync_message, patch_message, wait_until,
    ScriptedConnector, SessionScript,
};
use flagstream::{Client, ErrorKind, User};
use std::sync::Arc;
use std::time::Duration;

mod utils;

fn online_client(connector: ScriptedConnector) -> Client {
    Client::builder("test-env-secret")
        .streaming_connector(Arc::new(connector))
        .event_url("https://events.example.com")
        .first_retry_delay(Duration::from_millis(20))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn full_sync_initializes_and_patches_update() {
    let (session, handle) = ScriptedConnector::stream_session();
    let client = online_client(ScriptedConnector::new(vec![session]));

    handle
        .server_tx
        .send(full_sync_message(vec![beta_ui_flag(1, 0)], vec![], 1))
        .unwrap();
    client.wait_for_ready(Duration::from_secs(2)).await.unwrap();
    assert!(client.is_initialized());

    let user = User::new("u1", "Jane").custom("country", "US");
    assert_eq!(client.variation("beta-ui", &user, "?".to_owned()), "on");

    // a patch flips the rule's served variation
    handle
        .server_tx
        .send(patch_message(vec![flag_upsert(beta_ui_flag(2, 1))]))
        .unwrap();
    let flipped = wait_until(
        || client.variation("beta-ui", &user, "?".to_owned()) == "off",
        Duration::from_secs(2),
    )
    .await;
    assert!(flipped);
    client.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_a_sync_with_the_current_version_on_connect() {
    let (session, mut handle) = ScriptedConnector::stream_session();
    let client = online_client(ScriptedConnector::new(vec![session]));

    let request = tokio::time::timeout(Duration::from_secs(2), handle.client_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&request).unwrap();
    assert_eq!(parsed["messageType"], "data-sync");
    assert_eq!(parsed["data"]["version"], 0);
    client.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_order_patches_converge_to_the_newest() {
    let (session, handle) = ScriptedConnector::stream_session();
    let client = online_client(ScriptedConnector::new(vec![session]));

    handle
        .server_tx
        .send(full_sync_message(vec![beta_ui_flag(1, 0)], vec![], 1))
        .unwrap();
    client.wait_for_ready(Duration::from_secs(2)).await.unwrap();

    let user = User::new("u1", "Jane").custom("country", "US");
    handle
        .server_tx
        .send(patch_message(vec![flag_upsert(beta_ui_flag(5, 1))]))
        .unwrap();
    assert!(
        wait_until(
            || client.flag_detail("beta-ui", &user).flag_version == Some(5),
            Duration::from_secs(2)
        )
        .await
    );

    // a late redelivery of an older update must not win
    handle
        .server_tx
        .send(patch_message(vec![flag_upsert(beta_ui_flag(3, 0))]))
        .unwrap();
    handle
        .server_tx
        .send(patch_message(vec![flag_upsert(discount_flag(6))]))
        .unwrap();
    assert!(
        wait_until(|| client.is_flag_known("discount"), Duration::from_secs(2)).await
    );
    assert_eq!(client.flag_detail("beta-ui", &user).flag_version, Some(5));
    assert_eq!(client.variation("beta-ui", &user, "?".to_owned()), "off");
    client.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnects_after_a_dropped_connection() {
    let (first, first_handle) = ScriptedConnector::stream_session();
    let (second, second_handle) = ScriptedConnector::stream_session();
    let client = online_client(ScriptedConnector::new(vec![
        SessionScript::Failed("connection refused".to_owned()),
        first,
        second,
    ]));

    // the first stream dies immediately when its server side is dropped
    drop(first_handle.server_tx);

    second_handle
        .server_tx
        .send(full_sync_message(vec![beta_ui_flag(1, 0)], vec![], 1))
        .unwrap();
    client.wait_for_ready(Duration::from_secs(5)).await.unwrap();
    assert!(client.is_initialized());
    client.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_credentials_stop_the_synchronizer() {
    let client = online_client(ScriptedConnector::new(vec![SessionScript::Rejected(
        "invalid env secret".to_owned(),
    )]));

    let err = client.wait_for_ready(Duration::from_secs(2)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InitializationFailed);
    assert!(!client.is_initialized());
    client.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_stream_data_stops_the_synchronizer() {
    let (session, handle) = ScriptedConnector::stream_session();
    let client = online_client(ScriptedConnector::new(vec![session]));

    handle.server_tx.send("{ not json".to_owned()).unwrap();
    let err = client.wait_for_ready(Duration::from_secs(2)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InitializationFailed);
    client.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_prevents_further_updates() {
    let (session, handle) = ScriptedConnector::stream_session();
    let client = online_client(ScriptedConnector::new(vec![session]));

    handle
        .server_tx
        .send(full_sync_message(vec![beta_ui_flag(1, 0)], vec![], 1))
        .unwrap();
    client.wait_for_ready(Duration::from_secs(2)).await.unwrap();

    client.stop();
    client.stop();

    let user = User::new("u1", "Jane").custom("country", "US");
    let _ = handle
        .server_tx
        .send(patch_message(vec![flag_upsert(beta_ui_flag(2, 1))]));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.variation("beta-ui", &user, "?".to_owned()), "on");
}
