#![allow(dead_code)]

use crate::utils::{beta_ui_flag, full_sync_message, ScriptedConnector};
use flagstream::{Client, User};
use std::sync::Arc;
use std::time::Duration;

mod utils;

#[tokio::test(flavor = "multi_thread")]
async fn evaluation_events_are_delivered_to_the_insight_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/public/insight/track")
        .match_header("authorization", "test-env-secret")
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let (session, handle) = ScriptedConnector::stream_session();
    let client = Client::builder("test-env-secret")
        .streaming_connector(Arc::new(ScriptedConnector::new(vec![session])))
        .event_url(server.url().as_str())
        .events_flush_interval(Duration::from_millis(50))
        .build()
        .unwrap();

    handle
        .server_tx
        .send(full_sync_message(vec![beta_ui_flag(1, 0)], vec![], 1))
        .unwrap();
    client.wait_for_ready(Duration::from_secs(2)).await.unwrap();

    let user = User::new("u1", "Jane").custom("country", "US");
    assert_eq!(client.variation("beta-ui", &user, "?".to_owned()), "on");
    client.track_metric(&user, "checkout", 1.0);
    client.flush();

    tokio::time::sleep(Duration::from_millis(300)).await;
    mock.assert_async().await;
    client.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_clients_never_deliver_events() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/public/insight/track")
        .expect(0)
        .create_async()
        .await;

    let client = Client::builder("test-env-secret")
        .offline(true)
        .event_url(server.url().as_str())
        .build()
        .unwrap();
    client
        .initialize_from_external_json(&crate::utils::bootstrap(vec![beta_ui_flag(1, 0)], vec![], 1))
        .unwrap();

    let user = User::new("u1", "Jane").custom("country", "US");
    assert_eq!(client.variation("beta-ui", &user, "?".to_owned()), "on");
    client.track_metric(&user, "checkout", 1.0);
    client.flush();

    tokio::time::sleep(Duration::from_millis(200)).await;
    mock.assert_async().await;
}
