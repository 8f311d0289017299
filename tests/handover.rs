//! Connection refresh, socket handover, event dispatch, and heartbeat
//! supervision.

mod common;

use std::time::Duration;

use common::{MockOpener, ServerEnd, mock_connector, within};
use serde_json::json;
use slack_socket_mode::{EventStream, SocketModeClient, SocketModeConfig, SocketModeEvent};
use tokio::sync::mpsc;

fn config() -> SocketModeConfig {
    common::init_tracing();
    SocketModeConfig::new("xapp-1-A1-test-token")
}

async fn connect_ready(
    client: &SocketModeClient,
    accepted: &mut mpsc::UnboundedReceiver<ServerEnd>,
    ready: &mut EventStream,
) -> ServerEnd {
    within(client.start()).await.unwrap();
    let server = within(accepted.recv()).await.unwrap();
    server.hello().await;
    within(ready.recv()).await.unwrap();
    server
}

#[tokio::test]
async fn test_disconnect_warning_performs_make_before_break_handover() {
    let opener = MockOpener::new();
    let (connector, mut accepted) = mock_connector();
    let client = SocketModeClient::with_connector(config(), opener.clone(), connector).unwrap();

    let mut ready = client.on("ready");
    let mut first = connect_ready(&client, &mut accepted, &mut ready).await;

    // The server warns that this socket will go away soon.
    first
        .send_frame(r#"{"type":"disconnect","reason":"warning"}"#)
        .await;

    // A replacement connection is prepared while the old one keeps serving.
    let mut second = within(accepted.recv()).await.unwrap();
    assert_eq!(second.url, "wss://mock.slack.test/link/2");
    second.hello().await;
    within(ready.recv()).await.unwrap();

    // Traffic still flows over the old primary.
    within(client.send("E5", json!({}))).await.unwrap();
    assert_eq!(
        within(first.sent.recv()).await.unwrap(),
        r#"{"envelope_id":"E5","payload":{}}"#
    );
    assert!(client.ready());

    // The server retires the old socket; the replacement takes over.
    first
        .send_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#)
        .await;
    within(ready.recv()).await.unwrap();
    within(first.detached()).await;

    within(client.send("E6", json!({}))).await.unwrap();
    assert_eq!(
        within(second.sent.recv()).await.unwrap(),
        r#"{"envelope_id":"E6","payload":{}}"#
    );
    assert!(client.ready());
    assert_eq!(opener.calls(), 2);
}

#[tokio::test]
async fn test_session_stays_up_while_refresh_retries() {
    use slack_socket_mode::ApiError;

    // First refresh attempt hits a recoverable platform error.
    let opener = MockOpener::new();
    let (connector, mut accepted) = mock_connector();
    let client = SocketModeClient::with_connector(config(), opener.clone(), connector).unwrap();

    let mut ready = client.on("ready");
    let first = connect_ready(&client, &mut accepted, &mut ready).await;
    opener.push(Err(ApiError::platform("internal_error")));

    first
        .send_frame(r#"{"type":"disconnect","reason":"warning"}"#)
        .await;

    // The retry succeeds and dials the replacement; the session never left
    // ready and the old socket still serves.
    let second = within(accepted.recv()).await.unwrap();
    assert_eq!(second.url, "wss://mock.slack.test/link/3");
    assert!(client.ready());
    within(client.send("E1", json!({}))).await.unwrap();
    assert_eq!(opener.calls(), 3);
}

#[tokio::test]
async fn test_application_frames_are_dispatched_with_ack() {
    let opener = MockOpener::new();
    let (connector, mut accepted) = mock_connector();
    let client = SocketModeClient::with_connector(config(), opener, connector).unwrap();

    let mut ready = client.on("ready");
    let mut mentions = client.on("app_mention");
    let mut catch_all = client.on("slack_event");
    let mut server = connect_ready(&client, &mut accepted, &mut ready).await;

    server
        .send_frame(
            r#"{"type":"events_api","envelope_id":"E2","payload":{"event":{"type":"app_mention","text":"hi"}}}"#,
        )
        .await;

    let Some(SocketModeEvent::SlackEvent(event)) = within(mentions.recv()).await else {
        panic!("expected an application frame");
    };
    assert_eq!(event.frame_type, "events_api");
    assert_eq!(event.event.as_ref().unwrap()["text"], "hi");

    // The same frame also reaches the catch-all subscription.
    let Some(SocketModeEvent::SlackEvent(aggregate)) = within(catch_all.recv()).await else {
        panic!("expected the aggregate event");
    };
    assert_eq!(aggregate.frame_type, "events_api");

    // Acknowledging goes out over the serving connection.
    let ack = event.ack.expect("envelope carries an ack handle");
    assert_eq!(ack.envelope_id(), "E2");
    within(ack.ack(json!({"ok": true}))).await.unwrap();
    assert_eq!(
        within(server.sent.recv()).await.unwrap(),
        r#"{"envelope_id":"E2","payload":{"ok":true}}"#
    );
}

#[tokio::test]
async fn test_frames_without_envelope_id_have_no_ack() {
    let opener = MockOpener::new();
    let (connector, mut accepted) = mock_connector();
    let client = SocketModeClient::with_connector(config(), opener, connector).unwrap();

    let mut ready = client.on("ready");
    let mut events = client.on("slack_event");
    let server = connect_ready(&client, &mut accepted, &mut ready).await;

    server
        .send_frame(r#"{"type":"accepts_response_payload","payload":{"n":1}}"#)
        .await;

    let Some(SocketModeEvent::SlackEvent(event)) = within(events.recv()).await else {
        panic!("expected an application frame");
    };
    assert!(event.ack.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_quiet_server_triggers_a_connection_refresh() {
    let opener = MockOpener::new();
    let (connector, mut accepted) = mock_connector();
    let client = SocketModeClient::with_connector(
        config().ping_timeout(Duration::from_millis(100)),
        opener.clone(),
        connector,
    )
    .unwrap();

    let mut ready = client.on("ready");
    let first = connect_ready(&client, &mut accepted, &mut ready).await;

    // No pings arrive; the heartbeat fires and a refresh begins.
    let second = within(accepted.recv()).await.unwrap();
    assert_eq!(opener.calls(), 2);
    second.hello().await;
    within(ready.recv()).await.unwrap();

    // The stale primary is retired on re-entry to ready; the replacement
    // serves.
    within(first.detached()).await;
    within(client.send("E7", json!({}))).await.unwrap();
    assert!(client.ready());
}

#[tokio::test(start_paused = true)]
async fn test_server_pings_keep_the_connection_alive() {
    let opener = MockOpener::new();
    let (connector, mut accepted) = mock_connector();
    let client = SocketModeClient::with_connector(
        config().ping_timeout(Duration::from_millis(100)),
        opener.clone(),
        connector,
    )
    .unwrap();

    let mut ready = client.on("ready");
    let server = connect_ready(&client, &mut accepted, &mut ready).await;

    // Ping well within every deadline; no refresh must happen.
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        server
            .events
            .send(slack_socket_mode::TransportEvent::Ping)
            .await
            .unwrap();
        // Let the driver observe the ping before the clock moves on.
        tokio::task::yield_now().await;
    }

    assert!(client.ready());
    assert!(accepted.try_recv().is_err());
    assert_eq!(opener.calls(), 1);
}
