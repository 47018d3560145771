//! Reconnection tests.
//!
//! The hub drops channels or stops answering; the client's heartbeat must
//! bring the session back with a new connection ID while the application
//! keeps one ordered, duplicate-free message sequence.

use std::time::Duration;

use hublink_client::{ClientOptions, ConnectionStatus, HubClient, Link};
use hublink_harness::{MockHub, SeededEnv};
use tokio::sync::mpsc;

fn fast_options() -> ClientOptions {
    ClientOptions { heartbeat_interval: Duration::from_millis(20), ..ClientOptions::default() }
}

async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> Option<T> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.ok().flatten()
}

/// Wait until the client publishes a link matching `predicate`.
async fn wait_for_link(
    client: &HubClient<MockHub, SeededEnv>,
    predicate: impl FnMut(&Link) -> bool,
) -> bool {
    let mut link = client.link();
    tokio::time::timeout(Duration::from_secs(5), link.wait_for(predicate))
        .await
        .is_ok_and(|r| r.is_ok())
}

#[tokio::test]
async fn old_generation_drains_before_new_one() {
    let hub = MockHub::start().await.expect("hub");
    let client = hub.client(fast_options(), 21);
    client.open("u1").await.expect("open");
    let mut subscription = client.listen().await.expect("listen");
    assert!(hub.wait_for_activations(1).await);

    for i in 0..3u8 {
        hub.push_reply("peer", &[i]).await.expect("push");
    }
    hub.drop_connection().await.expect("drop");

    let mut delivered = Vec::new();
    for _ in 0..3 {
        delivered.push(recv(&mut subscription.messages).await.expect("message").data[0]);
    }

    assert!(hub.wait_for_activations(2).await);
    assert!(
        wait_for_link(&client, |link| {
            link.status == ConnectionStatus::Connected && link.generation == 2
        })
        .await
    );
    assert_eq!(client.connection_id().as_deref(), Some("conn-2"));

    for i in 3..6u8 {
        hub.push_reply("peer", &[i]).await.expect("push");
    }
    for _ in 0..3 {
        delivered.push(recv(&mut subscription.messages).await.expect("message").data[0]);
    }

    assert_eq!(delivered, vec![0, 1, 2, 3, 4, 5]);
    assert!(subscription.errors.try_recv().is_err());
}

#[tokio::test]
async fn nothing_is_delivered_while_hub_is_down() {
    let hub = MockHub::start().await.expect("hub");
    let client = hub.client(fast_options(), 22);
    client.open("u1").await.expect("open");
    let mut subscription = client.listen().await.expect("listen");
    assert!(hub.wait_for_activations(1).await);

    hub.push_reply("peer", b"before").await.expect("push");
    assert_eq!(recv(&mut subscription.messages).await.map(|m| m.data), Some(b"before".to_vec()));

    hub.set_available(false);
    hub.drop_connection().await.expect("drop");
    assert!(wait_for_link(&client, |link| link.status == ConnectionStatus::Disconnected).await);

    // several failed reconnect attempts
    let failed_from = hub.public_key_requests();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(hub.public_key_requests() > failed_from);
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert!(subscription.messages.try_recv().is_err());

    hub.set_available(true);
    assert!(hub.wait_for_activations(2).await);
    assert!(wait_for_link(&client, |link| link.status == ConnectionStatus::Connected).await);

    hub.push_reply("peer", b"after").await.expect("push");
    assert_eq!(recv(&mut subscription.messages).await.map(|m| m.data), Some(b"after".to_vec()));
}

#[tokio::test]
async fn failed_ping_reconnects_without_listener() {
    let hub = MockHub::start().await.expect("hub");
    let client = hub.client(fast_options(), 23);
    client.open("u1").await.expect("open");
    assert!(hub.wait_for_activations(1).await);

    hub.drop_connection().await.expect("drop");

    assert!(hub.wait_for_activations(2).await);
    assert!(
        wait_for_link(&client, |link| {
            link.status == ConnectionStatus::Connected && link.generation == 2
        })
        .await
    );
    assert_eq!(client.connection_id().as_deref(), Some("conn-2"));
}

#[tokio::test]
async fn letters_after_reconnect_use_new_channel() {
    let hub = MockHub::start().await.expect("hub");
    let client = hub.client(fast_options(), 24);
    client.open("u1").await.expect("open");
    assert!(hub.wait_for_activations(1).await);

    hub.drop_connection().await.expect("drop");
    assert!(
        wait_for_link(&client, |link| {
            link.status == ConnectionStatus::Connected && link.generation == 2
        })
        .await
    );

    client.send_message("u9", b"fresh keys", true).await.expect("send");

    let received = hub.next_message().await.expect("letter");
    assert_eq!(received.conn_id, "conn-2");
    assert_eq!(received.letter.data, b"fresh keys");
}

#[tokio::test]
async fn reconnect_pings_new_channel_before_publishing() {
    let hub = MockHub::start().await.expect("hub");
    let client = hub.client(fast_options(), 25);
    client.open("u1").await.expect("open");
    assert!(hub.wait_for_activations(1).await);

    hub.drop_connection().await.expect("drop");
    assert!(hub.wait_for_activations(2).await);

    // first letter on the new channel is the reconnect ping
    let received = loop {
        let letter = hub.next_letter().await.expect("letter");
        if letter.conn_id == "conn-2" {
            break letter;
        }
    };
    assert_eq!(received.letter, hublink_proto::Letter::ping());
    assert!(received.encrypted);
}

#[tokio::test]
async fn close_during_outage_stops_reconnecting() {
    let hub = MockHub::start().await.expect("hub");
    let client = hub.client(fast_options(), 26);
    client.open("u1").await.expect("open");
    let mut subscription = client.listen().await.expect("listen");
    assert!(hub.wait_for_activations(1).await);

    hub.set_available(false);
    hub.drop_connection().await.expect("drop");
    assert!(wait_for_link(&client, |link| link.status == ConnectionStatus::Disconnected).await);

    client.close().await;
    assert_eq!(recv(&mut subscription.messages).await, None);

    let attempts = hub.public_key_requests();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hub.public_key_requests(), attempts);
    assert_eq!(client.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn generation_replaced_before_forwarding_is_not_lost() {
    let hub = MockHub::start().await.expect("hub");
    let client = hub.client(fast_options(), 27);
    client.open("u1").await.expect("open");
    // nothing is read from the subscription until every generation has run
    let mut subscription = client.listen().await.expect("listen");
    assert!(hub.wait_for_activations(1).await);

    for i in 0..3u8 {
        hub.push_reply("peer", &[i]).await.expect("push");
    }
    hub.drop_connection().await.expect("drop");

    assert!(hub.wait_for_activations(2).await);
    assert!(wait_for_link(&client, |link| link.generation == 2).await);
    hub.push_reply("peer", &[10]).await.expect("push");
    hub.drop_connection().await.expect("drop");

    assert!(hub.wait_for_activations(3).await);
    assert!(
        wait_for_link(&client, |link| {
            link.status == ConnectionStatus::Connected && link.generation == 3
        })
        .await
    );
    hub.push_reply("peer", &[20]).await.expect("push");

    let mut delivered = Vec::new();
    for _ in 0..5 {
        delivered.push(recv(&mut subscription.messages).await.expect("message").data[0]);
    }
    assert_eq!(delivered, vec![0, 1, 2, 10, 20]);
    assert!(subscription.messages.try_recv().is_err());
}
