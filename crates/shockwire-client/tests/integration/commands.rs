//! Command surface tests -- payload shapes, preconditions, speculative cache.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use shockwire_client::store::{ContactCache, SentRequest};
use shockwire_client::{ChannelError, ChannelSettings};

use crate::harness::{chat, fast_settings, uuid_of, SlowCredentials, TestClient, TOKEN};

fn sent_request(id: &str, public_key: &str, changed_address: bool) -> SentRequest {
    SentRequest {
        id: id.into(),
        recipient_avatar: Some("avatar.png".into()),
        recipient_changed_request_address: changed_address,
        recipient_display_name: Some("Known Name".into()),
        recipient_public_key: public_key.into(),
        timestamp: 1,
    }
}

/// The speculative record is visible while the request is in flight and
/// stays after the node accepts.
#[tokio::test]
async fn test_handshake_request_success() {
    let tc = TestClient::new();
    let mut node = tc.connected().await;

    let pending = {
        let commands = tc.client.commands.clone();
        tokio::spawn(async move { commands.send_handshake_request("peer-x").await })
    };
    let request = node.recv().await.unwrap();
    assert_eq!(request.event, "SEND_HANDSHAKE_REQUEST");
    assert_eq!(request.data["token"], TOKEN);
    assert_eq!(request.data["recipientPublicKey"], "peer-x");

    let uuid = uuid_of(&request);
    let in_flight = tc.store.sent_requests();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].id, uuid);
    assert_eq!(in_flight[0].recipient_display_name.as_deref(), Some("anonpeer-x"));

    node.reply(&request, true, Value::Null).await;
    assert_eq!(pending.await.unwrap(), Ok(()));
    assert_eq!(tc.store.sent_requests().len(), 1);

    // A second request to the same peer is refused locally
    assert_eq!(
        tc.client.commands.send_handshake_request("peer-x").await,
        Err(ChannelError::Precondition("A request is already in place".into()))
    );
    assert!(node.peer.outbound.try_recv().is_err());
    tc.shutdown().await;
}

/// Two concurrent requests to one peer: the first records itself before
/// waiting on the credential cache, so the second is refused locally and
/// only one request reaches the node.
#[tokio::test]
async fn test_concurrent_handshake_requests_same_peer() {
    let tc = TestClient::with_credentials(Arc::new(SlowCredentials {
        delay: Duration::from_millis(50),
    }));
    let mut node = tc.connected().await;

    let spawn_request = || {
        let commands = tc.client.commands.clone();
        tokio::spawn(async move { commands.send_handshake_request("peer-p").await })
    };
    let a = spawn_request();
    let b = spawn_request();

    let request = node.recv().await.unwrap();
    assert_eq!(request.event, "SEND_HANDSHAKE_REQUEST");
    node.reply(&request, true, Value::Null).await;

    let mut results = vec![a.await.unwrap(), b.await.unwrap()];
    results.sort_by_key(|r| r.is_err());
    assert_eq!(
        results,
        vec![
            Ok(()),
            Err(ChannelError::Precondition("A request is already in place".into())),
        ]
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(node.peer.outbound.try_recv().is_err(), "second request hit the wire");
    let records = tc.store.sent_requests();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, uuid_of(&request));
    tc.shutdown().await;
}

/// A snapshot broadcast that lands while the token lookup is pending is
/// kept alongside the new record.
#[tokio::test]
async fn test_handshake_request_keeps_concurrent_snapshot() {
    let tc = TestClient::with_credentials(Arc::new(SlowCredentials {
        delay: Duration::from_millis(50),
    }));
    let mut node = tc.connected().await;

    let pending = {
        let commands = tc.client.commands.clone();
        tokio::spawn(async move { commands.send_handshake_request("peer-q").await })
    };
    // Let the record land, then overwrite the cache mid-lookup
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut snapshot = tc.store.sent_requests();
    snapshot.push(sent_request("other", "peer-o", false));
    tc.store.set_sent_requests(snapshot);

    let request = node.recv().await.unwrap();
    node.reply(&request, true, Value::Null).await;
    assert_eq!(pending.await.unwrap(), Ok(()));

    let keys: Vec<String> = tc
        .store
        .sent_requests()
        .into_iter()
        .map(|r| r.recipient_public_key)
        .collect();
    assert_eq!(keys, vec!["peer-q".to_string(), "peer-o".to_string()]);
    tc.shutdown().await;
}

/// A rejected handshake request removes the speculative record.
#[tokio::test]
async fn test_handshake_request_rejected_rolls_back() {
    let tc = TestClient::new();
    let mut node = tc.connected().await;

    let pending = {
        let commands = tc.client.commands.clone();
        tokio::spawn(async move { commands.send_handshake_request("peer-y").await })
    };
    let request = node.recv().await.unwrap();
    assert_eq!(tc.store.sent_requests().len(), 1);

    node.reply(&request, false, json!("handshake node unreachable")).await;
    assert_eq!(
        pending.await.unwrap(),
        Err(ChannelError::RemoteRejection(
            "handshake node unreachable".into()
        ))
    );
    assert!(tc.store.sent_requests().is_empty());
    tc.shutdown().await;
}

/// An existing chat blocks a new handshake request.
#[tokio::test]
async fn test_handshake_request_with_existing_chat() {
    let tc = TestClient::new();
    let _node = tc.connected().await;
    tc.store.set_chats(vec![chat("peer-z")]);

    assert_eq!(
        tc.client.commands.send_handshake_request("peer-z").await,
        Err(ChannelError::Precondition("Handshake already in place".into()))
    );
    assert!(tc.store.sent_requests().is_empty());
    tc.shutdown().await;
}

/// A peer that changed its request address can be asked again; the new
/// record keeps the known profile and replaces the old one.
#[tokio::test]
async fn test_handshake_request_after_address_change() {
    let tc = TestClient::new();
    let mut node = tc.connected().await;
    tc.store
        .set_sent_requests(vec![sent_request("old", "peer-w", true)]);

    let pending = {
        let commands = tc.client.commands.clone();
        tokio::spawn(async move { commands.send_handshake_request("peer-w").await })
    };
    let request = node.recv().await.unwrap();

    let records = tc.store.sent_requests();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, uuid_of(&request));
    assert_eq!(records[0].recipient_display_name.as_deref(), Some("Known Name"));
    assert_eq!(records[0].recipient_avatar.as_deref(), Some("avatar.png"));
    assert!(!records[0].recipient_changed_request_address);

    node.reply(&request, true, Value::Null).await;
    assert_eq!(pending.await.unwrap(), Ok(()));
    tc.shutdown().await;
}

/// Disconnecting a contact removes the chat at once and restores it when
/// the node refuses.
#[tokio::test]
async fn test_disconnect_contact_rollback() {
    let tc = TestClient::new();
    let mut node = tc.connected().await;
    tc.store.set_chats(vec![chat("keep"), chat("peer-busy")]);

    let pending = {
        let commands = tc.client.commands.clone();
        tokio::spawn(async move { commands.disconnect_contact("peer-busy").await })
    };
    let request = node.recv().await.unwrap();
    assert_eq!(request.event, "DISCONNECT");
    assert_eq!(request.data["pub"], "peer-busy");
    assert_eq!(request.data["token"], TOKEN);

    let during: Vec<String> = tc
        .store
        .chats()
        .into_iter()
        .map(|c| c.recipient_public_key)
        .collect();
    assert_eq!(during, vec!["keep".to_string()]);

    node.reply(&request, false, json!("peer busy")).await;
    assert_eq!(
        pending.await.unwrap(),
        Err(ChannelError::RemoteRejection("peer busy".into()))
    );

    let after: Vec<String> = tc
        .store
        .chats()
        .into_iter()
        .map(|c| c.recipient_public_key)
        .collect();
    assert_eq!(after, vec!["keep".to_string(), "peer-busy".to_string()]);
    tc.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_contact_success() {
    let tc = TestClient::new();
    let mut node = tc.connected().await;
    tc.store.set_chats(vec![chat("gone")]);

    let pending = {
        let commands = tc.client.commands.clone();
        tokio::spawn(async move { commands.disconnect_contact("gone").await })
    };
    let request = node.recv().await.unwrap();
    node.reply(&request, true, Value::Null).await;

    assert_eq!(pending.await.unwrap(), Ok(()));
    assert!(tc.store.chats().is_empty());
    tc.shutdown().await;
}

/// Disconnecting while offline leaves the cache alone.
#[tokio::test]
async fn test_disconnect_contact_offline() {
    let tc = TestClient::new();
    tc.store.set_chats(vec![chat("peer")]);

    assert_eq!(
        tc.client.commands.disconnect_contact("peer").await,
        Err(ChannelError::NotConnected)
    );
    assert_eq!(tc.store.chats().len(), 1);
    tc.shutdown().await;
}

/// Accepting a request also asks for a fresh chat list.
#[tokio::test]
async fn test_accept_request_refreshes_chats() {
    let tc = TestClient::new();
    let mut node = tc.connected().await;

    tc.client.commands.accept_request("req-7").await.unwrap();

    let accept = node.recv().await.unwrap();
    assert_eq!(accept.event, "ACCEPT_REQUEST");
    assert_eq!(accept.data, json!({ "token": TOKEN, "requestID": "req-7" }));

    let refresh = node.recv().await.unwrap();
    assert_eq!(refresh.event, "ON_CHATS");
    assert_eq!(refresh.data, json!({ "token": TOKEN }));
    tc.shutdown().await;
}

#[tokio::test]
async fn test_fire_and_forget_payloads() {
    let tc = TestClient::new();
    let mut node = tc.connected().await;
    let commands = &tc.client.commands;

    commands.register("alice", "hunter2").await.unwrap();
    commands.set_avatar("data:image/png;base64,AA").await.unwrap();
    commands.set_display_name("Alice").await.unwrap();
    commands.generate_new_handshake_node().await.unwrap();

    let frames = [
        node.recv().await.unwrap(),
        node.recv().await.unwrap(),
        node.recv().await.unwrap(),
        node.recv().await.unwrap(),
    ];
    assert_eq!(frames[0].event, "REGISTER");
    assert_eq!(frames[0].data, json!({ "alias": "alice", "pass": "hunter2" }));
    assert_eq!(frames[1].event, "SET_AVATAR");
    assert_eq!(frames[1].data["avatar"], "data:image/png;base64,AA");
    assert_eq!(frames[2].event, "SET_DISPLAY_NAME");
    assert_eq!(frames[2].data["displayName"], "Alice");
    assert_eq!(frames[3].event, "GENERATE_NEW_HANDSHAKE_NODE");
    assert_eq!(frames[3].data, json!({ "token": TOKEN }));
    tc.shutdown().await;
}

/// Token-bearing commands need a cached session.
#[tokio::test]
async fn test_missing_credentials() {
    let tc = TestClient::new();
    let _node = tc.connected().await;
    tc.store.set_token(None);

    assert_eq!(
        tc.client.commands.set_bio("x").await,
        Err(ChannelError::NoCredentials)
    );

    // The speculative record goes away with the failed lookup
    assert_eq!(
        tc.client.commands.send_handshake_request("peer").await,
        Err(ChannelError::NoCredentials)
    );
    assert!(tc.store.sent_requests().is_empty());

    tc.store.set_chats(vec![chat("peer")]);
    assert_eq!(
        tc.client.commands.disconnect_contact("peer").await,
        Err(ChannelError::NoCredentials)
    );
    assert_eq!(tc.store.chats().len(), 1);
    tc.shutdown().await;
}

/// The handshake-with-message reply settles, then the sent requests
/// snapshot is re-requested.
#[tokio::test]
async fn test_handshake_with_initial_msg_refreshes_sent_requests() {
    let tc = TestClient::with_settings(ChannelSettings {
        reply_settle: Duration::from_millis(50),
        sent_requests_refresh: Duration::from_millis(50),
        ..fast_settings()
    });
    let mut node = tc.connected().await;

    let pending = {
        let commands = tc.client.commands.clone();
        tokio::spawn(async move {
            commands
                .send_handshake_request_with_initial_msg("peer-m", "hi there")
                .await
        })
    };
    let request = node.recv().await.unwrap();
    assert_eq!(request.event, "SEND_HANDSHAKE_REQUEST_WITH_INITIAL_MSG");
    assert_eq!(request.data["initialMsg"], "hi there");
    assert_eq!(request.data["recipientPublicKey"], "peer-m");

    node.reply(&request, true, Value::Null).await;
    assert_eq!(pending.await.unwrap(), Ok(()));

    let refresh = node.recv().await.unwrap();
    assert_eq!(refresh.event, "ON_SENT_REQUESTS");
    assert_eq!(refresh.data, json!({ "token": TOKEN }));
    tc.shutdown().await;
}

/// The sent requests refresh goes out even when the request times out.
#[tokio::test]
async fn test_handshake_with_initial_msg_refreshes_after_timeout() {
    let tc = TestClient::with_settings(ChannelSettings {
        reply_settle: Duration::from_millis(50),
        sent_requests_refresh: Duration::from_millis(50),
        request_timeout: Some(Duration::from_millis(100)),
        ..fast_settings()
    });
    let mut node = tc.connected().await;

    let result = tc
        .client
        .commands
        .send_handshake_request_with_initial_msg("peer-t", "anyone?")
        .await;
    assert_eq!(
        result,
        Err(ChannelError::Timeout {
            event: "SEND_HANDSHAKE_REQUEST_WITH_INITIAL_MSG".into()
        })
    );

    let request = node.recv().await.unwrap();
    assert_eq!(request.event, "SEND_HANDSHAKE_REQUEST_WITH_INITIAL_MSG");
    let refresh = node.recv().await.unwrap();
    assert_eq!(refresh.event, "ON_SENT_REQUESTS");
    assert_eq!(refresh.data, json!({ "token": TOKEN }));
    tc.shutdown().await;
}
