//! Lifecycle tests -- debounce, watchdog, reconnects, disconnect.

use std::time::Duration;

use shockwire_client::store::ChannelNotice;
use shockwire_client::{ChannelError, ChannelSettings, ChannelStatus};

use crate::harness::{wait_until, TestClient};

/// Two connect calls 200ms apart collapse into one dial.
#[tokio::test(start_paused = true)]
async fn test_connect_debounce_collapses_calls() {
    let tc = TestClient::with_settings(ChannelSettings::default());

    let first = {
        let channel = tc.client.channel.clone();
        tokio::spawn(async move { channel.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = {
        let channel = tc.client.channel.clone();
        tokio::spawn(async move { channel.connect().await })
    };

    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));
    assert_eq!(tc.connector.connects(), 1, "debounced connects should dial once");
    assert_eq!(tc.client.channel.status(), ChannelStatus::Connected);

    let _node = tc.next_node().await;
    tc.shutdown().await;
}

/// A later connect replaces the live session.
#[tokio::test]
async fn test_connect_replaces_existing_session() {
    let tc = TestClient::new();
    let mut first = tc.connected().await;

    tc.client.connect().await.unwrap();
    let _second = tc.next_node().await;

    assert_eq!(tc.connector.connects(), 2);
    assert!(first.is_dropped(), "old link should be torn down");
    assert_eq!(
        tc.store.notices(),
        vec![
            ChannelNotice::Up,
            ChannelNotice::Down {
                reason: "replaced".into()
            },
            ChannelNotice::Up,
        ]
    );
    tc.shutdown().await;
}

/// More than one watchdog interval of silence forces exactly one
/// disconnect-then-connect.
#[tokio::test(start_paused = true)]
async fn test_watchdog_recycles_silent_channel() {
    let tc = TestClient::with_settings(ChannelSettings::default());
    let mut first = tc.connected().await;

    // Connected at +1s; the check at +21s finds 20s of silence
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(tc.connector.connects(), 2, "watchdog should redial once");
    assert!(first.is_dropped());
    assert_eq!(
        tc.store.notices(),
        vec![
            ChannelNotice::Up,
            ChannelNotice::Down {
                reason: "stale connection".into()
            },
            ChannelNotice::Up,
        ]
    );
    assert_eq!(tc.client.channel.status(), ChannelStatus::Connected);

    let _second = tc.next_node().await;
    tc.shutdown().await;
}

/// Liveness pings keep the watchdog quiet.
#[tokio::test(start_paused = true)]
async fn test_pings_keep_channel_alive() {
    let tc = TestClient::with_settings(ChannelSettings::default());
    let node = tc.connected().await;

    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        node.ping().await;
    }

    assert_eq!(tc.connector.connects(), 1);
    assert_eq!(tc.store.notices(), vec![ChannelNotice::Up]);
    tc.shutdown().await;
}

/// A server-initiated disconnect frame tears down and schedules a retry.
#[tokio::test(start_paused = true)]
async fn test_server_disconnect_reconnects() {
    let tc = TestClient::with_settings(ChannelSettings::default());
    let node = tc.connected().await;

    node.send_raw("disconnect", serde_json::json!("io server disconnect"))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tc.client.channel.status(), ChannelStatus::Disconnected);

    // Fixed policy: retry after one watchdog interval
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(tc.connector.connects(), 2);
    assert_eq!(tc.client.channel.status(), ChannelStatus::Connected);

    let notices = tc.store.notices();
    assert_eq!(
        notices[1],
        ChannelNotice::Down {
            reason: "remote: io server disconnect".into()
        }
    );
    tc.shutdown().await;
}

/// Link loss (transport close) also triggers a retry.
#[tokio::test(start_paused = true)]
async fn test_link_loss_reconnects() {
    let tc = TestClient::with_settings(ChannelSettings::default());
    let node = tc.connected().await;

    node.close("transport close").await;
    tokio::time::sleep(Duration::from_secs(12)).await;

    assert_eq!(tc.connector.connects(), 2);
    let _second = tc.next_node().await;
    tc.shutdown().await;
}

/// A refused dial surfaces to the caller; the retry follows on its own.
#[tokio::test(start_paused = true)]
async fn test_connect_failure_then_retry() {
    let tc = TestClient::with_settings(ChannelSettings::default());
    tc.connector.set_refuse(true);

    let err = tc.client.connect().await.unwrap_err();
    assert!(matches!(err, ChannelError::ConnectFailed(_)));
    assert_eq!(tc.client.channel.status(), ChannelStatus::Disconnected);

    tc.connector.set_refuse(false);
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(tc.connector.connects(), 2);
    assert_eq!(tc.client.channel.status(), ChannelStatus::Connected);
    tc.shutdown().await;
}

/// Disconnect is idempotent and reports whether a session existed.
#[tokio::test]
async fn test_disconnect_idempotent() {
    let tc = TestClient::new();
    assert_eq!(tc.client.channel.disconnect().await, Ok(false));

    let mut node = tc.connected().await;
    assert_eq!(tc.client.channel.disconnect().await, Ok(true));
    assert_eq!(tc.client.channel.disconnect().await, Ok(false));

    assert!(node.is_dropped());
    assert_eq!(tc.client.channel.status(), ChannelStatus::Disconnected);
    assert_eq!(
        tc.store.notices(),
        vec![
            ChannelNotice::Up,
            ChannelNotice::Down {
                reason: "client disconnect".into()
            },
        ]
    );
    tc.shutdown().await;
}

/// An explicit disconnect cancels reconnects.
#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_watchdog() {
    let tc = TestClient::with_settings(ChannelSettings::default());
    let _node = tc.connected().await;

    tc.client.channel.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(tc.connector.connects(), 1);
    assert_eq!(tc.client.channel.status(), ChannelStatus::Disconnected);
    tc.shutdown().await;
}

/// Without a cached node url the dial fails fast.
#[tokio::test]
async fn test_connect_without_node_url() {
    let tc = TestClient::new();
    tc.store.set_node_url(None);

    assert_eq!(tc.client.connect().await, Err(ChannelError::NoNodeUrl));
    assert_eq!(tc.connector.connects(), 0);
    tc.shutdown().await;
}

/// Status transitions are observable.
#[tokio::test]
async fn test_status_stream() {
    let tc = TestClient::new();
    let mut status = tc.client.channel.subscribe_status();
    assert_eq!(*status.borrow(), ChannelStatus::Disconnected);

    let _node = tc.connected().await;
    status.changed().await.unwrap();
    wait_until(Duration::from_secs(1), || {
        *status.borrow() == ChannelStatus::Connected
    })
    .await;
    tc.shutdown().await;
}

/// A pending dial shows as Connecting for the whole debounce window.
#[tokio::test(start_paused = true)]
async fn test_connecting_during_debounce() {
    let tc = TestClient::with_settings(ChannelSettings::default());

    let pending = {
        let channel = tc.client.channel.clone();
        tokio::spawn(async move { channel.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(tc.client.channel.status(), ChannelStatus::Connecting);
    assert_eq!(tc.connector.connects(), 0);

    assert_eq!(pending.await.unwrap(), Ok(()));
    assert_eq!(tc.client.channel.status(), ChannelStatus::Connected);

    let _node = tc.next_node().await;
    tc.shutdown().await;
}
