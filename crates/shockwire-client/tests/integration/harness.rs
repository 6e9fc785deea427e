//! Test harness for in-process channel tests.
//!
//! Provides MockConnector (hands out in-memory links and counts dials),
//! MockNode (the far side of one link, with its own keys) and TestClient
//! (a Client wired to a MemoryStore and the mock connector).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use shockwire_client::store::{Chat, CredentialCache};
use shockwire_client::transport::{Link, LinkEvent, LinkPeer};
use shockwire_client::{
    ChannelError, ChannelSettings, Client, Collaborators, Connector, MemoryStore,
};
use shockwire_crypto::{EnvelopeCodec, KeyMaterial, Keyring, SealedBoxCipher};
use shockwire_protocol::{Frame, CORRELATION_FIELD};

pub const TOKEN: &str = "test-token";
pub const DEVICE_ID: &str = "device-1";

// ============================================================================
// Keys
// ============================================================================

/// Key material on the node side: seals to the client, unseals its own.
struct NodeKeys {
    client_public: String,
    session: String,
}

impl KeyMaterial for NodeKeys {
    fn remote_public_key(&self) -> Option<String> {
        Some(self.client_public.clone())
    }
    fn session_id(&self) -> Option<String> {
        Some(self.session.clone())
    }
}

/// Both halves of a key exchange.
pub struct KeyPair {
    pub client_cipher: Arc<SealedBoxCipher>,
    pub client_session: String,
    pub node_public: String,
    pub node_codec: EnvelopeCodec,
}

impl KeyPair {
    pub fn generate() -> Self {
        let client_ring = Arc::new(Keyring::new());
        let (client_session, client_public) = client_ring.generate_session();

        let node_ring = Arc::new(Keyring::new());
        let (node_session, node_public) = node_ring.generate_session();

        let node_codec = EnvelopeCodec::new(
            Arc::new(SealedBoxCipher::new(node_ring)),
            Arc::new(NodeKeys {
                client_public,
                session: node_session,
            }),
        );

        Self {
            client_cipher: Arc::new(SealedBoxCipher::new(client_ring)),
            client_session,
            node_public,
            node_codec,
        }
    }
}

// ============================================================================
// Mock connector
// ============================================================================

#[derive(Debug)]
pub struct MockConnector {
    connects: AtomicUsize,
    refuse: AtomicBool,
    peers: mpsc::UnboundedSender<LinkPeer>,
}

#[allow(dead_code)]
impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LinkPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            peers: tx,
        });
        (connector, rx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str, _device_id: &str) -> Result<Link, ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::ConnectFailed("connection refused".into()));
        }
        let (link, peer) = Link::pair(64);
        let _ = self.peers.send(peer);
        Ok(link)
    }
}

// ============================================================================
// Mock node (far side of one link)
// ============================================================================

pub struct MockNode {
    pub peer: LinkPeer,
    pub codec: EnvelopeCodec,
}

#[allow(dead_code)]
impl MockNode {
    /// Next frame the client sent, decrypted.
    pub async fn recv(&mut self) -> Option<Frame> {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.peer.outbound.recv())
            .await
            .ok()??;
        let data = self.codec.open(&frame.event, frame.data).ok()?;
        Some(Frame::new(frame.event, data))
    }

    /// Next frame the client sent, without decrypting.
    pub async fn recv_raw(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(5), self.peer.outbound.recv())
            .await
            .ok()?
    }

    /// Whether the client has dropped its end of the link.
    pub fn is_dropped(&mut self) -> bool {
        loop {
            match self.peer.outbound.try_recv() {
                Ok(_) => continue,
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
    }

    pub async fn send_raw(&self, event: &str, data: Value) {
        let _ = self
            .peer
            .inbound
            .send(LinkEvent::Frame(Frame::new(event, data)))
            .await;
    }

    /// Push a sealed event.
    pub async fn send(&self, event: &str, data: Value) {
        let sealed = self.codec.seal(event, data).unwrap();
        self.send_raw(event, sealed).await;
    }

    /// Reply to a decrypted request, echoing it as `origBody`.
    pub async fn reply(&self, request: &Frame, ok: bool, msg: Value) {
        let emission = json!({ "ok": ok, "msg": msg, "origBody": request.data });
        self.send(&request.event, emission).await;
    }

    pub async fn ping(&self) {
        self.send_raw("SET_LAST_SEEN_APP", Value::Null).await;
    }

    pub async fn close(&self, reason: &str) {
        let _ = self
            .peer
            .inbound
            .send(LinkEvent::Closed {
                reason: reason.into(),
            })
            .await;
    }
}

/// Correlation token carried by a decrypted request.
pub fn uuid_of(frame: &Frame) -> String {
    frame.data[CORRELATION_FIELD]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

pub fn chat(public_key: &str) -> Chat {
    Chat {
        recipient_public_key: public_key.into(),
        recipient_display_name: Some(format!("name-{public_key}")),
        recipient_avatar: None,
        messages: vec![],
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Credential cache that takes a while to answer.
pub struct SlowCredentials {
    pub delay: Duration,
}

#[async_trait]
impl CredentialCache for SlowCredentials {
    async fn token(&self) -> Option<String> {
        tokio::time::sleep(self.delay).await;
        Some(TOKEN.into())
    }
}

// ============================================================================
// Test client
// ============================================================================

pub struct TestClient {
    pub client: Client,
    pub store: Arc<MemoryStore>,
    pub connector: Arc<MockConnector>,
    peers: Mutex<mpsc::UnboundedReceiver<LinkPeer>>,
    node_codec: EnvelopeCodec,
}

#[allow(dead_code)]
impl TestClient {
    /// Client with a short connect debounce, for tests that run in real time.
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: ChannelSettings) -> Self {
        Self::build(settings, None)
    }

    /// Client whose token lookups go through `credentials` instead of the
    /// store.
    pub fn with_credentials(credentials: Arc<dyn CredentialCache>) -> Self {
        Self::build(fast_settings(), Some(credentials))
    }

    fn build(settings: ChannelSettings, credentials: Option<Arc<dyn CredentialCache>>) -> Self {
        let keys = KeyPair::generate();
        let store = Arc::new(MemoryStore::new(DEVICE_ID));
        store.set_token(Some(TOKEN.into()));
        store.set_node_url(Some("mock://node".into()));
        store.set_remote_public_key(Some(keys.node_public.clone()));
        store.set_session_id(Some(keys.client_session.clone()));

        let codec = EnvelopeCodec::new(keys.client_cipher.clone(), store.clone());
        let (connector, peers) = MockConnector::new();
        let mut collab = Collaborators::in_memory(store.clone());
        if let Some(credentials) = credentials {
            collab.credentials = credentials;
        }
        let client = Client::start(settings, connector.clone(), collab, codec);

        Self {
            client,
            store,
            connector,
            peers: Mutex::new(peers),
            node_codec: keys.node_codec,
        }
    }

    /// Far side of the next link the client dials.
    pub async fn next_node(&self) -> MockNode {
        let peer = tokio::time::timeout(Duration::from_secs(30), self.peers.lock().await.recv())
            .await
            .expect("no dial within 30s")
            .expect("connector dropped");
        MockNode {
            peer,
            codec: self.node_codec.clone(),
        }
    }

    /// Connect and return the node side of the link.
    pub async fn connected(&self) -> MockNode {
        self.client.connect().await.expect("connect failed");
        self.next_node().await
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

pub fn fast_settings() -> ChannelSettings {
    ChannelSettings {
        connect_debounce: Duration::from_millis(20),
        ..ChannelSettings::default()
    }
}

/// Poll `cond` until it holds, or fail after `timeout`.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
