//! QUIC connector -- one bidirectional stream per link.
//!
//! ALPN "shockwire/1". Server certificates are not verified: nodes run with
//! self-signed certificates and payload confidentiality comes from the
//! envelope codec.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shockwire_protocol::{FrameCodec, DEFAULT_TIMING};

use crate::error::ChannelError;
use crate::transport::{host_port, open_link, Connector, Link};

/// ALPN protocol identifier.
pub const ALPN_SHOCKWIRE: &[u8] = b"shockwire/1";

/// SNI presented to the node.
const SERVER_NAME: &str = "shockwire-node.local";

/// Idle timeout for the QUIC connection. Longer than the watchdog interval,
/// so the watchdog notices silence first.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct QuicConnector {
    endpoint: quinn::Endpoint,
    client_config: quinn::ClientConfig,
    connect_timeout: Duration,
}

impl QuicConnector {
    /// Bind a client-only endpoint on an ephemeral local port.
    pub fn new(connect_timeout: Duration) -> Result<Self, ChannelError> {
        let bind: SocketAddr = SocketAddr::from(([0, 0, 0, 0], 0));
        let endpoint = quinn::Endpoint::client(bind)?;
        Ok(Self {
            endpoint,
            client_config: build_client_config()?,
            connect_timeout,
        })
    }

    async fn resolve(url: &str) -> Result<SocketAddr, ChannelError> {
        let target = host_port(url);
        tokio::net::lookup_host(target)
            .await?
            .next()
            .ok_or_else(|| ChannelError::ConnectFailed(format!("cannot resolve {target}")))
    }
}

#[async_trait]
impl Connector for QuicConnector {
    async fn connect(&self, url: &str, device_id: &str) -> Result<Link, ChannelError> {
        let addr = Self::resolve(url).await?;

        let connecting = self
            .endpoint
            .connect_with(self.client_config.clone(), addr, SERVER_NAME)
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;

        let conn = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                tracing::warn!(%addr, "link: connect_error: {e}");
                return Err(ChannelError::ConnectFailed(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(%addr, "link: connect_timeout");
                return Err(ChannelError::ConnectFailed("connect_timeout".into()));
            }
        };

        let (send, recv) = conn
            .open_bi()
            .await
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;

        open_link(
            recv,
            send,
            device_id,
            self.connect_timeout,
            FrameCodec::default(),
            DEFAULT_TIMING.outbound_queue,
            conn,
        )
        .await
    }
}

/// Build a QUIC client config that skips server certificate verification.
pub fn build_client_config() -> Result<quinn::ClientConfig, ChannelError> {
    let mut client_crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification::new()))
        .with_no_client_auth();

    client_crypto.alpn_protocols = vec![ALPN_SHOCKWIRE.to_vec()];

    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(
        quinn::IdleTimeout::try_from(IDLE_TIMEOUT)
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?,
    ));

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
        .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;
    let mut client_config = quinn::ClientConfig::new(Arc::new(quic_crypto));
    client_config.transport_config(Arc::new(transport));

    Ok(client_config)
}

/// Certificate verifier that accepts any server certificate but still checks
/// handshake signatures with the ring provider.
#[derive(Debug)]
struct SkipServerVerification {
    algorithms: rustls::crypto::WebPkiSupportedAlgorithms,
}

impl SkipServerVerification {
    fn new() -> Self {
        Self {
            algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
