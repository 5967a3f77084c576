//! WebSocket transport to the Cortex bridge.
//!
//! The socket is driven by a private tokio runtime. A reader task forwards
//! inbound text frames into a bounded channel so that `receive()` can block
//! an ordinary thread without holding any async lock.
//!
//! Messages are never dropped silently. If the channel fills up the transport
//! fails: queued messages still drain, then `receive()` reports the overflow.

use super::{CloseSignal, Transport, TransportError};
use crate::config::Config;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connection options for [`WsTransport`].
#[derive(Debug, Clone)]
pub struct WsOptions {
    /// Accept any server certificate on `wss://` endpoints
    pub accept_invalid_certs: bool,
    /// Upper bound on TCP + TLS + WebSocket handshake
    pub connect_timeout: Duration,
    /// Inbound messages buffered between the socket and `receive()`
    pub queue_capacity: usize,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            accept_invalid_certs: true,
            connect_timeout: Duration::from_secs(10),
            queue_capacity: 4096,
        }
    }
}

impl WsOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            accept_invalid_certs: config.accept_invalid_certs,
            connect_timeout: config.connect_timeout,
            ..Self::default()
        }
    }
}

/// Blocking WebSocket connection for use in synchronous contexts.
pub struct WsTransport {
    endpoint: String,
    runtime: Option<Runtime>,
    writer: Arc<tokio::sync::Mutex<WsSink>>,
    inbound: Receiver<String>,
    failure: Arc<Mutex<Option<String>>>,
    close: CloseSignal,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    /// Open a connection to `endpoint`.
    pub fn connect(endpoint: &str, options: &WsOptions) -> Result<Self, TransportError> {
        let connect_error = |reason: String| TransportError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("cortex-ws")
            .enable_all()
            .build()
            .map_err(|e| connect_error(format!("failed to create runtime: {e}")))?;

        let connector = build_connector(endpoint, options)?;

        let stream = runtime
            .block_on(async {
                tokio::time::timeout(
                    options.connect_timeout,
                    tokio_tungstenite::connect_async_tls_with_config(
                        endpoint, None, false, connector,
                    ),
                )
                .await
            })
            .map_err(|_| connect_error(format!("timed out after {:?}", options.connect_timeout)))?
            .map_err(|e| connect_error(e.to_string()))?
            .0;

        let (writer, reader) = stream.split();
        let writer = Arc::new(tokio::sync::Mutex::new(writer));
        let (inbound_tx, inbound) = bounded(options.queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let failure = Arc::new(Mutex::new(None));

        runtime.spawn(read_loop(
            reader,
            writer.clone(),
            inbound_tx,
            shutdown_rx,
            failure.clone(),
        ));

        info!(endpoint, "Connected to device bridge");

        Ok(Self {
            endpoint: endpoint.to_string(),
            runtime: Some(runtime),
            writer,
            inbound,
            failure,
            close: CloseSignal::new(),
            shutdown,
        })
    }

    /// Endpoint this transport is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn runtime(&self) -> Result<&Runtime, TransportError> {
        self.runtime.as_ref().ok_or(TransportError::Closed)
    }

    fn disconnected(&self) -> TransportError {
        if self.close.is_fired() {
            return TransportError::Closed;
        }
        match self.failure.lock().ok().and_then(|f| f.clone()) {
            Some(reason) => TransportError::Receive(reason),
            None => TransportError::Closed,
        }
    }
}

impl Transport for WsTransport {
    fn send(&self, message: &str) -> Result<(), TransportError> {
        if self.close.is_fired() {
            return Err(TransportError::Closed);
        }
        let writer = self.writer.clone();
        let message = Message::text(message.to_owned());
        self.runtime()?
            .block_on(async move { writer.lock().await.send(message).await })
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn receive(&self) -> Result<String, TransportError> {
        if self.close.is_fired() {
            return Err(TransportError::Closed);
        }
        select! {
            recv(self.inbound) -> message => message.map_err(|_| self.disconnected()),
            recv(self.close.receiver()) -> _ => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if self.close.fire() {
            debug!(endpoint = %self.endpoint, "Closing bridge connection");
            // The reader task may already be gone
            let _ = self.shutdown.send(true);
        }
    }

    fn is_closed(&self) -> bool {
        self.close.is_fired()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_millis(200));
        }
    }
}

/// Forward inbound frames until the connection ends or the queue overflows.
async fn read_loop(
    mut reader: SplitStream<WsStream>,
    writer: Arc<tokio::sync::Mutex<WsSink>>,
    inbound: Sender<String>,
    mut shutdown: watch::Receiver<bool>,
    failure: Arc<Mutex<Option<String>>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = writer.lock().await.close().await;
                break;
            }
            message = reader.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(len = bytes.len(), "Skipping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Bridge closed the connection");
                        record_failure(&failure, "closed by bridge".to_string());
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read failed");
                        record_failure(&failure, e.to_string());
                        break;
                    }
                    None => {
                        record_failure(&failure, "stream ended".to_string());
                        break;
                    }
                };
                if !forward(&inbound, &failure, text) {
                    let _ = writer.lock().await.close().await;
                    break;
                }
            }
        }
    }
    // Dropping `inbound` here disconnects any blocked `receive()`
}

/// Queue one inbound message. `false` means the reader must stop because
/// nobody is receiving or the queue overflowed.
fn forward(inbound: &Sender<String>, failure: &Mutex<Option<String>>, text: String) -> bool {
    match inbound.try_send(text) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(capacity = ?inbound.capacity(), "Inbound queue overflowed, failing transport");
            record_failure(failure, "inbound queue overflowed".to_string());
            false
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

fn record_failure(failure: &Mutex<Option<String>>, reason: String) {
    if let Ok(mut slot) = failure.lock() {
        slot.get_or_insert(reason);
    }
}

/// Build a TLS connector when the endpoint needs one and default
/// verification is not wanted.
fn build_connector(
    endpoint: &str,
    options: &WsOptions,
) -> Result<Option<Connector>, TransportError> {
    if !endpoint.starts_with("wss://") || !options.accept_invalid_certs {
        return Ok(None);
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        .with_no_client_auth();

    Ok(Some(Connector::Rustls(Arc::new(config))))
}

/// Certificate verifier for the bridge's self-signed localhost certificate.
///
/// Handshake signatures are still checked; only the chain of trust is skipped.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_endpoint_needs_no_connector() {
        let connector = build_connector("ws://127.0.0.1:6868", &WsOptions::default()).unwrap();
        assert!(connector.is_none());
    }

    #[test]
    fn test_insecure_tls_connector_for_wss() {
        let connector = build_connector("wss://localhost:6868", &WsOptions::default()).unwrap();
        assert!(matches!(connector, Some(Connector::Rustls(_))));
    }

    #[test]
    fn test_verified_tls_uses_default_connector() {
        let options = WsOptions {
            accept_invalid_certs: false,
            ..WsOptions::default()
        };
        assert!(build_connector("wss://localhost:6868", &options)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_connect_refused_is_connect_error() {
        // Bind then drop to get a port with nothing listening
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let options = WsOptions {
            connect_timeout: Duration::from_secs(2),
            ..WsOptions::default()
        };

        let result = WsTransport::connect(&format!("ws://127.0.0.1:{port}"), &options);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
