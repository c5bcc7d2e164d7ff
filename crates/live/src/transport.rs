// Transport seam
//
// The connection manager speaks STOMP over a pair of text channels. The
// WebSocket connector bridges those channels to a real socket; tests plug in
// an in-memory connector instead.

use async_trait::async_trait;
use clinicpulse_core::{ClinicPulseError, Credential, InfraError};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

pub type Outbound = mpsc::UnboundedSender<String>;

/// An open, not yet STOMP-authenticated, text transport.
///
/// The inbound receiver yielding `None` means the socket closed.
pub struct TransportLink {
    pub outbound: Outbound,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str, credential: &Credential)
        -> Result<TransportLink, ClinicPulseError>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn transport_error(url: &str, reason: impl ToString) -> ClinicPulseError {
    ClinicPulseError::Infra(InfraError::Transport {
        url: url.to_string(),
        reason: reason.to_string(),
    })
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<TransportLink, ClinicPulseError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| transport_error(url, e))?;
        let bearer =
            HeaderValue::from_str(&credential.bearer()).map_err(|e| transport_error(url, e))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| transport_error(url, format!("WebSocket handshake failed: {}", e)))?;
        tracing::debug!("WebSocket open to {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        let url = url.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if inbound_tx.send(text.as_str().to_string()).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                tracing::debug!("WebSocket read error on {}: {}", url, e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }

                    text = outbound_rx.recv() => {
                        match text {
                            Some(text) => {
                                if let Err(e) = write.send(Message::Text(text.into())).await {
                                    tracing::debug!("WebSocket write error on {}: {}", url, e);
                                    break;
                                }
                            }
                            // every sender dropped: the session is over
                            None => {
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!("WebSocket pump for {} finished", url);
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
