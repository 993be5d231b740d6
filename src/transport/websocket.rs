//! WebSocket connector.
//!
//! Opens `ws://`/`wss://` links to the router and bridges the socket to the
//! channel pair of a [`Link`]. Only text frames carry envelopes; binary,
//! ping and pong frames are ignored.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace};

use crate::error::Result;

use super::{Connector, Endpoint, Link};

// ============================================================================
// WebSocketConnector
// ============================================================================

/// Connector that speaks WebSocket to the router.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Creates a WebSocket connector.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Link> {
        let url = endpoint.ws_url()?;
        debug!(url = %url, "Opening WebSocket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;

        let (to_router_tx, to_router_rx) = mpsc::unbounded_channel();
        let (to_host_tx, to_host_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_socket(ws_stream, to_router_rx, to_host_tx));

        Ok(Link {
            tx: to_router_tx,
            rx: to_host_rx,
        })
    }
}

// ============================================================================
// Socket Loop
// ============================================================================

/// Moves frames between the socket and the link channels until either side
/// goes away.
async fn run_socket<S>(
    ws_stream: WebSocketStream<S>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    incoming: mpsc::UnboundedSender<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            // Frames from the router
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "WebSocket frame received");
                        if incoming.send(text.as_str().to_owned()).is_err() {
                            debug!("Link receiver dropped");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            // Frames from the host
            frame = outgoing.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            error!(error = %e, "Failed to write WebSocket frame");
                            break;
                        }
                    }

                    None => {
                        debug!("Link sender dropped, closing WebSocket");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    debug!("WebSocket loop terminated");
}

// ============================================================================
// Tests
// ============================================================================
