use super::{Connector, Outgoing, Transport, TransportEvent};
use crate::types::{Result, WS_CLOSE_NORMAL};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Opens WebSocket connections with `tokio-tungstenite`
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<Transport> {
        tracing::debug!("Creating WebSocket connection");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (mut write_half, mut read_half) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let writer_events = event_tx.clone();
        tokio::spawn(async move {
            while let Some(command) = out_rx.recv().await {
                match command {
                    Outgoing::Text(text) => {
                        if let Err(e) = write_half.send(Message::Text(text.into())).await {
                            tracing::warn!("WebSocket write error: {}", e);
                            let _ = writer_events.send(TransportEvent::Closed(Some(e.to_string())));
                            return;
                        }
                    }
                    Outgoing::Close => break,
                }
            }

            let frame = CloseFrame {
                code: CloseCode::from(WS_CLOSE_NORMAL),
                reason: Utf8Bytes::from_static("client closing"),
            };
            if let Err(e) = write_half.send(Message::Close(Some(frame))).await {
                tracing::debug!("Close frame not delivered: {}", e);
            }
            let _ = write_half.close().await;
            let _ = writer_events.send(TransportEvent::Closed(Some("closed locally".to_string())));
            tracing::debug!("Write task finished");
        });

        tokio::spawn(async move {
            let mut reason = None;
            while let Some(msg_result) = read_half.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        tracing::trace!("Received text frame ({} bytes)", text.len());
                        if event_tx
                            .send(TransportEvent::Frame(text.as_str().to_owned()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        if let Some(close_frame) = frame {
                            tracing::info!(
                                "Server closed connection: code={:?}, reason='{}'",
                                close_frame.code,
                                close_frame.reason
                            );
                            reason = Some(close_frame.reason.to_string());
                        } else {
                            tracing::info!("Server closed connection without close frame");
                        }
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        tracing::debug!("Received ping ({} bytes)", data.len());
                    }
                    Ok(Message::Pong(data)) => {
                        tracing::debug!("Received pong ({} bytes)", data.len());
                    }
                    Ok(Message::Binary(data)) => {
                        tracing::warn!("Received unexpected binary message ({} bytes)", data.len());
                    }
                    Ok(Message::Frame(_)) => {
                        tracing::debug!("Received raw frame (internal)");
                    }
                    Err(e) => {
                        tracing::warn!("WebSocket read error: {}", e);
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed(reason));
            tracing::debug!("Read task finished");
        });

        Ok(Transport {
            outgoing: out_tx,
            incoming: event_rx,
        })
    }
}
