// Transport layer - the only code that touches sockets
mod factory;

pub use factory::WebSocketConnector;

use crate::types::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Commands accepted by an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Close,
}

/// Events produced by an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed(Option<String>),
}

/// An open connection, reduced to a pair of channels.
///
/// Dropping `outgoing` (or sending [`Outgoing::Close`]) closes the connection. Consumers stop
/// reading `incoming` at the first [`TransportEvent::Closed`].
#[derive(Debug)]
pub struct Transport {
    pub outgoing: mpsc::UnboundedSender<Outgoing>,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports. Resolving `open` successfully is the "open" event.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Transport>;
}
