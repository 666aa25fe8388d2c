// Module declarations
mod builder;
mod connection;
mod credentials;
mod outbound;
mod state;
mod synchronizer;

// Public API exports
pub use builder::{RuntimeMode, StateSynchronizerBuilder, SyncOptions};
pub use connection::{ConnectionManager, Link, build_endpoint_url};
pub use credentials::{StaticToken, TokenCell, TokenSource};
pub use outbound::{OutboundQueue, PendingMessage, SendOutcome};
pub use state::{ConnectionState, Visibility};
pub use synchronizer::StateSynchronizer;
