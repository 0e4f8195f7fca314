pub mod connection;
pub mod pool;

use tokio::sync::mpsc;

pub use connection::UpstreamLink;
pub use pool::UpstreamPool;

/// Outbound queue of one live upstream connection.
pub type LinkSender = mpsc::UnboundedSender<String>;
