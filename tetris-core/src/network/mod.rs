//! Connection management.
//!
//! - [`Connector`]: owns one transport at a time, correlates calls with
//!   replies, and republishes what happens as [`ConnectorEvent`]s.
//! - [`ReplyFuture`]: the pending answer to [`Connector::call`].

mod connector;
mod events;
mod reply;

pub use connector::{Connector, ConnectorBuilder, ReconnectPolicy};
pub use events::ConnectorEvent;
pub use reply::ReplyFuture;
