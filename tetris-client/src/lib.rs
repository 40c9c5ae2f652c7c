//! # tetris-client
//!
//! Ready-made peers for the tetris interactive protocol, built on
//! `tetris-core`:
//! - **Robot**: binary packets over TCP or WebSockets
//! - **Frontend**: tagged JSON text over WebSockets, with debounced input
//!   reports
//! - **Transport**: TCP and WebSocket transports for the connector
//! - **Config**: TOML client configuration and logging setup

pub mod client;
pub mod config;
pub mod frontend;
pub mod robot;
pub mod transport;

pub use client::Lifecycle;
pub use config::{ClientConfig, LoggingConfig};
pub use frontend::{Frontend, FrontendEvent};
pub use robot::{Robot, RobotEvent};
pub use transport::{MessageMode, TcpFactory, WsFactory};
