//! lcu-link: a client for the League client's local API.
//!
//! Finds the running client, authenticates against its loopback HTTPS API,
//! streams its event websocket into registered handlers, and follows the
//! client through logouts, crashes and relaunches.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lcu_link::{ClientConfig, Lifecycle};
//!
//! # async fn demo() -> Result<(), lcu_link::Error> {
//! let lifecycle = Arc::new(Lifecycle::new(ClientConfig::default()));
//! lifecycle.router().register("/lol-gameflow/v1/session", "Update", |event| {
//!     println!("{:?}", event.data());
//!     Ok(())
//! });
//! lifecycle.run().await
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod process;
pub mod protocol;
pub mod router;
pub mod tls;
pub mod transport;
pub mod websocket;

pub use config::ClientConfig;
pub use credentials::Credentials;
pub use error::{Error, Result};
pub use lifecycle::{Disconnect, Lifecycle, StopHandle};
pub use listener::{LifecycleEvent, LifecycleListener};
pub use process::{ProcessWatcher, RaceOutcome};
pub use protocol::Event;
pub use router::EventRouter;
pub use transport::Transport;
