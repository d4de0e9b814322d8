//! # pinsock
//!
//! A certificate-pinned WebSocket client for host runtimes that need TLS
//! trust decisions made against caller-supplied pins instead of the
//! operating system trust store.
//!
//! The crate is organized around five pieces:
//!
//! * [`pinning`]: evaluates a presented certificate chain against a
//!   configured pin set and intercepts the rustls server-trust decision,
//!   recording the outcome as a per-connection [`ValidationResult`].
//! * [`protocol`]: the RFC 6455 upgrade handshake and frame codec.
//! * [`connection`]: TLS session establishment plus the per-session state
//!   machine (`Connecting -> Open -> Closing -> Closed`) and its
//!   background I/O task.
//! * [`Registry`]: the process-wide id-to-connection table.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> pinsock::Result<()> {
//! use pinsock::{event, ConnectOptions, Pin, PinAlgorithm, Registry, SslConfig};
//!
//! let registry = Registry::new();
//! let (sink, _events) = event::channel();
//!
//! let ssl = SslConfig::public_key_hash(vec![Pin::new(
//!     PinAlgorithm::Sha256,
//!     "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=",
//! )]);
//!
//! let conn = registry.create(
//!     "feed-1",
//!     "wss://feed.example.com/stream",
//!     vec!["v1.feed".into()],
//!     ssl,
//!     ConnectOptions::default(),
//!     sink,
//! )?;
//! conn.connect().await?;
//! conn.send("subscribe".into(), true).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod pinning;
pub mod protocol;
pub mod registry;
pub mod url;

pub use config::{ConnectOptions, LeafInput, Pin, PinAlgorithm, PinMode, SslConfig};
pub use connection::{Connection, ReadyState};
pub use error::{Error, Result};
pub use event::{Event, EventSink};
pub use pinning::{MatchResult, ValidationResult};
pub use registry::Registry;
pub use url::WsUrl;
