//! Process-wide connection registry
//!
//! The registry is the single table mutated from multiple concurrent call
//! sites. It starts empty, owns every live connection, and its lock covers
//! only create/get/remove, never network I/O. Operations on one
//! connection are serialized by the connection's own state machine.

use crate::config::{ConnectOptions, SslConfig};
use crate::connection::Connection;
use crate::event::{Event, EventSink};
use crate::url::WsUrl;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Id-to-connection table with lifecycle rules: ids are unique among live
/// connections, a connection is removed when it reaches `Closed`, and
/// [`Registry::cleanup_all`] tears everything down at host shutdown.
pub struct Registry {
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl Registry {
    /// Empty registry, shareable across bridge call sites.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Create and register a connection.
    ///
    /// Fails with [`Error::DuplicateId`] while another live connection
    /// holds the id, and with [`Error::InvalidArgument`] for an empty id,
    /// a malformed URL, or an undecodable pin set. The returned connection
    /// is in `Connecting`; drive it with [`Connection::connect`].
    pub fn create(
        self: &Arc<Self>,
        id: impl Into<String>,
        url: &str,
        protocols: Vec<String>,
        ssl_config: SslConfig,
        options: ConnectOptions,
        delegate: Arc<dyn EventSink>,
    ) -> Result<Arc<Connection>> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidArgument("connection id is empty".into()));
        }
        let url = WsUrl::parse(url)?;
        ssl_config.validate()?;

        // Removal-on-close rides on the event path: the wrapping sink
        // holds a weak back-reference, never ownership of the registry.
        let sink = Arc::new(RegistrySink {
            registry: Arc::downgrade(self),
            delegate,
        });

        let mut connections = self.connections.lock().expect("registry lock poisoned");
        if connections.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }

        let connection = Arc::new(Connection::new(
            id.clone(),
            url,
            protocols,
            ssl_config,
            options,
            sink,
        ));
        connections.insert(id.clone(), connection.clone());
        tracing::debug!(%id, total = connections.len(), "connection registered");
        Ok(connection)
    }

    /// Look up a live connection.
    pub fn get(&self, id: &str) -> Result<Arc<Connection>> {
        self.connections
            .lock()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Remove a connection from the table. Called automatically when a
    /// connection reaches `Closed`; harmless for unknown ids.
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let removed = self
            .connections
            .lock()
            .expect("registry lock poisoned")
            .remove(id);
        if removed.is_some() {
            tracing::debug!(%id, "connection removed");
        }
        removed
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.lock().expect("registry lock poisoned").len()
    }

    /// Whether no connections are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every live connection (host/module shutdown). Resources
    /// are released immediately and no further events are emitted.
    pub fn cleanup_all(&self) {
        let drained: Vec<_> = {
            let mut connections = self.connections.lock().expect("registry lock poisoned");
            connections.drain().collect()
        };
        let count = drained.len();
        for (_, connection) in drained {
            connection.cleanup();
        }
        if count > 0 {
            tracing::info!(count, "all connections cleaned up");
        }
    }
}

/// Wraps the caller's delegate so the registry unlinks a connection the
/// moment its terminal close event fires, before the caller observes it.
/// The weak reference keeps this a non-owning back-edge.
struct RegistrySink {
    registry: Weak<Registry>,
    delegate: Arc<dyn EventSink>,
}

impl EventSink for RegistrySink {
    fn on_event(&self, event: Event) {
        if let Event::Close { connection_id, .. } = &event {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(connection_id);
            }
        }
        self.delegate.on_event(event);
    }
}
