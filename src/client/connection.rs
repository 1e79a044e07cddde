//! Connection manager
//!
//! `ConnectionManager` owns the one connection+channel pair ("link") shared
//! by the publisher and the consumer, and is the only place that mutates it.
//!
//! Concurrency and usage notes:
//! - The link is an `Option<Link>`: connection and channel are present
//!   together or absent together.
//! - Start, restart, close and the publish-time repair all run under one
//!   `tokio::sync::Mutex`, so two publishers that both find the link dead
//!   produce one restart between them.
//! - Channel operations themselves run outside the lock on a cloned handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::transport::{Channel, Connection, Transport};
use crate::utils::{Error, Result};

#[derive(Clone)]
struct Link {
    connection: Arc<dyn Connection>,
    channel: Arc<dyn Channel>,
}

impl Link {
    fn is_usable(&self) -> bool {
        !self.connection.is_closed()
    }
}

pub struct ConnectionManager {
    config: Arc<LinkConfig>,
    transport: Arc<dyn Transport>,
    link: Mutex<Option<Link>>,
    restarts: AtomicU64,
}

impl ConnectionManager {
    pub fn new(config: Arc<LinkConfig>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            link: Mutex::new(None),
            restarts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Dial the broker and open one channel. A no-op when the link is
    /// already usable; a dead link is replaced.
    pub async fn start(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if link.as_ref().is_some_and(Link::is_usable) {
            debug!("link already started");
            return Ok(());
        }
        *link = None;
        self.connect(&mut link).await
    }

    /// Close the channel, then the connection.
    ///
    /// The link is taken out of the manager before anything is closed, so
    /// it ends up absent on every path. A failed channel close is returned
    /// as is and the connection is left alone.
    pub async fn close(&self) -> Result<()> {
        // held until the end so a concurrent start waits for the close
        let mut guard = self.link.lock().await;
        let Some(link) = guard.take() else {
            return Ok(());
        };

        link.channel.close().await.map_err(Error::CloseChannel)?;
        link.connection
            .close()
            .await
            .map_err(Error::CloseConnection)?;

        info!(address = %self.config.address(), "link closed");
        Ok(())
    }

    /// True when a link is present and its connection is open.
    pub async fn is_usable(&self) -> bool {
        self.link.lock().await.as_ref().is_some_and(Link::is_usable)
    }

    /// Whether the manager currently holds a link, usable or not.
    pub async fn is_started(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// How many times a dead link was torn down and redialed.
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Current channel, without any repair.
    pub async fn channel(&self) -> Result<Arc<dyn Channel>> {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| link.channel.clone())
            .ok_or(Error::NotConnected)
    }

    /// Return a channel on a usable link, repairing the link first if
    /// needed: a never-started manager is started, a dead link restarted.
    /// At most one attempt is made.
    pub(crate) async fn ensure_usable(&self) -> Result<Arc<dyn Channel>> {
        let mut link = self.link.lock().await;
        match link.as_ref().map(Link::is_usable) {
            Some(true) => {}
            Some(false) => self.restart(&mut link).await?,
            None => self.connect(&mut link).await?,
        }

        link.as_ref()
            .map(|link| link.channel.clone())
            .ok_or(Error::NotConnected)
    }

    async fn restart(&self, link: &mut Option<Link>) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        warn!(address = %self.config.address(), "link is closed, restarting");
        *link = None;
        self.connect(link).await
    }

    async fn connect(&self, link: &mut Option<Link>) -> Result<()> {
        let address = self.config.address();
        let connection = self
            .transport
            .dial(address)
            .await
            .map_err(|source| Error::Connect {
                address: address.to_string(),
                source,
            })?;

        let channel = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(source) => {
                if let Err(e) = connection.close().await {
                    warn!("error while closing connection after channel failure: {e}");
                }
                return Err(Error::Channel(source));
            }
        };

        *link = Some(Link {
            connection,
            channel,
        });
        info!(address = %address, "link started");
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.config.address())
            .field("restarts", &self.restart_count())
            .finish()
    }
}
