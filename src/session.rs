//! Hypervisor session lifecycle.
//!
//! Two policies are supported and fixed at construction:
//!
//! - **persistent**: dial once, keep the session for the life of the process.
//!   Concurrent queries only contend on the dial itself (double-checked), the
//!   already-connected path takes no lock and relies on the client's own
//!   synchronization.
//! - **per-query**: every query holds one exclusive lock from
//!   [`SessionManager::ensure_session`] until [`SessionManager::release_session`]
//!   (or until the [`Session`] is dropped), and the session is closed on release.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::hypervisor::Hypervisor;
use crate::metrics::{self, DialResult};

/// When the hypervisor session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisconnectPolicy {
    /// Keep the session open across queries.
    #[default]
    Persistent,
    /// Connect and disconnect around every query.
    PerQuery,
}

/// A session acquired for the duration of one query.
///
/// Under the per-query policy this holds the exclusive session lock; dropping
/// it releases the lock without closing the session.
#[must_use = "a session must be released with SessionManager::release_session"]
pub struct Session<'a> {
    connected: bool,
    _exclusive: Option<MutexGuard<'a, ()>>,
}

impl Session<'_> {
    /// Whether the hypervisor session was live when it was handed out.
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Owns the connection state of a shared hypervisor client.
pub struct SessionManager<H> {
    client: Arc<H>,
    uri: String,
    policy: DisconnectPolicy,
    lock: Mutex<()>,
}

impl<H: Hypervisor> SessionManager<H> {
    /// Create a manager for `client`, dialing `uri` on demand.
    pub fn new(client: Arc<H>, uri: impl Into<String>, policy: DisconnectPolicy) -> Self {
        Self {
            client,
            uri: uri.into(),
            policy,
            lock: Mutex::new(()),
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &H {
        &self.client
    }

    /// The policy this manager was built with.
    pub fn policy(&self) -> DisconnectPolicy {
        self.policy
    }

    /// Make sure a session is established and return it.
    ///
    /// A failed dial is logged and reported through [`Session::is_connected`].
    pub async fn ensure_session(&self) -> Session<'_> {
        match self.policy {
            DisconnectPolicy::Persistent => {
                self.connect_if_needed().await;
                Session {
                    connected: self.client.is_connected(),
                    _exclusive: None,
                }
            }
            DisconnectPolicy::PerQuery => {
                let guard = self.lock.lock().await;
                if !self.client.is_connected() {
                    self.dial().await;
                }
                Session {
                    connected: self.client.is_connected(),
                    _exclusive: Some(guard),
                }
            }
        }
    }

    /// Release a session obtained from [`SessionManager::ensure_session`].
    ///
    /// Closes the session under the per-query policy. A close failure is
    /// logged and otherwise ignored.
    pub async fn release_session(&self, session: Session<'_>) {
        if self.policy == DisconnectPolicy::PerQuery && self.client.is_connected() {
            debug!("closing hypervisor session");
            if let Err(e) = self.client.disconnect().await {
                warn!(error = %e, "Unable to close hypervisor connection");
            }
        }
        drop(session);
    }

    /// Dial unless already connected. Returns `true` when the session was
    /// already up, either on entry or after another query won the dial race.
    async fn connect_if_needed(&self) -> bool {
        if self.client.is_connected() {
            return true;
        }

        let _guard = self.lock.lock().await;
        if self.client.is_connected() {
            return true;
        }

        self.dial().await;
        false
    }

    async fn dial(&self) -> bool {
        info!(uri = %self.uri, "Connecting to hypervisor");
        match self.client.connect(&self.uri).await {
            Ok(()) => {
                metrics::record_dial(DialResult::Success);
                true
            }
            Err(e) => {
                warn!(uri = %self.uri, error = %e, "Unable to dial hypervisor");
                metrics::record_dial(DialResult::Error);
                false
            }
        }
    }
}
