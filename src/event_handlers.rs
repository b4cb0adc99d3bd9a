//! Connection lifecycle callbacks.
//!
//! Optional hooks fired from the background connection task. Handlers run
//! inline on that task, so they must be quick and must not block.

use std::fmt;
use std::sync::Arc;

use crate::error::AppSyncLinkError;

/// Why the realtime connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client was closed deliberately.
    ClientClosed,
    /// No keep-alive frame arrived within the negotiated interval.
    KeepAliveLapsed,
    /// The server closed the socket or the transport failed.
    ConnectionLost,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "client closed"),
            Self::KeepAliveLapsed => write!(f, "keep-alive lapsed"),
            Self::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

type ConnectFn = dyn Fn() + Send + Sync;
type DisconnectFn = dyn Fn(DisconnectReason) + Send + Sync;
type ErrorFn = dyn Fn(&AppSyncLinkError) + Send + Sync;

/// Set of lifecycle callbacks, all optional.
///
/// # Examples
///
/// ```
/// use appsync_link::EventHandlers;
///
/// let handlers = EventHandlers::new()
///     .on_connect(|| log::info!("realtime connection up"))
///     .on_disconnect(|reason| log::warn!("disconnected: {}", reason));
/// ```
#[derive(Clone, Default)]
pub struct EventHandlers {
    connect: Option<Arc<ConnectFn>>,
    disconnect: Option<Arc<DisconnectFn>>,
    error: Option<Arc<ErrorFn>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after the connection handshake completes.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.connect = Some(Arc::new(f));
        self
    }

    /// Called when the connection ends, with the reason.
    pub fn on_disconnect(
        mut self,
        f: impl Fn(DisconnectReason) + Send + Sync + 'static,
    ) -> Self {
        self.disconnect = Some(Arc::new(f));
        self
    }

    /// Called for errors surfaced outside any request or subscription.
    pub fn on_error(
        mut self,
        f: impl Fn(&AppSyncLinkError) + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(f) = &self.connect {
            f();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(f) = &self.disconnect {
            f(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: &AppSyncLinkError) {
        if let Some(f) = &self.error {
            f(error);
        }
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("connect", &self.connect.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}
