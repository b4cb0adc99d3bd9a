//! Consumer-facing subscription handle.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::connection::ConnCmd;
use crate::error::Result;

/// Events buffered per subscription before backpressure applies to the
/// connection task.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 8192;

/// A live GraphQL subscription.
///
/// Events are pulled with [`next`](Self::next). The stream ends with `None`
/// when the server completes the subscription, or with an `Err` event when
/// it fails; after either, the subscription is closed. Dropping the handle
/// unsubscribes.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(mut subscription: appsync_link::Subscription) -> appsync_link::Result<()> {
/// while let Some(event) = subscription.next().await {
///     let data = event?;
///     println!("received: {}", data);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Subscription {
    id: String,
    event_rx: mpsc::Receiver<Result<Value>>,
    cmd_tx: mpsc::Sender<ConnCmd>,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        event_rx: mpsc::Receiver<Result<Value>>,
        cmd_tx: mpsc::Sender<ConnCmd>,
    ) -> Self {
        Self {
            id,
            event_rx,
            cmd_tx,
            closed: false,
        }
    }

    /// Identifier assigned to this subscription on the wire.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the event stream has ended.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription is over. An `Err` event is
    /// terminal; subsequent calls return `None`.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        if self.closed {
            return None;
        }
        match self.event_rx.recv().await {
            Some(Ok(value)) => Some(Ok(value)),
            Some(Err(e)) => {
                self.closed = true;
                Some(Err(e))
            },
            None => {
                self.closed = true;
                None
            },
        }
    }

    /// Stop the subscription and wait until the connection task has
    /// processed the removal.
    pub async fn unsubscribe(mut self) {
        self.closed = true;
        let (done_tx, done_rx) = oneshot::channel();
        let cmd = ConnCmd::Stop {
            id: self.id.clone(),
            done_tx: Some(done_tx),
        };
        if self.cmd_tx.send(cmd).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Sent even after the stream ended with an error: the registry
        // entry for an established subscription lives until a stop frame
        // is exchanged, and a stop for an already-removed id is a no-op.
        let _ = self.cmd_tx.try_send(ConnCmd::Stop {
            id: self.id.clone(),
            done_tx: None,
        });
    }
}
