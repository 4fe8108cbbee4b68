//! Fire-and-forget account resynchronization requests.

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::types::Address;

/// Sender half of the background resync queue.
///
/// `request` never waits: a full or closed queue drops the request.
#[derive(Clone, Debug)]
pub struct SyncSignal {
    tx: Option<mpsc::Sender<Address>>,
}

impl SyncSignal {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Address>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn request(&self, address: &Address) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(address.clone()) {
            Ok(()) => tracing::debug!(address = %address, "account resync requested"),
            Err(TrySendError::Full(_)) => {
                tracing::debug!(address = %address, "resync queue full, skipping")
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(address = %address, "resync worker gone, skipping")
            }
        }
    }
}
