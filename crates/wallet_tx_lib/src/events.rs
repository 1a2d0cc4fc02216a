use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// New activity for `address` on `chain_id`: submitted, mined or ingested history.
    TransactionActivity { address: String, chain_id: u64 },
    TransactionStatusChanged { id: String, status: String },
    BridgeTransferUpdated { route: String, tx_hash: String },
    ApprovalsUpdated { owner: String, chain_id: u64 },
}

/// Fan-out of state changes to dependent read models.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        // no subscribers is fine
        if self.sender.send(event.clone()).is_err() {
            log::trace!("No subscribers for event {:?}", event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
