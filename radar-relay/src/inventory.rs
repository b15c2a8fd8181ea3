//! The "notify transaction hashes" inventory handler

use crate::host::OnNewTransaction;
use radar_core::{InventoryKind, InventoryMessage};
use radar_network::NetworkResult;
use tracing::{error, trace, warn};

/// Counts for one handled inventory message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifySummary {
    pub notified: usize,
    pub blocks: usize,
    pub unknown: usize,
}

/// Forwards announced transaction hashes to the host
#[derive(Clone)]
pub struct TransactionNotifier {
    on_new_tx: OnNewTransaction,
}

impl TransactionNotifier {
    pub fn new(on_new_tx: OnNewTransaction) -> Self {
        Self { on_new_tx }
    }

    /// Handle one inventory delivery.
    ///
    /// Every vector of the message is processed, in order, before this returns.
    pub fn handle(&self, result: NetworkResult<InventoryMessage>) -> NotifySummary {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                error!("inventory: {}", e);
                return NotifySummary::default();
            }
        };

        let mut summary = NotifySummary::default();
        for vector in &message {
            match vector.kind {
                InventoryKind::Transaction => {
                    self.on_new_tx.call(vector.hash);
                    summary.notified += 1;
                }
                InventoryKind::Block => summary.blocks += 1,
                InventoryKind::Unknown(code) => {
                    warn!(inv_type = code, "Ignoring unknown inventory type");
                    summary.unknown += 1;
                }
            }
        }

        trace!(
            notified = summary.notified,
            blocks = summary.blocks,
            unknown = summary.unknown,
            "Handled inventory"
        );
        summary
    }
}
