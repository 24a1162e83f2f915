//! On-chain settlement tracking.
//!
//! Trades carry a transaction hash once the operator submits the match
//! on-chain. When a chain provider is configured, each hash is awaited to
//! one confirmation and a `transaction_confirmed` event is emitted.
//! Failures never touch the order's logical status.

use crate::oms::events::OrderEvent;
use crate::oms::{OmsError, Result};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::TxHash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// How often the receipt is polled
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Give up after this many receipt polls
const MAX_RECEIPT_POLLS: u32 = 90;

pub struct SettlementTracker {
    provider: Arc<Provider<Http>>,
}

impl SettlementTracker {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let provider =
            Provider::<Http>::try_from(rpc_url).map_err(|e| OmsError::Chain(e.to_string()))?;
        Ok(Self {
            provider: Arc::new(provider),
        })
    }

    /// Wait asynchronously for one confirmation of `tx_hash` and emit
    /// `transaction_confirmed` with the block number and gas used.
    pub fn spawn_confirmation_wait(
        &self,
        order_id: String,
        trade_id: String,
        tx_hash: String,
        events_tx: broadcast::Sender<OrderEvent>,
    ) {
        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            let hash: TxHash = match tx_hash.parse() {
                Ok(hash) => hash,
                Err(e) => {
                    let _ = events_tx.send(OrderEvent::Error {
                        order_id: Some(order_id),
                        message: format!("unparseable tx hash {}: {}", tx_hash, e),
                    });
                    return;
                }
            };

            for _ in 0..MAX_RECEIPT_POLLS {
                match provider.get_transaction_receipt(hash).await {
                    Ok(Some(receipt)) => {
                        if let Some(block_number) = receipt.block_number {
                            let gas_used =
                                receipt.gas_used.map(|g| g.as_u64()).unwrap_or_default();
                            debug!(
                                trade_id = %trade_id,
                                block = block_number.as_u64(),
                                "transaction confirmed"
                            );
                            let _ = events_tx.send(OrderEvent::TransactionConfirmed {
                                order_id,
                                trade_id,
                                tx_hash,
                                block_number: block_number.as_u64(),
                                gas_used,
                            });
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(trade_id = %trade_id, "receipt poll failed: {}", e);
                    }
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }

            warn!(trade_id = %trade_id, "gave up waiting for confirmation of {}", tx_hash);
            let _ = events_tx.send(OrderEvent::Error {
                order_id: Some(order_id),
                message: format!("confirmation wait timed out for {}", tx_hash),
            });
        });
    }
}
