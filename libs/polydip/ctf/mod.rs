//! Conditional-token operations.
//!
//! Contract encoding, approvals, and transaction signing live behind the
//! [`CtfClient`] capability; the engine relies on atomic success/failure.
//! [`CtfOps`] layers the engine-side logic on top: startup reconciliation
//! of pre-existing UP+DOWN pair balances and convenience passthroughs.

use crate::domain::MarketDescriptor;
use crate::venue::Resolution;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CtfError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("contract error: {0}")]
    Contract(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
}

pub type Result<T> = std::result::Result<T, CtfError>;

/// Outcome of a merge or redeem, with the collateral amount recovered
#[derive(Debug, Clone)]
pub struct CtfReceipt {
    pub amount: f64,
    pub tx_hash: Option<String>,
}

/// On-chain capability the engine consumes. Implementations wrap the CTF
/// contracts (split/merge/redeem) plus balance and resolution reads;
/// partial on-chain outcomes surface as errors.
#[async_trait]
pub trait CtfClient: Send + Sync {
    /// Burn `amount` UP/DOWN pairs for collateral.
    async fn merge_pairs(&self, condition_id: &str, amount: f64) -> Result<CtfReceipt>;

    /// Redeem winning tokens after resolution.
    async fn redeem_by_token_ids(
        &self,
        condition_id: &str,
        token_ids: (&str, &str),
    ) -> Result<CtfReceipt>;

    async fn get_position_balance(&self, token_id: &str) -> Result<f64>;

    /// Resolution state straight from the chain (payout denominator).
    async fn get_market_resolution(&self, condition_id: &str) -> Result<Resolution>;

    /// The wallet address positions are held under.
    fn address(&self) -> String;
}

/// Engine-side adapter over the capability.
pub struct CtfOps {
    client: Arc<dyn CtfClient>,
}

impl CtfOps {
    pub fn new(client: Arc<dyn CtfClient>) -> Self {
        Self { client }
    }

    pub fn address(&self) -> String {
        self.client.address()
    }

    pub async fn merge_pairs(&self, condition_id: &str, amount: f64) -> Result<CtfReceipt> {
        self.client.merge_pairs(condition_id, amount).await
    }

    pub async fn redeem_by_token_ids(
        &self,
        condition_id: &str,
        token_ids: (&str, &str),
    ) -> Result<CtfReceipt> {
        self.client.redeem_by_token_ids(condition_id, token_ids).await
    }

    pub async fn get_position_balance(&self, token_id: &str) -> Result<f64> {
        self.client.get_position_balance(token_id).await
    }

    pub async fn get_market_resolution(&self, condition_id: &str) -> Result<Resolution> {
        self.client.get_market_resolution(condition_id).await
    }

    /// Startup reconciliation: merge any pre-existing UP+DOWN pair balance
    /// in the given market back to collateral. Returns the merged amount,
    /// 0.0 when there was nothing to merge.
    pub async fn reconcile_pairs(&self, market: &MarketDescriptor) -> Result<f64> {
        let up = self.client.get_position_balance(&market.up_token_id).await?;
        let down = self
            .client
            .get_position_balance(&market.down_token_id)
            .await?;

        let mergeable = up.min(down);
        if mergeable <= 0.0 {
            return Ok(0.0);
        }

        info!(
            condition_id = %market.condition_id,
            up, down, mergeable,
            "pre-existing pair balance found, merging"
        );
        match self.client.merge_pairs(&market.condition_id, mergeable).await {
            Ok(receipt) => Ok(receipt.amount),
            Err(e) => {
                warn!(condition_id = %market.condition_id, "startup merge failed: {}", e);
                Err(e)
            }
        }
    }
}
