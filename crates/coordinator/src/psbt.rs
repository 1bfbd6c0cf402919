//! Payout adapter seam.
//!
//! The bitcoin node and PSBT construction live outside this service; the
//! workflow only depends on this contract. The builder is invoked once every
//! task under a contract has been review-approved.

use async_trait::async_trait;

use crate::error::Result;

/// Result of building a payout transaction for a finished contract.
#[derive(Debug, Clone)]
pub struct PayoutPsbt {
    pub psbt_base64: String,
    pub selected_sats: u64,
    pub fee_sats: u64,
    pub change_sats: u64,
    pub payout_script: String,
}

#[async_trait]
pub trait PsbtBuilder: Send + Sync {
    async fn build_payout(&self, contract_id: &str) -> Result<PayoutPsbt>;
}

#[cfg(test)]
pub mod testing {
    //! Recording stub used by service tests.

    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingPsbtBuilder {
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PsbtBuilder for RecordingPsbtBuilder {
        async fn build_payout(&self, contract_id: &str) -> Result<PayoutPsbt> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(contract_id.to_string());
            Ok(PayoutPsbt {
                psbt_base64: "cHNidP8=".to_string(),
                selected_sats: 1500,
                fee_sats: 200,
                change_sats: 300,
                payout_script: "0014".to_string(),
            })
        }
    }
}
