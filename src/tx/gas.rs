//! Gas model for packed operations
//!
//! Every operation kind has a fixed transaction-level base, a fixed cost per
//! packed operation and a linear surcharge per data byte. The defaults mirror
//! the costs the target chain charges for system contract calls.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::OperationKind;

use serde::Deserialize;

/// Gas charged per byte of transaction data
pub const DATA_BYTE_GAS: u64 = 1_500;

/// Cost schedule for a single operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GasSchedule {
    /// Charged once per transaction
    pub tx_base: u64,
    /// Charged once per packed operation
    pub op_base: u64,
    /// Charged per data byte
    #[serde(default = "default_per_byte")]
    pub per_byte: u64,
}

fn default_per_byte() -> u64 {
    DATA_BYTE_GAS
}

impl GasSchedule {
    pub const fn new(tx_base: u64, op_base: u64, per_byte: u64) -> Self {
        Self {
            tx_base,
            op_base,
            per_byte,
        }
    }
}

/// Pure, deterministic gas cost model
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GasModel {
    pub mint: GasSchedule,
    pub stake_key: GasSchedule,
    pub create_delegation_contract: GasSchedule,
    pub unstake: GasSchedule,
}

impl GasModel {
    /// Create a gas model with the chain's default schedule
    pub fn new() -> Self {
        Self {
            mint: GasSchedule::new(50_000, 0, DATA_BYTE_GAS),
            stake_key: GasSchedule::new(50_000_000, 6_000_000, DATA_BYTE_GAS),
            create_delegation_contract: GasSchedule::new(510_000_000, 0, DATA_BYTE_GAS),
            // 300M for a single-key unStakeNodes call
            unstake: GasSchedule::new(50_000_000, 250_000_000, DATA_BYTE_GAS),
        }
    }

    pub fn schedule(&self, kind: OperationKind) -> &GasSchedule {
        match kind {
            OperationKind::Mint => &self.mint,
            OperationKind::StakeKey => &self.stake_key,
            OperationKind::CreateDelegationContract => &self.create_delegation_contract,
            OperationKind::Unstake => &self.unstake,
        }
    }

    /// Gas contributed by one operation with a payload of `payload_len` bytes
    pub fn cost(&self, kind: OperationKind, payload_len: usize) -> u64 {
        let schedule = self.schedule(kind);
        schedule
            .op_base
            .saturating_add(schedule.per_byte.saturating_mul(payload_len as u64))
    }

    /// Transaction-level base cost, including the shared data header
    pub fn transaction_base(&self, kind: OperationKind, header_len: usize) -> u64 {
        let schedule = self.schedule(kind);
        schedule
            .tx_base
            .saturating_add(schedule.per_byte.saturating_mul(header_len as u64))
    }

    /// Reject schedules that would price a non-empty payload at zero
    pub fn validate(&self) -> OrchestratorResult<()> {
        for kind in [
            OperationKind::Mint,
            OperationKind::StakeKey,
            OperationKind::CreateDelegationContract,
            OperationKind::Unstake,
        ] {
            let schedule = self.schedule(kind);
            if schedule.op_base == 0 && schedule.per_byte == 0 {
                return Err(OrchestratorError::Config(format!(
                    "Gas schedule for {} prices operations at zero",
                    kind
                )));
            }
        }
        Ok(())
    }
}

impl Default for GasModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [OperationKind; 4] = [
        OperationKind::Mint,
        OperationKind::StakeKey,
        OperationKind::CreateDelegationContract,
        OperationKind::Unstake,
    ];

    #[test]
    fn test_cost_monotonic_and_positive() {
        let model = GasModel::new();
        for kind in KINDS {
            let mut previous = model.cost(kind, 0);
            for len in 1..512 {
                let cost = model.cost(kind, len);
                assert!(cost > 0, "{} priced at zero for {} bytes", kind, len);
                assert!(cost >= previous);
                previous = cost;
            }
        }
    }

    #[test]
    fn test_mint_matches_transfer_pricing() {
        let model = GasModel::new();
        let note = "initial mint";
        let total = model.transaction_base(OperationKind::Mint, 0)
            + model.cost(OperationKind::Mint, note.len());
        assert_eq!(total, 50_000 + 1_500 * 12);
    }

    #[test]
    fn test_zero_schedule_rejected() {
        let mut model = GasModel::new();
        model.unstake = GasSchedule::new(1, 0, 0);
        assert!(model.validate().is_err());
        assert!(GasModel::default().validate().is_ok());
    }
}
