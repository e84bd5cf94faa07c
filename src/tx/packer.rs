//! Packing of homogeneous operations into transactions
//!
//! Operations are accumulated greedily, in order, into the current
//! transaction until the next one would break the operation-count, gas or
//! data-size ceiling. All limits are checked before any nonce is allocated,
//! so a rejected request leaves the sender's allocator untouched.

use super::gas::GasModel;
use super::nonce::NonceAllocator;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{
    encode_value_hex, Address, NetworkParameters, Operation, OperationKind, UnsignedTransaction,
};

use alloy_primitives::U256;
use serde::Deserialize;
use tracing::debug;

/// Ceilings for a single transaction of one operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PackingLimits {
    /// Maximum operations per transaction
    pub max_ops: usize,
    /// Maximum gas limit per transaction
    #[serde(default = "default_max_gas")]
    pub max_gas: u64,
    /// Maximum data field size in bytes
    #[serde(default = "default_max_data_bytes")]
    pub max_data_bytes: usize,
}

fn default_max_gas() -> u64 {
    600_000_000
}

fn default_max_data_bytes() -> usize {
    256 * 1024
}

impl PackingLimits {
    pub fn with_max_ops(max_ops: usize) -> Self {
        Self {
            max_ops,
            max_gas: default_max_gas(),
            max_data_bytes: default_max_data_bytes(),
        }
    }
}

/// Packing limits per operation kind
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub mint: PackingLimits,
    pub stake_key: PackingLimits,
    pub create_delegation_contract: PackingLimits,
    pub unstake: PackingLimits,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            mint: PackingLimits::with_max_ops(1),
            // Keys per stake call, bounded by the block gas ceiling
            stake_key: PackingLimits::with_max_ops(50),
            create_delegation_contract: PackingLimits::with_max_ops(1),
            unstake: PackingLimits::with_max_ops(50),
        }
    }
}

impl LimitsConfig {
    pub fn for_kind(&self, kind: OperationKind) -> &PackingLimits {
        match kind {
            OperationKind::Mint => &self.mint,
            OperationKind::StakeKey => &self.stake_key,
            OperationKind::CreateDelegationContract => &self.create_delegation_contract,
            OperationKind::Unstake => &self.unstake,
        }
    }

    pub fn for_kind_mut(&mut self, kind: OperationKind) -> &mut PackingLimits {
        match kind {
            OperationKind::Mint => &mut self.mint,
            OperationKind::StakeKey => &mut self.stake_key,
            OperationKind::CreateDelegationContract => &mut self.create_delegation_contract,
            OperationKind::Unstake => &mut self.unstake,
        }
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        for (kind, limits) in [
            (OperationKind::Mint, &self.mint),
            (OperationKind::StakeKey, &self.stake_key),
            (
                OperationKind::CreateDelegationContract,
                &self.create_delegation_contract,
            ),
            (OperationKind::Unstake, &self.unstake),
        ] {
            if limits.max_ops == 0 || limits.max_gas == 0 || limits.max_data_bytes == 0 {
                return Err(OrchestratorError::Config(format!(
                    "Packing limits for {} must be non-zero",
                    kind
                )));
            }
        }
        Ok(())
    }
}

/// How a stage's value is split across its transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRule {
    Zero,
    /// Same value on every transaction
    Fixed(U256),
    /// Split `target` exactly; the last transaction absorbs any remainder
    Apportion {
        target: U256,
        apportionment: Apportionment,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apportionment {
    /// floor(target * ops_i / total_ops) for every transaction but the last
    Proportional,
    /// Fixed amount per operation for every transaction but the last
    PerOperation(U256),
}

/// Operations bound for one receiver from one sender
#[derive(Debug, Clone)]
pub struct PackRequest<'a> {
    pub sender: &'a Address,
    pub receiver: &'a Address,
    pub kind: OperationKind,
    pub operations: &'a [Operation],
    pub value: &'a ValueRule,
}

/// Splits operations into limit-respecting transactions
#[derive(Debug, Clone)]
pub struct BatchPacker {
    gas: GasModel,
    limits: LimitsConfig,
    network: NetworkParameters,
}

impl BatchPacker {
    pub fn new(gas: GasModel, limits: LimitsConfig, network: NetworkParameters) -> Self {
        Self {
            gas,
            limits,
            network,
        }
    }

    pub fn gas_model(&self) -> &GasModel {
        &self.gas
    }

    /// Pack operations into transactions, drawing one nonce per transaction
    pub fn pack(
        &self,
        request: &PackRequest<'_>,
        allocator: &mut NonceAllocator,
    ) -> OrchestratorResult<Vec<UnsignedTransaction>> {
        self.validate(request, allocator)?;

        let chunks = self.chunk(request.kind, request.operations)?;
        let counts: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        let values = apportion_values(request.value, &counts)?;

        let mut transactions = Vec::with_capacity(chunks.len());
        for (chunk, value) in chunks.into_iter().zip(values) {
            let header = data_header(request.kind, chunk.len());
            let mut data = header.clone();
            let mut gas_limit = self.gas.transaction_base(request.kind, header.len());
            for op in chunk {
                data.extend_from_slice(op.payload());
                gas_limit += self.gas.cost(request.kind, op.payload().len());
            }

            let tx = UnsignedTransaction {
                sender: request.sender.clone(),
                receiver: request.receiver.clone(),
                nonce: allocator.next(),
                value,
                gas_limit,
                gas_price: self.network.min_gas_price,
                data,
                chain_id: self.network.chain_id.clone(),
                version: self.network.version,
                kind: request.kind,
                op_count: chunk.len(),
            };

            debug!(
                "Packed {} tx: nonce {}, {} ops, value {}, gas limit {}",
                tx.kind, tx.nonce, tx.op_count, tx.value, tx.gas_limit
            );
            transactions.push(tx);
        }

        Ok(transactions)
    }

    fn validate(
        &self,
        request: &PackRequest<'_>,
        allocator: &NonceAllocator,
    ) -> OrchestratorResult<()> {
        if request.operations.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "No {} operations to pack for {}",
                request.kind, request.sender
            )));
        }

        if let Some(op) = request
            .operations
            .iter()
            .find(|op| op.kind() != request.kind)
        {
            return Err(OrchestratorError::Validation(format!(
                "Operation kind {} does not match stage kind {}",
                op.kind(),
                request.kind
            )));
        }

        if allocator.address() != request.sender {
            return Err(OrchestratorError::Validation(format!(
                "Nonce allocator belongs to {}, not sender {}",
                allocator.address(),
                request.sender
            )));
        }

        if let ValueRule::Apportion { target, .. } = request.value {
            if target.is_zero() {
                return Err(OrchestratorError::Validation(format!(
                    "Zero apportionment target for {}",
                    request.sender
                )));
            }
        }

        Ok(())
    }

    /// Greedy split of operations into limit-respecting groups
    fn chunk<'a>(
        &self,
        kind: OperationKind,
        operations: &'a [Operation],
    ) -> OrchestratorResult<Vec<&'a [Operation]>> {
        let limits = self.limits.for_kind(kind);
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut op_gas = 0u64;
        let mut op_bytes = 0usize;

        for (index, op) in operations.iter().enumerate() {
            let gas = self.gas.cost(kind, op.payload().len());
            let bytes = op.payload().len();
            let count = index - start;

            if count > 0
                && !self.fits(
                    kind,
                    limits,
                    count + 1,
                    op_gas.saturating_add(gas),
                    op_bytes + bytes,
                )
            {
                chunks.push(&operations[start..index]);
                start = index;
                op_gas = 0;
                op_bytes = 0;
            }

            if index == start && !self.fits(kind, limits, 1, gas, bytes) {
                return Err(OrchestratorError::Validation(format!(
                    "{} operation {} exceeds per-transaction limits (gas {}, {} bytes)",
                    kind, index, gas, bytes
                )));
            }

            op_gas = op_gas.saturating_add(gas);
            op_bytes += bytes;
        }

        // Trailing partial transaction
        chunks.push(&operations[start..]);
        Ok(chunks)
    }

    fn fits(
        &self,
        kind: OperationKind,
        limits: &PackingLimits,
        count: usize,
        op_gas: u64,
        op_bytes: usize,
    ) -> bool {
        let header_len = data_header(kind, count).len();
        let gas = self.gas.transaction_base(kind, header_len).saturating_add(op_gas);
        count <= limits.max_ops
            && gas <= limits.max_gas
            && header_len + op_bytes <= limits.max_data_bytes
    }
}

/// Shared data prefix of a transaction packing `count` operations
pub fn data_header(kind: OperationKind, count: usize) -> Vec<u8> {
    match kind {
        OperationKind::Mint | OperationKind::CreateDelegationContract => Vec::new(),
        OperationKind::StakeKey => {
            format!("stake@{}", encode_value_hex(U256::from(count as u64))).into_bytes()
        }
        OperationKind::Unstake => b"unStakeNodes".to_vec(),
    }
}

/// Per-transaction values for groups of `counts` operations.
///
/// For apportioned rules the values always sum to the target exactly.
pub fn apportion_values(rule: &ValueRule, counts: &[usize]) -> OrchestratorResult<Vec<U256>> {
    let n = counts.len();
    match rule {
        ValueRule::Zero => Ok(vec![U256::ZERO; n]),
        ValueRule::Fixed(value) => Ok(vec![*value; n]),
        ValueRule::Apportion {
            target,
            apportionment,
        } => {
            let total_ops: usize = counts.iter().sum();
            if n == 0 || total_ops == 0 {
                return Err(OrchestratorError::Validation(
                    "Cannot apportion value over zero operations".to_string(),
                ));
            }

            let total = U256::from(total_ops as u64);
            let mut values = Vec::with_capacity(n);
            let mut allocated = U256::ZERO;
            for count in &counts[..n - 1] {
                let count = U256::from(*count as u64);
                let share = match apportionment {
                    // floor(target * count / total) without forming target * count
                    Apportionment::Proportional => {
                        Some((*target / total) * count + (*target % total) * count / total)
                    }
                    Apportionment::PerOperation(per_op) => per_op.checked_mul(count),
                }
                .ok_or_else(|| {
                    OrchestratorError::Validation("Stake value overflow".to_string())
                })?;
                allocated = allocated.checked_add(share).ok_or_else(|| {
                    OrchestratorError::Validation("Stake value overflow".to_string())
                })?;
                values.push(share);
            }

            let last = target.checked_sub(allocated).ok_or_else(|| {
                OrchestratorError::Validation(format!(
                    "Target {} is below the {} already allocated to earlier transactions",
                    target, allocated
                ))
            })?;
            values.push(last);
            Ok(values)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{tokens, ValidatorKey};

    fn network() -> NetworkParameters {
        NetworkParameters {
            chain_id: "T".to_string(),
            min_gas_price: 1_000_000_000,
            version: 1,
        }
    }

    fn packer() -> BatchPacker {
        BatchPacker::new(GasModel::new(), LimitsConfig::default(), network())
    }

    fn stake_ops(n: usize) -> Vec<Operation> {
        (0..n)
            .map(|i| {
                Operation::stake_key(&ValidatorKey {
                    public_key: format!("{:0192x}", i),
                    signature: format!("{:096x}", i),
                })
            })
            .collect()
    }

    fn pack_stake(
        packer: &BatchPacker,
        ops: &[Operation],
        target: U256,
        allocator: &mut NonceAllocator,
    ) -> OrchestratorResult<Vec<UnsignedTransaction>> {
        let sender = allocator.address().clone();
        let receiver = Address::new("erd1validator");
        let value = ValueRule::Apportion {
            target,
            apportionment: Apportionment::Proportional,
        };
        packer.pack(
            &PackRequest {
                sender: &sender,
                receiver: &receiver,
                kind: OperationKind::StakeKey,
                operations: ops,
                value: &value,
            },
            allocator,
        )
    }

    #[test]
    fn test_120_keys_into_three_transactions() {
        let packer = packer();
        let ops = stake_ops(120);
        let mut allocator = NonceAllocator::new(Address::new("erd1owner"), 3);

        let txs = pack_stake(&packer, &ops, U256::from(300u64), &mut allocator).unwrap();

        let counts: Vec<usize> = txs.iter().map(|t| t.op_count).collect();
        assert_eq!(counts, vec![50, 50, 20]);
        let values: Vec<U256> = txs.iter().map(|t| t.value).collect();
        assert_eq!(
            values,
            vec![U256::from(125u64), U256::from(125u64), U256::from(50u64)]
        );
        let nonces: Vec<u64> = txs.iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![3, 4, 5]);
        assert!(txs[0].data_string().starts_with("stake@32@"));
        assert!(txs[2].data_string().starts_with("stake@14@"));
    }

    #[test]
    fn test_counts_follow_ceiling_division() {
        let gas = GasModel::new();
        for limit in [1usize, 3, 7, 50] {
            let mut limits = LimitsConfig::default();
            limits.stake_key.max_ops = limit;
            let packer = BatchPacker::new(gas.clone(), limits, network());
            for count in [1usize, 2, 7, 49, 50, 51, 100, 101] {
                let ops = stake_ops(count);
                let mut allocator = NonceAllocator::new(Address::new("erd1owner"), 0);
                let txs = pack_stake(&packer, &ops, tokens(7), &mut allocator).unwrap();

                assert_eq!(txs.len(), (count + limit - 1) / limit);
                assert!(txs.iter().all(|t| t.op_count <= limit));
                let expected_last = if count % limit == 0 { limit } else { count % limit };
                assert_eq!(txs.last().map(|t| t.op_count), Some(expected_last));
                assert_eq!(txs.iter().map(|t| t.op_count).sum::<usize>(), count);
            }
        }
    }

    #[test]
    fn test_apportionment_is_exact() {
        let targets = [
            U256::from(1u64),
            U256::from(299u64),
            U256::from(1_000u64),
            tokens(2500) + U256::from(1u64),
            U256::MAX / U256::from(1_000u64),
            U256::MAX / U256::from(10u64),
            U256::MAX,
        ];
        let splits: [&[usize]; 4] = [&[1], &[50, 50, 20], &[3, 3, 3, 1], &[7, 7, 7, 7, 7, 7, 2]];
        for target in targets {
            for counts in splits {
                let rule = ValueRule::Apportion {
                    target,
                    apportionment: Apportionment::Proportional,
                };
                let values = apportion_values(&rule, counts).unwrap();
                assert_eq!(values.len(), counts.len());
                let sum = values.iter().fold(U256::ZERO, |acc, v| acc + *v);
                assert_eq!(sum, target);
            }
        }
    }

    #[test]
    fn test_per_operation_apportionment() {
        let per_key = tokens(2500);
        let rule = ValueRule::Apportion {
            target: tokens(2500 * 120 + 10),
            apportionment: Apportionment::PerOperation(per_key),
        };
        let values = apportion_values(&rule, &[50, 50, 20]).unwrap();
        assert_eq!(values[0], tokens(125_000));
        assert_eq!(values[1], tokens(125_000));
        assert_eq!(values[2], tokens(50_010));

        let short = ValueRule::Apportion {
            target: tokens(100),
            apportionment: Apportionment::PerOperation(per_key),
        };
        assert!(apportion_values(&short, &[50, 1]).is_err());
    }

    #[test]
    fn test_empty_operations_rejected_without_nonce_use() {
        let packer = packer();
        let mut allocator = NonceAllocator::new(Address::new("erd1owner"), 9);
        let result = pack_stake(&packer, &[], tokens(1), &mut allocator);
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
        assert_eq!(allocator.peek(), 9);
        assert_eq!(allocator.allocated(), 0);
    }

    #[test]
    fn test_mismatched_kind_rejected() {
        let packer = packer();
        let mut ops = stake_ops(3);
        ops.push(Operation::unstake("abcd"));
        let mut allocator = NonceAllocator::new(Address::new("erd1owner"), 0);
        let result = pack_stake(&packer, &ops, tokens(1), &mut allocator);
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
        assert_eq!(allocator.allocated(), 0);
    }

    #[test]
    fn test_zero_target_rejected() {
        let packer = packer();
        let mut allocator = NonceAllocator::new(Address::new("erd1owner"), 0);
        let result = pack_stake(&packer, &stake_ops(2), U256::ZERO, &mut allocator);
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[test]
    fn test_gas_ceiling_splits_unstake() {
        // 250M per key: two keys fit under 600M, a third does not
        let packer = packer();
        let ops: Vec<Operation> = (0..5)
            .map(|i| Operation::unstake(&format!("{:0192x}", i)))
            .collect();
        let sender = Address::new("erd1owner");
        let receiver = Address::new("erd1delegation");
        let mut allocator = NonceAllocator::new(sender.clone(), 0);
        let txs = packer
            .pack(
                &PackRequest {
                    sender: &sender,
                    receiver: &receiver,
                    kind: OperationKind::Unstake,
                    operations: &ops,
                    value: &ValueRule::Zero,
                },
                &mut allocator,
            )
            .unwrap();

        let counts: Vec<usize> = txs.iter().map(|t| t.op_count).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        assert!(txs.iter().all(|t| t.gas_limit <= 600_000_000));
        assert!(txs[0].data_string().starts_with("unStakeNodes@"));
    }

    #[test]
    fn test_gas_limit_is_exact_sum() {
        let packer = packer();
        let ops = stake_ops(2);
        let mut allocator = NonceAllocator::new(Address::new("erd1owner"), 0);
        let txs = pack_stake(&packer, &ops, tokens(5000), &mut allocator).unwrap();
        let header = data_header(OperationKind::StakeKey, 2);
        let gas = packer.gas_model();
        let expected = gas.transaction_base(OperationKind::StakeKey, header.len())
            + ops
                .iter()
                .map(|op| gas.cost(OperationKind::StakeKey, op.payload().len()))
                .sum::<u64>();
        assert_eq!(txs[0].gas_limit, expected);
        assert_eq!(txs[0].data.len(), header.len() + 2 * ops[0].payload().len());
    }

    #[test]
    fn test_oversized_operation_rejected() {
        let mut limits = LimitsConfig::default();
        limits.unstake.max_gas = 100_000_000;
        let packer = BatchPacker::new(GasModel::new(), limits, network());
        let ops = vec![Operation::unstake("abcd")];
        let sender = Address::new("erd1owner");
        let mut allocator = NonceAllocator::new(sender.clone(), 0);
        let result = packer.pack(
            &PackRequest {
                sender: &sender,
                receiver: &sender,
                kind: OperationKind::Unstake,
                operations: &ops,
                value: &ValueRule::Zero,
            },
            &mut allocator,
        );
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
        assert_eq!(allocator.allocated(), 0);
    }
}
