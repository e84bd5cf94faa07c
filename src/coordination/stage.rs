//! Stages and the per-account plans built from them

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::tx::{Apportionment, PackRequest, ValueRule};
use crate::types::{tokens, Address, Operation, OperationKind, StakeInfo};

use alloy_primitives::U256;
use serde::Serialize;
use std::fmt;

/// Note attached to the funding transfer of the stake workflow
pub const FUND_NOTE: &str = "initial mint";

/// Default delegation service fee, in hundredths of a percent (8.00%)
pub const DEFAULT_DELEGATION_FEE: &str = "0320";

/// Phase of an account workflow. Stages run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fund,
    Stake,
    Finalize,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fund => "fund",
            Stage::Stake => "stake",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Homogeneous operations one sender addresses to one receiver during a stage
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    pub stage: Stage,
    pub kind: OperationKind,
    pub sender: Address,
    pub receiver: Address,
    pub operations: Vec<Operation>,
    pub value: ValueRule,
}

impl StageDescriptor {
    pub fn pack_request(&self) -> PackRequest<'_> {
        PackRequest {
            sender: &self.sender,
            receiver: &self.receiver,
            kind: self.kind,
            operations: &self.operations,
            value: &self.value,
        }
    }

    /// Checks that need no network access
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.operations.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "{} stage for {} has no operations",
                self.stage, self.sender
            )));
        }
        if let Some(op) = self.operations.iter().find(|op| op.kind() != self.kind) {
            return Err(OrchestratorError::Validation(format!(
                "{} stage expects {} operations, got {}",
                self.stage,
                self.kind,
                op.kind()
            )));
        }
        if let ValueRule::Apportion { target, .. } = &self.value {
            if target.is_zero() {
                return Err(OrchestratorError::Validation(format!(
                    "{} stage for {} has a zero target value",
                    self.stage, self.sender
                )));
            }
        }
        Ok(())
    }
}

/// Ordered stages of one account's workflow
#[derive(Debug, Clone)]
pub struct AccountPlan {
    /// Account the workflow is run for
    pub account: Address,
    pub stages: Vec<StageDescriptor>,
}

impl AccountPlan {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.stages.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "Workflow for {} has no stages",
                self.account
            )));
        }
        for pair in self.stages.windows(2) {
            if pair[1].stage < pair[0].stage {
                return Err(OrchestratorError::Validation(format!(
                    "Workflow for {} runs {} after {}",
                    self.account, pair[1].stage, pair[0].stage
                )));
            }
        }
        self.stages.iter().try_for_each(StageDescriptor::validate)
    }

    /// Stages in order, each with all of its descriptors
    pub fn grouped(&self) -> Vec<(Stage, &[StageDescriptor])> {
        let mut groups = Vec::new();
        let mut start = 0;
        for i in 1..=self.stages.len() {
            if i == self.stages.len() || self.stages[i].stage != self.stages[start].stage {
                groups.push((self.stages[start].stage, &self.stages[start..i]));
                start = i;
            }
        }
        groups
    }

    /// Every address that signs a transaction in this plan
    pub fn senders(&self) -> Vec<Address> {
        let mut senders: Vec<Address> = self.stages.iter().map(|s| s.sender.clone()).collect();
        senders.sort();
        senders.dedup();
        senders
    }
}

/// Receivers and rules of the stake workflow
#[derive(Debug, Clone)]
pub struct StakeParams {
    pub validator_sc: Address,
    pub delegation_manager: Address,
    /// Hex encoded service fee for the delegation contract
    pub delegation_fee: String,
    pub apportionment: Apportionment,
    /// Convert the staked keys into a delegation contract
    pub create_delegation_contract: bool,
}

/// Fund the owner from the sponsor, stake its keys, then create the
/// delegation contract
pub fn stake_plan(
    sponsor: &Address,
    info: &StakeInfo,
    params: &StakeParams,
) -> OrchestratorResult<AccountPlan> {
    info.validate()?;

    // One extra token covers the owner's fees
    let fund_value = info.target.checked_add(tokens(1)).ok_or_else(|| {
        OrchestratorError::Validation(format!("Stake target of {} overflows", info.account))
    })?;

    let mut stages = vec![
        StageDescriptor {
            stage: Stage::Fund,
            kind: OperationKind::Mint,
            sender: sponsor.clone(),
            receiver: info.account.clone(),
            operations: vec![Operation::mint(FUND_NOTE)],
            value: ValueRule::Fixed(fund_value),
        },
        StageDescriptor {
            stage: Stage::Stake,
            kind: OperationKind::StakeKey,
            sender: info.account.clone(),
            receiver: params.validator_sc.clone(),
            operations: info.stake_operations(),
            value: ValueRule::Apportion {
                target: info.target,
                apportionment: params.apportionment,
            },
        },
    ];

    if params.create_delegation_contract {
        stages.push(StageDescriptor {
            stage: Stage::Finalize,
            kind: OperationKind::CreateDelegationContract,
            sender: info.account.clone(),
            receiver: params.delegation_manager.clone(),
            operations: vec![Operation::create_delegation_contract(
                info.target,
                &params.delegation_fee,
            )],
            value: ValueRule::Zero,
        });
    }

    Ok(AccountPlan {
        account: info.account.clone(),
        stages,
    })
}

/// Unstake validator keys from a delegation contract
pub fn unstake_plan(
    owner: &Address,
    delegation_contract: &Address,
    public_keys: &[String],
) -> OrchestratorResult<AccountPlan> {
    let plan = AccountPlan {
        account: owner.clone(),
        stages: vec![StageDescriptor {
            stage: Stage::Stake,
            kind: OperationKind::Unstake,
            sender: owner.clone(),
            receiver: delegation_contract.clone(),
            operations: public_keys.iter().map(|k| Operation::unstake(k)).collect(),
            value: ValueRule::Zero,
        }],
    };
    plan.validate()?;
    Ok(plan)
}

/// Transfer a fixed value from the sponsor to each wallet, all in one batch.
///
/// `note` may contain `{index}`, replaced by the wallet's position.
pub fn distribution_plan(
    sponsor: &Address,
    wallets: &[Address],
    value: U256,
    note: &str,
) -> OrchestratorResult<AccountPlan> {
    if wallets.is_empty() {
        return Err(OrchestratorError::Validation(
            "Distribution has no wallets".to_string(),
        ));
    }

    let stages = wallets
        .iter()
        .enumerate()
        .map(|(index, wallet)| StageDescriptor {
            stage: Stage::Fund,
            kind: OperationKind::Mint,
            sender: sponsor.clone(),
            receiver: wallet.clone(),
            operations: vec![Operation::mint(&note.replace("{index}", &index.to_string()))],
            value: ValueRule::Fixed(value),
        })
        .collect();

    let plan = AccountPlan {
        account: sponsor.clone(),
        stages,
    };
    plan.validate()?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValidatorKey;

    fn params() -> StakeParams {
        StakeParams {
            validator_sc: Address::new("erd1validator"),
            delegation_manager: Address::new("erd1manager"),
            delegation_fee: DEFAULT_DELEGATION_FEE.to_string(),
            apportionment: Apportionment::Proportional,
            create_delegation_contract: true,
        }
    }

    fn info(keys: usize) -> StakeInfo {
        StakeInfo {
            account: Address::new("erd1owner"),
            keys: (0..keys)
                .map(|i| ValidatorKey {
                    public_key: format!("{:04x}", i),
                    signature: "ab".to_string(),
                })
                .collect(),
            target: tokens(2500) * U256::from(keys as u64),
        }
    }

    #[test]
    fn test_stake_plan_stages_in_order() {
        let plan = stake_plan(&Address::new("erd1sponsor"), &info(3), &params()).unwrap();
        let stages: Vec<Stage> = plan.stages.iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec![Stage::Fund, Stage::Stake, Stage::Finalize]);

        let fund = &plan.stages[0];
        assert_eq!(fund.sender.as_str(), "erd1sponsor");
        assert_eq!(fund.value, ValueRule::Fixed(tokens(7501)));
        assert_eq!(fund.operations[0].payload(), FUND_NOTE.as_bytes());

        let finalize = &plan.stages[2];
        assert_eq!(
            finalize.operations[0].payload(),
            b"makeNewContractFromValidatorData@01969368974c05b00000@0320".as_slice()
        );
        assert_eq!(plan.senders().len(), 2);
    }

    #[test]
    fn test_delegation_contract_optional() {
        let mut params = params();
        params.create_delegation_contract = false;
        let plan = stake_plan(&Address::new("erd1sponsor"), &info(1), &params).unwrap();
        assert_eq!(plan.grouped().len(), 2);
    }

    #[test]
    fn test_out_of_order_stages_rejected() {
        let mut plan = stake_plan(&Address::new("erd1sponsor"), &info(1), &params()).unwrap();
        plan.stages.swap(0, 1);
        assert!(matches!(
            plan.validate(),
            Err(OrchestratorError::Validation(_))
        ));
    }

    #[test]
    fn test_distribution_groups_into_one_stage() {
        let wallets: Vec<Address> = (0..3).map(|i| Address::new(format!("erd1w{}", i))).collect();
        let plan = distribution_plan(
            &Address::new("erd1sponsor"),
            &wallets,
            tokens(20_000),
            "#{index} - testing campaign",
        )
        .unwrap();

        let groups = plan.grouped();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 3);
        assert_eq!(
            plan.stages[2].operations[0].payload(),
            b"#2 - testing campaign".as_slice()
        );
        assert!(distribution_plan(&Address::new("erd1sponsor"), &[], tokens(1), "x").is_err());
    }

    #[test]
    fn test_unstake_requires_keys() {
        let owner = Address::new("erd1owner");
        let contract = Address::new("erd1delegation");
        assert!(unstake_plan(&owner, &contract, &[]).is_err());

        let plan = unstake_plan(&owner, &contract, &["aa".to_string(), "bb".to_string()]).unwrap();
        assert_eq!(plan.stages[0].operations[1].payload(), b"@bb".as_slice());
        assert_eq!(plan.stages[0].value, ValueRule::Zero);
    }
}
