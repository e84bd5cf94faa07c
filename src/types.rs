//! Core data model shared by the packer, pipeline and sequencer

use crate::error::{OrchestratorError, OrchestratorResult};

use alloy_primitives::U256;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Base units in one whole token (10^18)
pub const ONE_TOKEN: u64 = 1_000_000_000_000_000_000;

/// Account address, opaque to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction identifier returned by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a logical operation packed into transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Mint,
    StakeKey,
    CreateDelegationContract,
    Unstake,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Mint => "mint",
            OperationKind::StakeKey => "stake_key",
            OperationKind::CreateDelegationContract => "create_delegation_contract",
            OperationKind::Unstake => "unstake",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// BLS validator key with its proof-of-possession signature, both hex encoded.
///
/// The signature is produced out of band by the validator key holder over the
/// owner address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValidatorKey {
    pub public_key: String,
    pub signature: String,
}

/// One atomic unit of intent. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    kind: OperationKind,
    payload: Vec<u8>,
}

impl Operation {
    pub fn new(kind: OperationKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Plain value transfer carrying a free-form note
    pub fn mint(note: &str) -> Self {
        Self::new(OperationKind::Mint, note.as_bytes().to_vec())
    }

    /// `@<blsPubKey>@<signature>` argument pair of a stake call
    pub fn stake_key(key: &ValidatorKey) -> Self {
        Self::new(
            OperationKind::StakeKey,
            format!("@{}@{}", key.public_key, key.signature).into_bytes(),
        )
    }

    /// Full `makeNewContractFromValidatorData` call
    pub fn create_delegation_contract(delegation_cap: U256, fee_hex: &str) -> Self {
        Self::new(
            OperationKind::CreateDelegationContract,
            format!(
                "makeNewContractFromValidatorData@{}@{}",
                encode_value_hex(delegation_cap),
                fee_hex
            )
            .into_bytes(),
        )
    }

    /// `@<blsPubKey>` argument of an unStakeNodes call
    pub fn unstake(public_key: &str) -> Self {
        Self::new(OperationKind::Unstake, format!("@{}", public_key).into_bytes())
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Network-wide parameters fetched once per run and reused for every transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParameters {
    pub chain_id: String,
    pub min_gas_price: u64,
    pub version: u32,
}

/// Snapshot of an account as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    pub address: Address,
    pub nonce: u64,
    pub balance: U256,
}

/// Transaction built by the packer, not yet signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub sender: Address,
    pub receiver: Address,
    pub nonce: u64,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub data: Vec<u8>,
    pub chain_id: String,
    pub version: u32,
    /// Kind of the packed operations
    pub kind: OperationKind,
    /// Number of operations packed into `data`
    pub op_count: usize,
}

impl UnsignedTransaction {
    /// Canonical bytes handed to the signer
    pub fn signing_payload(&self) -> OrchestratorResult<Vec<u8>> {
        serde_json::to_vec(&self.to_wire(None))
            .map_err(|e| OrchestratorError::Internal(format!("Failed to serialize tx: {}", e)))
    }

    /// Gateway representation, with or without signature
    pub fn to_wire(&self, signature: Option<&[u8]>) -> WireTransaction {
        WireTransaction {
            nonce: self.nonce,
            value: self.value.to_string(),
            receiver: self.receiver.to_string(),
            sender: self.sender.to_string(),
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            data: (!self.data.is_empty()).then(|| BASE64_STANDARD.encode(&self.data)),
            chain_id: self.chain_id.clone(),
            version: self.version,
            signature: signature.map(hex::encode),
        }
    }

    pub fn data_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Unsigned transaction plus signature. Submitted at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: UnsignedTransaction,
    signature: Vec<u8>,
}

impl SignedTransaction {
    pub(crate) fn new(tx: UnsignedTransaction, signature: Vec<u8>) -> Self {
        Self { tx, signature }
    }

    pub fn transaction(&self) -> &UnsignedTransaction {
        &self.tx
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn to_wire(&self) -> WireTransaction {
        self.tx.to_wire(Some(&self.signature))
    }
}

/// JSON shape of a transaction as signed and as sent to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTransaction {
    pub nonce: u64,
    pub value: String,
    pub receiver: String,
    pub sender: String,
    pub gas_price: u64,
    pub gas_limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "chainID")]
    pub chain_id: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Raw processing status reported by the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Success,
    /// Any other status string; treated as terminal failure
    Other(String),
}

impl TxStatus {
    pub fn from_status_str(status: &str) -> Self {
        match status {
            "pending" => TxStatus::Pending,
            "success" => TxStatus::Success,
            other => TxStatus::Other(other.to_string()),
        }
    }
}

/// Terminal outcome of waiting on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Success,
    Failed,
    TimedOut,
}

impl ConfirmationStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ConfirmationStatus::Success => "success",
            ConfirmationStatus::Failed => "failed",
            ConfirmationStatus::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationResult {
    pub tx_hash: TxHash,
    pub status: ConfirmationStatus,
    /// Last raw status observed, set for failures
    pub chain_status: Option<String>,
    pub elapsed: Duration,
    pub polls: u32,
}

impl ConfirmationResult {
    pub fn is_success(&self) -> bool {
        self.status == ConfirmationStatus::Success
    }

    /// Convert a non-successful result into the error that halts the workflow
    pub fn into_error(self) -> Option<OrchestratorError> {
        match self.status {
            ConfirmationStatus::Success => None,
            ConfirmationStatus::Failed => Some(OrchestratorError::ChainFailure {
                tx_hash: self.tx_hash.to_string(),
                status: self.chain_status.unwrap_or_else(|| "unknown".to_string()),
            }),
            ConfirmationStatus::TimedOut => Some(OrchestratorError::ConfirmationTimeout {
                tx_hash: self.tx_hash.to_string(),
                waited_secs: self.elapsed.as_secs(),
            }),
        }
    }
}

/// An account's validator keys and the exact total value they must stake
#[derive(Debug, Clone)]
pub struct StakeInfo {
    pub account: Address,
    pub keys: Vec<ValidatorKey>,
    pub target: U256,
}

impl StakeInfo {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.keys.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "Account {} has no validator keys",
                self.account
            )));
        }
        if self.target.is_zero() {
            return Err(OrchestratorError::Validation(format!(
                "Account {} has a zero stake target",
                self.account
            )));
        }
        Ok(())
    }

    pub fn stake_operations(&self) -> Vec<Operation> {
        self.keys.iter().map(Operation::stake_key).collect()
    }
}

/// Minimal big-endian hex of a value; zero encodes as the empty string
pub fn encode_value_hex(value: U256) -> String {
    let bytes = value.to_be_bytes::<32>();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    hex::encode(&bytes[first..])
}

/// Parse a decimal value string such as `2500000000000000000000`
pub fn parse_value(value: &str) -> OrchestratorResult<U256> {
    U256::from_str_radix(value.trim(), 10)
        .map_err(|e| OrchestratorError::Validation(format!("Invalid value '{}': {}", value, e)))
}

/// `whole` tokens expressed in base units
pub fn tokens(whole: u64) -> U256 {
    U256::from(whole) * U256::from(ONE_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_hex_is_minimal() {
        assert_eq!(encode_value_hex(U256::ZERO), "");
        assert_eq!(encode_value_hex(U256::from(50u64)), "32");
        assert_eq!(encode_value_hex(U256::from(256u64)), "0100");
        // 2500 tokens does not fit in 64 bits
        assert_eq!(encode_value_hex(tokens(2500)), "878678326eac900000");
    }

    #[test]
    fn test_parse_value_beyond_u64() {
        let value = parse_value("20000000000000000000000").unwrap();
        assert_eq!(value, tokens(20_000));
        assert!(parse_value("12abc").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(TxStatus::from_status_str("pending"), TxStatus::Pending);
        assert_eq!(TxStatus::from_status_str("success"), TxStatus::Success);
        assert_eq!(
            TxStatus::from_status_str("fail"),
            TxStatus::Other("fail".to_string())
        );
    }

    #[test]
    fn test_signing_payload_omits_signature() {
        let tx = UnsignedTransaction {
            sender: Address::new("erd1sender"),
            receiver: Address::new("erd1receiver"),
            nonce: 7,
            value: tokens(1),
            gas_limit: 68_000,
            gas_price: 1_000_000_000,
            data: b"initial mint".to_vec(),
            chain_id: "T".to_string(),
            version: 1,
            kind: OperationKind::Mint,
            op_count: 1,
        };
        let payload: serde_json::Value =
            serde_json::from_slice(&tx.signing_payload().unwrap()).unwrap();
        assert_eq!(payload["value"], "1000000000000000000");
        assert_eq!(payload["chainID"], "T");
        assert_eq!(payload["data"], BASE64_STANDARD.encode("initial mint"));
        assert!(payload.get("signature").is_none());

        let signed = SignedTransaction::new(tx, vec![0xab, 0xcd]);
        assert_eq!(signed.to_wire().signature.as_deref(), Some("abcd"));
    }

    #[test]
    fn test_stake_info_validation() {
        let info = StakeInfo {
            account: Address::new("erd1owner"),
            keys: vec![],
            target: tokens(2500),
        };
        assert!(info.validate().is_err());
    }
}
