//! Configuration management for the stake orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::coordination::stage::{StakeParams, DEFAULT_DELEGATION_FEE};
use crate::coordination::SequencerSettings;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::tx::{Apportionment, GasModel, LimitsConfig};
use crate::types::{parse_value, Address, StakeInfo, ValidatorKey};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "STAKE_ORCHESTRATOR_CONFIG";

/// Validator system contract
const VALIDATOR_SC: &str = "erd1qqqqqqqqqqqqqqqpqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqplllst77y4l";

/// Delegation manager system contract
const DELEGATION_MANAGER: &str = "erd1qqqqqqqqqqqqqqqpqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqylllslmq6y6";

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub gas: GasModel,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub sponsor: Option<WalletConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    pub unstake: Option<UnstakeConfig>,
    pub distribution: Option<DistributionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Status poll interval, normally the block time
    pub poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub submit_timeout_secs: u64,
    /// Run independent accounts in parallel
    pub concurrent: bool,
    pub log_format: LogFormat,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 6_000,
            confirmation_timeout_secs: 120,
            submit_timeout_secs: 30,
            concurrent: false,
            log_format: LogFormat::Pretty,
        }
    }
}

impl OrchestratorConfig {
    pub fn sequencer_settings(&self) -> SequencerSettings {
        SequencerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub urls: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    pub validator_sc: String,
    pub delegation_manager: String,
    /// Hex encoded delegation service fee
    pub delegation_fee: String,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            validator_sc: VALIDATOR_SC.to_string(),
            delegation_manager: DELEGATION_MANAGER.to_string(),
            delegation_fee: DEFAULT_DELEGATION_FEE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    pub keystore_path: Option<String>,
    pub private_key_env: Option<String>,
}

impl WalletConfig {
    fn is_configured(&self) -> bool {
        self.keystore_path.is_some() || self.private_key_env.is_some()
    }
}

/// An account whose validator keys are staked
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    #[serde(flatten)]
    pub wallet: WalletConfig,
    /// Total value to stake, in base units
    pub stake_target: String,
    /// Fixed value per key; the last stake transaction absorbs the rest
    pub stake_per_key: Option<String>,
    pub keys: Vec<ValidatorKey>,
    #[serde(default = "default_true")]
    pub create_delegation_contract: bool,
}

fn default_true() -> bool {
    true
}

impl AccountConfig {
    pub fn stake_info(&self, account: Address) -> OrchestratorResult<StakeInfo> {
        let info = StakeInfo {
            account,
            keys: self.keys.clone(),
            target: parse_value(&self.stake_target)?,
        };
        info.validate()?;
        Ok(info)
    }

    pub fn apportionment(&self) -> OrchestratorResult<Apportionment> {
        match &self.stake_per_key {
            Some(value) => Ok(Apportionment::PerOperation(parse_value(value)?)),
            None => Ok(Apportionment::Proportional),
        }
    }
}

/// Keys to unstake from a delegation contract
#[derive(Debug, Clone, Deserialize)]
pub struct UnstakeConfig {
    #[serde(flatten)]
    pub wallet: WalletConfig,
    pub delegation_contract: String,
    pub keys: Vec<String>,
}

/// Fixed transfers from the sponsor to a list of wallets
#[derive(Debug, Clone, Deserialize)]
pub struct DistributionConfig {
    /// Value per wallet, in base units
    pub value: String,
    /// Transfer note; `{index}` is replaced by the wallet's position
    #[serde(default = "default_note")]
    pub note: String,
    pub wallets: Vec<String>,
}

fn default_note() -> String {
    "#{index}".to_string()
}

/// Workflow selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    Stake,
    Unstake,
    Distribute,
}

impl Settings {
    /// Load settings from the file named by `STAKE_ORCHESTRATOR_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        toml::from_str(&config_str).with_context(|| "Failed to parse configuration")
    }

    /// Validate configuration for the selected workflow
    pub fn validate(&self, workflow: Workflow) -> Result<()> {
        if self.gateway.urls.iter().all(|u| u.trim().is_empty()) {
            anyhow::bail!("At least one gateway URL must be configured");
        }
        if self.orchestrator.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be non-zero");
        }
        if self.orchestrator.confirmation_timeout_secs == 0
            || self.orchestrator.submit_timeout_secs == 0
        {
            anyhow::bail!("Timeouts must be non-zero");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be non-zero");
        }

        self.gas.validate()?;
        self.limits.validate()?;

        match workflow {
            Workflow::Stake => {
                self.require_sponsor()?;
                if self.accounts.is_empty() {
                    anyhow::bail!("Stake workflow needs at least one [[accounts]] entry");
                }
                hex::decode(&self.contracts.delegation_fee)
                    .with_context(|| "delegation_fee must be hex")?;
                for (index, account) in self.accounts.iter().enumerate() {
                    if !account.wallet.is_configured() {
                        anyhow::bail!("Account {} has no wallet configured", index);
                    }
                    let target = parse_value(&account.stake_target)
                        .with_context(|| format!("Account {} stake_target", index))?;
                    if target.is_zero() {
                        anyhow::bail!("Account {} has a zero stake target", index);
                    }
                    if account.keys.is_empty() {
                        anyhow::bail!("Account {} has no validator keys", index);
                    }
                    account
                        .apportionment()
                        .with_context(|| format!("Account {} stake_per_key", index))?;
                }
            }
            Workflow::Unstake => {
                let unstake = self
                    .unstake
                    .as_ref()
                    .context("Unstake workflow needs an [unstake] section")?;
                if !unstake.wallet.is_configured() {
                    anyhow::bail!("[unstake] has no wallet configured");
                }
                if unstake.delegation_contract.is_empty() {
                    anyhow::bail!("[unstake] has no delegation_contract");
                }
                if unstake.keys.is_empty() {
                    anyhow::bail!("[unstake] has no keys");
                }
            }
            Workflow::Distribute => {
                self.require_sponsor()?;
                let distribution = self
                    .distribution
                    .as_ref()
                    .context("Distribute workflow needs a [distribution] section")?;
                if distribution.wallets.is_empty() {
                    anyhow::bail!("[distribution] has no wallets");
                }
                parse_value(&distribution.value)
                    .with_context(|| "[distribution] value")?;
            }
        }

        Ok(())
    }

    fn require_sponsor(&self) -> Result<&WalletConfig> {
        match &self.sponsor {
            Some(sponsor) if sponsor.is_configured() => Ok(sponsor),
            _ => anyhow::bail!("A [sponsor] wallet must be configured"),
        }
    }

    /// Receivers and value rules for one account's stake workflow
    pub fn stake_params(&self, account: &AccountConfig) -> OrchestratorResult<StakeParams> {
        if self.contracts.validator_sc.is_empty() || self.contracts.delegation_manager.is_empty() {
            return Err(OrchestratorError::Config(
                "System contract addresses must not be empty".to_string(),
            ));
        }

        Ok(StakeParams {
            validator_sc: Address::new(self.contracts.validator_sc.clone()),
            delegation_manager: Address::new(self.contracts.delegation_manager.clone()),
            delegation_fee: self.contracts.delegation_fee.clone(),
            apportionment: account.apportionment()?,
            create_delegation_contract: account.create_delegation_contract,
        })
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
