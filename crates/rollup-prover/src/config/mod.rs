use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::producer::ProofType;

/// Environment variable holding the hex encoded prover signing key.
pub const PRIVATE_KEY_ENV: &str = "PROVER_PRIVATE_KEY";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for outbound RPC connections.
    pub rpc: RpcConfig,

    /// Address of the inbox contract on L1.
    pub inbox_address: Address,

    /// Address proofs are submitted from.
    pub prover_address: Address,

    /// Batch proving backend used by the sgx and zk producers.
    pub raiko: RaikoConfig,

    /// The producer tree used to prove proposals.
    pub producer: ProducerSpec,

    /// Verifier contract per proof type.
    pub verifiers: BTreeMap<ProofType, Address>,

    pub buffer: BufferConfig,

    pub submitter: SubmitterConfig,

    pub event_loop: EventLoopConfig,

    /// Seconds after a proposal during which only its designated prover may prove it.
    pub proving_window_secs: u64,

    /// Prove proposals designated to other provers once their window expires.
    pub prove_unassigned: bool,

    /// Lowest proposal id this prover cares about.
    pub start_proposal_id: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// RPC endpoint of the settlement layer node.
    pub l1_rpc: String,

    /// RPC endpoint of the rollup execution node.
    pub l2_rpc: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            l1_rpc: "http://localhost:8545".into(),
            l2_rpc: "http://localhost:28545".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RaikoConfig {
    pub endpoint: String,
    /// Optional bearer token, sent base64 encoded.
    pub jwt: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RaikoConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".into(),
            jwt: None,
            request_timeout_secs: 60,
        }
    }
}

impl RaikoConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    Dummy,
    Optimistic,
    #[default]
    Sgx,
    Zk,
    Composite,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanIn {
    #[default]
    All,
    FirstSuccess,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSpec {
    pub kind: ProducerKind,
    pub proof_type: ProofType,
    /// Only used by composite producers.
    pub fan_in: FanIn,
    pub children: Vec<ProducerSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Proofs per aggregated batch.
    pub max_length: usize,
    /// Aggregate a non-full buffer once its oldest proof is this old. Zero
    /// disables the time trigger and the buffer monitors.
    pub forced_interval_secs: u64,
    pub monitor_tick_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_length: 8,
            forced_interval_secs: 600,
            monitor_tick_ms: 1000,
        }
    }
}

impl BufferConfig {
    pub fn forced_interval(&self) -> Duration {
        Duration::from_secs(self.forced_interval_secs)
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_millis(self.monitor_tick_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitterConfig {
    pub proof_polling_interval_secs: u64,
    /// Give up on a proof still in progress after this long.
    pub proof_timeout_secs: u64,
    pub backoff_interval_secs: u64,
    pub backoff_max_retries: u32,
    /// Fixed gas limit for proof transactions. Zero lets the node estimate.
    pub gas_limit: u64,
    pub tx_max_retries: u32,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            proof_polling_interval_secs: 10,
            proof_timeout_secs: 3 * 60 * 60,
            backoff_interval_secs: 12,
            backoff_max_retries: 5,
            gas_limit: 0,
            tx_max_retries: 3,
        }
    }
}

impl SubmitterConfig {
    pub fn proof_polling_interval(&self) -> Duration {
        Duration::from_secs(self.proof_polling_interval_secs)
    }

    pub fn proof_timeout(&self) -> Duration {
        Duration::from_secs(self.proof_timeout_secs)
    }

    pub fn backoff_interval(&self) -> Duration {
        Duration::from_secs(self.backoff_interval_secs)
    }

    pub fn gas_limit(&self) -> Option<u64> {
        (self.gas_limit > 0).then_some(self.gas_limit)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Capacity of every internal channel.
    pub channel_capacity: usize,
    /// Wakes the inbox watcher and re-checks every buffer.
    pub force_tick_secs: u64,
    pub watcher_poll_secs: u64,
    /// Most L1 blocks fetched per log query.
    pub watcher_block_range: u64,
    /// First L1 block scanned for inbox events.
    pub start_block: u64,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            force_tick_secs: 15,
            watcher_poll_secs: 12,
            watcher_block_range: 1000,
            start_block: 0,
        }
    }
}

impl EventLoopConfig {
    pub fn force_tick(&self) -> Duration {
        Duration::from_secs(self.force_tick_secs)
    }

    pub fn watcher_poll(&self) -> Duration {
        Duration::from_secs(self.watcher_poll_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            inbox_address: Address::ZERO,
            prover_address: Address::ZERO,
            raiko: RaikoConfig::default(),
            producer: ProducerSpec::default(),
            verifiers: BTreeMap::new(),
            buffer: BufferConfig::default(),
            submitter: SubmitterConfig::default(),
            event_loop: EventLoopConfig::default(),
            proving_window_secs: 4 * 60 * 60,
            prove_unassigned: false,
            start_proposal_id: 1,
        }
    }
}

impl Config {
    /// The default service home directory.
    pub const APP_HOME: &str = ".rollup-prover";
    /// The default configuration directory.
    pub const CONFIG_DIR: &str = "config";
    /// The default configuration file in YAML format.
    pub const CONFIG_FILE: &str = "config.yaml";

    fn home_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow!("cannot find home directory"))?
            .join(Self::APP_HOME))
    }

    /// Initializes the local configuration directory and writes the default config if missing.
    pub fn init() -> Result<()> {
        Self::init_at(&Self::home_dir()?)
    }

    pub fn init_at(home_dir: &Path) -> Result<()> {
        let config_dir = home_dir.join(Self::CONFIG_DIR);
        fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join(Self::CONFIG_FILE);
        if !config_path.exists() {
            info!("creating default config at {config_path:?}");
            let yaml = serde_yaml::to_string(&Config::default())?;
            fs::write(&config_path, yaml)?;
        } else {
            info!("config file already exists at {config_path:?}");
        }

        Ok(())
    }

    /// Returns the default application config path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join(Self::CONFIG_DIR).join(Self::CONFIG_FILE))
    }

    /// Loads the application config from the service home directory.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("config file not found at {}", config_path.display());
        }

        info!("reading config file at {}", config_path.display());
        let config_yaml = fs::read_to_string(config_path).context("Failed to read config file from path")?;
        let config: Config = serde_yaml::from_str(&config_yaml)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer.max_length == 0 {
            bail!("buffer.max_length must be greater than zero");
        }
        if self.event_loop.channel_capacity == 0 {
            bail!("event_loop.channel_capacity must be greater than zero");
        }
        if self.start_proposal_id == 0 {
            bail!("start_proposal_id must be at least 1");
        }
        if self.submitter.proof_polling_interval_secs == 0 {
            bail!("submitter.proof_polling_interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Reads the prover signing key from the environment.
    pub fn private_key() -> Result<String> {
        std::env::var(PRIVATE_KEY_ENV).with_context(|| format!("{PRIVATE_KEY_ENV} environment variable not set"))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let home = TempDir::new().unwrap();
        Config::init_at(home.path()).unwrap();

        let path = home.path().join(Config::CONFIG_DIR).join(Config::CONFIG_FILE);
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.buffer.max_length, 8);
        assert_eq!(config.event_loop.force_tick(), Duration::from_secs(15));
        assert_eq!(config.producer.kind, ProducerKind::Sgx);

        // a second init keeps the existing file
        fs::write(&path, "prove_unassigned: true\n").unwrap();
        Config::init_at(home.path()).unwrap();
        assert!(Config::load_from(&path).unwrap().prove_unassigned);
    }

    #[test]
    fn test_partial_yaml_uses_section_defaults() {
        let yaml = r#"
inbox_address: "0x00000000000000000000000000000000000000aa"
producer:
  kind: composite
  proof_type: pivot
  fan_in: first_success
  children:
    - kind: sgx
      proof_type: sgx
    - kind: zk
      proof_type: zk_any
verifiers:
  sgx: "0x0000000000000000000000000000000000000001"
  risc0: "0x0000000000000000000000000000000000000002"
buffer:
  max_length: 4
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.inbox_address, Address::with_last_byte(0xaa));
        assert_eq!(config.producer.fan_in, FanIn::FirstSuccess);
        assert_eq!(config.producer.children[1].proof_type, ProofType::ZkAny);
        assert_eq!(config.verifiers[&ProofType::Risc0], Address::with_last_byte(2));
        assert_eq!(config.buffer.max_length, 4);
        assert_eq!(config.buffer.forced_interval_secs, 600);
        assert_eq!(config.submitter.gas_limit(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut config = Config::default();
        config.buffer.max_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let home = TempDir::new().unwrap();
        assert!(Config::load_from(&home.path().join("missing.yaml")).is_err());
    }
}
