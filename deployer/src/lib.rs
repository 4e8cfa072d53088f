//! Bootstrap a private multi-client merge testnet.
//!
//! [execute] is the entry point: it takes a serialized [Config], generates
//! genesis for both layers, launches the execution layer, then the consensus
//! layer (pairing participant `i` of both layers), and finally forkmon. It
//! returns a serialized [Response] describing every launched participant.
//!
//! Each stage completes before the next starts. A failing stage aborts the
//! bootstrap without tearing down what was already launched. A failing
//! monitor is reported in the [Response] instead.
//!
//! # Status
//!
//! `mergenet-deployer` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use mergenet_genesis::{Fork, ForkSchedule, Preset};
use mergenet_network::{
    consensus, execution, monitor, Environment, LogLevel, Options, Participant,
    DEFAULT_CONCURRENCY,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::Path,
    time::{SystemTime, SystemTimeError, UNIX_EPOCH},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

cfg_if::cfg_if! {
    if #[cfg(feature = "docker")] {
        pub mod docker;
    }
}

/// Directory (relative to the working directory) holding generated genesis.
pub const GENESIS_DIR: &str = "genesis";

/// Directory (relative to the working directory) holding the monitor config.
pub const MONITOR_DIR: &str = "forkmon";

/// Network identifier used when none is configured.
pub const DEFAULT_NETWORK_ID: u64 = 3_151_908;

/// Validators preregistered when none are configured.
pub const DEFAULT_VALIDATORS: usize = 100;

/// Mnemonic validator and account keys are derived from when none is configured.
pub const DEFAULT_MNEMONIC: &str = "giant issue aisle success illegal bike spike question tent bar rely arctic volcano long crawl hungry vocal artwork sniff fantasy very lucky have athlete";

/// Errors that can occur while bootstrapping the network.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(#[source] serde_json::Error),
    #[error("genesis generation failed: {0}")]
    Genesis(#[from] mergenet_genesis::Error),
    #[error("execution layer failed: {0}")]
    Execution(#[source] mergenet_network::Error),
    #[error("consensus layer failed: {0}")]
    Consensus(#[source] mergenet_network::Error),
    #[error("canceled")]
    Canceled,
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("failed to serialize response: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("system clock error: {0}")]
    Clock(#[from] SystemTimeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("docker error: {0}")]
    Docker(String),
}

/// Client settings of the execution layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionLayer {
    pub client: execution::Kind,
    /// Image override (the client default if unset).
    pub image: Option<String>,
    /// Log level override (the global level if unset).
    pub log_level: Option<LogLevel>,
    pub extra_params: Vec<String>,
}

impl Default for ExecutionLayer {
    fn default() -> Self {
        Self {
            client: execution::Kind::Geth,
            image: None,
            log_level: None,
            extra_params: Vec::new(),
        }
    }
}

impl ExecutionLayer {
    /// Participant settings, falling back to `log_level` when no override is set.
    pub fn participant(&self, log_level: LogLevel) -> Participant {
        Participant {
            image: self
                .image
                .clone()
                .unwrap_or_else(|| self.client.default_image().to_string()),
            log_level: self.log_level.unwrap_or(log_level),
            extra_params: self.extra_params.clone(),
        }
    }
}

/// Client settings of the consensus layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsensusLayer {
    pub client: consensus::Kind,
    /// Image override (the client default if unset).
    pub image: Option<String>,
    /// Log level override (the global level if unset).
    pub log_level: Option<LogLevel>,
    pub extra_params: Vec<String>,
}

impl Default for ConsensusLayer {
    fn default() -> Self {
        Self {
            client: consensus::Kind::Teku,
            image: None,
            log_level: None,
            extra_params: Vec::new(),
        }
    }
}

impl ConsensusLayer {
    /// Participant settings, falling back to `log_level` when no override is set.
    pub fn participant(&self, log_level: LogLevel) -> Participant {
        Participant {
            image: self
                .image
                .clone()
                .unwrap_or_else(|| self.client.default_image().to_string()),
            log_level: self.log_level.unwrap_or(log_level),
            extra_params: self.extra_params.clone(),
        }
    }
}

/// Bootstrap parameters. Every field is optional.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Label of every launched service (random if unset).
    pub tag: String,
    /// Network and chain identifier of the execution layer.
    pub network_id: u64,
    /// Number of execution/consensus participant pairs.
    pub pairs: usize,
    /// Validators preregistered at genesis.
    pub validators: usize,
    pub seconds_per_slot: u64,
    /// Unix timestamp of genesis (now plus `genesis_delay` if unset).
    pub genesis_time: Option<u64>,
    pub genesis_delay: u64,
    pub forks: ForkSchedule,
    pub terminal_total_difficulty: u64,
    pub mnemonic: String,
    pub preset: Preset,
    /// Explicit number of validator keys owned by each pair.
    pub keys_per_pair: Option<Vec<usize>>,
    pub prefunded_accounts: usize,
    pub keystore_rounds: u32,
    /// Log level of every client without a layer override.
    pub log_level: LogLevel,
    pub execution: ExecutionLayer,
    pub consensus: ConsensusLayer,
    pub monitor: monitor::Config,
    /// Maximum followers launched at once.
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tag: uuid::Uuid::new_v4().to_string(),
            network_id: DEFAULT_NETWORK_ID,
            pairs: 1,
            validators: DEFAULT_VALIDATORS,
            seconds_per_slot: mergenet_genesis::config::DEFAULT_SECONDS_PER_SLOT,
            genesis_time: None,
            genesis_delay: 0,
            forks: ForkSchedule::new()
                .with(Fork::Altair, 1)
                .with(Fork::Merge, 2),
            terminal_total_difficulty: mergenet_genesis::config::DEFAULT_TERMINAL_TOTAL_DIFFICULTY,
            mnemonic: DEFAULT_MNEMONIC.to_string(),
            preset: Preset::Mainnet,
            keys_per_pair: None,
            prefunded_accounts: mergenet_genesis::config::DEFAULT_PREFUNDED_ACCOUNTS,
            keystore_rounds: mergenet_genesis::config::DEFAULT_KEYSTORE_ROUNDS,
            log_level: LogLevel::Info,
            execution: ExecutionLayer::default(),
            consensus: ConsensusLayer::default(),
            monitor: monitor::Config::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Config {
    /// Parse JSON parameters. Empty parameters select every default.
    pub fn parse(params: &str) -> Result<Self, Error> {
        if params.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(params).map_err(Error::InvalidConfig)
    }

    /// Genesis configuration, resolving the genesis time against `now`.
    pub fn genesis(&self, now: u64) -> mergenet_genesis::Config {
        let genesis_time = self
            .genesis_time
            .unwrap_or_else(|| now.saturating_add(self.genesis_delay));
        let mut genesis =
            mergenet_genesis::Config::new(self.network_id, genesis_time, self.mnemonic.clone());
        genesis.seconds_per_slot = self.seconds_per_slot;
        genesis.preset = self.preset;
        genesis.forks = self.forks.clone();
        genesis.terminal_total_difficulty = self.terminal_total_difficulty;
        genesis.validators = self.validators;
        genesis.pairs = self.pairs;
        genesis.keys_per_pair = self.keys_per_pair.clone();
        genesis.prefunded_accounts = self.prefunded_accounts;
        genesis.keystore_rounds = self.keystore_rounds;
        genesis
    }
}

/// Result of a successful bootstrap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub tag: String,
    pub genesis_time: u64,
    /// Execution participants, in index order.
    pub execution_participants: Vec<execution::Handle>,
    /// Consensus participants, in index order.
    pub consensus_participants: Vec<consensus::Handle>,
    /// Public URL of forkmon, if it launched.
    #[serde(rename = "forkmonUrl", skip_serializing_if = "Option::is_none")]
    pub forkmon_url: Option<String>,
    /// Why forkmon failed to launch, if it did.
    #[serde(rename = "forkmonError", skip_serializing_if = "Option::is_none")]
    pub forkmon_error: Option<String>,
}

impl Response {
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(Error::Serialize)
    }
}

/// Seconds since the unix epoch.
pub fn now() -> Result<u64, Error> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

fn stage(err: mergenet_network::Error, wrap: fn(mergenet_network::Error) -> Error) -> Error {
    match err {
        mergenet_network::Error::Canceled => Error::Canceled,
        err => wrap(err),
    }
}

/// Generate genesis into `workdir` and launch every stage on `env`.
pub async fn run<E: Environment>(
    env: &E,
    config: &Config,
    workdir: &Path,
    cancel: CancellationToken,
) -> Result<Response, Error> {
    if cancel.is_cancelled() {
        return Err(Error::Canceled);
    }
    fs::create_dir_all(workdir)?;
    let workdir = fs::canonicalize(workdir)?;
    let genesis = config.genesis(now()?);
    let genesis_dir = workdir.join(GENESIS_DIR);

    // Generate genesis
    info!(
        tag = config.tag.as_str(),
        pairs = config.pairs,
        validators = config.validators,
        genesis_time = genesis.genesis_time,
        "generating genesis"
    );
    let task = tokio::task::spawn_blocking({
        let genesis = genesis.clone();
        let dir = genesis_dir.clone();
        move || mergenet_genesis::generate(&genesis, &dir)
    });
    let artifacts = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Canceled),
        result = task => result??,
    };
    info!(path = ?genesis_dir, "generated genesis");

    let options = Options {
        concurrency: config.concurrency,
        cancel: cancel.clone(),
    };
    let jwt = genesis_dir.join(mergenet_genesis::JWT_DIR);

    // Launch execution layer
    let launcher = execution::Client::new(
        config.execution.client,
        execution::Setup {
            env: env.clone(),
            participant: config.execution.participant(config.log_level),
            genesis: artifacts.execution.clone(),
            jwt: jwt.clone(),
        },
    );
    let execution_participants = execution::build(&launcher, config.pairs, &options)
        .await
        .map_err(|err| stage(err, Error::Execution))?;
    info!(
        participants = execution_participants.len(),
        client = %config.execution.client,
        "launched execution layer"
    );
    if cancel.is_cancelled() {
        return Err(Error::Canceled);
    }

    // Launch consensus layer
    let launcher = consensus::Client::new(
        config.consensus.client,
        consensus::Setup {
            env: env.clone(),
            participant: config.consensus.participant(config.log_level),
            genesis: artifacts.consensus.clone(),
            jwt,
        },
    );
    let consensus_participants = consensus::build(
        &launcher,
        &artifacts,
        &execution_participants,
        config.pairs,
        &options,
    )
    .await
    .map_err(|err| stage(err, Error::Consensus))?;
    info!(
        participants = consensus_participants.len(),
        client = %config.consensus.client,
        "launched consensus layer"
    );
    if cancel.is_cancelled() {
        return Err(Error::Canceled);
    }

    // Launch monitor (failure is reported, not returned)
    let timing = monitor::Timing {
        genesis_time: artifacts.genesis_time,
        seconds_per_slot: artifacts.seconds_per_slot,
        slots_per_epoch: artifacts.slots_per_epoch(),
    };
    let (forkmon_url, forkmon_error) = match monitor::launch(
        env,
        &config.monitor,
        &workdir.join(MONITOR_DIR),
        &consensus_participants,
        timing,
    )
    .await
    {
        Ok(url) => (Some(url), None),
        Err(err) => {
            error!(error = %err, "failed to launch monitor");
            (None, Some(err.to_string()))
        }
    };

    Ok(Response {
        tag: config.tag.clone(),
        genesis_time: artifacts.genesis_time,
        execution_participants,
        consensus_participants,
        forkmon_url,
        forkmon_error,
    })
}

/// Bootstrap the network described by JSON `params`, returning the
/// serialized [Response].
pub async fn execute<E: Environment>(
    env: &E,
    params: &str,
    workdir: &Path,
    cancel: CancellationToken,
) -> Result<String, Error> {
    let config = Config::parse(params)?;
    run(env, &config, workdir, cancel).await?.to_json()
}
