//! Generate coherent execution and consensus genesis for a private merge testnet.
//!
//! A single [Config] drives both layers: the execution genesis embeds the
//! network id, genesis time and terminal total difficulty, while the consensus
//! genesis embeds the same genesis time, slot duration and the fork schedule.
//! Validator keys are derived from the configured mnemonic and split between
//! participant pairs, each pair receiving its own keystore directory.
//!
//! # Status
//!
//! `mergenet-genesis` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use sha2::{Digest, Sha256};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, warn};

pub mod accounts;
pub mod config;
pub use config::{Config, Fork, ForkSchedule, Preset};
pub mod consensus;
pub use consensus::ConsensusGenesis;
pub mod execution;
pub use execution::ExecutionGenesis;
pub mod keys;
pub mod keystore;
pub use keystore::Keystore;
pub mod mnemonic;
pub mod timing;
pub use timing::MergeEstimate;
pub mod types;

/// Directory (relative to the output) holding execution genesis.
pub const EXECUTION_DIR: &str = "el";

/// Directory (relative to the output) holding consensus genesis.
pub const CONSENSUS_DIR: &str = "cl";

/// Directory (relative to the output) holding per-pair keystores.
pub const KEYSTORE_DIR: &str = "keystores";

/// Directory (relative to the output) holding the engine API secret.
pub const JWT_DIR: &str = "jwt";

/// Engine API secret file name.
pub const JWT_FILE: &str = "jwtsecret";

/// Errors that can occur while generating genesis.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("fork {0} cannot activate at genesis")]
    ForkAtGenesis(Fork),
    #[error("fork {fork} at epoch {epoch} does not follow previous fork at epoch {previous}")]
    ForkNotIncreasing { fork: Fork, epoch: u64, previous: u64 },
    #[error("fork {0} scheduled without its predecessor")]
    ForkGap(Fork),
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("key derivation failed: {0}")]
    Derivation(String),
    #[error("invalid partition: {0}")]
    Partition(String),
    #[error("failed to render json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to render yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Genesis written to disk, shared read-only by every later stage.
#[derive(Clone, Debug)]
pub struct Artifacts {
    pub execution: ExecutionGenesis,
    pub consensus: ConsensusGenesis,
    /// Keystores indexed by pair.
    pub keystores: Vec<Keystore>,
    /// Engine API secret shared by every pair.
    pub jwt: PathBuf,
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
}

impl Artifacts {
    pub fn slots_per_epoch(&self) -> u64 {
        self.consensus.slots_per_epoch
    }
}

fn write_jwt(seed: &[u8], dir: &Path) -> Result<PathBuf, Error> {
    fs::create_dir_all(dir)?;
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(b"jwt");
    let secret: [u8; 32] = hasher.finalize().into();
    let path = dir.join(JWT_FILE);
    fs::write(&path, format!("0x{}", commonware_utils::hex(&secret)))?;
    Ok(path)
}

/// Generate genesis for both layers and validator keystores into `dir`.
///
/// Fails before writing anything if `config` is invalid. Output is
/// deterministic in `config`.
pub fn generate(config: &Config, dir: &Path) -> Result<Artifacts, Error> {
    config.validate()?;
    let ranges = keys::partition(
        config.validators,
        config.pairs,
        config.keys_per_pair.as_deref(),
    )?;
    let seed = mnemonic::seed(&config.mnemonic)?;
    let validators = keys::derive(seed.as_ref(), config.validators)?;
    let accounts = accounts::derive(&config.mnemonic, config.prefunded_accounts)?;

    let execution = execution::write(config, &accounts, &dir.join(EXECUTION_DIR))?;
    let consensus = consensus::write(config, &validators, &dir.join(CONSENSUS_DIR))?;
    let keystores = keystore::write(
        seed.as_ref(),
        &validators,
        &ranges,
        config.keystore_rounds,
        &dir.join(KEYSTORE_DIR),
    )?;
    let jwt = write_jwt(seed.as_ref(), &dir.join(JWT_DIR))?;

    // Assume one block per slot at the minimum difficulty
    if let Some(estimate) = MergeEstimate::new(
        config,
        config.seconds_per_slot,
        execution::GENESIS_DIFFICULTY,
    ) {
        if estimate.early() {
            warn!(
                terminal_block = estimate.terminal_block,
                terminal_time = estimate.terminal_time,
                merge_epoch_start = estimate.merge_epoch_start,
                "terminal total difficulty expected before merge epoch"
            );
        } else {
            info!(
                terminal_block = estimate.terminal_block,
                lag = estimate.lag(),
                "estimated terminal block"
            );
        }
    }

    info!(
        validators = config.validators,
        pairs = config.pairs,
        genesis_time = config.genesis_time,
        path = ?dir,
        "generated genesis"
    );
    Ok(Artifacts {
        execution,
        consensus,
        keystores,
        jwt,
        genesis_time: config.genesis_time,
        seconds_per_slot: config.seconds_per_slot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use std::collections::BTreeMap;
    use test_case::test_case;

    const MNEMONIC: &str = "giant issue aisle success illegal bike spike question tent bar rely arctic volcano long crawl hungry vocal artwork sniff fantasy very lucky have athlete";

    fn config(validators: usize, pairs: usize) -> Config {
        let mut config = Config::new(3151908, 1_650_000_000, MNEMONIC);
        config.preset = Preset::Minimal;
        config.validators = validators;
        config.pairs = pairs;
        config
    }

    fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(next) = pending.pop() {
            for entry in fs::read_dir(&next).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let relative = path.strip_prefix(dir).unwrap().to_path_buf();
                    files.insert(relative, fs::read(&path).unwrap());
                }
            }
        }
        files
    }

    #[test_traced]
    fn test_generate_partitions_keystores() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = generate(&config(10, 3), dir.path()).unwrap();

        assert_eq!(artifacts.keystores.len(), 3);
        let mut seen = Vec::new();
        for (index, keystore) in artifacts.keystores.iter().enumerate() {
            assert_eq!(keystore.index, index);
            assert!(!keystore.public_keys.is_empty());
            seen.extend(keystore.public_keys.iter().cloned());
        }
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total);
        assert_eq!(total, 10);

        assert!(artifacts.execution.geth.exists());
        assert!(artifacts.execution.besu.exists());
        assert!(artifacts.execution.nethermind.exists());
        assert!(artifacts.consensus.state.exists());
        assert_eq!(artifacts.slots_per_epoch(), 8);
        assert_eq!(fs::read_to_string(&artifacts.jwt).unwrap().len(), 66);
    }

    #[test_traced]
    fn test_generate_idempotent() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let a = generate(&config(6, 2), first.path()).unwrap();
        let b = generate(&config(6, 2), second.path()).unwrap();

        assert_eq!(snapshot(first.path()), snapshot(second.path()));
        assert_eq!(
            a.consensus.genesis_validators_root,
            b.consensus.genesis_validators_root
        );
        for (a, b) in a.keystores.iter().zip(b.keystores.iter()) {
            assert_eq!(a.public_keys, b.public_keys);
        }

        // Regenerating in place rewrites identical bytes
        let before = snapshot(first.path());
        generate(&config(6, 2), first.path()).unwrap();
        assert_eq!(before, snapshot(first.path()));
    }

    #[test_traced]
    fn test_explicit_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(5, 2);
        config.keys_per_pair = Some(vec![1, 4]);
        let artifacts = generate(&config, dir.path()).unwrap();
        assert_eq!(artifacts.keystores[0].validators, 0..1);
        assert_eq!(artifacts.keystores[1].validators, 1..5);
    }

    #[test_traced]
    fn test_invalid_schedule_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(4, 1);
        config.forks = ForkSchedule::new()
            .with(Fork::Altair, 2)
            .with(Fork::Merge, 2);
        assert!(matches!(
            generate(&config, dir.path()),
            Err(Error::ForkNotIncreasing { .. })
        ));
        assert!(snapshot(dir.path()).is_empty());
    }

    #[test_case("too short" ; "word count")]
    #[test_case("zzz zzz zzz zzz zzz zzz zzz zzz zzz zzz zzz zzz" ; "unknown words")]
    #[test_case("abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon" ; "bad checksum")]
    fn test_invalid_mnemonic_writes_nothing(mnemonic: &str) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(4, 1);
        config.mnemonic = mnemonic.into();
        assert!(matches!(
            generate(&config, dir.path()),
            Err(Error::InvalidMnemonic(_))
        ));
        assert!(snapshot(dir.path()).is_empty());
    }
}
