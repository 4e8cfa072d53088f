//! Genesis configuration shared by the execution and consensus layers.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Epoch used for forks that are never scheduled.
pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;

/// Fork version of the genesis (phase0) fork.
pub const GENESIS_FORK_VERSION: [u8; 4] = [0x10, 0x00, 0x00, 0x38];

/// Default seconds per slot.
pub const DEFAULT_SECONDS_PER_SLOT: u64 = 12;

/// Default terminal total difficulty.
pub const DEFAULT_TERMINAL_TOTAL_DIFFICULTY: u64 = 60_000_000;

/// Default number of prefunded execution accounts.
pub const DEFAULT_PREFUNDED_ACCOUNTS: usize = 4;

/// Default PBKDF2 rounds used to encrypt validator keystores.
///
/// Keystores only protect throwaway testnet keys, so they are encrypted with
/// the minimum work clients accept.
pub const DEFAULT_KEYSTORE_ROUNDS: u32 = 2;

/// A named hard fork activated by epoch on the consensus layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fork {
    Altair,
    #[serde(alias = "bellatrix")]
    Merge,
}

impl Fork {
    /// All forks in activation order.
    pub const ALL: [Fork; 2] = [Fork::Altair, Fork::Merge];

    /// Version advertised once the fork is active.
    pub const fn version(&self) -> [u8; 4] {
        match self {
            Fork::Altair => [0x20, 0x00, 0x00, 0x38],
            Fork::Merge => [0x30, 0x00, 0x00, 0x38],
        }
    }
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fork::Altair => write!(f, "altair"),
            Fork::Merge => write!(f, "merge"),
        }
    }
}

/// Activation epochs of each scheduled fork.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForkSchedule(BTreeMap<Fork, u64>);

impl ForkSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `fork` at `epoch`, replacing any previous activation.
    pub fn with(mut self, fork: Fork, epoch: u64) -> Self {
        self.0.insert(fork, epoch);
        self
    }

    /// Activation epoch of `fork`, if scheduled.
    pub fn epoch(&self, fork: Fork) -> Option<u64> {
        self.0.get(&fork).copied()
    }

    /// Activation epoch of `fork`, or [FAR_FUTURE_EPOCH] if it is not scheduled.
    pub fn epoch_or_far_future(&self, fork: Fork) -> u64 {
        self.epoch(fork).unwrap_or(FAR_FUTURE_EPOCH)
    }

    /// Ensure scheduled forks form a prefix of [Fork::ALL], none activates at
    /// genesis, and activation epochs strictly increase.
    pub fn validate(&self) -> Result<(), Error> {
        let mut previous: Option<u64> = None;
        let mut gap = false;
        for fork in Fork::ALL {
            let Some(epoch) = self.epoch(fork) else {
                gap = true;
                continue;
            };
            if gap {
                return Err(Error::ForkGap(fork));
            }
            if epoch == 0 {
                return Err(Error::ForkAtGenesis(fork));
            }
            if let Some(previous) = previous {
                if epoch <= previous {
                    return Err(Error::ForkNotIncreasing {
                        fork,
                        epoch,
                        previous,
                    });
                }
            }
            previous = Some(epoch);
        }
        Ok(())
    }
}

/// Consensus preset, controlling epoch length and state vector sizes (see [crate::types::StateSpec]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Mainnet,
    Minimal,
}

impl Preset {
    pub const fn name(&self) -> &'static str {
        match self {
            Preset::Mainnet => "mainnet",
            Preset::Minimal => "minimal",
        }
    }

    pub const fn slots_per_epoch(&self) -> u64 {
        match self {
            Preset::Mainnet => 32,
            Preset::Minimal => 8,
        }
    }
}

/// Everything required to derive genesis for both layers.
#[derive(Clone, Debug)]
pub struct Config {
    /// Network and chain identifier of the execution layer.
    pub network_id: u64,
    /// Unix timestamp of genesis on both layers.
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
    pub preset: Preset,
    pub forks: ForkSchedule,
    /// Total difficulty at which the execution layer stops accepting PoW blocks.
    pub terminal_total_difficulty: u64,
    /// BIP-39 mnemonic all validator and account keys are derived from.
    pub mnemonic: String,
    /// Number of validators active at genesis.
    pub validators: usize,
    /// Number of execution/consensus participant pairs.
    pub pairs: usize,
    /// Explicit number of validator keys owned by each pair (even split if unset).
    pub keys_per_pair: Option<Vec<usize>>,
    pub prefunded_accounts: usize,
    pub keystore_rounds: u32,
}

impl Config {
    /// Create a configuration with default timing, difficulty and key settings.
    pub fn new(network_id: u64, genesis_time: u64, mnemonic: impl Into<String>) -> Self {
        Self {
            network_id,
            genesis_time,
            seconds_per_slot: DEFAULT_SECONDS_PER_SLOT,
            preset: Preset::default(),
            forks: ForkSchedule::new()
                .with(Fork::Altair, 1)
                .with(Fork::Merge, 2),
            terminal_total_difficulty: DEFAULT_TERMINAL_TOTAL_DIFFICULTY,
            mnemonic: mnemonic.into(),
            validators: 1,
            pairs: 1,
            keys_per_pair: None,
            prefunded_accounts: DEFAULT_PREFUNDED_ACCOUNTS,
            keystore_rounds: DEFAULT_KEYSTORE_ROUNDS,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.seconds_per_slot == 0 {
            return Err(Error::InvalidConfig("seconds per slot must be positive"));
        }
        if self.pairs == 0 {
            return Err(Error::InvalidConfig("at least one pair is required"));
        }
        if self.validators < self.pairs {
            return Err(Error::InvalidConfig(
                "every pair must own at least one validator",
            ));
        }
        if self.keystore_rounds == 0 {
            return Err(Error::InvalidConfig("keystore rounds must be positive"));
        }
        self.forks.validate()
    }

    /// Seconds in one epoch.
    pub fn seconds_per_epoch(&self) -> u64 {
        self.seconds_per_slot
            .saturating_mul(self.preset.slots_per_epoch())
    }

    /// Unix time at which `epoch` begins (saturating).
    pub fn epoch_start(&self, epoch: u64) -> u64 {
        self.genesis_time
            .saturating_add(epoch.saturating_mul(self.seconds_per_epoch()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use test_case::test_case;

    #[test_traced]
    fn test_default_schedule_is_valid() {
        let config = Config::new(3151908, 0, "");
        assert!(config.forks.validate().is_ok());
        assert_eq!(config.forks.epoch(Fork::Altair), Some(1));
        assert_eq!(config.forks.epoch(Fork::Merge), Some(2));
    }

    #[test_case(ForkSchedule::new() ; "empty")]
    #[test_case(ForkSchedule::new().with(Fork::Altair, 3) ; "altair only")]
    #[test_case(ForkSchedule::new().with(Fork::Altair, 1).with(Fork::Merge, 10) ; "both")]
    fn test_valid_schedules(schedule: ForkSchedule) {
        assert!(schedule.validate().is_ok());
    }

    #[test_traced]
    fn test_fork_at_genesis_rejected() {
        let schedule = ForkSchedule::new().with(Fork::Altair, 0);
        assert!(matches!(
            schedule.validate(),
            Err(Error::ForkAtGenesis(Fork::Altair))
        ));
    }

    #[test_case(2, 2 ; "equal")]
    #[test_case(3, 2 ; "decreasing")]
    fn test_non_increasing_rejected(altair: u64, merge: u64) {
        let schedule = ForkSchedule::new()
            .with(Fork::Altair, altair)
            .with(Fork::Merge, merge);
        match schedule.validate() {
            Err(Error::ForkNotIncreasing {
                fork,
                epoch,
                previous,
            }) => {
                assert_eq!(fork, Fork::Merge);
                assert_eq!(epoch, merge);
                assert_eq!(previous, altair);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test_traced]
    fn test_gap_rejected() {
        let schedule = ForkSchedule::new().with(Fork::Merge, 2);
        assert!(matches!(schedule.validate(), Err(Error::ForkGap(Fork::Merge))));
    }

    #[test_traced]
    fn test_schedule_from_json() {
        let schedule: ForkSchedule = serde_json::from_str(r#"{"bellatrix": 4, "altair": 2}"#)
            .expect("failed to parse schedule");
        assert_eq!(schedule.epoch(Fork::Merge), Some(4));
        assert_eq!(schedule.epoch(Fork::Altair), Some(2));
        assert_eq!(schedule.epoch_or_far_future(Fork::Merge), 4);
        assert_eq!(
            ForkSchedule::new().epoch_or_far_future(Fork::Merge),
            FAR_FUTURE_EPOCH
        );
    }

    #[test_traced]
    fn test_invalid_counts() {
        let mut config = Config::new(1, 0, "");
        config.pairs = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::new(1, 0, "");
        config.pairs = 3;
        config.validators = 2;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::new(1, 0, "");
        config.seconds_per_slot = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test_traced]
    fn test_epoch_start() {
        let mut config = Config::new(1, 1_000, "");
        assert_eq!(config.epoch_start(2), 1_000 + 2 * 32 * 12);
        config.preset = Preset::Minimal;
        config.seconds_per_slot = 6;
        assert_eq!(config.epoch_start(1), 1_000 + 8 * 6);
    }
}
