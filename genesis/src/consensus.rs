//! Consensus layer genesis: chain config and the phase0 genesis state.

use crate::{
    config::{Config, Fork, Preset, FAR_FUTURE_EPOCH, GENESIS_FORK_VERSION},
    keys::Validator,
    types::{
        self, BeaconBlockBody, BeaconBlockHeader, BeaconState, Checkpoint, DepositContractLimit,
        DepositData, DepositMessage, Eth1Data, ForkData, MainnetSpec, MinimalSpec,
        PublicKey, Signature, SigningData, StateSpec, ValidatorRegistryLimit,
    },
    Error,
};
use commonware_utils::hex;
use serde::Serialize;
use ssz::Encode;
use ssz_types::{BitVector, FixedVector, VariableList};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;
use tree_hash::{Hash256, TreeHash};

/// Chain configuration file name.
pub const CONFIG_FILE: &str = "config.yaml";

/// SSZ encoded genesis state file name.
pub const STATE_FILE: &str = "genesis.ssz";

/// Block at which the deposit contract was deployed.
pub const DEPLOY_BLOCK_FILE: &str = "deploy_block.txt";

/// Alias of [DEPLOY_BLOCK_FILE] read by some clients.
pub const DEPOSIT_CONTRACT_BLOCK_FILE: &str = "deposit_contract_block.txt";

/// Address of the deposit contract.
///
/// Every validator is already in the genesis state, so no contract code is
/// deployed at this address.
pub const DEPOSIT_CONTRACT_ADDRESS: &str = "0x4242424242424242424242424242424242424242";

/// Execution block hash recorded as the genesis eth1 block.
pub const ETH1_BLOCK_HASH: Hash256 = Hash256::new([0x42; 32]);

/// Balance of each genesis validator.
pub const MAX_EFFECTIVE_BALANCE: u64 = 32_000_000_000;

const DOMAIN_DEPOSIT: [u8; 4] = [0x03, 0x00, 0x00, 0x00];
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Paths and summary of the written consensus genesis.
#[derive(Clone, Debug)]
pub struct ConsensusGenesis {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub state: PathBuf,
    /// Commitment to the genesis validator set.
    pub genesis_validators_root: [u8; 32],
    pub slots_per_epoch: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct ChainConfig {
    preset_base: &'static str,
    config_name: &'static str,
    terminal_total_difficulty: u64,
    terminal_block_hash: String,
    terminal_block_hash_activation_epoch: u64,
    min_genesis_active_validator_count: usize,
    min_genesis_time: u64,
    genesis_fork_version: String,
    genesis_delay: u64,
    altair_fork_version: String,
    altair_fork_epoch: u64,
    bellatrix_fork_version: String,
    bellatrix_fork_epoch: u64,
    seconds_per_slot: u64,
    seconds_per_eth1_block: u64,
    min_validator_withdrawability_delay: u64,
    shard_committee_period: u64,
    eth1_follow_distance: u64,
    inactivity_score_bias: u64,
    inactivity_score_recovery_rate: u64,
    ejection_balance: u64,
    min_per_epoch_churn_limit: u64,
    churn_limit_quotient: u64,
    proposer_score_boost: u64,
    deposit_chain_id: u64,
    deposit_network_id: u64,
    deposit_contract_address: &'static str,
}

fn version(version: [u8; 4]) -> String {
    format!("0x{}", hex(&version))
}

fn chain_config(config: &Config) -> ChainConfig {
    ChainConfig {
        preset_base: config.preset.name(),
        config_name: "mergenet",
        terminal_total_difficulty: config.terminal_total_difficulty,
        terminal_block_hash: format!("0x{}", hex(&[0u8; 32])),
        terminal_block_hash_activation_epoch: FAR_FUTURE_EPOCH,
        min_genesis_active_validator_count: config.validators,
        min_genesis_time: config.genesis_time,
        genesis_fork_version: version(GENESIS_FORK_VERSION),
        genesis_delay: 0,
        altair_fork_version: version(Fork::Altair.version()),
        altair_fork_epoch: config.forks.epoch_or_far_future(Fork::Altair),
        bellatrix_fork_version: version(Fork::Merge.version()),
        bellatrix_fork_epoch: config.forks.epoch_or_far_future(Fork::Merge),
        seconds_per_slot: config.seconds_per_slot,
        seconds_per_eth1_block: config.seconds_per_slot,
        min_validator_withdrawability_delay: 256,
        shard_committee_period: 256,
        eth1_follow_distance: 12,
        inactivity_score_bias: 4,
        inactivity_score_recovery_rate: 16,
        ejection_balance: 16_000_000_000,
        min_per_epoch_churn_limit: 4,
        churn_limit_quotient: 65536,
        proposer_score_boost: 40,
        deposit_chain_id: config.network_id,
        deposit_network_id: config.network_id,
        deposit_contract_address: DEPOSIT_CONTRACT_ADDRESS,
    }
}

fn registry(
    validators: &[Validator],
) -> Result<VariableList<types::Validator, ValidatorRegistryLimit>, Error> {
    let registry = validators
        .iter()
        .map(|validator| types::Validator {
            pubkey: PublicKey::from(validator.public.to_vec()),
            withdrawal_credentials: Hash256::from(validator.withdrawal_credentials),
            effective_balance: MAX_EFFECTIVE_BALANCE,
            slashed: false,
            activation_eligibility_epoch: 0,
            activation_epoch: 0,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
        })
        .collect();
    VariableList::new(registry).map_err(|_| Error::InvalidConfig("too many validators"))
}

/// Root of the genesis validator registry.
pub fn genesis_validators_root(validators: &[Validator]) -> Result<Hash256, Error> {
    Ok(registry(validators)?.tree_hash_root())
}

fn deposit_domain() -> Hash256 {
    // Deposits are valid across forks, so the domain never commits to a
    // validators root.
    let fork_data = ForkData {
        current_version: GENESIS_FORK_VERSION,
        genesis_validators_root: Hash256::ZERO,
    }
    .tree_hash_root();
    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(&DOMAIN_DEPOSIT);
    domain[4..].copy_from_slice(&fork_data[..28]);
    Hash256::from(domain)
}

/// Signed deposit of `validator`.
fn deposit_data(validator: &Validator, domain: Hash256) -> DepositData {
    let pubkey = PublicKey::from(validator.public.to_vec());
    let withdrawal_credentials = Hash256::from(validator.withdrawal_credentials);
    let message = DepositMessage {
        pubkey: pubkey.clone(),
        withdrawal_credentials,
        amount: MAX_EFFECTIVE_BALANCE,
    };
    let signing_root = SigningData {
        object_root: message.tree_hash_root(),
        domain,
    }
    .tree_hash_root();
    let signature = validator
        .secret
        .sign(signing_root.as_slice(), DST, &[])
        .compress();
    DepositData {
        pubkey,
        withdrawal_credentials,
        amount: MAX_EFFECTIVE_BALANCE,
        signature: Signature::from(signature.to_vec()),
    }
}

/// Root of the deposit contract after every genesis deposit.
pub fn deposit_root(validators: &[Validator]) -> Result<Hash256, Error> {
    let domain = deposit_domain();
    let deposits: VariableList<DepositData, DepositContractLimit> = VariableList::new(
        validators
            .iter()
            .map(|validator| deposit_data(validator, domain))
            .collect(),
    )
    .map_err(|_| Error::InvalidConfig("too many deposits"))?;
    Ok(deposits.tree_hash_root())
}

fn genesis_state<E: StateSpec>(
    config: &Config,
    validators: &[Validator],
) -> Result<BeaconState<E>, Error> {
    let registry = registry(validators)?;
    let balances = VariableList::new(vec![MAX_EFFECTIVE_BALANCE; validators.len()])
        .map_err(|_| Error::InvalidConfig("too many validators"))?;
    let count = validators.len() as u64;
    Ok(BeaconState {
        genesis_time: config.genesis_time,
        genesis_validators_root: registry.tree_hash_root(),
        slot: 0,
        fork: types::Fork {
            previous_version: GENESIS_FORK_VERSION,
            current_version: GENESIS_FORK_VERSION,
            epoch: 0,
        },
        latest_block_header: BeaconBlockHeader {
            body_root: BeaconBlockBody::empty().tree_hash_root(),
            ..Default::default()
        },
        block_roots: FixedVector::from_elem(Hash256::ZERO),
        state_roots: FixedVector::from_elem(Hash256::ZERO),
        historical_roots: VariableList::empty(),
        eth1_data: Eth1Data {
            deposit_root: deposit_root(validators)?,
            deposit_count: count,
            block_hash: ETH1_BLOCK_HASH,
        },
        eth1_data_votes: VariableList::empty(),
        eth1_deposit_index: count,
        validators: registry,
        balances,
        randao_mixes: FixedVector::from_elem(ETH1_BLOCK_HASH),
        slashings: FixedVector::from_elem(0),
        previous_epoch_attestations: VariableList::empty(),
        current_epoch_attestations: VariableList::empty(),
        justification_bits: BitVector::new(),
        previous_justified_checkpoint: Checkpoint::default(),
        current_justified_checkpoint: Checkpoint::default(),
        finalized_checkpoint: Checkpoint::default(),
    })
}

/// Encode the phase0 genesis state.
pub fn encode_state(config: &Config, validators: &[Validator]) -> Result<Vec<u8>, Error> {
    Ok(match config.preset {
        Preset::Mainnet => genesis_state::<MainnetSpec>(config, validators)?.as_ssz_bytes(),
        Preset::Minimal => genesis_state::<MinimalSpec>(config, validators)?.as_ssz_bytes(),
    })
}

/// Write the consensus genesis of `config` into `dir`.
pub fn write(
    config: &Config,
    validators: &[Validator],
    dir: &Path,
) -> Result<ConsensusGenesis, Error> {
    fs::create_dir_all(dir)?;

    let config_path = dir.join(CONFIG_FILE);
    fs::write(&config_path, serde_yaml::to_string(&chain_config(config))?)?;

    let state = encode_state(config, validators)?;
    let state_path = dir.join(STATE_FILE);
    fs::write(&state_path, &state)?;
    debug!(bytes = state.len(), path = ?state_path, "wrote genesis state");

    fs::write(dir.join(DEPLOY_BLOCK_FILE), "0")?;
    fs::write(dir.join(DEPOSIT_CONTRACT_BLOCK_FILE), "0")?;

    Ok(ConsensusGenesis {
        dir: dir.to_path_buf(),
        config: config_path,
        state: state_path,
        genesis_validators_root: genesis_validators_root(validators)?.0,
        slots_per_epoch: config.preset.slots_per_epoch(),
    })
}
