//! Execution layer genesis documents (geth `genesis.json`, besu `besu.json`, nethermind `chainspec.json`).
//!
//! The merge activates on this layer by total difficulty alone, so no
//! epoch-derived fork block numbers are rendered.

use crate::{accounts::Account, config::Config, Error};
use alloy_genesis::{ChainConfig, EthashConfig, Genesis, GenesisAccount};
use alloy_primitives::U256;
use commonware_utils::hex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

/// Geth genesis file name.
pub const GETH_GENESIS_FILE: &str = "genesis.json";

/// Besu genesis file name.
pub const BESU_GENESIS_FILE: &str = "besu.json";

/// Nethermind chainspec file name.
pub const NETHERMIND_CHAINSPEC_FILE: &str = "chainspec.json";

/// Difficulty of the genesis block (and the minimum block difficulty).
pub const GENESIS_DIFFICULTY: u64 = 0x20000;

/// Gas limit of the genesis block.
pub const GENESIS_GAS_LIMIT: u64 = 30_000_000;

/// Balance of each prefunded account (1,000,000 ETH in wei).
pub const PREFUNDED_BALANCE: U256 = U256::from_limbs([0x1bce_cced_a100_0000, 0xd3c2, 0, 0]);

/// Nonce of the genesis block.
pub const GENESIS_NONCE: u64 = 0x42;

const NONCE: &str = "0x42";
const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Paths and summary of the written execution genesis.
#[derive(Clone, Debug)]
pub struct ExecutionGenesis {
    pub dir: PathBuf,
    pub geth: PathBuf,
    pub besu: PathBuf,
    pub nethermind: PathBuf,
    pub chain_id: u64,
    /// `0x`-prefixed addresses funded at genesis.
    pub accounts: Vec<String>,
}

#[derive(Serialize)]
struct Balance {
    balance: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EthashParams {
    minimum_difficulty: String,
    difficulty_bound_divisor: &'static str,
    duration_limit: &'static str,
    block_reward: BTreeMap<&'static str, &'static str>,
    homestead_transition: &'static str,
    eip100b_transition: &'static str,
    difficulty_bomb_delays: BTreeMap<&'static str, &'static str>,
}

#[derive(Serialize)]
struct EthashEngine {
    params: EthashParams,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Engine {
    ethash: EthashEngine,
}

#[derive(Serialize)]
struct Seal {
    ethereum: EthereumSeal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EthereumSeal {
    nonce: &'static str,
    mix_hash: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainspecGenesis {
    seal: Seal,
    difficulty: String,
    author: &'static str,
    timestamp: String,
    parent_hash: &'static str,
    extra_data: &'static str,
    gas_limit: String,
}

#[derive(Serialize)]
struct Chainspec {
    name: &'static str,
    engine: Engine,
    params: BTreeMap<&'static str, String>,
    genesis: ChainspecGenesis,
    nodes: Vec<String>,
    accounts: BTreeMap<String, Balance>,
}

/// Transitions activated at block zero in the nethermind chainspec.
const CHAINSPEC_TRANSITIONS: [&str; 24] = [
    "eip140Transition",
    "eip145Transition",
    "eip150Transition",
    "eip155Transition",
    "eip158Transition",
    "eip160Transition",
    "eip161abcTransition",
    "eip161dTransition",
    "eip211Transition",
    "eip214Transition",
    "eip658Transition",
    "eip1014Transition",
    "eip1052Transition",
    "eip1283Transition",
    "eip1283DisableTransition",
    "eip152Transition",
    "eip1108Transition",
    "eip1344Transition",
    "eip1884Transition",
    "eip2028Transition",
    "eip2200Transition",
    "eip2565Transition",
    "eip2929Transition",
    "eip2930Transition",
];

/// Transitions of london, also activated at block zero.
const LONDON_TRANSITIONS: [&str; 4] = [
    "eip1559Transition",
    "eip3198Transition",
    "eip3529Transition",
    "eip3541Transition",
];

fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// Geth-format genesis, with every pre-merge fork active at block zero.
///
/// Besu reads the same document.
fn genesis(config: &Config, accounts: &[Account]) -> Genesis {
    let mut chain = ChainConfig::default();
    chain.chain_id = config.network_id;
    chain.homestead_block = Some(0);
    chain.eip150_block = Some(0);
    chain.eip155_block = Some(0);
    chain.eip158_block = Some(0);
    chain.byzantium_block = Some(0);
    chain.constantinople_block = Some(0);
    chain.petersburg_block = Some(0);
    chain.istanbul_block = Some(0);
    chain.berlin_block = Some(0);
    chain.london_block = Some(0);
    chain.terminal_total_difficulty = Some(U256::from(config.terminal_total_difficulty));
    chain.ethash = Some(EthashConfig {});

    let mut genesis = Genesis::default()
        .with_nonce(GENESIS_NONCE)
        .with_timestamp(config.genesis_time)
        .with_gas_limit(GENESIS_GAS_LIMIT)
        .with_difficulty(U256::from(GENESIS_DIFFICULTY))
        .extend_accounts(accounts.iter().map(|account| {
            (
                account.address,
                GenesisAccount::default().with_balance(PREFUNDED_BALANCE),
            )
        }));
    genesis.config = chain;
    genesis
}

fn nethermind(config: &Config, accounts: &[Account]) -> Chainspec {
    let mut params: BTreeMap<&'static str, String> = BTreeMap::new();
    params.insert("gasLimitBoundDivisor", "0x400".into());
    params.insert("registrar", ZERO_ADDRESS.into());
    params.insert("accountStartNonce", "0x0".into());
    params.insert("maximumExtraDataSize", "0x20".into());
    params.insert("minGasLimit", "0x1388".into());
    params.insert("networkID", quantity(config.network_id));
    params.insert("chainID", quantity(config.network_id));
    params.insert("maxCodeSize", "0x6000".into());
    params.insert("maxCodeSizeTransition", "0x0".into());
    params.insert(
        "terminalTotalDifficulty",
        quantity(config.terminal_total_difficulty),
    );
    for transition in CHAINSPEC_TRANSITIONS.into_iter().chain(LONDON_TRANSITIONS) {
        params.insert(transition, "0x0".into());
    }

    Chainspec {
        name: "mergenet",
        engine: Engine {
            ethash: EthashEngine {
                params: EthashParams {
                    minimum_difficulty: quantity(GENESIS_DIFFICULTY),
                    difficulty_bound_divisor: "0x800",
                    duration_limit: "0xd",
                    block_reward: BTreeMap::from([("0x0", "0x1bc16d674ec80000")]),
                    homestead_transition: "0x0",
                    eip100b_transition: "0x0",
                    difficulty_bomb_delays: BTreeMap::new(),
                },
            },
        },
        params,
        genesis: ChainspecGenesis {
            seal: Seal {
                ethereum: EthereumSeal {
                    nonce: NONCE,
                    mix_hash: ZERO_HASH,
                },
            },
            difficulty: quantity(GENESIS_DIFFICULTY),
            author: ZERO_ADDRESS,
            timestamp: quantity(config.genesis_time),
            parent_hash: ZERO_HASH,
            extra_data: "0x",
            gas_limit: quantity(GENESIS_GAS_LIMIT),
        },
        nodes: Vec::new(),
        accounts: accounts
            .iter()
            .map(|account| {
                (
                    format!("0x{}", hex(account.address.as_slice())),
                    Balance {
                        balance: format!("0x{PREFUNDED_BALANCE:x}"),
                    },
                )
            })
            .collect(),
    }
}

/// Write the execution genesis of `config` into `dir`.
pub fn write(config: &Config, accounts: &[Account], dir: &Path) -> Result<ExecutionGenesis, Error> {
    fs::create_dir_all(dir)?;

    let document = serde_json::to_string_pretty(&genesis(config, accounts))?;
    let geth_path = dir.join(GETH_GENESIS_FILE);
    fs::write(&geth_path, &document)?;
    let besu_path = dir.join(BESU_GENESIS_FILE);
    fs::write(&besu_path, &document)?;

    let nethermind_path = dir.join(NETHERMIND_CHAINSPEC_FILE);
    fs::write(
        &nethermind_path,
        serde_json::to_string_pretty(&nethermind(config, accounts))?,
    )?;

    Ok(ExecutionGenesis {
        dir: dir.to_path_buf(),
        geth: geth_path,
        besu: besu_path,
        nethermind: nethermind_path,
        chain_id: config.network_id,
        accounts: accounts
            .iter()
            .map(|account| format!("0x{}", hex(account.address.as_slice())))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts;
    use alloy_primitives::address;
    use commonware_macros::test_traced;
    use serde_json::Value;

    const MNEMONIC: &str = "test test test test test test test test test test test junk";

    #[test_traced]
    fn test_documents_share_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = accounts::derive(MNEMONIC, 2).unwrap();
        let mut config = Config::new(3151908, 1_650_000_000, MNEMONIC);
        config.terminal_total_difficulty = 12345;
        let genesis = write(&config, &accounts, dir.path()).unwrap();
        assert_eq!(
            genesis.accounts[0],
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );

        let geth: Genesis =
            serde_json::from_str(&fs::read_to_string(&genesis.geth).unwrap()).unwrap();
        assert_eq!(geth.config.chain_id, 3151908);
        assert_eq!(
            geth.config.terminal_total_difficulty,
            Some(U256::from(12345))
        );
        assert_eq!(geth.config.homestead_block, Some(0));
        assert_eq!(geth.config.london_block, Some(0));
        assert_eq!(geth.config.merge_netsplit_block, None);
        assert_eq!(geth.timestamp, 1_650_000_000);
        assert_eq!(geth.nonce, GENESIS_NONCE);
        assert_eq!(geth.difficulty, U256::from(GENESIS_DIFFICULTY));
        assert_eq!(geth.gas_limit, GENESIS_GAS_LIMIT);
        assert_eq!(
            geth.alloc[&address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266")].balance,
            PREFUNDED_BALANCE
        );

        let chainspec: Value =
            serde_json::from_str(&fs::read_to_string(&genesis.nethermind).unwrap()).unwrap();
        assert_eq!(chainspec["params"]["chainID"], "0x301824");
        assert_eq!(chainspec["params"]["terminalTotalDifficulty"], "0x3039");
        assert_eq!(chainspec["params"]["eip1559Transition"], "0x0");
        assert_eq!(chainspec["genesis"]["timestamp"], "0x62590080");
        assert_eq!(
            chainspec["engine"]["Ethash"]["params"]["minimumDifficulty"],
            "0x20000"
        );
        assert_eq!(
            chainspec["accounts"]["0x70997970c51812dc3a010c7d01b50e0d17dc79c8"]["balance"],
            "0xd3c21bcecceda1000000"
        );
    }

    #[test_traced]
    fn test_besu_matches_geth() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = accounts::derive(MNEMONIC, 1).unwrap();
        let config = Config::new(3151908, 1_650_000_000, MNEMONIC);
        let genesis = write(&config, &accounts, dir.path()).unwrap();
        assert_eq!(genesis.besu, dir.path().join(BESU_GENESIS_FILE));

        let besu: Value = serde_json::from_str(&fs::read_to_string(&genesis.besu).unwrap()).unwrap();
        let geth: Value = serde_json::from_str(&fs::read_to_string(&genesis.geth).unwrap()).unwrap();
        assert_eq!(besu, geth);
        assert!(besu["config"].get("ethash").is_some());
        assert!(besu["config"].get("terminalTotalDifficulty").is_some());
    }
}
