//! Phase0 containers of the genesis state and the deposits it commits to.

use ssz_derive::Encode;
use ssz_types::{
    typenum::{
        Unsigned, U1024, U1099511627776, U128, U16, U16777216, U2, U2048, U32, U33, U4,
        U4096, U4294967296, U48, U64, U65536, U8192, U96,
    },
    BitList, BitVector, FixedVector, VariableList,
};
use std::fmt::Debug;
use tree_hash::Hash256;
use tree_hash_derive::TreeHash;

pub type PublicKey = FixedVector<u8, U48>;
pub type Signature = FixedVector<u8, U96>;
pub type Version = [u8; 4];

/// Capacity of the validator registry (and of the balances list).
pub type ValidatorRegistryLimit = U1099511627776;

/// Capacity of the deposit contract tree.
pub type DepositContractLimit = U4294967296;

pub type HistoricalRootsLimit = U16777216;
pub type MaxValidatorsPerCommittee = U2048;

/// Lengths of the preset-sized collections of [BeaconState].
pub trait StateSpec: 'static {
    type SlotsPerHistoricalRoot: Unsigned + Clone + Debug + PartialEq + Send + Sync;
    type EpochsPerHistoricalVector: Unsigned + Clone + Debug + PartialEq + Send + Sync;
    type EpochsPerSlashingsVector: Unsigned + Clone + Debug + PartialEq + Send + Sync;
    /// `EPOCHS_PER_ETH1_VOTING_PERIOD * SLOTS_PER_EPOCH`
    type SlotsPerEth1VotingPeriod: Unsigned + Clone + Debug + PartialEq + Send + Sync;
    /// `MAX_ATTESTATIONS * SLOTS_PER_EPOCH`
    type MaxPendingAttestations: Unsigned + Clone + Debug + PartialEq + Send + Sync;
}

pub struct MainnetSpec;

impl StateSpec for MainnetSpec {
    type SlotsPerHistoricalRoot = U8192;
    type EpochsPerHistoricalVector = U65536;
    type EpochsPerSlashingsVector = U8192;
    type SlotsPerEth1VotingPeriod = U2048;
    type MaxPendingAttestations = U4096;
}

pub struct MinimalSpec;

impl StateSpec for MinimalSpec {
    type SlotsPerHistoricalRoot = U64;
    type EpochsPerHistoricalVector = U64;
    type EpochsPerSlashingsVector = U64;
    type SlotsPerEth1VotingPeriod = U32;
    type MaxPendingAttestations = U1024;
}

#[derive(Clone, Debug, Default, PartialEq, Encode, TreeHash)]
pub struct Fork {
    pub previous_version: Version,
    pub current_version: Version,
    pub epoch: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Encode, TreeHash)]
pub struct ForkData {
    pub current_version: Version,
    pub genesis_validators_root: Hash256,
}

#[derive(Clone, Debug, Default, PartialEq, Encode, TreeHash)]
pub struct SigningData {
    pub object_root: Hash256,
    pub domain: Hash256,
}

#[derive(Clone, Debug, Default, PartialEq, Encode, TreeHash)]
pub struct Checkpoint {
    pub epoch: u64,
    pub root: Hash256,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct Validator {
    pub pubkey: PublicKey,
    pub withdrawal_credentials: Hash256,
    pub effective_balance: u64,
    pub slashed: bool,
    pub activation_eligibility_epoch: u64,
    pub activation_epoch: u64,
    pub exit_epoch: u64,
    pub withdrawable_epoch: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Encode, TreeHash)]
pub struct Eth1Data {
    pub deposit_root: Hash256,
    pub deposit_count: u64,
    pub block_hash: Hash256,
}

#[derive(Clone, Debug, Default, PartialEq, Encode, TreeHash)]
pub struct BeaconBlockHeader {
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: Hash256,
    pub state_root: Hash256,
    pub body_root: Hash256,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct SignedBeaconBlockHeader {
    pub message: BeaconBlockHeader,
    pub signature: Signature,
}

#[derive(Clone, Debug, Default, PartialEq, Encode, TreeHash)]
pub struct AttestationData {
    pub slot: u64,
    pub index: u64,
    pub beacon_block_root: Hash256,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct IndexedAttestation {
    pub attesting_indices: VariableList<u64, MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct PendingAttestation {
    pub aggregation_bits: BitList<MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub inclusion_delay: u64,
    pub proposer_index: u64,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct Attestation {
    pub aggregation_bits: BitList<MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct ProposerSlashing {
    pub signed_header_1: SignedBeaconBlockHeader,
    pub signed_header_2: SignedBeaconBlockHeader,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct AttesterSlashing {
    pub attestation_1: IndexedAttestation,
    pub attestation_2: IndexedAttestation,
}

/// Deposit message signed by the depositor.
#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct DepositMessage {
    pub pubkey: PublicKey,
    pub withdrawal_credentials: Hash256,
    pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct DepositData {
    pub pubkey: PublicKey,
    pub withdrawal_credentials: Hash256,
    pub amount: u64,
    pub signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct Deposit {
    pub proof: FixedVector<Hash256, U33>,
    pub data: DepositData,
}

#[derive(Clone, Debug, Default, PartialEq, Encode, TreeHash)]
pub struct VoluntaryExit {
    pub epoch: u64,
    pub validator_index: u64,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct SignedVoluntaryExit {
    pub message: VoluntaryExit,
    pub signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Encode, TreeHash)]
pub struct BeaconBlockBody {
    pub randao_reveal: Signature,
    pub eth1_data: Eth1Data,
    pub graffiti: Hash256,
    pub proposer_slashings: VariableList<ProposerSlashing, U16>,
    pub attester_slashings: VariableList<AttesterSlashing, U2>,
    pub attestations: VariableList<Attestation, U128>,
    pub deposits: VariableList<Deposit, U16>,
    pub voluntary_exits: VariableList<SignedVoluntaryExit, U16>,
}

impl BeaconBlockBody {
    /// Body of the genesis block.
    pub fn empty() -> Self {
        Self {
            randao_reveal: FixedVector::from_elem(0),
            eth1_data: Eth1Data::default(),
            graffiti: Hash256::ZERO,
            proposer_slashings: VariableList::empty(),
            attester_slashings: VariableList::empty(),
            attestations: VariableList::empty(),
            deposits: VariableList::empty(),
            voluntary_exits: VariableList::empty(),
        }
    }
}

#[derive(Encode, TreeHash)]
pub struct BeaconState<E: StateSpec> {
    pub genesis_time: u64,
    pub genesis_validators_root: Hash256,
    pub slot: u64,
    pub fork: Fork,
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: FixedVector<Hash256, E::SlotsPerHistoricalRoot>,
    pub state_roots: FixedVector<Hash256, E::SlotsPerHistoricalRoot>,
    pub historical_roots: VariableList<Hash256, HistoricalRootsLimit>,
    pub eth1_data: Eth1Data,
    pub eth1_data_votes: VariableList<Eth1Data, E::SlotsPerEth1VotingPeriod>,
    pub eth1_deposit_index: u64,
    pub validators: VariableList<Validator, ValidatorRegistryLimit>,
    pub balances: VariableList<u64, ValidatorRegistryLimit>,
    pub randao_mixes: FixedVector<Hash256, E::EpochsPerHistoricalVector>,
    pub slashings: FixedVector<u64, E::EpochsPerSlashingsVector>,
    pub previous_epoch_attestations: VariableList<PendingAttestation, E::MaxPendingAttestations>,
    pub current_epoch_attestations: VariableList<PendingAttestation, E::MaxPendingAttestations>,
    pub justification_bits: BitVector<U4>,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}
