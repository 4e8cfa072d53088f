//! Consensus layer participants.
//!
//! Participant `i` is bound to execution participant `i` (its engine API)
//! and keystore `i` (its validators). Pair 0 is also the discovery bootnode
//! of the consensus mesh, independent of the execution layer topology.

use crate::{
    execution, orchestrator, Environment, Error, Launcher, Mount, Options, Participant, Peer,
    Port, Role, Rpc, Service,
};
use mergenet_genesis::{Artifacts, ConsensusGenesis, Keystore};
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr, path::PathBuf};
use tracing::info;

pub mod lighthouse;
pub mod teku;

/// Beacon API port.
pub const HTTP_PORT: u16 = 4000;

/// Peer-to-peer and discovery port.
pub const DISCOVERY_PORT: u16 = 9000;

pub const HTTP_PORT_ID: &str = "http";
pub const TCP_DISCOVERY_PORT_ID: &str = "tcp-discovery";
pub const UDP_DISCOVERY_PORT_ID: &str = "udp-discovery";

/// Mount point of the consensus genesis directory.
pub const GENESIS_MOUNT: &str = "/genesis";

/// Mount point of the engine API secret directory.
pub const JWT_MOUNT: &str = "/jwt";

/// Mount point of the keystore directory of the pair.
pub const KEYSTORE_MOUNT: &str = "/validator-keys";

/// Data directory inside the container.
pub const DATA_DIR: &str = "/data";

/// Fee recipient of every validator.
pub const FEE_RECIPIENT: &str = "0x8943545177806ed17b9f23f0a21ee5948ecaa776";

const IDENTITY_PATH: &str = "/eth/v1/node/identity";

/// A launched consensus participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub id: String,
    pub ip: IpAddr,
    /// ENR other consensus participants dial.
    pub enr: String,
    pub beacon_url: String,
    /// Beacon API reachable from the host.
    pub public_beacon_url: String,
    /// Separate validator client service, if the client runs one.
    pub validator: Option<String>,
}

impl Peer for Handle {
    fn id(&self) -> &str {
        &self.id
    }

    fn discovery(&self) -> &str {
        &self.enr
    }
}

/// Execution participant and keystore bound to one consensus participant.
#[derive(Clone, Debug)]
pub struct Pairing {
    pub execution: execution::Handle,
    pub keystore: Keystore,
}

/// Supported consensus clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Teku,
    Lighthouse,
}

impl Kind {
    pub const fn default_image(&self) -> &'static str {
        match self {
            Kind::Teku => teku::DEFAULT_IMAGE,
            Kind::Lighthouse => lighthouse::DEFAULT_IMAGE,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Teku => f.write_str("teku"),
            Kind::Lighthouse => f.write_str("lighthouse"),
        }
    }
}

/// Inputs shared by every consensus launcher.
#[derive(Clone, Debug)]
pub struct Setup<E> {
    pub env: E,
    pub participant: Participant,
    pub genesis: ConsensusGenesis,
    /// Directory holding the engine API secret.
    pub jwt: PathBuf,
}

/// Launcher of the configured consensus client.
#[derive(Clone)]
pub enum Client<E: Environment> {
    Teku(teku::Launcher<E>),
    Lighthouse(lighthouse::Launcher<E>),
}

impl<E: Environment> Client<E> {
    pub fn new(kind: Kind, setup: Setup<E>) -> Self {
        match kind {
            Kind::Teku => Client::Teku(teku::Launcher::new(setup)),
            Kind::Lighthouse => Client::Lighthouse(lighthouse::Launcher::new(setup)),
        }
    }
}

impl<E: Environment> Launcher for Client<E> {
    type Input = Pairing;
    type Handle = Handle;

    async fn launch(
        &self,
        index: usize,
        role: Role<Handle>,
        input: Pairing,
    ) -> Result<Handle, Error> {
        match self {
            Client::Teku(launcher) => launcher.launch(index, role, input).await,
            Client::Lighthouse(launcher) => launcher.launch(index, role, input).await,
        }
    }
}

/// Build the consensus layer, binding participant `i` to `execution[i]` and
/// the keystore of pair `i`.
///
/// Rejects mismatched inputs with [Error::PairingInvariantViolation] before
/// launching anything.
pub async fn build<L>(
    launcher: &L,
    artifacts: &Artifacts,
    execution: &[execution::Handle],
    pairs: usize,
    options: &Options,
) -> Result<Vec<Handle>, Error>
where
    L: Launcher<Input = Pairing, Handle = Handle>,
{
    if execution.len() != pairs {
        return Err(Error::PairingInvariantViolation {
            what: "execution participants",
            expected: pairs,
            actual: execution.len(),
        });
    }
    if artifacts.keystores.len() != pairs {
        return Err(Error::PairingInvariantViolation {
            what: "keystores",
            expected: pairs,
            actual: artifacts.keystores.len(),
        });
    }

    info!(pairs, "building consensus layer");
    let inputs = execution
        .iter()
        .cloned()
        .zip(artifacts.keystores.iter().cloned())
        .map(|(execution, keystore)| Pairing {
            execution,
            keystore,
        })
        .collect();
    orchestrator::star(launcher, inputs, options).await
}

/// Service identifier of consensus participant `index`.
pub fn service_id(index: usize, kind: Kind) -> String {
    format!("cl-{index}-{kind}")
}

/// Ensure the bootnode of a follower still answers before dialing it.
pub(crate) async fn probe<E: Rpc>(env: &E, peer: &Handle) -> Result<(), Error> {
    env.get(&format!("{}{IDENTITY_PATH}", peer.public_beacon_url))
        .await
        .map_err(|err| Error::Peering {
            peer: peer.id.clone(),
            reason: err.to_string(),
        })?;
    Ok(())
}

/// Wait until the participant reports its ENR.
async fn enr<E: Environment>(env: &E, service: &str, beacon: &str) -> Result<String, Error> {
    let url = format!("{beacon}{IDENTITY_PATH}");
    let url = url.as_str();
    crate::poll(env, service, move || async move {
        let identity = env.get(url).await?;
        match identity["data"]["enr"].as_str() {
            Some(enr) if enr.starts_with("enr:") => Ok(enr.to_string()),
            _ => Err(Error::Unavailable {
                service: service.to_string(),
                reason: "identity has no enr".into(),
            }),
        }
    })
    .await
}

/// Launch a beacon node, returning its handle once it reports an ENR.
pub(crate) async fn start<E, F>(
    env: &E,
    index: usize,
    kind: Kind,
    role: &Role<Handle>,
    build: F,
) -> Result<Handle, Error>
where
    E: Environment,
    F: FnOnce(IpAddr) -> Service + Send,
{
    let id = service_id(index, kind);
    if let Some(peer) = role.peer() {
        probe(env, peer).await?;
    }

    let endpoints = env.launch(&id, build).await?;
    let public_beacon_url = format!("http://{}", endpoints.public(HTTP_PORT_ID)?);
    let enr = enr(env, &id, &public_beacon_url).await?;
    info!(index, service = %id, "launched consensus participant");

    Ok(Handle {
        beacon_url: format!("http://{}:{HTTP_PORT}", endpoints.ip),
        public_beacon_url,
        enr,
        ip: endpoints.ip,
        id,
        validator: None,
    })
}

/// Ports exposed by every beacon node.
pub(crate) fn ports() -> Vec<Port> {
    vec![
        Port::tcp(HTTP_PORT_ID, HTTP_PORT, true),
        Port::tcp(TCP_DISCOVERY_PORT_ID, DISCOVERY_PORT, false),
        Port::udp(UDP_DISCOVERY_PORT_ID, DISCOVERY_PORT),
    ]
}

/// Genesis and engine API secret mounts.
pub(crate) fn mounts<E>(setup: &Setup<E>) -> Vec<Mount> {
    vec![
        Mount::read_only(&setup.genesis.dir, GENESIS_MOUNT),
        Mount::read_only(&setup.jwt, JWT_MOUNT),
    ]
}
