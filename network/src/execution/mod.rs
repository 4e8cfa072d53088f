//! Execution layer participants.
//!
//! Pair 0 is launched as the bootnode and every other pair dials its enode.
//! The execution layer merges by total difficulty alone, so launchers only
//! need the genesis documents, the engine API secret and the bootnode.

use crate::{orchestrator, Environment, Error, Launcher, Options, Participant, Peer, Role, Rpc};
use mergenet_genesis::ExecutionGenesis;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, net::IpAddr, path::PathBuf};
use tracing::info;

pub mod geth;
pub mod nethermind;

/// JSON-RPC port.
pub const RPC_PORT: u16 = 8545;

/// Authenticated engine API port.
pub const ENGINE_PORT: u16 = 8551;

/// Peer-to-peer and discovery port.
pub const DISCOVERY_PORT: u16 = 30303;

pub const RPC_PORT_ID: &str = "rpc";
pub const ENGINE_PORT_ID: &str = "engine";
pub const TCP_DISCOVERY_PORT_ID: &str = "tcp-discovery";
pub const UDP_DISCOVERY_PORT_ID: &str = "udp-discovery";

/// Mount point of the execution genesis directory.
pub const GENESIS_MOUNT: &str = "/genesis";

/// Mount point of the engine API secret directory.
pub const JWT_MOUNT: &str = "/jwt";

/// Data directory inside the container.
pub const DATA_DIR: &str = "/data";

/// A launched execution participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub id: String,
    pub ip: IpAddr,
    /// Enode other execution participants dial.
    pub enode: String,
    pub rpc_url: String,
    /// Engine API endpoint driven by the paired consensus participant.
    pub engine_url: String,
    /// JSON-RPC endpoint reachable from the host.
    pub public_rpc_url: String,
}

impl Peer for Handle {
    fn id(&self) -> &str {
        &self.id
    }

    fn discovery(&self) -> &str {
        &self.enode
    }
}

/// Supported execution clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Geth,
    Nethermind,
}

impl Kind {
    pub const fn default_image(&self) -> &'static str {
        match self {
            Kind::Geth => geth::DEFAULT_IMAGE,
            Kind::Nethermind => nethermind::DEFAULT_IMAGE,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Geth => f.write_str("geth"),
            Kind::Nethermind => f.write_str("nethermind"),
        }
    }
}

/// Inputs shared by every execution launcher.
#[derive(Clone, Debug)]
pub struct Setup<E> {
    pub env: E,
    pub participant: Participant,
    pub genesis: ExecutionGenesis,
    /// Directory holding the engine API secret.
    pub jwt: PathBuf,
}

/// Launcher of the configured execution client.
#[derive(Clone)]
pub enum Client<E: Environment> {
    Geth(geth::Launcher<E>),
    Nethermind(nethermind::Launcher<E>),
}

impl<E: Environment> Client<E> {
    pub fn new(kind: Kind, setup: Setup<E>) -> Self {
        match kind {
            Kind::Geth => Client::Geth(geth::Launcher::new(setup)),
            Kind::Nethermind => Client::Nethermind(nethermind::Launcher::new(setup)),
        }
    }
}

impl<E: Environment> Launcher for Client<E> {
    type Input = ();
    type Handle = Handle;

    async fn launch(&self, index: usize, role: Role<Handle>, input: ()) -> Result<Handle, Error> {
        match self {
            Client::Geth(launcher) => launcher.launch(index, role, input).await,
            Client::Nethermind(launcher) => launcher.launch(index, role, input).await,
        }
    }
}

/// Build the execution layer: pair 0 as bootnode, every other pair following it.
pub async fn build<L>(launcher: &L, pairs: usize, options: &Options) -> Result<Vec<Handle>, Error>
where
    L: Launcher<Input = (), Handle = Handle>,
{
    info!(pairs, "building execution layer");
    orchestrator::star(launcher, vec![(); pairs], options).await
}

/// Service identifier of execution participant `index`.
pub fn service_id(index: usize, kind: Kind) -> String {
    format!("el-{index}-{kind}")
}

/// Ensure the bootnode of a follower still answers before dialing it.
pub(crate) async fn probe<E: Rpc>(env: &E, peer: &Handle) -> Result<(), Error> {
    let listening = env
        .call(&peer.public_rpc_url, "net_listening", json!([]))
        .await
        .map_err(|err| Error::Peering {
            peer: peer.id.clone(),
            reason: err.to_string(),
        })?;
    if listening.as_bool() != Some(true) {
        return Err(Error::Peering {
            peer: peer.id.clone(),
            reason: "not listening".into(),
        });
    }
    Ok(())
}

/// Node identifier embedded in `enode`.
pub(crate) fn node_id(enode: &str) -> Option<&str> {
    let id = enode.strip_prefix("enode://")?.split('@').next()?;
    (id.len() == 128 && id.bytes().all(|b| b.is_ascii_hexdigit())).then_some(id)
}

/// Wait until the participant reports its enode, rewritten to its private address.
async fn enode<E: Environment>(env: &E, service: &str, rpc: &str, ip: IpAddr) -> Result<String, Error> {
    crate::poll(env, service, move || async move {
        let info = env.call(rpc, "admin_nodeInfo", json!([])).await?;
        let enode = info["enode"].as_str().unwrap_or_default();
        let id = node_id(enode).ok_or_else(|| Error::Unavailable {
            service: service.to_string(),
            reason: format!("invalid enode: {enode}"),
        })?;
        Ok(format!("enode://{id}@{ip}:{DISCOVERY_PORT}"))
    })
    .await
}

/// Launch an execution participant, returning its handle once it reports an enode.
pub(crate) async fn start<E, F>(
    env: &E,
    index: usize,
    kind: Kind,
    role: &Role<Handle>,
    build: F,
) -> Result<Handle, Error>
where
    E: Environment,
    F: FnOnce(IpAddr) -> crate::Service + Send,
{
    let id = service_id(index, kind);
    if let Some(peer) = role.peer() {
        probe(env, peer).await?;
    }

    let endpoints = env.launch(&id, build).await?;
    let public_rpc_url = format!("http://{}", endpoints.public(RPC_PORT_ID)?);
    let enode = enode(env, &id, &public_rpc_url, endpoints.ip).await?;
    info!(index, service = %id, %enode, "launched execution participant");

    Ok(Handle {
        rpc_url: format!("http://{}:{RPC_PORT}", endpoints.ip),
        engine_url: format!("http://{}:{ENGINE_PORT}", endpoints.ip),
        public_rpc_url,
        enode,
        ip: endpoints.ip,
        id,
    })
}

/// Ports exposed by every execution client.
pub(crate) fn ports() -> Vec<crate::Port> {
    vec![
        crate::Port::tcp(RPC_PORT_ID, RPC_PORT, true),
        crate::Port::tcp(ENGINE_PORT_ID, ENGINE_PORT, false),
        crate::Port::tcp(TCP_DISCOVERY_PORT_ID, DISCOVERY_PORT, false),
        crate::Port::udp(UDP_DISCOVERY_PORT_ID, DISCOVERY_PORT),
    ]
}

/// Mounts shared by every execution client.
pub(crate) fn mounts<E>(setup: &Setup<E>) -> Vec<crate::Mount> {
    vec![
        crate::Mount::read_only(&setup.genesis.dir, GENESIS_MOUNT),
        crate::Mount::read_only(&setup.jwt, JWT_MOUNT),
    ]
}
