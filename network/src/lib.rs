//! Launch and wire execution and consensus participants into a private merge testnet.
//!
//! Participants are started through a [Launcher], implemented once per
//! client. Both layers are built by the same star-shaped sequencing routine:
//! pair 0 is launched as the bootnode and every other pair joins it as a
//! follower. The consensus layer is built only after the execution layer, so
//! each consensus participant can be bound to the execution participant of
//! the same index.
//!
//! # Status
//!
//! `mergenet-network` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;

pub mod consensus;
pub mod execution;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod monitor;
mod orchestrator;
pub use orchestrator::{Options, DEFAULT_CONCURRENCY};

/// Maximum readiness checks before a participant is considered unavailable.
pub const MAX_POLL_ATTEMPTS: usize = 60;

/// Interval between readiness checks.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Errors that can occur while launching the network.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to launch {service}: {reason}")]
    ServiceLaunch { service: String, reason: String },
    #[error("rpc to {url} failed: {reason}")]
    Rpc { url: String, reason: String },
    #[error("peer {peer} unreachable: {reason}")]
    Peering { peer: String, reason: String },
    #[error("{service} not ready: {reason}")]
    Unavailable { service: String, reason: String },
    #[error("{service} does not publish port {port}")]
    MissingPort { service: String, port: String },
    #[error("pairing invariant violated: expected {expected} {what}, found {actual}")]
    PairingInvariantViolation {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("participant {index} failed: {source}")]
    Participant {
        index: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("monitor launch failed: {0}")]
    MonitorLaunch(#[source] Box<Error>),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("canceled")]
    Canceled,
}

impl Error {
    /// Index of the failing participant, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            Error::Participant { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Verbosity of a participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(level)
    }
}

/// Client settings shared by every participant of one layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub image: String,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Flags appended verbatim to the client command.
    #[serde(default)]
    pub extra_params: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// A port exposed by a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Port {
    pub name: &'static str,
    pub number: u16,
    pub protocol: Protocol,
    /// Whether the port must be reachable from the host.
    pub published: bool,
}

impl Port {
    pub const fn tcp(name: &'static str, number: u16, published: bool) -> Self {
        Self {
            name,
            number,
            protocol: Protocol::Tcp,
            published,
        }
    }

    pub const fn udp(name: &'static str, number: u16) -> Self {
        Self {
            name,
            number,
            protocol: Protocol::Udp,
            published: false,
        }
    }
}

/// A host path made available inside a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }

    pub fn writable(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }
}

/// Description of a service to launch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Service {
    pub image: String,
    pub entrypoint: Option<String>,
    pub command: Vec<String>,
    pub ports: Vec<Port>,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
}

/// Addresses of a launched service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub id: String,
    /// Address reachable by other services.
    pub ip: IpAddr,
    /// Host addresses of published ports, by port name.
    pub published: HashMap<String, SocketAddr>,
}

impl Endpoints {
    /// Host address of the published port `name`.
    pub fn public(&self, name: &str) -> Result<SocketAddr, Error> {
        self.published
            .get(name)
            .copied()
            .ok_or_else(|| Error::MissingPort {
                service: self.id.clone(),
                port: name.to_string(),
            })
    }
}

/// Interface that launches services.
pub trait Platform: Clone + Send + Sync + 'static {
    /// Launch a service with identifier `id`.
    ///
    /// The private address of the service is assigned before launch and
    /// handed to `build`, so the service can advertise it.
    fn launch<F>(&self, id: &str, build: F) -> impl Future<Output = Result<Endpoints, Error>> + Send
    where
        F: FnOnce(IpAddr) -> Service + Send;
}

/// Interface that queries launched services.
pub trait Rpc: Clone + Send + Sync + 'static {
    /// Issue a JSON-RPC request, returning its `result`.
    fn call(
        &self,
        url: &str,
        method: &str,
        params: serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, Error>> + Send;

    /// Fetch a JSON document.
    fn get(&self, url: &str) -> impl Future<Output = Result<serde_json::Value, Error>> + Send;
}

/// Interface that waits.
pub trait Clock: Clone + Send + Sync + 'static {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Everything required to launch and probe participants.
pub trait Environment: Platform + Rpc + Clock {}

impl<T: Platform + Rpc + Clock> Environment for T {}

/// A launched participant that others can join.
pub trait Peer: Clone + Send + Sync + 'static {
    /// Identifier of the underlying service.
    fn id(&self) -> &str;

    /// Address other participants dial to join the mesh.
    fn discovery(&self) -> &str;
}

/// Position of a participant in the star.
#[derive(Clone, Debug)]
pub enum Role<P: Peer> {
    /// Started without peers. Its discovery address is the join point of the layer.
    Bootnode,
    /// Started dialing the given bootnode.
    Follower(P),
}

impl<P: Peer> Role<P> {
    pub fn peer(&self) -> Option<&P> {
        match self {
            Role::Bootnode => None,
            Role::Follower(peer) => Some(peer),
        }
    }
}

/// Interface that starts one participant of a layer.
///
/// Launchers never retry: a failed launch is returned to the orchestrator as is.
pub trait Launcher: Clone + Send + Sync + 'static {
    /// Per-participant input.
    type Input: Send + 'static;

    /// Handle of a launched participant.
    type Handle: Peer;

    /// Launch participant `index` in `role`.
    fn launch(
        &self,
        index: usize,
        role: Role<Self::Handle>,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Handle, Error>> + Send;
}

/// Poll `check` until it succeeds, sleeping [RETRY_INTERVAL] between attempts.
///
/// Gives up after [MAX_POLL_ATTEMPTS] checks without sleeping after the last one.
pub(crate) async fn poll<E, T, F, Fut>(env: &E, service: &str, mut check: F) -> Result<T, Error>
where
    E: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut last = None;
    for attempt in 1..=MAX_POLL_ATTEMPTS {
        match check().await {
            Ok(value) => return Ok(value),
            Err(err) => last = Some(err),
        }
        if attempt < MAX_POLL_ATTEMPTS {
            env.sleep(RETRY_INTERVAL).await;
        }
    }
    Err(Error::Unavailable {
        service: service.to_string(),
        reason: last.map(|err| err.to_string()).unwrap_or_default(),
    })
}
