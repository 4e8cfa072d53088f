//! Launch participants as containers on the local Docker daemon.
//!
//! Every deployment gets a user-defined bridge network with a static address
//! per service. Published ports are bound to `127.0.0.1` on a random host
//! port. All containers and the network carry the `mergenet.tag` label, so a
//! deployment can be removed with [destroy].

use crate::Error;
use futures::future::try_join_all;
use mergenet_network::{self as network, Clock, Endpoints, Platform, Rpc, Service};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info};

mod utils;
pub use utils::{container_name, network_name, TAG_LABEL};
use utils::{address, docker, published, run_args, wait_running};

pub const CMD: &str = "docker";
pub const CREATE_CMD: &str = "create";
pub const DESTROY_CMD: &str = "destroy";

/// Subnet of the deployment network.
pub const DEFAULT_SUBNET: Ipv4Addr = Ipv4Addr::new(172, 28, 0, 0);

/// Prefix length of the deployment network.
pub const SUBNET_PREFIX: u8 = 16;

/// Timeout of a single RPC request.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

struct Inner {
    tag: String,
    network: String,
    subnet: Ipv4Addr,
    next: AtomicU32,
    client: reqwest::Client,
}

/// Docker-backed [network::Environment].
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Create the deployment network of `tag`.
    pub async fn create(tag: &str) -> Result<Self, Error> {
        let network = network_name(tag);
        docker([
            "network".to_string(),
            "create".into(),
            format!("--subnet={DEFAULT_SUBNET}/{SUBNET_PREFIX}"),
            format!("--label={TAG_LABEL}={tag}"),
            network.clone(),
        ])
        .await?;
        info!(network = network.as_str(), "created network");

        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|err| Error::Docker(err.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                tag: tag.to_string(),
                network,
                subnet: DEFAULT_SUBNET,
                next: AtomicU32::new(0),
                client,
            }),
        })
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    async fn start<F>(&self, id: &str, build: F) -> Result<Endpoints, Error>
    where
        F: FnOnce(IpAddr) -> Service + Send,
    {
        let n = self.inner.next.fetch_add(1, Ordering::Relaxed);
        let ip = IpAddr::V4(address(self.inner.subnet, n));
        let service = build(ip);
        let name = container_name(&self.inner.tag, id);
        docker(run_args(
            &self.inner.tag,
            &self.inner.network,
            &name,
            ip,
            &service,
        ))
        .await?;
        wait_running(&name).await?;
        debug!(service = id, container = name.as_str(), %ip, "started container");

        let published = try_join_all(service.ports.iter().filter(|port| port.published).map(
            |port| {
                let name = name.as_str();
                async move { Ok::<_, Error>((port.name.to_string(), published(name, port).await?)) }
            },
        ))
        .await?;
        Ok(Endpoints {
            id: id.to_string(),
            ip,
            published: published.into_iter().collect::<HashMap<_, _>>(),
        })
    }
}

impl Platform for Context {
    async fn launch<F>(&self, id: &str, build: F) -> Result<Endpoints, network::Error>
    where
        F: FnOnce(IpAddr) -> Service + Send,
    {
        self.start(id, build)
            .await
            .map_err(|err| network::Error::ServiceLaunch {
                service: id.to_string(),
                reason: err.to_string(),
            })
    }
}

fn rpc_error(url: &str, reason: impl ToString) -> network::Error {
    network::Error::Rpc {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

impl Rpc for Context {
    async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value, network::Error> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut response: Value = self
            .inner
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| rpc_error(url, err))?
            .json()
            .await
            .map_err(|err| rpc_error(url, err))?;
        if let Some(error) = response.get("error") {
            return Err(rpc_error(url, error));
        }
        Ok(response
            .get_mut("result")
            .map(Value::take)
            .unwrap_or_default())
    }

    async fn get(&self, url: &str) -> Result<Value, network::Error> {
        self.inner
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| rpc_error(url, err))?
            .json()
            .await
            .map_err(|err| rpc_error(url, err))
    }
}

impl Clock for Context {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Remove every container and the network of deployment `tag`.
pub async fn destroy(tag: &str) -> Result<(), Error> {
    let containers = docker([
        "ps".to_string(),
        "--all".into(),
        "--quiet".into(),
        format!("--filter=label={TAG_LABEL}={tag}"),
    ])
    .await?;
    let containers: Vec<&str> = containers.split_whitespace().collect();
    if !containers.is_empty() {
        let mut args = vec!["rm", "--force", "--volumes"];
        args.extend(containers.iter().copied());
        docker(args).await?;
    }
    info!(tag, containers = containers.len(), "removed containers");

    let network = network_name(tag);
    let existing = docker([
        "network".to_string(),
        "ls".into(),
        "--quiet".into(),
        format!("--filter=label={TAG_LABEL}={tag}"),
    ])
    .await?;
    if !existing.is_empty() {
        docker(["network", "rm", network.as_str()]).await?;
        info!(network = network.as_str(), "removed network");
    }
    Ok(())
}
