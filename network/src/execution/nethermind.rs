//! Launch nethermind.

use super::{
    mounts, ports, start, Handle, Kind, Setup, DATA_DIR, DISCOVERY_PORT, ENGINE_PORT,
    GENESIS_MOUNT, JWT_MOUNT, RPC_PORT,
};
use crate::{Environment, Error, LogLevel, Role, Service};
use mergenet_genesis::{execution::NETHERMIND_CHAINSPEC_FILE, JWT_FILE};
use std::net::IpAddr;

/// Image used when none is configured.
pub const DEFAULT_IMAGE: &str = "nethermind/nethermind:1.13.0";

const MODULES: &str = "net,eth,consensus,subscribe,web3,admin";

fn level(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "ERROR",
        LogLevel::Warn => "WARN",
        LogLevel::Info => "INFO",
        LogLevel::Debug => "DEBUG",
        LogLevel::Trace => "TRACE",
    }
}

/// Launches nethermind participants.
#[derive(Clone)]
pub struct Launcher<E> {
    setup: Setup<E>,
}

impl<E: Environment> Launcher<E> {
    pub fn new(setup: Setup<E>) -> Self {
        Self { setup }
    }

    fn service(&self, ip: IpAddr, bootnode: Option<&str>) -> Service {
        let participant = &self.setup.participant;
        let mut command = vec![
            "--config=none.cfg".to_string(),
            format!("--datadir={DATA_DIR}"),
            format!("--Init.ChainSpecPath={GENESIS_MOUNT}/{NETHERMIND_CHAINSPEC_FILE}"),
            "--Init.WebSocketsEnabled=true".into(),
            "--Init.DiagnosticMode=None".into(),
            "--JsonRpc.Enabled=true".into(),
            format!("--JsonRpc.EnabledModules={MODULES}"),
            "--JsonRpc.Host=0.0.0.0".into(),
            format!("--JsonRpc.Port={RPC_PORT}"),
            "--JsonRpc.EngineHost=0.0.0.0".into(),
            format!("--JsonRpc.EnginePort={ENGINE_PORT}"),
            format!("--JsonRpc.JwtSecretFile={JWT_MOUNT}/{JWT_FILE}"),
            format!("--Network.ExternalIp={ip}"),
            format!("--Network.DiscoveryPort={DISCOVERY_PORT}"),
            format!("--Network.P2PPort={DISCOVERY_PORT}"),
            "--Merge.Enabled=true".into(),
            format!("--log={}", level(participant.log_level)),
        ];
        if let Some(bootnode) = bootnode {
            command.push(format!("--Discovery.Bootnodes={bootnode}"));
        }
        command.extend(participant.extra_params.iter().cloned());

        Service {
            image: participant.image.clone(),
            entrypoint: None,
            command,
            ports: ports(),
            mounts: mounts(&self.setup),
            env: Vec::new(),
        }
    }
}

impl<E: Environment> crate::Launcher for Launcher<E> {
    type Input = ();
    type Handle = Handle;

    async fn launch(&self, index: usize, role: Role<Handle>, _: ()) -> Result<Handle, Error> {
        let bootnode = role.peer().map(|peer| peer.enode.clone());
        start(&self.setup.env, index, Kind::Nethermind, &role, |ip| {
            self.service(ip, bootnode.as_deref())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks;
    use commonware_macros::test_traced;

    #[test_traced]
    fn test_service() {
        let (_, setup) = mocks::execution_setup(Kind::Nethermind);
        let launcher = Launcher::new(setup);

        let ip: IpAddr = "172.16.0.3".parse().unwrap();
        let service = launcher.service(ip, Some("enode://abc@172.16.0.2:30303"));
        assert_eq!(service.entrypoint, None);
        assert!(service
            .command
            .contains(&"--Init.ChainSpecPath=/genesis/chainspec.json".to_string()));
        assert!(service
            .command
            .contains(&"--Network.ExternalIp=172.16.0.3".to_string()));
        assert!(service
            .command
            .contains(&"--Discovery.Bootnodes=enode://abc@172.16.0.2:30303".to_string()));
        assert!(service.command.contains(&"--log=INFO".to_string()));
    }
}
