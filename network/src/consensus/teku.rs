//! Launch teku (beacon node and validators in one process).

use super::{
    mounts, ports, start, Handle, Kind, Pairing, Setup, DATA_DIR, DISCOVERY_PORT, FEE_RECIPIENT,
    GENESIS_MOUNT, HTTP_PORT, JWT_MOUNT, KEYSTORE_MOUNT,
};
use crate::{Environment, Error, LogLevel, Mount, Role, Service};
use mergenet_genesis::{
    consensus::{CONFIG_FILE, STATE_FILE},
    keystore::{TEKU_KEYS_DIR, TEKU_SECRETS_DIR},
    JWT_FILE,
};
use std::net::IpAddr;

/// Image used when none is configured.
pub const DEFAULT_IMAGE: &str = "consensys/teku:22.4.0";

fn level(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "ERROR",
        LogLevel::Warn => "WARN",
        LogLevel::Info => "INFO",
        LogLevel::Debug => "DEBUG",
        LogLevel::Trace => "TRACE",
    }
}

/// Launches teku participants.
#[derive(Clone)]
pub struct Launcher<E> {
    setup: Setup<E>,
}

impl<E: Environment> Launcher<E> {
    pub fn new(setup: Setup<E>) -> Self {
        Self { setup }
    }

    fn service(&self, ip: IpAddr, bootnode: Option<&str>, pairing: &Pairing) -> Service {
        let participant = &self.setup.participant;
        let mut command = vec![
            format!("--logging={}", level(participant.log_level)),
            format!("--network={GENESIS_MOUNT}/{CONFIG_FILE}"),
            format!("--initial-state={GENESIS_MOUNT}/{STATE_FILE}"),
            format!("--data-path={DATA_DIR}"),
            "--data-storage-mode=PRUNE".into(),
            "--p2p-enabled=true".into(),
            "--p2p-discovery-enabled=true".into(),
            format!("--p2p-port={DISCOVERY_PORT}"),
            format!("--p2p-advertised-ip={ip}"),
            "--rest-api-enabled=true".into(),
            "--rest-api-interface=0.0.0.0".into(),
            format!("--rest-api-port={HTTP_PORT}"),
            "--rest-api-host-allowlist=*".into(),
            format!("--ee-endpoint={}", pairing.execution.engine_url),
            format!("--ee-jwt-secret-file={JWT_MOUNT}/{JWT_FILE}"),
            format!(
                "--validator-keys={KEYSTORE_MOUNT}/{TEKU_KEYS_DIR}:{KEYSTORE_MOUNT}/{TEKU_SECRETS_DIR}"
            ),
            format!("--validators-proposer-default-fee-recipient={FEE_RECIPIENT}"),
        ];
        if let Some(bootnode) = bootnode {
            command.push(format!("--p2p-discovery-bootnodes={bootnode}"));
        }
        command.extend(participant.extra_params.iter().cloned());

        let mut mounts = mounts(&self.setup);
        mounts.push(Mount::read_only(&pairing.keystore.dir, KEYSTORE_MOUNT));
        Service {
            image: participant.image.clone(),
            entrypoint: None,
            command,
            ports: ports(),
            mounts,
            env: Vec::new(),
        }
    }
}

impl<E: Environment> crate::Launcher for Launcher<E> {
    type Input = Pairing;
    type Handle = Handle;

    async fn launch(&self, index: usize, role: Role<Handle>, pairing: Pairing) -> Result<Handle, Error> {
        let bootnode = role.peer().map(|peer| peer.enr.clone());
        start(&self.setup.env, index, Kind::Teku, &role, |ip| {
            self.service(ip, bootnode.as_deref(), &pairing)
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
        let (_, setup) = mocks::consensus_setup(Kind::Teku);
        let launcher = Launcher::new(setup);
        let pairing = Pairing {
            execution: mocks::execution_handles(1).remove(0),
            keystore: mocks::artifacts(1).keystores.remove(0),
        };

        let service = launcher.service("172.16.0.4".parse().unwrap(), None, &pairing);
        let command = service.command.join(" ");
        assert!(command.contains("--network=/genesis/config.yaml"));
        assert!(command.contains("--initial-state=/genesis/genesis.ssz"));
        assert!(command.contains("--p2p-advertised-ip=172.16.0.4"));
        assert!(command.contains("--validator-keys=/validator-keys/teku-keys:/validator-keys/teku-secrets"));
        assert!(command.contains(&format!("--ee-endpoint={}", pairing.execution.engine_url)));
        assert_eq!(service.mounts.len(), 3);
        assert!(service.mounts.iter().all(|mount| mount.read_only));
    }
}
