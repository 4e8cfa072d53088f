//! Launch geth.

use super::{
    mounts, ports, start, Handle, Kind, Setup, DATA_DIR, DISCOVERY_PORT, ENGINE_PORT,
    GENESIS_MOUNT, JWT_MOUNT, RPC_PORT,
};
use crate::{Environment, Error, LogLevel, Role, Service};
use mergenet_genesis::{execution::GETH_GENESIS_FILE, JWT_FILE};
use std::net::IpAddr;

/// Image used when none is configured.
pub const DEFAULT_IMAGE: &str = "ethereum/client-go:v1.10.17";

const APIS: &str = "admin,engine,net,eth,web3,debug";

fn verbosity(level: LogLevel) -> u8 {
    match level {
        LogLevel::Error => 1,
        LogLevel::Warn => 2,
        LogLevel::Info => 3,
        LogLevel::Debug => 4,
        LogLevel::Trace => 5,
    }
}

/// Launches geth participants.
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
        let init = format!("geth init --datadir={DATA_DIR} {GENESIS_MOUNT}/{GETH_GENESIS_FILE}");

        let mut run = vec![
            "geth".to_string(),
            format!("--datadir={DATA_DIR}"),
            format!("--networkid={}", self.setup.genesis.chain_id),
            format!("--verbosity={}", verbosity(participant.log_level)),
            "--http".into(),
            "--http.addr=0.0.0.0".into(),
            format!("--http.port={RPC_PORT}"),
            format!("--http.api={APIS}"),
            "--http.vhosts=*".into(),
            "--http.corsdomain=*".into(),
            "--authrpc.addr=0.0.0.0".into(),
            format!("--authrpc.port={ENGINE_PORT}"),
            "--authrpc.vhosts=*".into(),
            format!("--authrpc.jwtsecret={JWT_MOUNT}/{JWT_FILE}"),
            "--syncmode=full".into(),
            format!("--port={DISCOVERY_PORT}"),
            format!("--nat=extip:{ip}"),
        ];
        if let Some(bootnode) = bootnode {
            run.push(format!("--bootnodes={bootnode}"));
        }
        run.extend(participant.extra_params.iter().cloned());

        Service {
            image: participant.image.clone(),
            entrypoint: Some("sh".into()),
            command: vec!["-c".into(), format!("{init} && exec {}", run.join(" "))],
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
        start(&self.setup.env, index, Kind::Geth, &role, |ip| {
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
        let (_, mut setup) = mocks::execution_setup(Kind::Geth);
        setup.participant.log_level = LogLevel::Debug;
        setup.participant.extra_params = vec!["--metrics".into()];
        let launcher = Launcher::new(setup);

        let ip: IpAddr = "172.16.0.2".parse().unwrap();
        let service = launcher.service(ip, Some("enode://abc@172.16.0.1:30303"));
        assert_eq!(service.entrypoint.as_deref(), Some("sh"));
        let script = &service.command[1];
        assert!(script.starts_with("geth init --datadir=/data /genesis/genesis.json && exec geth"));
        assert!(script.contains("--networkid=3151908"));
        assert!(script.contains("--verbosity=4"));
        assert!(script.contains("--nat=extip:172.16.0.2"));
        assert!(script.contains("--authrpc.jwtsecret=/jwt/jwtsecret"));
        assert!(script.contains("--bootnodes=enode://abc@172.16.0.1:30303"));
        assert!(script.ends_with("--metrics"));
        assert_eq!(service.mounts.len(), 2);

        let bootnode = launcher.service(ip, None);
        assert!(!bootnode.command[1].contains("--bootnodes"));
    }
}
