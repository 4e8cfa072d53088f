//! Launch lighthouse (a beacon node followed by a validator client).

use super::{
    mounts, ports, start, Handle, Kind, Pairing, Setup, DATA_DIR, DISCOVERY_PORT, FEE_RECIPIENT,
    GENESIS_MOUNT, HTTP_PORT, JWT_MOUNT, KEYSTORE_MOUNT,
};
use crate::{Environment, Error, LogLevel, Mount, Role, Service};
use mergenet_genesis::{
    keystore::{KEYS_DIR, SECRETS_DIR},
    JWT_FILE,
};
use std::net::IpAddr;
use tracing::info;

/// Image used when none is configured.
pub const DEFAULT_IMAGE: &str = "sigp/lighthouse:v2.2.1";

fn level(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Launches lighthouse participants.
#[derive(Clone)]
pub struct Launcher<E> {
    setup: Setup<E>,
}

impl<E: Environment> Launcher<E> {
    pub fn new(setup: Setup<E>) -> Self {
        Self { setup }
    }

    fn beacon(&self, ip: IpAddr, bootnode: Option<&str>, pairing: &Pairing) -> Service {
        let participant = &self.setup.participant;
        let mut command = vec![
            "lighthouse".to_string(),
            "beacon_node".into(),
            format!("--debug-level={}", level(participant.log_level)),
            format!("--datadir={DATA_DIR}"),
            format!("--testnet-dir={GENESIS_MOUNT}"),
            "--disable-enr-auto-update".into(),
            format!("--enr-address={ip}"),
            format!("--enr-udp-port={DISCOVERY_PORT}"),
            format!("--enr-tcp-port={DISCOVERY_PORT}"),
            "--listen-address=0.0.0.0".into(),
            format!("--port={DISCOVERY_PORT}"),
            "--http".into(),
            "--http-address=0.0.0.0".into(),
            format!("--http-port={HTTP_PORT}"),
            "--http-allow-sync-stalled".into(),
            "--disable-packet-filter".into(),
            "--enable-private-discovery".into(),
            "--subscribe-all-subnets".into(),
            format!("--execution-endpoints={}", pairing.execution.engine_url),
            format!("--execution-jwt={JWT_MOUNT}/{JWT_FILE}"),
            format!("--suggested-fee-recipient={FEE_RECIPIENT}"),
        ];
        if let Some(bootnode) = bootnode {
            command.push(format!("--boot-nodes={bootnode}"));
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

    fn validator(&self, beacon: &Handle, pairing: &Pairing) -> Service {
        let participant = &self.setup.participant;
        let command = vec![
            "lighthouse".to_string(),
            "validator_client".into(),
            format!("--debug-level={}", level(participant.log_level)),
            format!("--testnet-dir={GENESIS_MOUNT}"),
            format!("--validators-dir={KEYSTORE_MOUNT}/{KEYS_DIR}"),
            format!("--secrets-dir={KEYSTORE_MOUNT}/{SECRETS_DIR}"),
            "--init-slashing-protection".into(),
            format!("--beacon-nodes={}", beacon.beacon_url),
            format!("--suggested-fee-recipient={FEE_RECIPIENT}"),
        ];

        let mut mounts = mounts(&self.setup);
        mounts.push(Mount::writable(&pairing.keystore.dir, KEYSTORE_MOUNT));
        Service {
            image: participant.image.clone(),
            entrypoint: None,
            command,
            ports: Vec::new(),
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
        let mut handle = start(&self.setup.env, index, Kind::Lighthouse, &role, |ip| {
            self.beacon(ip, bootnode.as_deref(), &pairing)
        })
        .await?;

        let id = format!("{}-validator", handle.id);
        let service = self.validator(&handle, &pairing);
        self.setup.env.launch(&id, move |_| service).await?;
        info!(index, service = %id, validators = pairing.keystore.public_keys.len(), "launched validator client");
        handle.validator = Some(id);
        Ok(handle)
    }
}
