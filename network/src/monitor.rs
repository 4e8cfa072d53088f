//! Launch forkmon against every beacon API.
//!
//! Monitoring is best effort: callers report a failure here without
//! unwinding the launched network.

use crate::{consensus, Environment, Error, Mount, Port, Service};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::info;

/// Image used when none is configured.
pub const DEFAULT_IMAGE: &str = "ralexstokes/ethereum_consensus_monitor:latest";

/// Service identifier of the monitor.
pub const SERVICE_ID: &str = "forkmon";

/// HTTP port of the monitor.
pub const HTTP_PORT: u16 = 80;

pub const HTTP_PORT_ID: &str = "http";

/// Configuration file name.
pub const CONFIG_FILE: &str = "config.toml";

const CONFIG_MOUNT: &str = "/config";

/// Monitor settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_image")]
    pub image: String,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: default_image(),
        }
    }
}

/// Timing shared by every consensus participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
}

#[derive(Serialize)]
struct Network {
    name: &'static str,
    genesis_time: u64,
    seconds_per_slot: u64,
    slots_per_epoch: u64,
}

#[derive(Serialize)]
struct Endpoint {
    consensus: String,
}

#[derive(Serialize)]
struct Document {
    network: Network,
    endpoints: Vec<Endpoint>,
}

/// Render the forkmon configuration listing every beacon API.
pub fn render(handles: &[consensus::Handle], timing: Timing) -> Result<String, Error> {
    let document = Document {
        network: Network {
            name: "mergenet",
            genesis_time: timing.genesis_time,
            seconds_per_slot: timing.seconds_per_slot,
            slots_per_epoch: timing.slots_per_epoch,
        },
        endpoints: handles
            .iter()
            .map(|handle| Endpoint {
                consensus: handle.beacon_url.clone(),
            })
            .collect(),
    };
    Ok(toml::to_string(&document)?)
}

async fn start<E: Environment>(
    env: &E,
    config: &Config,
    dir: &Path,
    handles: &[consensus::Handle],
    timing: Timing,
) -> Result<String, Error> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(CONFIG_FILE), render(handles, timing)?)?;

    let service = Service {
        image: config.image.clone(),
        entrypoint: None,
        command: vec![
            "--config-path".into(),
            format!("{CONFIG_MOUNT}/{CONFIG_FILE}"),
            "--port".into(),
            HTTP_PORT.to_string(),
        ],
        ports: vec![Port::tcp(HTTP_PORT_ID, HTTP_PORT, true)],
        mounts: vec![Mount::read_only(dir, CONFIG_MOUNT)],
        env: Vec::new(),
    };
    let endpoints = env.launch(SERVICE_ID, move |_| service).await?;
    Ok(format!("http://{}", endpoints.public(HTTP_PORT_ID)?))
}

/// Launch forkmon, returning its public URL.
///
/// Any failure is wrapped in [Error::MonitorLaunch].
pub async fn launch<E: Environment>(
    env: &E,
    config: &Config,
    dir: &Path,
    handles: &[consensus::Handle],
    timing: Timing,
) -> Result<String, Error> {
    let url = start(env, config, dir, handles, timing)
        .await
        .map_err(|err| Error::MonitorLaunch(Box::new(err)))?;
    info!(%url, endpoints = handles.len(), "launched monitor");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks;
    use commonware_macros::{test_async, test_traced};

    const TIMING: Timing = Timing {
        genesis_time: 1_650_000_000,
        seconds_per_slot: 12,
        slots_per_epoch: 32,
    };

    fn handles(count: usize) -> Vec<consensus::Handle> {
        (0..count)
            .map(|index| consensus::Handle {
                id: consensus::service_id(index, consensus::Kind::Teku),
                ip: format!("172.16.0.{}", 20 + index).parse().unwrap(),
                enr: format!("enr:-{index}"),
                beacon_url: format!("http://172.16.0.{}:4000", 20 + index),
                public_beacon_url: format!("http://127.0.0.1:{}", 5000 + index),
                validator: None,
            })
            .collect()
    }

    #[test_traced]
    fn test_render() {
        let rendered = render(&handles(2), TIMING).unwrap();
        let parsed: toml::Value = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed["network"]["genesis_time"].as_integer(), Some(1_650_000_000));
        assert_eq!(parsed["network"]["seconds_per_slot"].as_integer(), Some(12));
        let endpoints = parsed["endpoints"].as_array().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(
            endpoints[1]["consensus"].as_str(),
            Some("http://172.16.0.21:4000")
        );
    }

    #[test_async]
    async fn test_launch() {
        let env = mocks::Environment::default();
        let dir = tempfile::tempdir().unwrap();
        let url = launch(&env, &Config::default(), dir.path(), &handles(3), TIMING)
            .await
            .unwrap();
        assert!(url.starts_with("http://127.0.0.1:"));
        assert!(dir.path().join(CONFIG_FILE).exists());

        let service = env.launched(SERVICE_ID).unwrap();
        assert_eq!(service.image, DEFAULT_IMAGE);
        assert_eq!(service.mounts[0].source, dir.path());
    }

    #[test_async]
    async fn test_launch_failure_wrapped() {
        let env = mocks::Environment::default();
        env.fail_launch(SERVICE_ID);
        let dir = tempfile::tempdir().unwrap();
        let err = launch(&env, &Config::default(), dir.path(), &handles(1), TIMING)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MonitorLaunch(_)));
    }
}
