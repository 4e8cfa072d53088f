//! Helpers for driving the `docker` CLI.

use crate::Error;
use mergenet_network::{Port, Service, MAX_POLL_ATTEMPTS, RETRY_INTERVAL};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::{process::Command, time::sleep};

/// Label attached to every resource of a deployment.
pub const TAG_LABEL: &str = "mergenet.tag";

/// Name of the bridge network of deployment `tag`.
pub fn network_name(tag: &str) -> String {
    format!("mergenet-{tag}")
}

/// Name of the container running service `id` in deployment `tag`.
pub fn container_name(tag: &str, id: &str) -> String {
    format!("mergenet-{tag}-{id}")
}

/// Address of the `n`th service in `subnet` (skipping the network and gateway addresses).
pub fn address(subnet: Ipv4Addr, n: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(subnet).saturating_add(n).saturating_add(2))
}

/// Run `docker` with `args`, returning its standard output.
pub async fn docker<I, S>(args: I) -> Result<String, Error>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = Command::new("docker").args(args).output().await?;
    if !output.status.success() {
        return Err(Error::Docker(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Wait until container `name` is running.
pub async fn wait_running(name: &str) -> Result<(), Error> {
    for attempt in 1..=MAX_POLL_ATTEMPTS {
        let state = docker(["inspect", "--format={{.State.Status}}", name]).await?;
        match state.as_str() {
            "running" => return Ok(()),
            "exited" | "dead" => {
                return Err(Error::Docker(format!("{name} stopped during startup")));
            }
            _ if attempt < MAX_POLL_ATTEMPTS => sleep(RETRY_INTERVAL).await,
            _ => {}
        }
    }
    Err(Error::Docker(format!("{name} did not start")))
}

fn port_spec(port: &Port) -> String {
    format!("{}/{}", port.number, port.protocol)
}

/// Arguments of `docker run` launching `service` as `name`.
pub fn run_args(tag: &str, network: &str, name: &str, ip: IpAddr, service: &Service) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--detach".into(),
        format!("--name={name}"),
        format!("--network={network}"),
        format!("--ip={ip}"),
        format!("--label={TAG_LABEL}={tag}"),
    ];
    for port in service.ports.iter().filter(|port| port.published) {
        args.push(format!("--publish=127.0.0.1::{}", port_spec(port)));
    }
    for mount in &service.mounts {
        let mut volume = format!("--volume={}:{}", mount.source.display(), mount.target);
        if mount.read_only {
            volume.push_str(":ro");
        }
        args.push(volume);
    }
    for (key, value) in &service.env {
        args.push(format!("--env={key}={value}"));
    }
    if let Some(entrypoint) = &service.entrypoint {
        args.push(format!("--entrypoint={entrypoint}"));
    }
    args.push(service.image.clone());
    args.extend(service.command.iter().cloned());
    args
}

/// Host address bound to `port` of container `name`.
pub async fn published(name: &str, port: &Port) -> Result<SocketAddr, Error> {
    let output = docker(["port", name, &port_spec(port)]).await?;
    parse_published(&output)
        .ok_or_else(|| Error::Docker(format!("{name} does not publish {}", port_spec(port))))
}

/// First IPv4 binding reported by `docker port`.
pub fn parse_published(output: &str) -> Option<SocketAddr> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<SocketAddr>().ok())
        .find(SocketAddr::is_ipv4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use mergenet_network::Mount;

    #[test_traced]
    fn test_address() {
        let subnet = Ipv4Addr::new(172, 28, 0, 0);
        assert_eq!(address(subnet, 0), Ipv4Addr::new(172, 28, 0, 2));
        assert_eq!(address(subnet, 254), Ipv4Addr::new(172, 28, 1, 0));
    }

    #[test_traced]
    fn test_run_args() {
        let service = Service {
            image: "ethereum/client-go:v1.10.17".into(),
            entrypoint: Some("sh".into()),
            command: vec!["-c".into(), "geth version".into()],
            ports: vec![Port::tcp("rpc", 8545, true), Port::udp("udp-discovery", 30303)],
            mounts: vec![
                Mount::read_only("/tmp/genesis", "/genesis"),
                Mount::writable("/tmp/keys", "/keys"),
            ],
            env: vec![("RUST_LOG".into(), "info".into())],
        };
        let args = run_args(
            "abc",
            "mergenet-abc",
            "mergenet-abc-el-0-geth",
            "172.28.0.2".parse().unwrap(),
            &service,
        );
        assert_eq!(
            args,
            vec![
                "run",
                "--detach",
                "--name=mergenet-abc-el-0-geth",
                "--network=mergenet-abc",
                "--ip=172.28.0.2",
                "--label=mergenet.tag=abc",
                "--publish=127.0.0.1::8545/tcp",
                "--volume=/tmp/genesis:/genesis:ro",
                "--volume=/tmp/keys:/keys",
                "--env=RUST_LOG=info",
                "--entrypoint=sh",
                "ethereum/client-go:v1.10.17",
                "-c",
                "geth version",
            ]
        );
    }

    #[test_traced]
    fn test_parse_published() {
        assert_eq!(
            parse_published("[::]:49153\n0.0.0.0:49153\n"),
            Some("0.0.0.0:49153".parse().unwrap())
        );
        assert_eq!(
            parse_published("127.0.0.1:32768"),
            Some("127.0.0.1:32768".parse().unwrap())
        );
        assert_eq!(parse_published(""), None);
    }
}
