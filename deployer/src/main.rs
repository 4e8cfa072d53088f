//! mergenet CLI

use clap::{Arg, ArgAction, Command};
use mergenet_deployer::{docker, now, run, Config, Error, GENESIS_DIR};
use std::{fs, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

const GENESIS_CMD: &str = "genesis";

fn load(path: &PathBuf) -> Result<Config, Error> {
    Config::parse(&fs::read_to_string(path)?)
}

/// Generate genesis and keystores without launching anything.
fn genesis(config: &PathBuf, output: &PathBuf) -> Result<(), Error> {
    let config = load(config)?;
    let genesis = config.genesis(now()?);
    let artifacts = mergenet_genesis::generate(&genesis, output)?;
    info!(
        path = ?output,
        genesis_time = artifacts.genesis_time,
        keystores = artifacts.keystores.len(),
        "generated genesis"
    );
    Ok(())
}

/// Bootstrap a network on the local Docker daemon, printing the response.
async fn create(config: &PathBuf, workdir: &PathBuf, concurrency: Option<usize>) -> Result<(), Error> {
    let mut config = load(config)?;
    if let Some(concurrency) = concurrency {
        config.concurrency = concurrency;
    }
    let workdir = workdir.join(&config.tag);
    info!(tag = config.tag.as_str(), path = ?workdir, "loaded configuration");

    // Cancel on Ctrl-C (launched services are left running)
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("received interrupt, canceling");
                cancel.cancel();
            }
        }
    });

    let context = docker::Context::create(&config.tag).await?;
    let response = run(&context, &config, &workdir, cancel).await?;
    let output = response.to_json()?;
    fs::write(workdir.join("response.json"), &output)?;
    println!("{output}");
    info!(
        tag = context.tag(),
        genesis = ?workdir.join(GENESIS_DIR),
        "bootstrapped network"
    );
    Ok(())
}

/// Entrypoint for the mergenet CLI
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("mergenet")
        .version(crate_version())
        .about("Bootstrap a private multi-client merge testnet.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(GENESIS_CMD)
                .about("Generate execution and consensus genesis (and validator keystores) from a JSON configuration file.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to JSON config file")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .required(true)
                        .help("Directory to write genesis into")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(docker::CMD)
                .about("Launch a testnet (and forkmon) as containers on the local Docker daemon.")
                .subcommand(
                    Command::new(docker::CREATE_CMD)
                        .about("Generate genesis, then launch the execution layer, the consensus layer and forkmon.")
                        .arg(
                            Arg::new("config")
                                .long("config")
                                .required(true)
                                .help("Path to JSON config file")
                                .value_parser(clap::value_parser!(PathBuf)),
                        )
                        .arg(
                            Arg::new("workdir")
                                .long("workdir")
                                .required(true)
                                .help("Directory holding generated files (one subdirectory per tag)")
                                .value_parser(clap::value_parser!(PathBuf)),
                        )
                        .arg(
                            Arg::new("concurrency")
                                .long("concurrency")
                                .help("Maximum followers launched at once (must be >= 1)")
                                .value_parser(clap::builder::RangedU64ValueParser::<usize>::new().range(1..)),
                        ),
                )
                .subcommand(
                    Command::new(docker::DESTROY_CMD)
                        .about("Remove all containers and the network of a deployment.")
                        .arg(
                            Arg::new("tag")
                                .long("tag")
                                .required(true)
                                .help("Deployment tag")
                                .value_parser(clap::value_parser!(String)),
                        ),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    match matches.subcommand() {
        Some((GENESIS_CMD, matches)) => {
            let config = matches.get_one::<PathBuf>("config").unwrap();
            let output = matches.get_one::<PathBuf>("output").unwrap();
            if let Err(e) = genesis(config, output) {
                error!(error=%e, "failed to generate genesis");
            } else {
                return std::process::ExitCode::SUCCESS;
            }
        }
        Some((docker::CMD, docker_matches)) => match docker_matches.subcommand() {
            Some((docker::CREATE_CMD, matches)) => {
                let config = matches.get_one::<PathBuf>("config").unwrap();
                let workdir = matches.get_one::<PathBuf>("workdir").unwrap();
                let concurrency = matches.get_one::<usize>("concurrency").copied();
                if let Err(e) = create(config, workdir, concurrency).await {
                    error!(error=%e, "failed to create network");
                } else {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            Some((docker::DESTROY_CMD, matches)) => {
                let tag = matches.get_one::<String>("tag").unwrap();
                if let Err(e) = docker::destroy(tag).await {
                    error!(error=%e, "failed to destroy network");
                } else {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            Some((cmd, _)) => {
                error!(cmd, "invalid subcommand");
            }
            None => {
                error!("no subcommand provided");
            }
        },
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
        }
        None => {
            error!("no subcommand provided");
        }
    }
    std::process::ExitCode::FAILURE
}
