use clap::Parser;
use std::str::FromStr;

mod cloud_api;
mod command;
mod commands;
mod config;
mod crypto;
mod error;
mod lan_api;
mod service;
mod settings;
#[cfg(test)]
mod testing;
mod version_info;

#[derive(clap::Parser, Debug)]
#[command(version = version_info::homehub_version())]
pub struct Args {
    #[command(flatten)]
    hub_args: config::HubArguments,

    #[command(subcommand)]
    cmd: SubCommand,
}

#[derive(clap::Parser, Debug)]
enum SubCommand {
    /// Poll the hub and the cloud, logging every state change
    Serve(commands::serve::ServeCommand),
    /// Find the hub on the local network
    Discover(commands::discover::DiscoverCommand),
    /// Show the devices and scenes known to the hub
    List(commands::list::ListCommand),
    /// Switch, dim or color a device
    Control(commands::control::ControlCommand),
    /// Run a scene
    Scene(commands::scene::SceneCommand),
    /// Read the energy module
    Energy(commands::energy::EnergyCommand),
    /// Decode a captured command datagram or payload
    Decode(commands::decode::DecodeCommand),
    /// Encrypt text with the home's AES key
    Encrypt(commands::encrypt::EncryptCommand),
}

pub fn opt_env_var<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    <T as FromStr>::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(p) => {
            Ok(Some(p.parse().map_err(|err| {
                anyhow::anyhow!("parsing ${name}: {err:#}")
            })?))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => anyhow::bail!("${name} is invalid: {err:#}"),
    }
}

#[tokio::main(worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    color_backtrace::install();
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loading environment overrides from {path:?}");
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("homehub=info"))
        .init();

    let args = Args::parse();

    match &args.cmd {
        SubCommand::Serve(cmd) => cmd.run(&args).await,
        SubCommand::Discover(cmd) => cmd.run(&args).await,
        SubCommand::List(cmd) => cmd.run(&args).await,
        SubCommand::Control(cmd) => cmd.run(&args).await,
        SubCommand::Scene(cmd) => cmd.run(&args).await,
        SubCommand::Energy(cmd) => cmd.run(&args).await,
        SubCommand::Decode(cmd) => cmd.run(&args).await,
        SubCommand::Encrypt(cmd) => cmd.run(&args).await,
    }
}
