use crate::lan_api::HubLocator;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
pub struct DiscoverCommand {
    /// Send the discovery datagram here instead of the broadcast
    /// address, eg: a subnet broadcast such as 192.168.1.255:2012
    #[arg(long)]
    target: Option<SocketAddr>,
}

impl DiscoverCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let settings = Arc::new(args.hub_args.settings()?);
        let mut locator = HubLocator::new(settings);
        if let Some(target) = self.target {
            locator = locator.with_target(target);
        }

        let timeout = args.hub_args.discovery_timeout();
        eprintln!("Waiting {timeout:?} for the hub to answer...");
        let addr = locator.discover(timeout).await?;
        println!("{addr}");
        Ok(())
    }
}
