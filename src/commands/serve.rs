use crate::service::hub::Hub;
use crate::service::scheduler::{Concern, PollIntervals};
use crate::version_info::homehub_version;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;

#[derive(clap::Parser, Debug)]
pub struct ServeCommand {
    /// Re-signal interest in every concern this often, in seconds,
    /// so that polling continues without any other consumer.
    /// Without it, polling stops once the initial interest lapses.
    #[arg(long)]
    keep_alive: Option<u64>,

    /// How often to refresh the device list, in seconds
    #[arg(long, default_value_t = 300)]
    device_interval: u64,

    /// How often to read the live energy meter, in seconds
    #[arg(long, default_value_t = 10)]
    energy_live_interval: u64,

    /// How often to fetch the energy history, in seconds
    #[arg(long, default_value_t = 3600)]
    energy_history_interval: u64,
}

impl ServeCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        log::info!("Starting service. version {}", homehub_version());

        let intervals = PollIntervals {
            devices: Duration::from_secs(self.device_interval.max(1)),
            energy_live: Duration::from_secs(self.energy_live_interval.max(1)),
            energy_history: Duration::from_secs(self.energy_history_interval.max(1)),
        };
        let (hub, events) = Hub::from_args(&args.hub_args, intervals)?;
        let hub = Arc::new(hub);

        if !hub.session.is_configured().await {
            log::warn!(
                "No account credentials are configured; \
                set HOMEHUB_EMAIL and HOMEHUB_PASSWORD or pass --hub-email and --hub-password"
            );
        }

        // Get the device list before the energy concerns need the module id
        hub.registry.refresh().await.ok();
        if let Some(err) = hub.registry.status() {
            log::error!("initial device refresh: {err}");
        }
        for device in hub.registry.devices() {
            log::info!("{device}");
        }
        for scene in hub.registry.scenes() {
            log::info!("scene {} ({})", scene.name, scene.id);
        }

        for concern in Concern::iter() {
            hub.scheduler.signal_interest(concern);
        }
        let _tasks = hub.scheduler.spawn();

        if let Some(secs) = self.keep_alive {
            let scheduler = hub.scheduler.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
                loop {
                    interval.tick().await;
                    for concern in Concern::iter() {
                        scheduler.signal_interest(concern);
                    }
                }
            });
        }

        #[cfg(unix)]
        reload_on_hangup(hub.clone(), args)?;

        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => log::info!("{json}"),
                Err(err) => log::error!("serializing {event:?}: {err:#}"),
            }
        }

        Ok(())
    }
}

/// Re-reads `.env` and the environment whenever SIGHUP arrives, so that
/// credentials and blacklists can change without a restart.
#[cfg(unix)]
fn reload_on_hangup(hub: Arc<Hub>, args: &crate::Args) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let hub_args = args.hub_args.clone();
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            log::info!("SIGHUP received, reloading configuration");
            if let Err(err) = dotenvy::dotenv_override() {
                log::trace!("no .env to reload: {err:#}");
            }
            let reloaded = hub_args
                .hub_config()
                .and_then(|config| Ok((config, hub_args.settings()?)));
            match reloaded {
                Ok((config, settings)) => hub.reload(config, settings).await,
                Err(err) => log::error!("keeping the previous configuration: {err:#}"),
            }
        }
    });
    Ok(())
}
