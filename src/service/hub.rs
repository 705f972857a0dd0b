use crate::cloud_api::{CloudClient, HubCloud};
use crate::config::{HubArguments, HubConfig};
use crate::lan_api::{CommandTransport, HubLink, HubLocator};
use crate::service::energy::EnergyPoller;
use crate::service::publisher::{ChannelPublisher, Event, Publisher};
use crate::service::registry::DeviceRegistry;
use crate::service::scene::SceneRunner;
use crate::service::scheduler::{PollIntervals, PollingScheduler};
use crate::service::session::Session;
use crate::service::store::{EnergyHistoryStore, SqliteEnergyStore};
use crate::settings::{ReloadableSettings, StaticSettings};
use async_channel::Receiver;
use std::sync::Arc;

/// The collaborators every component is built from
pub struct HubParts {
    pub config: HubConfig,
    pub settings: Arc<ReloadableSettings>,
    pub cloud: Arc<dyn HubCloud>,
    pub transport: Arc<dyn CommandTransport>,
    pub store: Arc<dyn EnergyHistoryStore>,
    pub publisher: Arc<dyn Publisher>,
}

/// The wired up component graph
pub struct Hub {
    pub settings: Arc<ReloadableSettings>,
    pub session: Arc<Session>,
    pub registry: Arc<DeviceRegistry>,
    pub scenes: SceneRunner,
    pub energy: Arc<EnergyPoller>,
    pub scheduler: Arc<PollingScheduler>,
}

impl Hub {
    pub fn new(parts: HubParts, intervals: PollIntervals) -> Self {
        let session = Arc::new(Session::new(
            parts.config,
            parts.cloud.clone(),
            parts.settings.clone(),
        ));
        let registry = Arc::new(DeviceRegistry::new(
            session.clone(),
            parts.cloud.clone(),
            parts.transport,
            parts.settings.clone(),
            parts.publisher.clone(),
        ));
        let energy = Arc::new(EnergyPoller::new(
            session.clone(),
            registry.clone(),
            parts.cloud,
            parts.store,
            parts.publisher.clone(),
        ));
        let scheduler = Arc::new(PollingScheduler::new(
            registry.clone(),
            energy.clone(),
            parts.publisher,
            intervals,
        ));
        Self {
            settings: parts.settings,
            session,
            scenes: SceneRunner::new(registry.clone()),
            registry,
            energy,
            scheduler,
        }
    }

    /// Builds the production graph from the command line and environment.
    /// Events are delivered on the returned channel.
    pub fn from_args(
        args: &HubArguments,
        intervals: PollIntervals,
    ) -> anyhow::Result<(Self, Receiver<Event>)> {
        let settings = Arc::new(ReloadableSettings::new(args.settings()?));

        let mut link = HubLink::new(HubLocator::new(settings.clone()))
            .with_port(args.hub_port()?)
            .with_timeouts(args.discovery_timeout(), args.send_timeout());
        if let Some(addr) = args.hub_address {
            link = link.with_address(addr);
        }

        let db = args.energy_db()?;
        log::trace!("energy history is kept in {db:?}");
        let (publisher, events) = ChannelPublisher::new();

        let hub = Self::new(
            HubParts {
                config: args.hub_config()?,
                settings,
                cloud: Arc::new(CloudClient::new(args.cloud_url()?)),
                transport: Arc::new(link),
                store: Arc::new(SqliteEnergyStore::open(&db)?),
                publisher: Arc::new(publisher),
            },
            intervals,
        );
        Ok((hub, events))
    }

    /// Swaps in a new configuration and settings. Cached credentials are
    /// dropped and the blacklist is re-evaluated against the new settings.
    pub async fn reload(&self, config: HubConfig, settings: StaticSettings) {
        self.settings.replace(settings);
        self.session.replace_config(config).await;
        self.registry.reapply_blacklist().await;
        log::info!("configuration reloaded");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::settings::SettingKind;
    use crate::testing::*;

    #[tokio::test]
    async fn graph_shares_one_registry() {
        let key = test_key();
        let cloud = Arc::new(FakeCloud::default());
        let transport = Arc::new(RecordingTransport::default());
        cloud.queue_sync(vec![
            device_record(&key, 1, "Meter", 238, &[]),
            scene_record(
                &key,
                2,
                "All on",
                &[crate::service::device::SceneEntity {
                    id: 5,
                    function: 0,
                    value: 1,
                }],
            ),
        ]);
        let hub = Hub::new(
            HubParts {
                config: test_config(),
                settings: Arc::new(ReloadableSettings::new(StaticSettings::new())),
                cloud: cloud.clone(),
                transport: transport.clone(),
                store: Arc::new(MemoryEnergyStore::new()),
                publisher: Arc::new(RecordingPublisher::default()),
            },
            PollIntervals::default(),
        );

        hub.registry.refresh().await.unwrap();
        assert_eq!(hub.energy.snapshot().energy_module_id, Some(1));
        hub.scenes.execute(2).await.unwrap();
        assert_eq!(transport.sent(), 1);
    }

    #[tokio::test]
    async fn reload_reapplies_blacklist_and_drops_credentials() {
        let key = test_key();
        let cloud = Arc::new(FakeCloud::default());
        cloud.queue_sync(vec![device_record(&key, 5, "Lamp", 1, &[0])]);
        let hub = Hub::new(
            HubParts {
                config: test_config(),
                settings: Arc::new(ReloadableSettings::new(StaticSettings::new())),
                cloud: cloud.clone(),
                transport: Arc::new(RecordingTransport::default()),
                store: Arc::new(MemoryEnergyStore::new()),
                publisher: Arc::new(RecordingPublisher::default()),
            },
            PollIntervals::default(),
        );
        hub.registry.refresh().await.unwrap();
        assert!(hub.registry.get_device(5).unwrap().blacklisted.is_none());

        let mut settings = StaticSettings::new();
        settings.push(SettingKind::DeviceBlacklist, "5");
        hub.reload(HubConfig::default(), settings).await;

        let lamp = hub.registry.get_device(5).unwrap();
        assert_eq!(lamp.blacklisted.map(|s| s.id), Some("device:5".to_string()));
        assert!(!hub.session.is_configured().await);
        assert!(hub.session.credentials().await.is_err());
    }
}
