use crate::cloud_api::HubCloud;
use crate::command::CommandPacket;
use crate::error::HubError;
use crate::lan_api::CommandTransport;
use crate::service::device::{decode_record, decode_status, Device, DeviceCategory, Entity, Scene};
use crate::service::publisher::{Event, Publisher};
use crate::service::session::Session;
use crate::settings::{SettingKind, SettingsLookup};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// One generation of the device and scene lists
#[derive(Default, Clone, Debug, Serialize)]
pub struct RegistrySnapshot {
    pub devices: Vec<Device>,
    pub scenes: Vec<Scene>,
    pub energy_module_id: Option<u32>,
    pub refreshed: Option<DateTime<Utc>>,
}

/// The in-memory view of the hub's devices and scenes.
/// Each refresh builds a brand new snapshot and swaps it in, so readers
/// see either the old or the new generation, never a mix.
pub struct DeviceRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    session: Arc<Session>,
    cloud: Arc<dyn HubCloud>,
    transport: Arc<dyn CommandTransport>,
    settings: Arc<dyn SettingsLookup>,
    publisher: Arc<dyn Publisher>,
    last_error: parking_lot::Mutex<Option<String>>,
}

impl DeviceRegistry {
    pub fn new(
        session: Arc<Session>,
        cloud: Arc<dyn HubCloud>,
        transport: Arc<dyn CommandTransport>,
        settings: Arc<dyn SettingsLookup>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            session,
            cloud,
            transport,
            settings,
            publisher,
            last_error: parking_lot::Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.snapshot.load().devices.clone()
    }

    pub fn scenes(&self) -> Vec<Scene> {
        self.snapshot.load().scenes.clone()
    }

    pub fn get_device(&self, id: u32) -> Option<Device> {
        self.snapshot.load().devices.iter().find(|d| d.id == id).cloned()
    }

    pub fn get_scene(&self, id: u32) -> Option<Scene> {
        self.snapshot.load().scenes.iter().find(|s| s.id == id).cloned()
    }

    pub fn energy_module_id(&self) -> Option<u32> {
        self.snapshot.load().energy_module_id
    }

    /// The error from the most recent refresh, if it failed
    pub fn status(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn record_outcome<T>(&self, result: &Result<T, HubError>) {
        let mut last_error = self.last_error.lock();
        match result {
            Ok(_) => {
                last_error.take();
            }
            Err(err) => {
                last_error.replace(format!("{err:#}"));
            }
        }
    }

    pub async fn refresh(&self) -> Result<(), HubError> {
        let result = self.refresh_impl().await;
        self.record_outcome(&result);
        result
    }

    async fn refresh_impl(&self) -> Result<(), HubError> {
        let creds = self.session.credentials().await?;
        let records = self.cloud.sync(&creds).await.map_err(HubError::upstream)?;

        let mut devices = vec![];
        let mut scenes = vec![];
        let mut energy_module_id = None;

        for record in &records {
            match decode_record(record, &creds.aes_key) {
                Ok(Some(Entity::Device(device))) => {
                    if device.category == DeviceCategory::EnergyModule {
                        energy_module_id = Some(device.id);
                    }
                    devices.push(device);
                }
                Ok(Some(Entity::Scene(scene))) => scenes.push(scene),
                Ok(None) => {}
                Err(err) => {
                    log::warn!("skipping record {}: {err:#}", record.id);
                }
            }
        }

        self.apply_blacklist(&mut devices, &mut scenes).await;
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        scenes.sort_by(|a, b| a.name.cmp(&b.name));

        let (num_devices, num_scenes) = (devices.len(), scenes.len());
        self.snapshot.store(Arc::new(RegistrySnapshot {
            devices,
            scenes,
            energy_module_id,
            refreshed: Some(Utc::now()),
        }));
        log::info!("registry refreshed: {num_devices} devices, {num_scenes} scenes");

        self.publisher.emit(Event::DevicesChanged {
            devices: num_devices,
            scenes: num_scenes,
        });
        Ok(())
    }

    async fn apply_blacklist(&self, devices: &mut [Device], scenes: &mut [Scene]) {
        for device in devices.iter_mut() {
            device.blacklisted = self
                .settings
                .find(SettingKind::DeviceBlacklist, &device.id.to_string())
                .await;
        }
        for scene in scenes.iter_mut() {
            scene.blacklisted = self
                .settings
                .find(SettingKind::SceneBlacklist, &scene.id.to_string())
                .await;
        }
    }

    /// Re-evaluates blacklist flags against the current snapshot,
    /// for use after the blacklist settings changed
    pub async fn reapply_blacklist(&self) {
        let current = self.snapshot.load_full();
        let mut devices = current.devices.clone();
        let mut scenes = current.scenes.clone();
        self.apply_blacklist(&mut devices, &mut scenes).await;

        self.snapshot.rcu(|latest| {
            let mut next = RegistrySnapshot::clone(latest);
            for device in next.devices.iter_mut() {
                if let Some(updated) = devices.iter().find(|d| d.id == device.id) {
                    device.blacklisted = updated.blacklisted.clone();
                }
            }
            for scene in next.scenes.iter_mut() {
                if let Some(updated) = scenes.iter().find(|s| s.id == scene.id) {
                    scene.blacklisted = updated.blacklisted.clone();
                }
            }
            next
        });
    }

    /// Builds a new snapshot with `apply` run against device `id` and
    /// swaps it in. Returns the updated device.
    fn update_device<F: Fn(&mut Device)>(&self, id: u32, apply: F) -> Option<Device> {
        self.snapshot.rcu(|latest| {
            let mut next = RegistrySnapshot::clone(latest);
            if let Some(device) = next.devices.iter_mut().find(|d| d.id == id) {
                apply(device);
            }
            next
        });
        let updated = self.get_device(id);
        if let Some(device) = &updated {
            self.publisher.emit(Event::DeviceUpdated {
                device: device.clone(),
            });
        }
        updated
    }

    /// Re-reads a single device's status from the cloud
    pub async fn refresh_device(&self, id: u32) -> Result<Device, HubError> {
        self.get_device(id).ok_or(HubError::DeviceNotFound(id))?;
        let creds = self.session.credentials().await?;
        let records = self
            .cloud
            .get_multiple(&creds, &[id])
            .await
            .map_err(HubError::upstream)?;
        let record = records
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| HubError::Upstream(format!("no status returned for device {id}")))?;
        let functions = decode_status(record, &creds.aes_key)?;

        self.update_device(id, |device| device.set_functions(functions.clone()))
            .ok_or(HubError::DeviceNotFound(id))
    }

    /// Encodes and sends a single command to the hub
    pub async fn dispatch(
        &self,
        device_id: u32,
        function: u32,
        value: i64,
    ) -> Result<(), HubError> {
        let creds = self.session.credentials().await?;
        let packet = CommandPacket::build(creds.mac, &creds.aes_key, device_id, function, value)?;
        log::trace!("sending function {function}={value} to device {device_id}");
        self.transport.send(packet.into_vec()).await
    }

    fn resolve(&self, id: u32) -> Result<Device, HubError> {
        self.get_device(id).ok_or(HubError::DeviceNotFound(id))
    }

    pub async fn turn_device_on_off(&self, id: u32, on: bool) -> Result<(), HubError> {
        let device = self.resolve(id)?;
        let function =
            device
                .category
                .on_off_function()
                .ok_or_else(|| HubError::DeviceTypeUnknown {
                    id,
                    device_type: device.device_type.to_string(),
                })?;
        let value = if on { 1 } else { 0 };

        log::info!("turning {device} {}", if on { "on" } else { "off" });
        self.update_device(id, |d| d.set_function(function, value));
        self.dispatch(id, function, value).await
    }

    /// Sets the dim level, clamped into the device's range.
    /// The cached level is updated before the hub confirms.
    pub async fn dim_device(&self, id: u32, level: i64) -> Result<(), HubError> {
        let device = self.resolve(id)?;
        let control = device
            .category
            .dim_control()
            .ok_or_else(|| HubError::DeviceNotDimmable {
                id,
                device_type: device.device_type.to_string(),
            })?;
        let level = control.range.clamp(level);

        log::info!("dimming {device} to {level}");
        self.update_device(id, |d| d.set_function(control.function, level));
        self.dispatch(id, control.function, level).await
    }

    pub async fn color_device(&self, id: u32, level: i64) -> Result<(), HubError> {
        let device = self.resolve(id)?;
        let control =
            device
                .category
                .color_control()
                .ok_or_else(|| HubError::DeviceNotColorable {
                    id,
                    device_type: device.device_type.to_string(),
                })?;
        let level = control.range.clamp(level);

        log::info!("setting color of {device} to {level}");
        self.update_device(id, |d| d.set_function(control.function, level));
        self.dispatch(id, control.function, level).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::device::SceneEntity;
    use crate::settings::StaticSettings;
    use crate::testing::*;

    fn ids(registry: &DeviceRegistry) -> Vec<u32> {
        let mut ids: Vec<_> = registry.devices().iter().map(|d| d.id).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn refresh_replaces_rather_than_merges() {
        let key = test_key();
        let harness = Harness::new();
        harness.cloud.queue_sync(vec![
            device_record(&key, 1, "One", 1, &[0]),
            device_record(&key, 2, "Two", 1, &[1]),
        ]);
        harness.cloud.queue_sync(vec![device_record(&key, 3, "Three", 2, &[1, 4])]);

        harness.registry.refresh().await.unwrap();
        assert_eq!(ids(&harness.registry), vec![1, 2]);

        harness.registry.refresh().await.unwrap();
        assert_eq!(ids(&harness.registry), vec![3]);
    }

    #[tokio::test]
    async fn refresh_sorts_skips_and_finds_energy_module() {
        let key = test_key();
        let harness = Harness::new();
        let mut broken = device_record(&key, 9, "Broken", 1, &[0]);
        broken.data = Some("not base64!".to_string());
        harness.cloud.queue_sync(vec![
            device_record(&key, 1, "Porch", 1, &[0]),
            broken,
            device_record(&key, 2, "Meter", 238, &[]),
            device_record(&key, 3, "Attic", 24, &[0, 0, 0, 1, 100]),
            scene_record(&key, 50, "Night", &[]),
            scene_record(&key, 51, "Morning", &[]),
        ]);

        harness.registry.refresh().await.unwrap();
        let names: Vec<_> = harness
            .registry
            .devices()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["Attic", "Meter", "Porch"]);
        let scenes: Vec<_> = harness
            .registry
            .scenes()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(scenes, vec!["Morning", "Night"]);
        assert_eq!(harness.registry.energy_module_id(), Some(2));
        assert_eq!(
            harness.publisher.events(),
            vec![Event::DevicesChanged {
                devices: 3,
                scenes: 2
            }]
        );
    }

    #[tokio::test]
    async fn refresh_failure_is_reported() {
        let harness = Harness::new();
        let err = harness.registry.refresh().await.unwrap_err();
        assert!(matches!(err, HubError::Upstream(_)), "{err:?}");
        assert!(harness.registry.status().is_some());

        harness.cloud.queue_sync(vec![]);
        harness.registry.refresh().await.unwrap();
        assert_eq!(harness.registry.status(), None);
    }

    #[tokio::test]
    async fn blacklist_annotations() {
        let key = test_key();
        let mut settings = StaticSettings::new();
        settings.add_blacklist("device:2,scene:50").unwrap();
        let harness = Harness::with_settings(settings);
        harness.cloud.queue_sync(vec![
            device_record(&key, 1, "A", 1, &[0]),
            device_record(&key, 2, "B", 1, &[0]),
            scene_record(&key, 50, "S", &[]),
        ]);
        harness.registry.refresh().await.unwrap();

        assert_eq!(harness.registry.get_device(1).unwrap().blacklisted, None);
        assert_eq!(
            harness
                .registry
                .get_device(2)
                .unwrap()
                .blacklisted
                .map(|s| s.id),
            Some("device:2".to_string())
        );
        assert!(harness.registry.get_scene(50).unwrap().blacklisted.is_some());

        harness.registry.reapply_blacklist().await;
        assert!(harness.registry.get_device(2).unwrap().blacklisted.is_some());
    }

    #[tokio::test]
    async fn on_off_sends_command() {
        let key = test_key();
        let harness = Harness::new();
        harness.cloud.queue_sync(vec![
            device_record(&key, 7, "Switch", 1, &[0]),
            device_record(&key, 8, "Bulb", 24, &[0, 0, 0, 0, 10]),
        ]);
        harness.registry.refresh().await.unwrap();

        harness.registry.turn_device_on_off(7, true).await.unwrap();
        harness.registry.turn_device_on_off(8, true).await.unwrap();

        let commands = harness.transport.commands(&key);
        assert_eq!(commands.len(), 2);
        assert_eq!((commands[0].id, commands[0].function, commands[0].value), (7, 0, 1));
        assert_eq!((commands[1].id, commands[1].function, commands[1].value), (8, 3, 1));
        assert!(harness.registry.get_device(7).unwrap().switched_on);
        // zigbee on/off lives at function 3; function 0 is untouched
        let bulb = harness.registry.get_device(8).unwrap();
        assert_eq!(bulb.functions, vec![0, 0, 0, 1, 10]);
        assert!(!bulb.switched_on);
    }

    #[tokio::test]
    async fn on_off_for_unswitchable_type() {
        let key = test_key();
        let harness = Harness::new();
        harness.cloud.queue_sync(vec![
            device_record(&key, 5, "Motion", 6, &[0]),
            device_record(&key, 6, "Meter", 238, &[]),
        ]);
        harness.registry.refresh().await.unwrap();

        for id in [5, 6] {
            let err = harness
                .registry
                .turn_device_on_off(id, true)
                .await
                .unwrap_err();
            assert!(
                matches!(err, HubError::DeviceTypeUnknown { id: got, .. } if got == id),
                "{err:?}"
            );
        }
        assert_eq!(harness.transport.sent(), 0);
    }

    #[tokio::test]
    async fn dim_clamps_into_range() {
        let key = test_key();
        let harness = Harness::new();
        harness.cloud.queue_sync(vec![
            device_record(&key, 1, "Kaku", 2, &[1, 5]),
            device_record(&key, 2, "Zigbee", 24, &[0, 0, 0, 1, 100]),
            device_record(&key, 3, "Color", 26, &[0, 0, 0, 1, 100, 0, 0, 0, 0, 300]),
        ]);
        harness.registry.refresh().await.unwrap();

        for id in [1, 2, 3] {
            let range = harness.registry.get_device(id).unwrap().dim.unwrap();
            for requested in [
                i64::MIN,
                range.min - 1,
                range.min,
                7,
                range.max,
                range.max + 1,
                i64::MAX,
            ] {
                harness.registry.dim_device(id, requested).await.unwrap();
                let dim = harness.registry.get_device(id).unwrap().dim.unwrap();
                assert!(dim.min <= dim.level && dim.level <= dim.max, "{dim:?}");
                assert_eq!(dim.level, requested.max(range.min).min(range.max));
            }
        }
    }

    #[tokio::test]
    async fn dim_below_then_above() {
        let key = test_key();
        let harness = Harness::new();
        harness
            .cloud
            .queue_sync(vec![device_record(&key, 2, "Zigbee", 24, &[0, 0, 0, 1, 100])]);
        harness.registry.refresh().await.unwrap();

        harness.registry.dim_device(2, -20).await.unwrap();
        assert_eq!(harness.registry.get_device(2).unwrap().dim.unwrap().level, 1);
        harness.registry.dim_device(2, 1000).await.unwrap();
        assert_eq!(harness.registry.get_device(2).unwrap().dim.unwrap().level, 254);

        let commands = harness.transport.commands(&key);
        assert_eq!(commands.iter().map(|c| c.value).collect::<Vec<_>>(), vec![1, 254]);
        assert!(commands.iter().all(|c| c.function == 4));
    }

    #[tokio::test]
    async fn dim_and_color_reject_incapable_devices() {
        let key = test_key();
        let harness = Harness::new();
        harness.cloud.queue_sync(vec![
            device_record(&key, 1, "Switch", 1, &[0]),
            device_record(&key, 2, "Dimmer", 2, &[0, 3]),
        ]);
        harness.registry.refresh().await.unwrap();

        assert!(matches!(
            harness.registry.dim_device(1, 3).await,
            Err(HubError::DeviceNotDimmable { id: 1, .. })
        ));
        assert!(matches!(
            harness.registry.color_device(2, 3).await,
            Err(HubError::DeviceNotColorable { id: 2, .. })
        ));
        assert!(matches!(
            harness.registry.dim_device(99, 3).await,
            Err(HubError::DeviceNotFound(99))
        ));
        assert_eq!(harness.transport.sent(), 0);
    }

    #[tokio::test]
    async fn color_clamps_into_range() {
        let key = test_key();
        let harness = Harness::new();
        harness.cloud.queue_sync(vec![device_record(&key, 3, "Color", 26, &[0; 10])]);
        harness.registry.refresh().await.unwrap();

        harness.registry.color_device(3, 5000).await.unwrap();
        let color = harness.registry.get_device(3).unwrap().color.unwrap();
        assert_eq!(color.level, color.max);
        harness.registry.color_device(3, -5).await.unwrap();
        let color = harness.registry.get_device(3).unwrap().color.unwrap();
        assert_eq!(color.level, color.min);
        assert_eq!(harness.transport.commands(&key)[0].function, 9);
    }

    #[tokio::test]
    async fn optimistic_update_survives_send_failure() {
        let key = test_key();
        let harness = Harness::new();
        harness.cloud.queue_sync(vec![device_record(&key, 1, "Kaku", 2, &[1, 5])]);
        harness.registry.refresh().await.unwrap();
        harness.transport.fail_sends(true);

        let err = harness.registry.dim_device(1, 9).await.unwrap_err();
        assert!(matches!(err, HubError::SendTimeout { .. }), "{err:?}");
        assert_eq!(harness.registry.get_device(1).unwrap().dim.unwrap().level, 9);
    }

    #[tokio::test]
    async fn refresh_single_device() {
        let key = test_key();
        let harness = Harness::new();
        harness.cloud.queue_sync(vec![
            device_record(&key, 1, "Kaku", 2, &[0, 5]),
            scene_record(
                &key,
                60,
                "Scene",
                &[SceneEntity {
                    id: 1,
                    function: 0,
                    value: 1,
                }],
            ),
        ]);
        harness.registry.refresh().await.unwrap();
        let before = harness.registry.snapshot();

        harness
            .cloud
            .set_multiple(vec![device_record(&key, 1, "Kaku", 2, &[1, 12])]);
        let device = harness.registry.refresh_device(1).await.unwrap();
        assert!(device.switched_on);
        assert_eq!(device.dim.unwrap().level, 12);

        // the old generation is untouched
        assert_eq!(before.devices[0].functions, vec![0, 5]);
        assert_eq!(harness.registry.scenes().len(), 1);
    }
}
