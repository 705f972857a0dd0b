use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SettingKind {
    Email,
    Password,
    BackupAddress,
    #[strum(to_string = "device")]
    DeviceBlacklist,
    #[strum(to_string = "scene")]
    SceneBlacklist,
}

/// A stored setting. Devices and scenes keep the whole entry when they
/// are blacklisted so that the caller can refer back to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub id: String,
    pub kind: SettingKind,
    pub value: String,
}

/// Lookup of externally persisted settings.
/// `spec` narrows the search to the entry whose value matches it;
/// an empty `spec` returns the first entry of that kind.
#[async_trait]
pub trait SettingsLookup: Send + Sync {
    async fn find(&self, kind: SettingKind, spec: &str) -> Option<Setting>;
}

/// Settings supplied up front via the command line or environment
#[derive(Default, Debug, Clone)]
pub struct StaticSettings {
    entries: Vec<Setting>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with<V: Into<String>>(mut self, kind: SettingKind, value: V) -> Self {
        self.push(kind, value);
        self
    }

    pub fn push<V: Into<String>>(&mut self, kind: SettingKind, value: V) {
        let value = value.into();
        self.entries.push(Setting {
            id: format!("{kind}:{value}"),
            kind,
            value,
        });
    }

    /// Parses a blacklist of the form `device:12,scene:3`
    pub fn add_blacklist(&mut self, text: &str) -> anyhow::Result<()> {
        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (kind, id) = item
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("blacklist entry '{item}' must be kind:id"))?;
            let kind = SettingKind::from_str(kind.trim())
                .map_err(|_| anyhow::anyhow!("unknown blacklist kind '{kind}' in '{item}'"))?;
            anyhow::ensure!(
                matches!(
                    kind,
                    SettingKind::DeviceBlacklist | SettingKind::SceneBlacklist
                ),
                "blacklist entry '{item}' must refer to a device or scene"
            );
            let id: u32 = id
                .trim()
                .parse()
                .map_err(|err| anyhow::anyhow!("blacklist entry '{item}': {err:#}"))?;
            self.push(kind, id.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsLookup for StaticSettings {
    async fn find(&self, kind: SettingKind, spec: &str) -> Option<Setting> {
        self.entries
            .iter()
            .find(|s| s.kind == kind && (spec.is_empty() || s.value == spec))
            .cloned()
    }
}

/// Settings that can be swapped out while the service runs.
/// Lookups see either the old or the new set, never a mix.
pub struct ReloadableSettings {
    current: ArcSwap<StaticSettings>,
}

impl ReloadableSettings {
    pub fn new(settings: StaticSettings) -> Self {
        Self {
            current: ArcSwap::from_pointee(settings),
        }
    }

    pub fn replace(&self, settings: StaticSettings) {
        log::debug!("settings replaced: {settings:?}");
        self.current.store(Arc::new(settings));
    }
}

#[async_trait]
impl SettingsLookup for ReloadableSettings {
    async fn find(&self, kind: SettingKind, spec: &str) -> Option<Setting> {
        let current = self.current.load_full();
        current.find(kind, spec).await
    }
}
