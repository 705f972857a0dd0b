use crate::cloud_api::HubCloud;
use crate::command::MacAddress;
use crate::config::{Credentials, HubConfig};
use crate::crypto::AesKey;
use crate::error::HubError;
use crate::settings::{SettingKind, SettingsLookup};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Owns the hub configuration and turns it into validated credentials,
/// logging in to the cloud for whatever the configuration lacks.
/// The result is cached until the configuration is replaced.
pub struct Session {
    config: parking_lot::Mutex<HubConfig>,
    cloud: Arc<dyn HubCloud>,
    settings: Arc<dyn SettingsLookup>,
    cached: Mutex<Option<Credentials>>,
}

impl Session {
    pub fn new(
        config: HubConfig,
        cloud: Arc<dyn HubCloud>,
        settings: Arc<dyn SettingsLookup>,
    ) -> Self {
        Self {
            config: parking_lot::Mutex::new(config),
            cloud,
            settings,
            cached: Mutex::new(None),
        }
    }

    /// Whether there is any way to obtain credentials without
    /// asking the user for more information
    pub async fn is_configured(&self) -> bool {
        let config = self.config.lock().clone();
        if config.validate().is_ok() {
            return true;
        }
        let email = config.email.is_some()
            || self.settings.find(SettingKind::Email, "").await.is_some();
        let password = config.password.is_some()
            || self.settings.find(SettingKind::Password, "").await.is_some();
        email && password
    }

    pub async fn replace_config(&self, config: HubConfig) {
        let mut cached = self.cached.lock().await;
        *self.config.lock() = config;
        cached.take();
    }

    pub async fn credentials(&self) -> Result<Credentials, HubError> {
        let mut cached = self.cached.lock().await;
        if let Some(creds) = cached.as_ref() {
            return Ok(creds.clone());
        }

        let mut config = self.config.lock().clone();
        if config.email.is_none() {
            config.email = self
                .settings
                .find(SettingKind::Email, "")
                .await
                .map(|s| s.value);
        }
        if config.password.is_none() {
            config.password = self
                .settings
                .find(SettingKind::Password, "")
                .await
                .map(|s| s.value);
        }

        if !config.has_home() && config.has_login() {
            let email = config.email.clone().unwrap_or_default();
            let password = config.password.clone().unwrap_or_default();
            log::info!("logging in to the cloud as {email}");
            let home = self
                .cloud
                .login(&email, &password)
                .await
                .map_err(HubError::upstream)?;

            if config.home_id.is_none() {
                config.home_id.replace(home.home_id);
            }
            if config.aes_key.is_none() {
                config.aes_key.replace(AesKey::parse(&home.aes_key)?);
            }
            if config.mac.is_none() {
                config.mac.replace(MacAddress::parse(&home.mac)?);
            }
        }

        let creds = config.validate()?;
        log::trace!("using hub {} for home {}", creds.mac, creds.home_id);
        cached.replace(creds.clone());
        Ok(creds)
    }
}
