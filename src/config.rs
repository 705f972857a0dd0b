use crate::cloud_api::DEFAULT_CLOUD_URL;
use crate::command::MacAddress;
use crate::crypto::AesKey;
use crate::error::HubError;
use crate::lan_api::HUB_PORT;
use crate::opt_env_var;
use crate::settings::{SettingKind, StaticSettings};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(clap::Parser, Clone, Debug)]
pub struct HubArguments {
    /// The email address of your hub account.
    /// If not passed here, it will be read from
    /// the HOMEHUB_EMAIL environment variable.
    #[arg(long, global = true)]
    pub hub_email: Option<String>,

    /// The password for your hub account.
    /// If not passed here, it will be read from
    /// the HOMEHUB_PASSWORD environment variable.
    #[arg(long, global = true)]
    pub hub_password: Option<String>,

    /// The home identifier. Obtained via login when not specified.
    /// You may also set this via the HOMEHUB_HOME_ID environment variable.
    #[arg(long, global = true)]
    pub hub_home_id: Option<String>,

    /// The per-home AES key, hex or base64 encoded.
    /// Obtained via login when not specified.
    /// You may also set this via the HOMEHUB_AES_KEY environment variable.
    #[arg(long, global = true)]
    pub hub_aes_key: Option<String>,

    /// The MAC address of the hub. Obtained via login when not specified.
    /// You may also set this via the HOMEHUB_MAC environment variable.
    #[arg(long, global = true)]
    pub hub_mac: Option<String>,

    /// Skip LAN discovery and talk to the hub at this address
    #[arg(long, global = true)]
    pub hub_address: Option<IpAddr>,

    /// The address to use when LAN discovery gets no answer.
    /// You may also set this via the HOMEHUB_BACKUP_ADDRESS environment variable.
    #[arg(long, global = true)]
    pub hub_backup_address: Option<IpAddr>,

    /// The UDP port the hub takes commands on.
    /// You may also set this via the HOMEHUB_PORT environment variable.
    #[arg(long, global = true)]
    pub hub_port: Option<u16>,

    /// How long to wait for the hub to answer LAN discovery, in seconds
    #[arg(long, global = true, default_value_t = 10)]
    pub discovery_timeout: u64,

    /// How long to wait for the hub to acknowledge a command, in seconds
    #[arg(long, global = true, default_value_t = 5)]
    pub send_timeout: u64,

    /// Devices and scenes to flag as blacklisted, eg: `device:12,scene:3`.
    /// You may also set this via the HOMEHUB_BLACKLIST environment variable.
    #[arg(long, global = true)]
    pub hub_blacklist: Option<String>,

    /// The cloud API base url.
    /// You may also set this via the HOMEHUB_CLOUD_URL environment variable.
    #[arg(long, global = true)]
    pub cloud_url: Option<String>,

    /// Where to keep the energy history database.
    /// You may also set this via the HOMEHUB_ENERGY_DB environment variable.
    /// Defaults to homehub-energy.sqlite in your data directory.
    #[arg(long, global = true)]
    pub energy_db: Option<PathBuf>,
}

fn arg_or_env(arg: &Option<String>, name: &str) -> anyhow::Result<Option<String>> {
    match arg {
        Some(value) => Ok(Some(value.to_string())),
        None => opt_env_var(name),
    }
}

impl HubArguments {
    pub fn opt_email(&self) -> anyhow::Result<Option<String>> {
        arg_or_env(&self.hub_email, "HOMEHUB_EMAIL")
    }

    pub fn opt_password(&self) -> anyhow::Result<Option<String>> {
        arg_or_env(&self.hub_password, "HOMEHUB_PASSWORD")
    }

    pub fn opt_blacklist(&self) -> anyhow::Result<Option<String>> {
        arg_or_env(&self.hub_blacklist, "HOMEHUB_BLACKLIST")
    }

    pub fn opt_backup_address(&self) -> anyhow::Result<Option<IpAddr>> {
        match self.hub_backup_address {
            Some(addr) => Ok(Some(addr)),
            None => opt_env_var("HOMEHUB_BACKUP_ADDRESS"),
        }
    }

    pub fn hub_port(&self) -> anyhow::Result<u16> {
        match self.hub_port {
            Some(port) => Ok(port),
            None => Ok(opt_env_var("HOMEHUB_PORT")?.unwrap_or(HUB_PORT)),
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout.max(1))
    }

    pub fn cloud_url(&self) -> anyhow::Result<String> {
        Ok(arg_or_env(&self.cloud_url, "HOMEHUB_CLOUD_URL")?
            .unwrap_or_else(|| DEFAULT_CLOUD_URL.to_string()))
    }

    pub fn energy_db(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.energy_db {
            return Ok(path.clone());
        }
        if let Some(path) = opt_env_var::<PathBuf>("HOMEHUB_ENERGY_DB")? {
            return Ok(path);
        }
        let dir = dirs_next::data_dir()
            .ok_or_else(|| anyhow::anyhow!("failed to resolve data dir; pass --energy-db"))?;
        Ok(dir.join("homehub-energy.sqlite"))
    }

    pub fn hub_config(&self) -> anyhow::Result<HubConfig> {
        let aes_key = match arg_or_env(&self.hub_aes_key, "HOMEHUB_AES_KEY")? {
            Some(key) => Some(AesKey::parse(&key)?),
            None => None,
        };
        let mac = match arg_or_env(&self.hub_mac, "HOMEHUB_MAC")? {
            Some(mac) => Some(MacAddress::parse(&mac)?),
            None => None,
        };
        Ok(HubConfig {
            email: self.opt_email()?,
            password: self.opt_password()?,
            home_id: arg_or_env(&self.hub_home_id, "HOMEHUB_HOME_ID")?,
            aes_key,
            mac,
        })
    }

    pub fn settings(&self) -> anyhow::Result<StaticSettings> {
        let mut settings = StaticSettings::new();
        if let Some(addr) = self.opt_backup_address()? {
            settings.push(SettingKind::BackupAddress, addr.to_string());
        }
        if let Some(list) = self.opt_blacklist()? {
            settings.add_blacklist(&list)?;
        }
        Ok(settings)
    }
}

/// What we know about the account and the hub. Anything missing is
/// filled in by logging in to the cloud.
#[derive(Clone, Debug, Default)]
pub struct HubConfig {
    pub email: Option<String>,
    pub password: Option<String>,
    pub home_id: Option<String>,
    pub aes_key: Option<AesKey>,
    pub mac: Option<MacAddress>,
}

/// A fully validated configuration
#[derive(Clone, Debug)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub home_id: String,
    pub aes_key: AesKey,
    pub mac: MacAddress,
}

fn required<T: Clone>(value: &Option<T>, what: &str) -> Result<T, HubError> {
    value
        .clone()
        .ok_or_else(|| HubError::Configuration(format!("no {what} configured")))
}

impl HubConfig {
    pub fn has_login(&self) -> bool {
        self.email.is_some() && self.password.is_some()
    }

    /// Whether the details that login provides are all present
    pub fn has_home(&self) -> bool {
        self.home_id.is_some() && self.aes_key.is_some() && self.mac.is_some()
    }

    pub fn validate(&self) -> Result<Credentials, HubError> {
        Ok(Credentials {
            email: required(&self.email, "account email")?,
            password: required(&self.password, "account password")?,
            home_id: required(&self.home_id, "home id")?,
            aes_key: required(&self.aes_key, "AES key")?,
            mac: required(&self.mac, "hub MAC address")?,
        })
    }
}
