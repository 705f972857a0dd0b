//! Fakes of the hub's collaborators, shared by the unit tests
use crate::cloud_api::{EncryptedRecord, HomeInfo, HubCloud, ReportPrecision, ReportRow};
use crate::command::{CommandPacket, MacAddress, ModuleCommand};
use crate::config::{Credentials, HubConfig};
use crate::crypto::{encrypt_base64, AesKey};
use crate::error::HubError;
use crate::lan_api::CommandTransport;
use crate::service::device::SceneEntity;
use crate::service::publisher::{Event, Publisher};
use crate::service::registry::DeviceRegistry;
use crate::service::session::Session;
use crate::service::store::{EnergyHistoryStore, EnergyReading, MeterCounters};
use crate::settings::{SettingsLookup, StaticSettings};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f";

pub fn test_key() -> AesKey {
    AesKey::parse(TEST_KEY_HEX).unwrap()
}

pub fn test_config() -> HubConfig {
    HubConfig {
        email: Some("me@example.com".to_string()),
        password: Some("secret".to_string()),
        home_id: Some("12345".to_string()),
        aes_key: Some(test_key()),
        mac: Some(MacAddress::parse("00:1e:c0:12:34:56").unwrap()),
    }
}

pub fn device_record(
    key: &AesKey,
    id: u32,
    name: &str,
    device_type: u32,
    functions: &[i64],
) -> EncryptedRecord {
    let data = serde_json::json!({"module": {"id": id, "name": name, "device": device_type}});
    let status = serde_json::json!({"module": {"functions": functions}});
    EncryptedRecord {
        id,
        data: Some(encrypt_base64(&data.to_string(), key).unwrap()),
        status: Some(encrypt_base64(&status.to_string(), key).unwrap()),
    }
}

pub fn scene_record(
    key: &AesKey,
    id: u32,
    name: &str,
    entities: &[SceneEntity],
) -> EncryptedRecord {
    let data = serde_json::json!({"scene": {"id": id, "name": name, "entities": entities}});
    EncryptedRecord {
        id,
        data: Some(encrypt_base64(&data.to_string(), key).unwrap()),
        status: None,
    }
}

/// Deterministic xorshift32 source for spreading test inputs
pub struct XorShift(u32);

impl XorShift {
    pub fn new(seed: u32) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }

    pub fn below(&mut self, limit: u32) -> u32 {
        self.next_u32() % limit
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub entity_id: u32,
    pub precision: ReportPrecision,
    pub from: NaiveDate,
    pub till: NaiveDate,
}

/// A cloud that answers from canned data. `sync` pops one queued
/// response per call and fails once the queue is empty.
#[derive(Default)]
pub struct FakeCloud {
    calls: Mutex<Vec<&'static str>>,
    syncs: Mutex<VecDeque<Vec<EncryptedRecord>>>,
    multiple: Mutex<Vec<EncryptedRecord>>,
    live: Mutex<Option<Vec<Option<i64>>>>,
    reports: Mutex<Vec<ReportRow>>,
    report_requests: Mutex<Vec<ReportRequest>>,
}

impl FakeCloud {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn queue_sync(&self, records: Vec<EncryptedRecord>) {
        self.syncs.lock().push_back(records);
    }

    pub fn set_multiple(&self, records: Vec<EncryptedRecord>) {
        *self.multiple.lock() = records;
    }

    pub fn set_live(&self, values: Vec<Option<i64>>) {
        self.live.lock().replace(values);
    }

    pub fn set_reports(&self, rows: Vec<ReportRow>) {
        *self.reports.lock() = rows;
    }

    pub fn report_requests(&self) -> Vec<ReportRequest> {
        self.report_requests.lock().clone()
    }

    fn record(&self, action: &'static str) {
        self.calls.lock().push(action);
    }
}

#[async_trait]
impl HubCloud for FakeCloud {
    async fn login(&self, _email: &str, _password: &str) -> anyhow::Result<HomeInfo> {
        self.record("login");
        Ok(HomeInfo {
            home_id: "12345".to_string(),
            aes_key: TEST_KEY_HEX.to_string(),
            mac: "001ec0123456".to_string(),
        })
    }

    async fn sync(&self, _creds: &Credentials) -> anyhow::Result<Vec<EncryptedRecord>> {
        self.record("sync");
        self.syncs
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("request gateway.php status 500: Internal Server Error"))
    }

    async fn get_multiple(
        &self,
        _creds: &Credentials,
        entity_ids: &[u32],
    ) -> anyhow::Result<Vec<EncryptedRecord>> {
        self.record("get-multiple");
        Ok(self
            .multiple
            .lock()
            .iter()
            .filter(|r| entity_ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn check(
        &self,
        _creds: &Credentials,
        _entity_id: u32,
    ) -> anyhow::Result<Vec<Option<i64>>> {
        self.record("check");
        self.live
            .lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no live readings"))
    }

    async fn aggregated_reports(
        &self,
        _creds: &Credentials,
        entity_id: u32,
        precision: ReportPrecision,
        from: NaiveDate,
        till: NaiveDate,
    ) -> anyhow::Result<Vec<ReportRow>> {
        self.record("aggregated_reports");
        self.report_requests.lock().push(ReportRequest {
            entity_id,
            precision,
            from,
            till,
        });
        Ok(self.reports.lock().clone())
    }
}

/// Keeps every packet it is asked to send
#[derive(Default)]
pub struct RecordingTransport {
    packets: Mutex<Vec<Vec<u8>>>,
    fail_after: Mutex<Option<usize>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn fail_sends(&self, fail: bool) {
        *self.fail_after.lock() = if fail { Some(0) } else { None };
    }

    /// Accept `count` packets, then fail every send
    pub fn fail_after(&self, count: usize) {
        self.fail_after.lock().replace(count);
    }

    /// Decodes the recorded packets back into the commands they carry
    pub fn commands(&self, key: &AesKey) -> Vec<ModuleCommand> {
        self.packets
            .lock()
            .iter()
            .map(|data| {
                CommandPacket::parse_bytes(data)
                    .unwrap()
                    .decrypt_command(key)
                    .unwrap()
            })
            .collect()
    }
}

#[async_trait]
impl CommandTransport for RecordingTransport {
    async fn send(&self, packet: Vec<u8>) -> Result<(), HubError> {
        let limit = *self.fail_after.lock();
        if limit.map(|n| self.sent() >= n).unwrap_or(false) {
            return Err(HubError::SendTimeout {
                addr: SocketAddr::from(([127, 0, 0, 1], crate::lan_api::HUB_PORT)),
                timeout: Duration::from_millis(1),
            });
        }
        self.packets.lock().push(packet);
        Ok(())
    }
}

/// Energy history kept in a map, keyed by day
#[derive(Default)]
pub struct MemoryEnergyStore {
    rows: Mutex<BTreeMap<NaiveDate, MeterCounters>>,
}

impl MemoryEnergyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnergyHistoryStore for MemoryEnergyStore {
    async fn upsert(&self, date: NaiveDate, counters: MeterCounters) -> anyhow::Result<()> {
        self.rows.lock().insert(date, counters);
        Ok(())
    }

    async fn find_all(&self) -> anyhow::Result<Vec<EnergyReading>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .map(|(date, counters)| EnergyReading {
                date: *date,
                counters: *counters,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// A registry wired to fakes
pub struct Harness {
    pub cloud: Arc<FakeCloud>,
    pub transport: Arc<RecordingTransport>,
    pub publisher: Arc<RecordingPublisher>,
    pub session: Arc<Session>,
    pub registry: Arc<DeviceRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(StaticSettings::new())
    }

    pub fn with_settings(settings: StaticSettings) -> Self {
        Self::build(test_config(), settings)
    }

    pub fn build(config: HubConfig, settings: StaticSettings) -> Self {
        let cloud = Arc::new(FakeCloud::default());
        let transport = Arc::new(RecordingTransport::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let settings: Arc<dyn SettingsLookup> = Arc::new(settings);
        let session = Arc::new(Session::new(config, cloud.clone(), settings.clone()));
        let registry = Arc::new(DeviceRegistry::new(
            session.clone(),
            cloud.clone(),
            transport.clone(),
            settings,
            publisher.clone(),
        ));
        Self {
            cloud,
            transport,
            publisher,
            session,
            registry,
        }
    }
}
