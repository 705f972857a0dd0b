use crate::cloud_api::EncryptedRecord;
use crate::crypto::{decrypt_base64, AesKey};
use crate::error::HubError;
use crate::settings::Setting;
use serde::{Deserialize, Serialize};

/// Grouping of raw device types that determines which functions
/// a device has and what values they take
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceCategory {
    Switch,
    KakuDimmable,
    ZigbeeDimmable,
    Color,
    EnergyModule,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRange {
    pub min: i64,
    pub max: i64,
}

impl LevelRange {
    pub fn clamp(&self, value: i64) -> i64 {
        value.max(self.min).min(self.max)
    }
}

/// A function that takes a level. The function code doubles as
/// the index of its current value in the device's function array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelControl {
    pub function: u32,
    pub range: LevelRange,
}

const KAKU_DIM: LevelControl = LevelControl {
    function: 1,
    range: LevelRange { min: 0, max: 15 },
};
const ZIGBEE_DIM: LevelControl = LevelControl {
    function: 4,
    range: LevelRange { min: 1, max: 254 },
};
const ZIGBEE_COLOR: LevelControl = LevelControl {
    function: 9,
    range: LevelRange { min: 0, max: 600 },
};

impl DeviceCategory {
    /// The KAKU and Zigbee families each have their own on/off function
    pub fn on_off_function(self) -> Option<u32> {
        match self {
            Self::Switch | Self::KakuDimmable => Some(0),
            Self::ZigbeeDimmable | Self::Color => Some(3),
            Self::EnergyModule | Self::Other => None,
        }
    }

    pub fn dim_control(self) -> Option<LevelControl> {
        match self {
            Self::KakuDimmable => Some(KAKU_DIM),
            Self::ZigbeeDimmable | Self::Color => Some(ZIGBEE_DIM),
            _ => None,
        }
    }

    pub fn color_control(self) -> Option<LevelControl> {
        match self {
            Self::Color => Some(ZIGBEE_COLOR),
            _ => None,
        }
    }
}

const DEVICE_TYPES: &[(u32, &str, DeviceCategory)] = &[
    (1, "switch", DeviceCategory::Switch),
    (2, "dimmer", DeviceCategory::KakuDimmable),
    (3, "actuator", DeviceCategory::Switch),
    (4, "dimmable_lamp", DeviceCategory::KakuDimmable),
    (5, "door_sensor", DeviceCategory::Other),
    (6, "motion_sensor", DeviceCategory::Other),
    (7, "remote", DeviceCategory::Other),
    (24, "zigbee_dimmable_light", DeviceCategory::ZigbeeDimmable),
    (25, "zigbee_tunable_light", DeviceCategory::Color),
    (26, "zigbee_color_light", DeviceCategory::Color),
    (238, "energy_module", DeviceCategory::EnergyModule),
];

/// The raw device type number reported by the hub
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceType(pub u32);

impl DeviceType {
    fn entry(self) -> Option<&'static (u32, &'static str, DeviceCategory)> {
        DEVICE_TYPES.iter().find(|(raw, _, _)| *raw == self.0)
    }

    pub fn category(self) -> DeviceCategory {
        self.entry()
            .map(|(_, _, category)| *category)
            .unwrap_or(DeviceCategory::Other)
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.entry() {
            Some((_, name, _)) => write!(fmt, "{name}"),
            None => write!(fmt, "unknown_{}", self.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub level: i64,
    pub min: i64,
    pub max: i64,
}

impl Level {
    fn read(functions: &[i64], control: LevelControl) -> Self {
        let raw = functions
            .get(control.function as usize)
            .copied()
            .unwrap_or(control.range.min);
        Self {
            level: control.range.clamp(raw),
            min: control.range.min,
            max: control.range.max,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Device {
    pub id: u32,
    pub name: String,
    pub device_type: DeviceType,
    pub category: DeviceCategory,
    /// Raw function values in the order the hardware reports them
    pub functions: Vec<i64>,
    pub switched_on: bool,
    pub dim: Option<Level>,
    pub color: Option<Level>,
    pub blacklisted: Option<Setting>,
}

impl Device {
    pub fn new<N: Into<String>>(
        id: u32,
        name: N,
        device_type: DeviceType,
        functions: Vec<i64>,
    ) -> Self {
        let mut device = Self {
            id,
            name: name.into(),
            device_type,
            category: device_type.category(),
            functions: vec![],
            switched_on: false,
            dim: None,
            color: None,
            blacklisted: None,
        };
        device.set_functions(functions);
        device
    }

    /// Replaces the function array and re-derives the values computed from it.
    /// `switched_on` always reflects function 0, whatever the category.
    pub fn set_functions(&mut self, functions: Vec<i64>) {
        self.switched_on = functions.first().map(|v| *v != 0).unwrap_or(false);
        self.dim = self
            .category
            .dim_control()
            .map(|control| Level::read(&functions, control));
        self.color = self
            .category
            .color_control()
            .map(|control| Level::read(&functions, control));
        self.functions = functions;
    }

    /// Records a value we just sent, before the hardware confirms it
    pub fn set_function(&mut self, function: u32, value: i64) {
        let mut functions = self.functions.clone();
        let idx = function as usize;
        if functions.len() <= idx {
            functions.resize(idx + 1, 0);
        }
        functions[idx] = value;
        self.set_functions(functions);
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{} ({} {})", self.name, self.device_type, self.id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneEntity {
    pub id: u32,
    pub function: u32,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Scene {
    pub id: u32,
    pub name: String,
    pub entities: Vec<SceneEntity>,
    pub blacklisted: Option<Setting>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RecordData {
    Module { module: ModuleData },
    Scene { scene: SceneData },
}

#[derive(Deserialize, Debug)]
struct ModuleData {
    #[serde(default)]
    name: String,
    device: u32,
}

#[derive(Deserialize, Debug)]
struct SceneData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    entities: Vec<SceneEntity>,
}

#[derive(Deserialize, Debug)]
struct StatusData {
    module: ModuleStatus,
}

#[derive(Deserialize, Debug)]
struct ModuleStatus {
    #[serde(default)]
    functions: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    Device(Device),
    Scene(Scene),
}

fn decrypt_json<T: serde::de::DeserializeOwned>(
    encoded: &str,
    key: &AesKey,
) -> Result<T, HubError> {
    let json = decrypt_base64(encoded, key)?;
    serde_json::from_str(&json).map_err(|err| HubError::Upstream(format!("{err:#}. Input: {json}")))
}

/// Decodes the function array from a record's `status`
pub fn decode_status(record: &EncryptedRecord, key: &AesKey) -> Result<Vec<i64>, HubError> {
    match &record.status {
        Some(status) => Ok(decrypt_json::<StatusData>(status, key)?.module.functions),
        None => Ok(vec![]),
    }
}

/// Decrypts and classifies a record. Records without data (eg: entities
/// that were deleted in the app) yield `None`.
pub fn decode_record(record: &EncryptedRecord, key: &AesKey) -> Result<Option<Entity>, HubError> {
    let Some(data) = &record.data else {
        return Ok(None);
    };
    match decrypt_json::<RecordData>(data, key)? {
        RecordData::Module { module } => {
            let functions = decode_status(record, key)?;
            Ok(Some(Entity::Device(Device::new(
                record.id,
                module.name,
                DeviceType(module.device),
                functions,
            ))))
        }
        RecordData::Scene { scene } => Ok(Some(Entity::Scene(Scene {
            id: record.id,
            name: scene.name,
            entities: scene.entities,
            blacklisted: None,
        }))),
    }
}
