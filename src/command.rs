use crate::crypto::{decrypt_bytes, encrypt_bytes, AesKey};
use crate::error::HubError;
use serde::{Deserialize, Serialize};

// Header layout understood by the hub firmware. Only the offsets
// below carry data; every other header byte is zero. The opcode,
// flags and magic values are opaque constants observed on the wire.

pub const HEADER_LEN: usize = 43;

const OPCODE: u8 = 0x01;
const FLAGS: u8 = 0x80;
const MAGIC: u32 = 653213;

const OFFSET_OPCODE: usize = 0;
const OFFSET_FLAGS: usize = 2;
const OFFSET_MAC: usize = 3;
const OFFSET_MAGIC: usize = 9;
const OFFSET_DEVICE_ID: usize = 29;
const OFFSET_PAYLOAD_LEN: usize = 41;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Parses `aa:bb:cc:dd:ee:ff`, `aa-bb-..` or bare `aabbccddeeff`
    pub fn parse(text: &str) -> Result<Self, HubError> {
        let hex: String = text
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|err| HubError::Configuration(format!("invalid MAC address {text}: {err}")))?;
        let bytes: [u8; 6] = bytes.try_into().map_err(|_| {
            HubError::Configuration(format!("MAC address {text} must be 6 bytes long"))
        })?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let [a, b, c, d, e, f] = self.0;
        write!(fmt, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{f:02x}")
    }
}

impl std::fmt::Debug for MacAddress {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "MacAddress({self})")
    }
}

/// The JSON document that gets encrypted into the packet body
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleCommand {
    pub id: u32,
    pub function: u32,
    pub value: i64,
}

#[derive(Serialize, Deserialize, Debug)]
struct CommandMessage {
    module: ModuleCommand,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandHeader {
    pub mac: MacAddress,
    pub device_id: u32,
    pub payload_len: u16,
}

impl CommandHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[OFFSET_OPCODE] = OPCODE;
        header[OFFSET_FLAGS] = FLAGS;
        header[OFFSET_MAC..OFFSET_MAC + 6].copy_from_slice(&self.mac.0);
        header[OFFSET_MAGIC..OFFSET_MAGIC + 4].copy_from_slice(&MAGIC.to_le_bytes());
        header[OFFSET_DEVICE_ID..OFFSET_DEVICE_ID + 4]
            .copy_from_slice(&self.device_id.to_le_bytes());
        header[OFFSET_PAYLOAD_LEN..OFFSET_PAYLOAD_LEN + 2]
            .copy_from_slice(&self.payload_len.to_le_bytes());
        header
    }

    pub fn parse_bytes(data: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            data.len() >= HEADER_LEN,
            "header must contain {HEADER_LEN} bytes, have {}",
            data.len()
        );
        anyhow::ensure!(
            data[OFFSET_OPCODE] == OPCODE && data[OFFSET_FLAGS] == FLAGS,
            "unexpected opcode/flags {:02x}/{:02x}",
            data[OFFSET_OPCODE],
            data[OFFSET_FLAGS]
        );
        let magic = u32::from_le_bytes(le_field(data, OFFSET_MAGIC));
        anyhow::ensure!(magic == MAGIC, "unexpected magic {magic}");

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&data[OFFSET_MAC..OFFSET_MAC + 6]);

        Ok(Self {
            mac: MacAddress(mac),
            device_id: u32::from_le_bytes(le_field(data, OFFSET_DEVICE_ID)),
            payload_len: u16::from_le_bytes(le_field(data, OFFSET_PAYLOAD_LEN)),
        })
    }
}

fn le_field<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut field = [0u8; N];
    field.copy_from_slice(&data[offset..offset + N]);
    field
}

/// A complete command datagram: header followed by the encrypted body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandPacket {
    pub header: CommandHeader,
    pub payload: Vec<u8>,
}

impl CommandPacket {
    pub fn new(mac: MacAddress, device_id: u32, payload: Vec<u8>) -> Result<Self, HubError> {
        let payload_len = u16::try_from(payload.len()).map_err(|_| {
            HubError::Configuration(format!(
                "encrypted payload of {} bytes does not fit the length field",
                payload.len()
            ))
        })?;
        Ok(Self {
            header: CommandHeader {
                mac,
                device_id,
                payload_len,
            },
            payload,
        })
    }

    /// Serializes and encrypts the command for `device_id`
    pub fn build(
        mac: MacAddress,
        key: &AesKey,
        device_id: u32,
        function: u32,
        value: i64,
    ) -> Result<Self, HubError> {
        let json = serde_json::to_string(&CommandMessage {
            module: ModuleCommand {
                id: device_id,
                function,
                value,
            },
        })
        .map_err(|err| HubError::Upstream(format!("serializing command: {err:#}")))?;
        let payload = encrypt_bytes(json.as_bytes(), key)?;
        Self::new(mac, device_id, payload)
    }

    pub fn into_vec(self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + self.payload.len());
        data.extend_from_slice(&self.header.to_bytes());
        data.extend_from_slice(&self.payload);
        data
    }

    pub fn parse_bytes(data: &[u8]) -> anyhow::Result<Self> {
        let header = CommandHeader::parse_bytes(data)?;
        let payload = &data[HEADER_LEN..];
        anyhow::ensure!(
            payload.len() == header.payload_len as usize,
            "length field says {} but {} payload bytes follow",
            header.payload_len,
            payload.len()
        );
        Ok(Self {
            header,
            payload: payload.to_vec(),
        })
    }

    pub fn decrypt_command(&self, key: &AesKey) -> Result<ModuleCommand, HubError> {
        let json = decrypt_bytes(&self.payload, key)?;
        let message: CommandMessage = serde_json::from_str(&json)
            .map_err(|err| HubError::Decryption(format!("command body: {err:#}")))?;
        Ok(message.module)
    }
}
