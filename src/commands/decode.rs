use crate::command::CommandPacket;
use crate::crypto::{decrypt, decrypt_base64, AesKey};

#[derive(clap::Parser, Debug)]
pub struct DecodeCommand {
    /// A captured command datagram, hex encoded
    packet: String,

    /// Treat the input as a bare encrypted payload rather than a
    /// whole datagram
    #[arg(long)]
    payload: bool,

    /// The payload is base64 encoded, as in the cloud's device records
    #[arg(long, requires = "payload")]
    base64: bool,
}

pub fn aes_key(args: &crate::Args) -> anyhow::Result<AesKey> {
    args.hub_args
        .hub_config()?
        .aes_key
        .ok_or_else(|| anyhow::anyhow!("Pass --hub-aes-key or set HOMEHUB_AES_KEY"))
}

impl DecodeCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let input = self.packet.trim();
        if self.payload {
            let key = aes_key(args)?;
            let plaintext = if self.base64 {
                decrypt_base64(input, &key)?
            } else {
                decrypt(input, &key)?
            };
            println!("{plaintext}");
            return Ok(());
        }

        let data = data_encoding::HEXLOWER_PERMISSIVE.decode(input.as_bytes())?;
        let packet = CommandPacket::parse_bytes(&data)?;
        println!("mac: {}", packet.header.mac);
        println!("device: {}", packet.header.device_id);
        println!("payload: {} bytes", packet.header.payload_len);

        match args.hub_args.hub_config()?.aes_key {
            Some(key) => {
                let command = packet.decrypt_command(&key)?;
                println!("{}", serde_json::to_string(&command)?);
            }
            None => {
                eprintln!("Pass --hub-aes-key to decrypt the payload");
            }
        }
        Ok(())
    }
}
