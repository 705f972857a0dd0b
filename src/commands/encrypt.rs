use crate::commands::decode::aes_key;
use crate::crypto::{encrypt, encrypt_base64};

#[derive(clap::Parser, Debug)]
pub struct EncryptCommand {
    /// The text to encrypt, usually a JSON document
    text: String,

    /// Emit base64, as the cloud's device records use, instead of hex
    #[arg(long)]
    base64: bool,
}

impl EncryptCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let key = aes_key(args)?;
        let encrypted = if self.base64 {
            encrypt_base64(&self.text, &key)?
        } else {
            encrypt(&self.text, &key)?
        };
        println!("{encrypted}");
        Ok(())
    }
}
