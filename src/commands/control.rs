use crate::service::hub::Hub;
use crate::service::scheduler::PollIntervals;

#[derive(clap::Parser, Debug)]
pub struct ControlCommand {
    /// The device id, as shown by `list`
    id: u32,

    #[command(subcommand)]
    cmd: SubCommand,
}

#[derive(clap::Parser, Debug)]
enum SubCommand {
    On,
    Off,
    /// Set the dim level; it is clamped into the device's range
    Dim {
        #[arg(allow_negative_numbers = true)]
        level: i64,
    },
    /// Set the color level; it is clamped into the device's range
    Color {
        #[arg(allow_negative_numbers = true)]
        level: i64,
    },
    /// Re-read the device's current state from the cloud
    Status,
}

impl ControlCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let (hub, _events) = Hub::from_args(&args.hub_args, PollIntervals::default())?;
        hub.registry.refresh().await?;

        match &self.cmd {
            SubCommand::On => hub.registry.turn_device_on_off(self.id, true).await?,
            SubCommand::Off => hub.registry.turn_device_on_off(self.id, false).await?,
            SubCommand::Dim { level } => hub.registry.dim_device(self.id, *level).await?,
            SubCommand::Color { level } => hub.registry.color_device(self.id, *level).await?,
            SubCommand::Status => {
                let device = hub.registry.refresh_device(self.id).await?;
                println!("{}", serde_json::to_string_pretty(&device)?);
            }
        }

        Ok(())
    }
}
