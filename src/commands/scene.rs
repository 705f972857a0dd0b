use crate::service::hub::Hub;
use crate::service::scheduler::PollIntervals;
use std::time::Duration;

#[derive(clap::Parser, Debug)]
pub struct SceneCommand {
    /// The scene id, as shown by `list`
    id: u32,

    /// Pause between the scene's commands, in milliseconds
    #[arg(long, default_value_t = 40)]
    delay_ms: u64,
}

impl SceneCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let (hub, _events) = Hub::from_args(&args.hub_args, PollIntervals::default())?;
        hub.registry.refresh().await?;
        let scenes = hub.scenes.with_delay(Duration::from_millis(self.delay_ms));
        scenes.execute(self.id).await?;
        Ok(())
    }
}
