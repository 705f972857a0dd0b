use crate::service::hub::Hub;
use crate::service::scheduler::PollIntervals;

#[derive(clap::Parser, Debug)]
pub struct ListCommand {
    /// Print the devices and scenes as JSON
    #[arg(long)]
    json: bool,
}

impl ListCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let (hub, _events) = Hub::from_args(&args.hub_args, PollIntervals::default())?;
        hub.registry.refresh().await?;
        let snapshot = hub.registry.snapshot();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
            return Ok(());
        }

        for device in &snapshot.devices {
            let state = if device.switched_on { "on" } else { "off" };
            let mut line = format!("{device}: {state}");
            if let Some(dim) = &device.dim {
                line.push_str(&format!(" dim={} ({}..{})", dim.level, dim.min, dim.max));
            }
            if let Some(color) = &device.color {
                line.push_str(&format!(
                    " color={} ({}..{})",
                    color.level, color.min, color.max
                ));
            }
            if device.blacklisted.is_some() {
                line.push_str(" [blacklisted]");
            }
            println!("{line}");
        }

        for scene in &snapshot.scenes {
            let flag = if scene.blacklisted.is_some() {
                " [blacklisted]"
            } else {
                ""
            };
            println!(
                "scene {} ({}): {} steps{flag}",
                scene.name,
                scene.id,
                scene.entities.len()
            );
        }

        if let Some(id) = snapshot.energy_module_id {
            println!("energy module: {id}");
        }

        Ok(())
    }
}
