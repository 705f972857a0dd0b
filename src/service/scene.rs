use crate::error::HubError;
use crate::service::registry::DeviceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Pause between the commands of a scene; the hub drops datagrams
/// that arrive in quick succession
pub const SCENE_STEP_DELAY: Duration = Duration::from_millis(40);

pub struct SceneRunner {
    registry: Arc<DeviceRegistry>,
    delay: Duration,
}

impl SceneRunner {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            delay: SCENE_STEP_DELAY,
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    /// Sends the scene's commands in order. An unknown scene is not an
    /// error; the first failed command aborts the rest of the scene.
    pub async fn execute(&self, scene_id: u32) -> Result<(), HubError> {
        let Some(scene) = self.registry.get_scene(scene_id) else {
            log::warn!("scene {scene_id} is not known, nothing to do");
            return Ok(());
        };

        log::info!(
            "running scene {} ({scene_id}) with {} steps",
            scene.name,
            scene.entities.len()
        );
        for (idx, step) in scene.entities.iter().enumerate() {
            if idx > 0 {
                sleep(self.delay).await;
            }
            if let Err(err) = self
                .registry
                .dispatch(step.id, step.function, step.value)
                .await
            {
                log::error!(
                    "scene {} step {idx} (device {}): {err:#}",
                    scene.name,
                    step.id
                );
                return Err(err);
            }
        }
        Ok(())
    }
}
