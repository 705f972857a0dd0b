use crate::service::device::Device;
use crate::service::energy::LiveEnergy;
use crate::service::scheduler::Concern;
use async_channel::{Receiver, Sender};
use serde::Serialize;

/// State change notifications for whoever is interested
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    DevicesChanged { devices: usize, scenes: usize },
    DeviceUpdated { device: Device },
    EnergyLive { readings: LiveEnergy },
    EnergyHistoryUpdated { upserted: usize },
    ConcernFailed { concern: Concern, message: String },
}

pub trait Publisher: Send + Sync {
    fn emit(&self, event: Event);
}

/// Queues events on an unbounded channel so that emitting never waits
/// on the consumer
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: Sender<Event>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, Receiver<Event>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl Publisher for ChannelPublisher {
    fn emit(&self, event: Event) {
        if let Err(err) = self.tx.try_send(event) {
            log::trace!("dropping event, nobody is listening: {err:#}");
        }
    }
}
