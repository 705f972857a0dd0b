use crate::cloud_api::ReportPrecision;
use crate::error::HubError;
use crate::service::energy::EnergyPoller;
use crate::service::publisher::{Event, Publisher};
use crate::service::registry::DeviceRegistry;
use chrono::{Datelike, Local, NaiveDate};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The independently polled pieces of state
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Concern {
    Devices,
    EnergyLive,
    EnergyHistory,
}

#[derive(Clone, Copy, Debug)]
pub struct PollIntervals {
    pub devices: Duration,
    pub energy_live: Duration,
    pub energy_history: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            devices: Duration::from_secs(300),
            energy_live: Duration::from_secs(10),
            energy_history: Duration::from_secs(3600),
        }
    }
}

impl PollIntervals {
    fn get(&self, concern: Concern) -> Duration {
        match concern {
            Concern::Devices => self.devices,
            Concern::EnergyLive => self.energy_live,
            Concern::EnergyHistory => self.energy_history,
        }
    }
}

/// Runs each concern on its own timer, but only while somebody cares:
/// `signal_interest` arms a concern and every tick disarms it again.
pub struct PollingScheduler {
    registry: Arc<DeviceRegistry>,
    energy: Arc<EnergyPoller>,
    publisher: Arc<dyn Publisher>,
    intervals: PollIntervals,
    devices: AtomicBool,
    energy_live: AtomicBool,
    energy_history: AtomicBool,
}

impl PollingScheduler {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        energy: Arc<EnergyPoller>,
        publisher: Arc<dyn Publisher>,
        intervals: PollIntervals,
    ) -> Self {
        Self {
            registry,
            energy,
            publisher,
            intervals,
            devices: AtomicBool::new(false),
            energy_live: AtomicBool::new(false),
            energy_history: AtomicBool::new(false),
        }
    }

    fn flag(&self, concern: Concern) -> &AtomicBool {
        match concern {
            Concern::Devices => &self.devices,
            Concern::EnergyLive => &self.energy_live,
            Concern::EnergyHistory => &self.energy_history,
        }
    }

    pub fn signal_interest(&self, concern: Concern) {
        self.flag(concern).store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self, concern: Concern) -> bool {
        self.flag(concern).load(Ordering::SeqCst)
    }

    /// One timer tick. Returns whether the concern actually polled.
    pub async fn tick(&self, concern: Concern) -> bool {
        if !self.is_active(concern) {
            log::trace!("{concern}: nobody is interested, skipping");
            return false;
        }

        if let Err(err) = self.poll(concern).await {
            log::warn!("{concern} polling failed: {err:#}");
            self.publisher.emit(Event::ConcernFailed {
                concern,
                message: format!("{err:#}"),
            });
        }
        self.flag(concern).store(false, Ordering::SeqCst);
        true
    }

    async fn poll(&self, concern: Concern) -> Result<(), HubError> {
        match concern {
            Concern::Devices => self.registry.refresh().await,
            Concern::EnergyLive => self.energy.fetch_live().await.map(|_| ()),
            Concern::EnergyHistory => {
                let (start, end) = month_so_far(Local::now().date_naive());
                self.energy
                    .fetch_history(ReportPrecision::Day, start, end)
                    .await
                    .map(|_| ())
            }
        }
    }

    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        use strum::IntoEnumIterator;
        Concern::iter()
            .map(|concern| {
                let scheduler = self.clone();
                let period = self.intervals.get(concern);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        interval.tick().await;
                        scheduler.tick(concern).await;
                    }
                })
            })
            .collect()
    }
}

/// The report window covering the current month up to `today`.
/// It opens the day before the 1st since the first report row is
/// a boundary artifact.
fn month_so_far(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = today.with_day(1).unwrap_or(today);
    (first.pred_opt().unwrap_or(first), today)
}
