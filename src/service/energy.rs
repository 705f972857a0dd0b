use crate::cloud_api::{HubCloud, ReportPrecision, ReportRow};
use crate::config::Credentials;
use crate::error::HubError;
use crate::service::publisher::{Event, Publisher};
use crate::service::registry::DeviceRegistry;
use crate::service::session::Session;
use crate::service::store::{EnergyHistoryStore, EnergyReading, MeterCounters};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Number of meter functions the energy module reports live
const LIVE_FIELDS: usize = 8;
/// Number of counters in each aggregated report row
const REPORT_FIELDS: usize = 6;
/// Raw meter units (Wh, dm³) per kWh or m³
const UNITS_PER_KILO: f64 = 1000.0;

/// Current meter state. The `power` and `solar` fields are
/// instantaneous; the rest are cumulative counters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveEnergy {
    pub power_low: Option<i64>,
    pub power_high: Option<i64>,
    pub solar_low: Option<i64>,
    pub solar_high: Option<i64>,
    pub power: Option<i64>,
    pub solar: Option<i64>,
    pub gas: Option<i64>,
    pub water: Option<i64>,
    pub updated: DateTime<Utc>,
}

impl LiveEnergy {
    fn from_functions(values: &[Option<i64>], updated: DateTime<Utc>) -> Result<Self, HubError> {
        if values.len() != LIVE_FIELDS {
            return Err(HubError::Upstream(format!(
                "energy module reported {} values, expected {LIVE_FIELDS}",
                values.len()
            )));
        }
        Ok(Self {
            power_low: values[0],
            power_high: values[1],
            solar_low: values[2],
            solar_high: values[3],
            power: values[4],
            solar: values[5],
            gas: values[6],
            water: values[7],
            updated,
        })
    }
}

/// Consumption per channel, in kWh or m³
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EnergyChannels {
    pub power_high: f64,
    pub power_low: f64,
    pub solar_high: f64,
    pub solar_low: f64,
    pub gas: f64,
    pub water: f64,
}

impl EnergyChannels {
    fn between(prev: &MeterCounters, curr: &MeterCounters) -> Self {
        let diff = |p: i64, c: i64| c.saturating_sub(p) as f64 / UNITS_PER_KILO;
        Self {
            power_high: diff(prev.power_high, curr.power_high),
            power_low: diff(prev.power_low, curr.power_low),
            solar_high: diff(prev.solar_high, curr.solar_high),
            solar_low: diff(prev.solar_low, curr.solar_low),
            gas: diff(prev.gas, curr.gas),
            water: diff(prev.water, curr.water),
        }
    }

    fn add(&mut self, other: &Self) {
        self.power_high += other.power_high;
        self.power_low += other.power_low;
        self.solar_high += other.solar_high;
        self.solar_low += other.solar_low;
        self.gas += other.gas;
        self.water += other.water;
    }
}

/// Whether a channel has any reading at all in the period.
/// A zero value counts as no reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChannelFlags {
    pub power_high: bool,
    pub power_low: bool,
    pub solar_high: bool,
    pub solar_low: bool,
    pub gas: bool,
    pub water: bool,
}

impl ChannelFlags {
    fn observe(&mut self, usage: &EnergyChannels) {
        self.power_high |= usage.power_high != 0.0;
        self.power_low |= usage.power_low != 0.0;
        self.solar_high |= usage.solar_high != 0.0;
        self.solar_low |= usage.solar_low != 0.0;
        self.gas |= usage.gas != 0.0;
        self.water |= usage.water != 0.0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DailyEnergy {
    pub date: NaiveDate,
    pub usage: EnergyChannels,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonthEnergyReport {
    pub year: i32,
    pub month: u32,
    /// One entry per calendar day of the month
    pub days: Vec<DailyEnergy>,
    pub totals: EnergyChannels,
    pub has_readings: ChannelFlags,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EnergySnapshot {
    pub energy_module_id: Option<u32>,
    pub live: Option<LiveEnergy>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct PollerState {
    live: Option<LiveEnergy>,
    last_error: Option<String>,
}

pub struct EnergyPoller {
    session: Arc<Session>,
    registry: Arc<DeviceRegistry>,
    cloud: Arc<dyn HubCloud>,
    store: Arc<dyn EnergyHistoryStore>,
    publisher: Arc<dyn Publisher>,
    state: parking_lot::Mutex<PollerState>,
}

impl EnergyPoller {
    pub fn new(
        session: Arc<Session>,
        registry: Arc<DeviceRegistry>,
        cloud: Arc<dyn HubCloud>,
        store: Arc<dyn EnergyHistoryStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            session,
            registry,
            cloud,
            store,
            publisher,
            state: parking_lot::Mutex::new(PollerState::default()),
        }
    }

    pub fn snapshot(&self) -> EnergySnapshot {
        let state = self.state.lock();
        EnergySnapshot {
            energy_module_id: self.registry.energy_module_id(),
            live: state.live.clone(),
            last_error: state.last_error.clone(),
        }
    }

    fn record_outcome<T>(&self, result: &Result<T, HubError>) {
        let mut state = self.state.lock();
        match result {
            Ok(_) => {
                state.last_error.take();
            }
            Err(err) => {
                state.last_error.replace(format!("{err:#}"));
            }
        }
    }

    /// The energy module and the credentials to query it with.
    /// Both are resolved before anything goes over the network.
    async fn target(&self) -> Result<(u32, Credentials), HubError> {
        let module_id = self.registry.energy_module_id().ok_or_else(|| {
            HubError::Configuration("no energy module has been found on the hub".to_string())
        })?;
        let creds = self.session.credentials().await?;
        Ok((module_id, creds))
    }

    pub async fn fetch_live(&self) -> Result<LiveEnergy, HubError> {
        let result = self.fetch_live_impl().await;
        self.record_outcome(&result);
        result
    }

    async fn fetch_live_impl(&self) -> Result<LiveEnergy, HubError> {
        let (module_id, creds) = self.target().await?;
        let values = self
            .cloud
            .check(&creds, module_id)
            .await
            .map_err(HubError::upstream)?;
        let live = LiveEnergy::from_functions(&values, Utc::now())?;

        self.state.lock().live.replace(live.clone());
        self.publisher.emit(Event::EnergyLive {
            readings: live.clone(),
        });
        Ok(live)
    }

    /// Fetches an aggregated report for `[start, end]` and stores one
    /// reading per row. The first and last rows are artifacts of the
    /// reporting window and rows with gaps are skipped; the date cursor
    /// advances for every row. Returns the number of stored readings.
    pub async fn fetch_history(
        &self,
        precision: ReportPrecision,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize, HubError> {
        let result = self.fetch_history_impl(precision, start, end).await;
        self.record_outcome(&result);
        result
    }

    async fn fetch_history_impl(
        &self,
        precision: ReportPrecision,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize, HubError> {
        let (module_id, creds) = self.target().await?;
        let rows = self
            .cloud
            .aggregated_reports(&creds, module_id, precision, start, end)
            .await
            .map_err(HubError::upstream)?;

        // the first and last rows are boundary artifacts and are never stored
        let last = rows.len().saturating_sub(1);
        let is_interior = |idx: usize| idx != 0 && idx != last;
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(idx, row)| is_interior(*idx) && row.len() != REPORT_FIELDS)
        {
            return Err(HubError::Upstream(format!(
                "report row {idx} has {} values, expected {REPORT_FIELDS}",
                row.len()
            )));
        }

        let mut cursor = start;
        let mut upserted = 0;
        for (idx, row) in rows.iter().enumerate() {
            if is_interior(idx) {
                if let Some(counters) = counters_from_row(row) {
                    self.store
                        .upsert(cursor, counters)
                        .await
                        .map_err(HubError::upstream)?;
                    upserted += 1;
                } else {
                    log::trace!("no energy data for {cursor}");
                }
            }
            cursor = precision.next(cursor).ok_or_else(|| {
                HubError::Upstream(format!("report runs past the last date after {cursor}"))
            })?;
        }

        log::info!("stored {upserted} energy readings for {start}..{end}");
        self.publisher
            .emit(Event::EnergyHistoryUpdated { upserted });
        Ok(upserted)
    }

    /// Daily consumption for one calendar month, from the stored readings
    pub async fn get_month_energy_readings(
        &self,
        month: u32,
        year: i32,
    ) -> Result<MonthEnergyReport, HubError> {
        let readings = self.store.find_all().await.map_err(HubError::upstream)?;
        month_report(&readings, month, year)
    }
}

/// Counters in report row order, or `None` if the row has a gap
fn counters_from_row(row: &ReportRow) -> Option<MeterCounters> {
    match row.as_slice() {
        [
            Some(power_low),
            Some(power_high),
            Some(solar_low),
            Some(solar_high),
            Some(gas),
            Some(water),
        ] => Some(MeterCounters {
            power_high: *power_high,
            power_low: *power_low,
            solar_high: *solar_high,
            solar_low: *solar_low,
            gas: *gas,
            water: *water,
        }),
        _ => None,
    }
}

fn month_report(
    readings: &[EnergyReading],
    month: u32,
    year: i32,
) -> Result<MonthEnergyReport, HubError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| HubError::Configuration(format!("invalid month {year}-{month}")))?;
    let next_month = first
        .checked_add_months(chrono::Months::new(1))
        .ok_or_else(|| HubError::Configuration(format!("invalid month {year}-{month}")))?;

    let mut sorted = readings.to_vec();
    sorted.sort_by_key(|r| r.date);

    let diffs: Vec<DailyEnergy> = sorted
        .windows(2)
        .map(|pair| DailyEnergy {
            date: pair[1].date,
            usage: EnergyChannels::between(&pair[0].counters, &pair[1].counters),
        })
        .filter(|daily| daily.date.year() == year && daily.date.month() == month)
        .collect();

    let mut days = vec![];
    let mut totals = EnergyChannels::default();
    let mut has_readings = ChannelFlags::default();
    let mut date = first;
    while date < next_month {
        let usage = diffs
            .iter()
            .find(|d| d.date == date)
            .map(|d| d.usage)
            .unwrap_or_default();
        totals.add(&usage);
        has_readings.observe(&usage);
        days.push(DailyEnergy { date, usage });

        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    Ok(MonthEnergyReport {
        year,
        month,
        days,
        totals,
        has_readings,
    })
}
