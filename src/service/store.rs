use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cumulative meter counters in raw units (Wh, dm³)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterCounters {
    pub power_high: i64,
    pub power_low: i64,
    pub solar_high: i64,
    pub solar_low: i64,
    pub gas: i64,
    pub water: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyReading {
    pub date: NaiveDate,
    pub counters: MeterCounters,
}

/// Persistence of the daily meter readings, one row per day
#[async_trait]
pub trait EnergyHistoryStore: Send + Sync {
    /// Creates the row for `date`, or replaces its counters
    async fn upsert(&self, date: NaiveDate, counters: MeterCounters) -> anyhow::Result<()>;

    /// All readings, oldest first
    async fn find_all(&self) -> anyhow::Result<Vec<EnergyReading>>;
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS energy_reading (
    date TEXT PRIMARY KEY NOT NULL,
    power_high INTEGER NOT NULL,
    power_low INTEGER NOT NULL,
    solar_high INTEGER NOT NULL,
    solar_low INTEGER NOT NULL,
    gas INTEGER NOT NULL,
    water INTEGER NOT NULL
)";

pub struct SqliteEnergyStore {
    conn: Mutex<Connection>,
}

impl SqliteEnergyStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {dir:?}"))?;
        }
        let conn = Connection::open(path).with_context(|| format!("opening {path:?}"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute(SCHEMA, [])
            .context("creating energy_reading table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl EnergyHistoryStore for SqliteEnergyStore {
    async fn upsert(&self, date: NaiveDate, counters: MeterCounters) -> anyhow::Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO energy_reading
                    (date, power_high, power_low, solar_high, solar_low, gas, water)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(date) DO UPDATE SET
                    power_high = excluded.power_high,
                    power_low = excluded.power_low,
                    solar_high = excluded.solar_high,
                    solar_low = excluded.solar_low,
                    gas = excluded.gas,
                    water = excluded.water",
                params![
                    date.to_string(),
                    counters.power_high,
                    counters.power_low,
                    counters.solar_high,
                    counters.solar_low,
                    counters.gas,
                    counters.water,
                ],
            )
            .with_context(|| format!("storing energy reading for {date}"))?;
        Ok(())
    }

    async fn find_all(&self) -> anyhow::Result<Vec<EnergyReading>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date, power_high, power_low, solar_high, solar_low, gas, water
             FROM energy_reading ORDER BY date",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                MeterCounters {
                    power_high: row.get(1)?,
                    power_low: row.get(2)?,
                    solar_high: row.get(3)?,
                    solar_low: row.get(4)?,
                    gas: row.get(5)?,
                    water: row.get(6)?,
                },
            ))
        })?;

        let mut readings = vec![];
        for row in rows {
            let (date, counters) = row?;
            let date = date
                .parse()
                .with_context(|| format!("energy_reading has invalid date {date:?}"))?;
            readings.push(EnergyReading { date, counters });
        }
        Ok(readings)
    }
}
