use crate::cloud_api::ReportPrecision;
use crate::service::hub::Hub;
use crate::service::scheduler::PollIntervals;
use chrono::{Datelike, Local, NaiveDate};

#[derive(clap::Parser, Debug)]
pub struct EnergyCommand {
    #[command(subcommand)]
    cmd: SubCommand,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Precision {
    Day,
    Month,
}

impl From<Precision> for ReportPrecision {
    fn from(p: Precision) -> Self {
        match p {
            Precision::Day => Self::Day,
            Precision::Month => Self::Month,
        }
    }
}

#[derive(clap::Parser, Debug)]
enum SubCommand {
    /// Show the current meter readings and the last polling error
    Live,
    /// Fetch an aggregated report and store it in the history database
    History {
        /// First day of the report, eg: 2024-03-01
        #[arg(long)]
        from: NaiveDate,
        /// Last day of the report. Defaults to today
        #[arg(long)]
        till: Option<NaiveDate>,
        #[arg(long, value_enum, default_value_t = Precision::Day)]
        precision: Precision,
    },
    /// Show daily consumption for a month from the history database
    Month {
        /// Defaults to the current month
        month: Option<u32>,
        /// Defaults to the current year
        year: Option<i32>,
    },
}

impl EnergyCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let (hub, _events) = Hub::from_args(&args.hub_args, PollIntervals::default())?;

        match &self.cmd {
            SubCommand::Live => {
                hub.registry.refresh().await?;
                let result = hub.energy.fetch_live().await;
                println!("{}", serde_json::to_string_pretty(&hub.energy.snapshot())?);
                result?;
            }
            SubCommand::History {
                from,
                till,
                precision,
            } => {
                hub.registry.refresh().await?;
                let till = till.unwrap_or_else(|| Local::now().date_naive());
                let count = hub
                    .energy
                    .fetch_history((*precision).into(), *from, till)
                    .await?;
                println!("stored {count} readings");
            }
            SubCommand::Month { month, year } => {
                let today = Local::now().date_naive();
                let report = hub
                    .energy
                    .get_month_energy_readings(
                        month.unwrap_or(today.month()),
                        year.unwrap_or(today.year()),
                    )
                    .await?;

                let flags = &report.has_readings;
                for day in &report.days {
                    let u = &day.usage;
                    let mut line = format!("{}", day.date);
                    if flags.power_low || flags.power_high {
                        line.push_str(&format!(
                            " power {:.3}/{:.3} kWh",
                            u.power_low, u.power_high
                        ));
                    }
                    if flags.solar_low || flags.solar_high {
                        line.push_str(&format!(
                            " solar {:.3}/{:.3} kWh",
                            u.solar_low, u.solar_high
                        ));
                    }
                    if flags.gas {
                        line.push_str(&format!(" gas {:.3} m³", u.gas));
                    }
                    if flags.water {
                        line.push_str(&format!(" water {:.3} m³", u.water));
                    }
                    println!("{line}");
                }
                println!("totals: {}", serde_json::to_string(&report.totals)?);
            }
        }

        Ok(())
    }
}
