use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use clap::{Parser, Subcommand};
use clinic_core::{Clinic, Clock, DeviceRef, ManualClock, TelemetrySample, Vitals};
use clinic_wire::{build_clinic, dashboard_response_str, replay, PartialConfig, Scenario};
use rand::Rng;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "clinic-cli",
    about = "Replay clinic scenarios and print the waiting queue and follow-up dashboard."
)]
struct Cli {
    /// Log state transitions.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Log every ingest and re-triage.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a scenario file.
    Replay {
        /// Path to the scenario JSON.
        #[arg(short, long)]
        input: PathBuf,
        /// Partial config JSON, overrides the scenario's own config.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Replay a scenario, then stream random vitals for every follow-up patient.
    Simulate {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of telemetry rounds.
        #[arg(long, default_value_t = 5)]
        ticks: u32,
        /// Seconds between rounds, at most one day.
        #[arg(
            long,
            default_value_t = 30,
            value_parser = clap::value_parser!(i64).range(1..=86_400)
        )]
        interval_secs: i64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Command::Replay { input, config } => {
            let (clinic, clock) = load(&input, config.as_deref())?;
            print_state(&clinic, clock.now())?;
        }
        Command::Simulate {
            input,
            config,
            ticks,
            interval_secs,
        } => {
            let (clinic, clock) = load(&input, config.as_deref())?;
            simulate(&clinic, &clock, ticks, Duration::seconds(interval_secs))?;
            print_state(&clinic, clock.now())?;
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::new("info")
    } else {
        tracing_subscriber::EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load(
    input: &Path,
    config: Option<&Path>,
) -> anyhow::Result<(Clinic, Arc<ManualClock>)> {
    let data = std::fs::read_to_string(input)
        .with_context(|| format!("cannot read scenario {:?}", input))?;
    let mut scenario = Scenario::parse(&data)
        .with_context(|| format!("invalid scenario {:?}", input))?;

    if let Some(path) = config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {:?}", path))?;
        scenario.config = serde_json::from_str::<PartialConfig>(&raw)
            .with_context(|| format!("invalid config {:?}", path))?;
    }

    let clock = Arc::new(ManualClock::new(scenario.start_time()));
    let clinic = build_clinic(&scenario, clock.clone());
    let report = replay(&clinic, &clock, &scenario).context("scenario replay aborted")?;
    for rejected in &report.rejected {
        eprintln!("event #{} rejected: {}", rejected.index, rejected.reason);
    }
    info!(applied = report.applied, "scenario loaded");

    Ok((clinic, clock))
}

/// Pushes one random reading per follow-up patient per tick, like a ward of
/// wearables reporting on a fixed interval.
fn simulate(
    clinic: &Clinic,
    clock: &ManualClock,
    ticks: u32,
    interval: Duration,
) -> anyhow::Result<()> {
    let mut rng = rand::thread_rng();
    let limit = clinic.config().followup_row_limit;

    for tick in 0..ticks {
        clock.advance(interval);
        let followups = clinic.pipeline().followup_entries(limit)?;
        for entry in &followups {
            clinic.ingest(TelemetrySample {
                encounter_id: entry.encounter_id,
                device: Some(DeviceRef(format!("sim-{}", entry.encounter_id))),
                recorded_at: clock.now(),
                vitals: random_vitals(&mut rng),
            });
        }
        info!(tick, patients = followups.len(), "telemetry round pushed");
    }
    Ok(())
}

fn random_vitals(rng: &mut impl Rng) -> Vitals {
    Vitals {
        rate: Some(rng.gen_range(60..=120)),
        saturation: Some(rng.gen_range(90..=100)),
        temperature: Some((rng.gen_range(36.2f32..38.8) * 10.0).round() / 10.0),
        respiration_rate: Some(rng.gen_range(14..=26)),
        systolic: Some(rng.gen_range(100..=170)),
        diastolic: Some(rng.gen_range(60..=100)),
    }
}

fn print_state(clinic: &Clinic, now: chrono::DateTime<chrono::Utc>) -> anyhow::Result<()> {
    let dashboard = clinic.dashboard();
    let waiting = dashboard.waiting_board(None)?;
    let counts = clinic.pipeline().status_counts()?;

    println!(
        "Server time: {now}\nWaiting: {}  Called: {}  OPD done: {}  Follow-up: {}",
        counts.waiting, counts.called, counts.opd_done, counts.followup
    );
    println!("Waiting queue:\n{}", serde_json::to_string_pretty(&waiting)?);

    let response = dashboard.poll(now)?;
    println!("Follow-up dashboard:\n{}", dashboard_response_str(&response)?);
    Ok(())
}
