use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::{error, info, warn};
use ulid::Ulid;

use crewdesk::config::Config;
use crewdesk::engine::{AssignmentEngine, DraftSet, EngineError};
use crewdesk::model::{BookingId, ResourceId};
use crewdesk::store::{InMemoryStore, JunctionStore};

const USAGE: &str = "usage:
  crewdesk seed <bookings.json>
  crewdesk check <YYYY-MM-DD>
  crewdesk apply <YYYY-MM-DD> <edits.json>";

/// One booking in a seed file. `start` is a UTC wall-clock time on `date`.
#[derive(Debug, Deserialize)]
struct SeedBooking {
    #[serde(default)]
    id: Option<BookingId>,
    date: NaiveDate,
    start: String,
    duration_minutes: i64,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    coaches: Vec<ResourceId>,
    #[serde(default)]
    drivers: Vec<ResourceId>,
    #[serde(default)]
    note: String,
}

/// One edit in an apply file. Absent fields are left as loaded.
#[derive(Debug, Deserialize)]
struct Edit {
    booking: BookingId,
    #[serde(default)]
    coaches: Option<Vec<ResourceId>>,
    #[serde(default)]
    drivers: Option<Vec<ResourceId>>,
    #[serde(default)]
    note: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("{USAGE}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: &[String]) -> Result<ExitCode, Box<dyn Error>> {
    let config = Config::from_env();
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(InMemoryStore::open(&config.wal_path())?);
    info!(data_dir = %config.data_dir.display(), bookings = store.booking_count(), "crewdesk started");

    let engine = AssignmentEngine::new(store.clone(), store.clone())
        .with_commit_concurrency(config.commit_concurrency);

    let code = match args {
        [cmd, file] if cmd == "seed" => seed(&store, Path::new(file)).await?,
        [cmd, date] if cmd == "check" => check(&engine, parse_date(date)?).await?,
        [cmd, date, file] if cmd == "apply" => {
            apply(&engine, parse_date(date)?, Path::new(file)).await?
        }
        _ => return Err("unrecognised command".into()),
    };

    if store.appends_since_compact().await >= config.compact_threshold {
        store.compact().await?;
    }
    Ok(code)
}

fn parse_date(s: &str) -> Result<NaiveDate, Box<dyn Error>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("bad date {s:?}: {e}").into())
}

async fn seed(store: &InMemoryStore, file: &Path) -> Result<ExitCode, Box<dyn Error>> {
    let bookings: Vec<SeedBooking> = serde_json::from_slice(&std::fs::read(file)?)?;
    for b in bookings {
        let time = NaiveTime::parse_from_str(&b.start, "%H:%M")
            .map_err(|e| format!("bad start time {:?}: {e}", b.start))?;
        let start = b.date.and_time(time).and_utc().timestamp_millis();
        let id = b.id.unwrap_or_else(Ulid::new);

        store
            .schedule_booking(id, start, b.duration_minutes, b.label, b.note)
            .await?;
        if !b.coaches.is_empty() || !b.drivers.is_empty() {
            let coaches = b.coaches.into_iter().collect();
            let drivers = b.drivers.into_iter().collect();
            store.replace_assignments(id, &coaches, &drivers).await?;
        }
        println!("{id} {} {}", b.date, b.start);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_day(drafts: &DraftSet) {
    for d in drafts.drafts() {
        let label = d.label.as_deref().unwrap_or("-");
        let coaches: Vec<String> = d.coach_ids().iter().map(Ulid::to_string).collect();
        let drivers: Vec<String> = d.driver_ids().iter().map(Ulid::to_string).collect();
        println!(
            "{} {} {label} coaches=[{}] drivers=[{}]",
            d.span,
            d.booking_id,
            coaches.join(","),
            drivers.join(",")
        );
    }
}

async fn check(engine: &AssignmentEngine, date: NaiveDate) -> Result<ExitCode, Box<dyn Error>> {
    let drafts = engine.open_draft_set(date).await?;
    print_day(&drafts);
    let report = engine.detect_conflicts(&drafts).await?;
    println!("{report}");
    Ok(if report.is_clear() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn apply(
    engine: &AssignmentEngine,
    date: NaiveDate,
    file: &Path,
) -> Result<ExitCode, Box<dyn Error>> {
    let edits: Vec<Edit> = serde_json::from_slice(&std::fs::read(file)?)?;
    let mut drafts = engine.open_draft_set(date).await?;
    for edit in edits {
        if let Some(coaches) = edit.coaches {
            drafts.set_coaches(edit.booking, coaches)?;
        }
        if let Some(drivers) = edit.drivers {
            drafts.set_drivers(edit.booking, drivers)?;
        }
        if let Some(note) = edit.note {
            drafts.set_note(edit.booking, note)?;
        }
    }

    match engine.commit(&mut drafts).await {
        Ok(report) => {
            println!("{report}");
            Ok(ExitCode::SUCCESS)
        }
        Err(EngineError::ConflictsDetected(report)) => {
            warn!(conflicts = report.conflicts().len(), "nothing written");
            println!("{report}");
            Ok(ExitCode::from(1))
        }
        Err(EngineError::PartialCommit(report)) => {
            println!("{report}");
            Ok(ExitCode::from(1))
        }
        Err(e) => Err(e.into()),
    }
}
