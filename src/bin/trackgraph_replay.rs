//! trackgraph replay tool
//!
//! Feeds a JSON-lines event file, or a previously written journal, through
//! the event processor and reports what happened.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use trackgraph::archive::{open_journal, read_journal};
use trackgraph::inbox::InboxError;
use trackgraph::runtime::DrainSummary;
use trackgraph::{
    ChangeNotifier, Dispatch, DomainEvent, EventArchive, EventInbox, EventProcessor,
    GraphSnapshot, GraphStore, InMemoryEventArchive, InMemoryGraphStore, InboundEvent,
    JsonLinesInbox, ProcessorRuntime, RuntimeConfig,
};

/// Replay configuration
struct Config {
    /// JSON-lines file of events; stdin when neither source is given
    events: Option<PathBuf>,
    /// Journal directory to replay from
    replay_archive: Option<PathBuf>,
    /// Journal directory to archive into
    archive_dir: Option<PathBuf>,
    workers: usize,
    dispatch: Dispatch,
    snapshot: bool,
    log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            events: None,
            replay_archive: None,
            archive_dir: None,
            workers: 1,
            dispatch: Dispatch::EntityAffinity,
            snapshot: false,
            log_level: "info".to_string(),
        }
    }
}

fn usage() {
    println!("trackgraph-replay - apply tracking events to an in-memory graph");
    println!();
    println!("USAGE:");
    println!("    trackgraph-replay [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -e, --events <FILE>           JSON-lines event file [default: stdin]");
    println!("    -r, --replay-archive <DIR>    Replay a journal directory");
    println!("    -a, --archive-dir <DIR>       Journal every processed event into DIR");
    println!("    -w, --workers <N>             Worker threads [default: 1]");
    println!("        --shared                  Share one queue between workers");
    println!("    -s, --snapshot                Print the final graph as JSON");
    println!("        --log-level <FILTER>      Log filter [default: info]");
    println!("    -h, --help                    Print help information");
}

fn value(args: &[String], i: usize, flag: &str) -> Result<String, String> {
    args.get(i + 1)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--events" | "-e" => {
                config.events = Some(PathBuf::from(value(&args, i, "--events")?));
                i += 2;
            }
            "--replay-archive" | "-r" => {
                config.replay_archive = Some(PathBuf::from(value(&args, i, "--replay-archive")?));
                i += 2;
            }
            "--archive-dir" | "-a" => {
                config.archive_dir = Some(PathBuf::from(value(&args, i, "--archive-dir")?));
                i += 2;
            }
            "--workers" | "-w" => {
                let raw = value(&args, i, "--workers")?;
                config.workers = raw
                    .parse()
                    .map_err(|_| format!("invalid worker count: {raw}"))?;
                i += 2;
            }
            "--shared" => {
                config.dispatch = Dispatch::Shared;
                i += 1;
            }
            "--snapshot" | "-s" => {
                config.snapshot = true;
                i += 1;
            }
            "--log-level" => {
                config.log_level = value(&args, i, "--log-level")?;
                i += 2;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            arg => return Err(format!("unknown argument: {arg}")),
        }
    }

    if config.events.is_some() && config.replay_archive.is_some() {
        return Err("--events and --replay-archive are mutually exclusive".to_string());
    }
    if config.archive_dir.is_some() && config.archive_dir == config.replay_archive {
        return Err("--archive-dir must differ from --replay-archive".to_string());
    }
    Ok(config)
}

/// Logs every committed position change.
struct LoggingNotifier;

impl ChangeNotifier for LoggingNotifier {
    fn notify_position_changed(&self, item_id: &str, location_id: Option<&str>) {
        info!(item_id, location_id = location_id.unwrap_or("-"), "position changed");
    }
}

/// Serves events already read from a journal.
struct ReplayInbox(std::vec::IntoIter<DomainEvent>);

impl EventInbox for ReplayInbox {
    fn next_event(&mut self) -> Option<Result<InboundEvent, InboxError>> {
        self.0.next().map(|event| Ok(InboundEvent::Known(event)))
    }
}

fn report(summary: &DrainSummary) {
    println!(
        "received {}: applied {}, duplicates {}, skipped {}, unreadable {}, failed {}",
        summary.received(),
        summary.applied,
        summary.duplicates,
        summary.skipped,
        summary.decode_errors,
        summary.failures.len()
    );
    for failure in &summary.failures {
        println!(
            "  {} {} ({}): {}",
            failure.event_type, failure.entity_id, failure.event_id, failure.error
        );
    }
}

fn run(config: Config) -> Result<bool, Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryGraphStore::new());
    let archive: Arc<dyn EventArchive> = match &config.archive_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "journaling events");
            Arc::new(open_journal(dir, None)?)
        }
        None => Arc::new(InMemoryEventArchive::new()),
    };

    let processor = Arc::new(EventProcessor::new(
        store.clone(),
        archive,
        Arc::new(LoggingNotifier),
    ));
    let runtime = ProcessorRuntime::new(
        processor,
        RuntimeConfig {
            workers: config.workers,
            dispatch: config.dispatch,
            ..RuntimeConfig::default()
        },
    )?;

    let mut inbox: Box<dyn EventInbox> = match (&config.events, &config.replay_archive) {
        (Some(path), _) if path.as_os_str() != "-" => {
            Box::new(JsonLinesInbox::new(BufReader::new(File::open(path)?)))
        }
        (None, Some(dir)) => Box::new(ReplayInbox(read_journal(dir)?.into_iter())),
        _ => Box::new(JsonLinesInbox::new(std::io::stdin().lock())),
    };

    let summary = runtime.drain(inbox.as_mut());
    drop(runtime);
    report(&summary);

    if config.snapshot {
        let snapshot = GraphSnapshot::capture(store.as_ref())?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    store.close()?;

    Ok(summary.is_clean())
}

fn main() -> ExitCode {
    let config = match parse_args() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(2);
        }
    };

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
