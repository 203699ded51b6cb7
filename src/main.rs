use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};

use babypod::api::{Record, UreqNetwork};
use babypod::chime::chime_for_timer;
use babypod::clock::{TrustedClock, host_clock};
use babypod::config::{DeviceConfig, load_device_config};
use babypod::devices::{RecordingUi, SharedUi};
use babypod::diagnostics;
use babypod::idle::{self, IdleHandles};
use babypod::input::{ConsoleInput, HoldAction, InputScheduler, SystemMonotonic};
use babypod::offline::{FailedEventAction, OfflineState};
use babypod::orchestrator::{CommitOutcome, Orchestrator};
use babypod::storage::DirStorage;
use babypod::timer_screen::{ActiveTimerScreen, TimerScreenOutcome};
use babypod::util::{format_elapsed_time, format_timestamp};

const CONSOLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliFailurePolicy {
    Keep,
    Delete,
}

impl From<CliFailurePolicy> for FailedEventAction {
    fn from(value: CliFailurePolicy) -> Self {
        match value {
            CliFailurePolicy::Keep => FailedEventAction::Keep,
            CliFailurePolicy::Delete => FailedEventAction::Delete,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Activity {
    Feeding,
    Pumping,
    Sleep,
    TummyTime,
}

impl Activity {
    fn timer_name(self) -> &'static str {
        match self {
            Self::Feeding => "feeding",
            Self::Pumping => "pumping",
            Self::Sleep => "sleep",
            Self::TummyTime => "tummy_time",
        }
    }
}

#[derive(Args, Debug)]
struct TrackArgs {
    #[arg(value_enum)]
    activity: Activity,

    #[arg(long, default_value = "breast milk")]
    food_type: String,

    #[arg(long, default_value = "both breasts")]
    method: String,

    /// Pumped amount.
    #[arg(long)]
    amount: Option<f64>,

    #[arg(long)]
    nap: bool,

    /// Extra note lines.
    #[arg(long = "note")]
    notes: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the mode, the clock, the saved snapshot and the offline queue.
    Status,
    /// Queue a diaper change for the next time the device is online.
    EnqueueChange {
        #[arg(long)]
        wet: bool,

        #[arg(long)]
        solid: bool,

        /// Extra note lines.
        #[arg(long = "note")]
        notes: Vec<String>,
    },
    /// Send every queued event to the remote, oldest first.
    Replay {
        #[arg(long, value_enum, default_value_t = CliFailurePolicy::Keep)]
        on_failure: CliFailurePolicy,
    },
    /// Report the config, storage, queue depth and clock.
    Diagnostics,
    /// Time an activity from the keyboard: Enter saves, "l" cancels.
    Track(TrackArgs),
}

#[derive(Parser, Debug)]
#[command(
    name = "babypod",
    version,
    about = "Offline-first baby activity logger"
)]
struct Cli {
    #[arg(long, default_value = "device.json")]
    config: PathBuf,

    #[arg(long, default_value = "babypod-data")]
    data_dir: PathBuf,

    #[arg(long)]
    offline: bool,

    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(level: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.init();
}

fn load_config(path: &Path) -> Result<DeviceConfig> {
    if !path.exists() {
        info!("{} not found, using defaults", path.display());
        return Ok(DeviceConfig::default());
    }
    load_device_config(path).with_context(|| format!("failed to load {}", path.display()))
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let mut config = load_config(&cli.config)?;
    if cli.offline {
        config.start_offline = true;
    }
    let storage = DirStorage::open(&cli.data_dir)
        .with_context(|| format!("unable to open data directory {}", cli.data_dir.display()))?;

    match cli.command.unwrap_or(Command::Status) {
        Command::Status => print_status(config, storage),
        Command::EnqueueChange { wet, solid, notes } => {
            enqueue_change(config, storage, wet, solid, &notes)
        }
        Command::Replay { on_failure } => replay(config, storage, on_failure.into()),
        Command::Diagnostics => diagnostics::run_diagnostics(&config, &storage),
        Command::Track(args) => track(config, storage, args),
    }
}

fn recording_ui() -> SharedUi {
    Rc::new(RefCell::new(RecordingUi::default()))
}

fn orchestrator(config: DeviceConfig, storage: DirStorage, ui: SharedUi) -> Orchestrator<DirStorage> {
    let state = OfflineState::load(&storage);
    let clock = host_clock(state.rtc_utc_offset);
    Orchestrator::from_state(config, storage, state, Box::new(clock), ui)
}

fn print_status(config: DeviceConfig, storage: DirStorage) -> Result<()> {
    let offline = config.start_offline || config.base_url.is_none();
    let orchestrator = orchestrator(config, storage, recording_ui());
    let state = orchestrator.state();

    println!("Mode: {}", if offline { "offline" } else { "online" });
    match orchestrator.clock().now() {
        Some(now) => println!("Clock: {}", format_timestamp(&now)),
        None => println!("Clock: not set"),
    }
    match (&state.last_feeding, &state.last_feeding_method) {
        (Some(start), Some(method)) => {
            println!("Last feeding: {} ({method})", format_timestamp(start));
        }
        (Some(start), None) => println!("Last feeding: {}", format_timestamp(start)),
        (None, _) => println!("Last feeding: none"),
    }
    match &state.active_timer {
        Some(timer) => println!("Active timer: {timer}"),
        None => println!("Active timer: none"),
    }

    let Some(queue) = orchestrator.queue() else {
        return Ok(());
    };
    let entries = queue.entries()?;
    println!("Queued events: {}", entries.len());
    for entry in entries {
        match entry.record {
            Ok(record) => println!("  {} {}", entry.file_name, record.kind()),
            Err(err) => println!("  {} unreadable: {err}", entry.file_name),
        }
    }
    Ok(())
}

fn enqueue_change(
    config: DeviceConfig,
    storage: DirStorage,
    wet: bool,
    solid: bool,
    notes: &[String],
) -> Result<()> {
    if !wet && !solid {
        bail!("a change needs --wet, --solid or both");
    }
    let mut orchestrator = orchestrator(config, storage, recording_ui());
    orchestrator.go_offline();
    let notes = orchestrator.notes_for(None, notes);
    let record = Record::change(orchestrator.child_id(), wet, solid, notes);
    match orchestrator.commit(record.into())? {
        CommitOutcome::Queued(file_name) => println!("queued {file_name}"),
        CommitOutcome::Sent => println!("sent"),
    }
    Ok(())
}

fn replay(config: DeviceConfig, storage: DirStorage, on_failure: FailedEventAction) -> Result<()> {
    let Some(base_url) = config.base_url.clone() else {
        bail!("base_url must be configured to replay the offline queue");
    };
    let network = UreqNetwork::new(&base_url, config.auth_token.clone(), config.request_timeout());
    let mut orchestrator =
        orchestrator(config, storage, recording_ui()).with_network(Box::new(network));
    let summary = orchestrator
        .back_online(|record, err| {
            let kind = record.map_or("unreadable entry", Record::kind);
            warn!("{kind} was rejected: {err}");
            on_failure
        })
        .context("replay stopped, remaining events stay queued")?;
    println!(
        "replayed {}, kept {}, deleted {}",
        summary.replayed, summary.kept, summary.deleted
    );
    Ok(())
}

fn track(mut config: DeviceConfig, storage: DirStorage, args: TrackArgs) -> Result<()> {
    let name = args.activity.timer_name();
    let network = match (&config.base_url, config.start_offline) {
        (Some(base_url), false) => Some(UreqNetwork::new(
            base_url,
            config.auth_token.clone(),
            config.request_timeout(),
        )),
        _ => None,
    };
    if network.is_none() {
        config.start_offline = true;
    }
    let retry = config.retry_policy();
    let idle_settings = config.idle_settings();
    let hold_bindings = config.hold_bindings();

    let ui = recording_ui();
    let mut orchestrator = orchestrator(config, storage, Rc::clone(&ui));
    if let Some(network) = network {
        orchestrator = orchestrator.with_network(Box::new(network));
    }

    let running = orchestrator
        .check_for_running_timer()
        .filter(|timer| timer.name == name);
    let mut timer = orchestrator.start_or_resume_timer(name, running)?;
    println!("{timer}");
    println!("press Enter to save, type l to cancel");

    let mut scheduler = InputScheduler::new(
        Box::new(ConsoleInput::stdin()),
        Box::new(SystemMonotonic::default()),
    )
    .with_retry_policy(retry)
    .with_poll_interval(CONSOLE_POLL_INTERVAL);
    for binding in hold_bindings {
        scheduler.add_hold_binding(binding);
    }
    let handles = IdleHandles::new(Rc::clone(&ui), None);
    idle::install(&mut scheduler, &idle_settings, &handles);

    let outcome = ActiveTimerScreen::new(ui)
        .with_idle_suppression(Rc::clone(&handles.suppress_idle_warning))
        .run(
            &mut scheduler,
            chime_for_timer(name)?,
            timer.resume_from_duration,
            None,
        )
        .context("timer screen stopped, the timer keeps running")?;

    match outcome {
        TimerScreenOutcome::Save { elapsed_secs } => {
            let notes = orchestrator.notes_for(Some(&timer), &args.notes);
            let child_id = orchestrator.child_id();
            let record = match args.activity {
                Activity::Feeding => {
                    Record::feeding(child_id, args.food_type, args.method, &timer, notes)?
                }
                Activity::Pumping => Record::pumping(child_id, args.amount, &timer, notes)?,
                Activity::Sleep => Record::sleep(child_id, args.nap.then_some(true), &timer, notes)?,
                Activity::TummyTime => Record::tummy_time(child_id, &timer, notes)?,
            };
            let elapsed = format_elapsed_time(elapsed_secs);
            match orchestrator.commit(record.into())? {
                CommitOutcome::Queued(file_name) => {
                    println!("saved {name} ({elapsed}), queued {file_name}");
                }
                CommitOutcome::Sent => println!("saved {name} ({elapsed})"),
            }
        }
        TimerScreenOutcome::Cancel => {
            orchestrator.cancel_timer(&mut timer)?;
            println!("canceled {name}");
        }
        TimerScreenOutcome::Hold(action) => {
            let action = match action {
                HoldAction::Shutdown => "shutdown",
                HoldAction::Reset => "reset",
            };
            println!("{name} timer left running, {action} requested");
        }
    }
    Ok(())
}
