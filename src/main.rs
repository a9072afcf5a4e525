use clap::{Parser, Subcommand};
use practice_tracker::infrastructure::config::{ensure_default_config, load_config};
use practice_tracker::infrastructure::logging::init_tracing;
use practice_tracker::{
    ActivityCallbacks, ActivityStore, DayBoundaryScheduler, Difficulty, EntityType, InvalidationHub,
    ReconciliationPolicy, ReqwestActivityStore, ToggleController, ToggleState, TrackerOptions,
    TrackerSession,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Records daily practice of an asana, series or sequence.
#[derive(Parser, Debug)]
#[command(name = "practice-tracker", version)]
#[command(about = "Optimistic daily practice tracker")]
struct Cli {
    /// Directory holding tracker.json (created with defaults if missing)
    config_dir: PathBuf,

    /// What is being tracked: asana, series or sequence
    #[arg(value_parser = parse_entity_type)]
    entity_type: EntityType,

    /// Id of the tracked asana, series or sequence
    entity_id: String,

    /// Signed-in user; without it every toggle is refused
    #[arg(long, env = "PRACTICE_TRACKER_USER_ID")]
    user_id: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Mark today as practiced, replacing any entry already recorded
    On {
        /// easy, average or difficult
        #[arg(value_parser = parse_difficulty)]
        difficulty: Option<Difficulty>,
    },
    /// Remove today's entry
    Off,
    /// Stay mounted, refreshing on day rollover and on invalidation
    /// messages read as JSON lines from stdin (default)
    Watch,
}

fn parse_entity_type(value: &str) -> Result<EntityType, String> {
    EntityType::parse(value).ok_or_else(|| format!("expected asana, series or sequence, got '{value}'"))
}

fn parse_difficulty(value: &str) -> Result<Difficulty, String> {
    Difficulty::parse(value).ok_or_else(|| format!("expected easy, average or difficult, got '{value}'"))
}

fn print_state(label: &str, state: &ToggleState) {
    let difficulty = state
        .selected_difficulty
        .map(Difficulty::as_str)
        .unwrap_or("none");
    match &state.error {
        Some(error) => println!("{label}: checked={} difficulty={difficulty} error={error}", state.checked),
        None => println!("{label}: checked={} difficulty={difficulty}", state.checked),
    }
}

async fn load_today<S>(controller: &ToggleController<S>) -> Result<(), String>
where
    S: ActivityStore + 'static,
{
    match controller.check_today().await {
        Ok(state) => {
            print_state("today", &state);
            Ok(())
        }
        // Without a successful read the replace-vs-create decision is a guess.
        Err(error) => Err(error.to_string()),
    }
}

/// Publishes one stdin line to the hub. Blank and non-JSON lines are skipped.
fn forward_line(hub: &InvalidationHub, line: &str) -> Option<usize> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(message) => {
            let listeners = hub.publish(message);
            debug!(listeners, "invalidation message published");
            Some(listeners)
        }
        Err(error) => {
            warn!(error = %error, "ignoring non-JSON input line");
            None
        }
    }
}

async fn watch(
    session: TrackerSession<ReqwestActivityStore>,
    hub: InvalidationHub,
) -> Result<(), String> {
    print_state("mounted", &session.controller().state());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.map_err(|error| format!("failed to listen for ctrl-c: {error}"))?;
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    forward_line(&hub, &line);
                }
                Ok(None) => {
                    debug!("stdin closed; waiting for ctrl-c");
                    stdin_open = false;
                }
                Err(error) => {
                    warn!(error = %error, "stdin read failed; waiting for ctrl-c");
                    stdin_open = false;
                }
            },
        }
    }

    print_state("final", &session.controller().state());
    session.unmount();
    Ok(())
}

async fn run(cli: Cli) -> Result<(), String> {
    ensure_default_config(&cli.config_dir).map_err(|error| error.to_string())?;
    let config = load_config(&cli.config_dir).map_err(|error| error.to_string())?;
    let timezone = config.time_zone().map_err(|error| error.to_string())?;

    let store = Arc::new(
        ReqwestActivityStore::new(&config.api_base_url, cli.entity_type)
            .map_err(|error| error.to_string())?,
    );
    let options = TrackerOptions::new(cli.entity_type, cli.entity_id.clone(), cli.entity_id.clone())
        .with_selection_mode(config.selection_mode);
    let callbacks = ActivityCallbacks::default()
        .on_toggle(|is_tracked| info!(is_tracked, "activity toggled"))
        .on_refresh(|| debug!("activity refresh requested"));
    let user_id = cli.user_id.clone();
    let controller = Arc::new(
        ToggleController::new(options, store, Arc::new(move || user_id.clone()))
            .with_reconciliation_policy(ReconciliationPolicy::from(&config.reconciliation))
            .with_timezone(timezone)
            .with_callbacks(callbacks),
    );

    match cli.command.unwrap_or(Command::Watch) {
        Command::On { difficulty } => {
            load_today(&controller).await?;
            let result = controller.toggle_on(difficulty).await;
            controller.settle().await;
            print_state("after on", &controller.state());
            result.map_err(|error| error.to_string())
        }
        Command::Off => {
            load_today(&controller).await?;
            let result = controller.toggle_off().await;
            controller.settle().await;
            print_state("after off", &controller.state());
            result.map_err(|error| error.to_string())
        }
        Command::Watch => {
            let hub = InvalidationHub::new(config.invalidation_channel_capacity);
            let session = TrackerSession::mount(
                Arc::clone(&controller),
                DayBoundaryScheduler::new(timezone).with_poll_interval(config.day_poll_interval()),
                Some(hub.subscribe()),
            )
            .await;
            watch(session, hub).await
        }
    }
}

fn main() -> ExitCode {
    if let Err(error) = init_tracing("info") {
        eprintln!("{error}");
        return ExitCode::FAILURE;
    }
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error: failed to start runtime: {error}");
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(run(cli));
    // A pending stdin read holds a blocking thread that never returns on its own.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
