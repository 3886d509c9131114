mod command;
mod console;
mod story;

use crate::command::{Command, HELP};
use crate::console::{ConsoleAudioOutput, ConsoleSpeech};
use crate::story::Story;
use clap::Parser;
use readalong_core::{
    AudioOutput, AutoAdvanceController, CoreError, LocalSpeech, NarrationEvent,
    PlaybackSynchronizer, ReadalongConfig, ReaderEvent, SessionState, SpeechProvider, WordTiming,
};
use readalong_speech_elevenlabs::ElevenLabsProvider;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Read a story aloud with word-by-word highlighting
#[derive(Debug, Parser)]
#[command(name = "readalong", version, about)]
struct Args {
    /// Story file (TOML with `title` and `pages`)
    story: PathBuf,

    /// Write every fetched narration clip into this directory
    #[arg(long, value_name = "DIR")]
    save_audio: Option<PathBuf>,

    /// Narrate with local speech only, even when an API key is configured
    #[arg(long)]
    offline: bool,

    /// Start narrating the first page right away (auto-follow stays off)
    #[arg(long)]
    autoplay: bool,
}

fn main() {
    let args = Args::parse();

    // Check config for logging.enabled before full config load
    let file_logging_enabled = check_file_logging_enabled();
    init_tracing(file_logging_enabled);

    // Load config or create template on first run
    let config = match ReadalongConfig::load_or_create() {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            println!(
                "A configuration file has been created at {}.\n\
                Add an ElevenLabs API key there (or set ELEVENLABS_API_KEY) and run again.",
                path.display()
            );
            std::process::exit(0);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    let story = match Story::load(&args.story) {
        Ok(story) => story,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    // Create shared cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Set up Ctrl+C handler to trigger graceful shutdown
    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    runtime.block_on(run(args, config, story, cancel_token));
}

async fn run(args: Args, config: ReadalongConfig, story: Story, cancel_token: CancellationToken) {
    let remote = if args.offline {
        info!("Offline mode, narrating with local speech");
        None
    } else {
        create_remote(&config)
    };

    let audio: Arc<dyn AudioOutput> = Arc::new(ConsoleAudioOutput::new(args.save_audio));
    let speech: Arc<dyn LocalSpeech> = Arc::new(ConsoleSpeech::new(config.narration.local_estimate()));
    let synchronizer = PlaybackSynchronizer::from_config(&config, remote, audio, speech);

    let controller = AutoAdvanceController::new(
        Arc::clone(&synchronizer),
        story.requests(&config.speech),
        config.auto_advance.clone(),
        Some(cancel_token.clone()),
    );

    // Subscribe before anything can play
    let printer = tokio::spawn(print_events(
        synchronizer.subscribe(),
        controller.subscribe(),
        Arc::clone(&controller),
        cancel_token.clone(),
    ));
    let listener = Arc::clone(&controller).start();

    println!("\n{}  ({} pages)\n\n{HELP}", story.title, controller.len());
    show_page(&controller, 0);
    if args.autoplay {
        controller.auto_start().await;
    }

    read_commands(&controller, &cancel_token).await;

    cancel_token.cancel();
    synchronizer.stop().await;
    let _ = listener.await;
    let _ = printer.await;
    info!("Goodbye");
}

fn create_remote(config: &ReadalongConfig) -> Option<Arc<dyn SpeechProvider>> {
    match ElevenLabsProvider::from_config(&config.speech) {
        Ok(Some(provider)) => {
            info!("Initializing ElevenLabs speech source (voice {})", config.speech.voice_id);
            Some(Arc::new(provider))
        }
        Ok(None) => None,
        Err(e) => {
            error!("Failed to create ElevenLabs provider: {}", e);
            None
        }
    }
}

/// Dispatch stdin commands until quit, end of input or shutdown
async fn read_commands(controller: &AutoAdvanceController, cancel_token: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read command: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Some(Command::Play) => controller.play().await,
            Some(Command::Stop) => controller.stop().await,
            Some(Command::Next) => {
                if !controller.next().await {
                    println!("(this is the last page)");
                }
            }
            Some(Command::Back) => {
                if !controller.previous().await {
                    println!("(this is the first page)");
                }
            }
            Some(Command::Restart) => controller.restart().await,
            Some(Command::ToggleAutoFollow) => {
                let enabled = !controller.is_auto_follow().await;
                controller.set_auto_follow(enabled).await;
                println!("(auto-follow {})", if enabled { "on" } else { "off" });
            }
            Some(Command::Help) => println!("{HELP}"),
            Some(Command::Quit) => break,
            None => println!("Unknown command {:?}, type h for help", line.trim()),
        }
    }
}

fn show_page(controller: &AutoAdvanceController, index: usize) {
    if let Some(request) = controller.unit(index) {
        println!("\n--- Page {} of {} ---\n{}\n", index + 1, controller.len(), request.unit.text().trim());
    }
}

/// Print page changes and highlighted words as they happen
async fn print_events(
    mut narration: tokio::sync::broadcast::Receiver<NarrationEvent>,
    mut reader: tokio::sync::broadcast::Receiver<ReaderEvent>,
    controller: Arc<AutoAdvanceController>,
    cancel_token: CancellationToken,
) {
    let mut timings: Option<Arc<[WordTiming]>> = None;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            event = narration.recv() => match event {
                Ok(NarrationEvent::TimingsReady { tier, timings: ready, .. }) => {
                    debug!("Narrating with {} ({} words)", tier, ready.len());
                    timings = Some(ready);
                }
                Ok(NarrationEvent::HighlightChanged { index: Some(index), .. }) => {
                    if let Some(word) = timings.as_ref().and_then(|t| t.get(index)) {
                        print!("{} ", word.word);
                        let _ = std::io::stdout().flush();
                    }
                }
                Ok(NarrationEvent::StateChanged { state, .. }) => match state {
                    SessionState::Acquiring => {
                        timings = None;
                        println!("(listening...)");
                    }
                    SessionState::Completed => println!(),
                    SessionState::Cancelled => println!("\n(stopped)"),
                    SessionState::Failed => println!("\n(narration is not available for this page)"),
                    SessionState::Idle | SessionState::Playing => {}
                },
                Ok(NarrationEvent::HighlightChanged { index: None, .. }) => {}
                Err(RecvError::Lagged(n)) => debug!("Missed {} narration events", n),
                Err(RecvError::Closed) => break,
            },
            event = reader.recv() => match event {
                Ok(ReaderEvent::UnitShown { index, .. }) => show_page(&controller, index),
                Ok(ReaderEvent::AdvanceScheduled { from, delay }) => {
                    debug!("Turning the page after {} in {:?}", from + 1, delay);
                }
                Ok(ReaderEvent::EndOfContent) => println!("\nThe end."),
                Err(RecvError::Lagged(n)) => debug!("Missed {} reader events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Check if file logging is enabled by reading the config file.
/// This is done before full config loading to set up tracing first.
/// Returns `false` if config doesn't exist or can't be parsed.
fn check_file_logging_enabled() -> bool {
    // Minimal structs to parse just the logging.enabled field
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }
    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        enabled: bool,
    }

    let config_path = ReadalongConfig::config_path();
    let Ok(content) = std::fs::read_to_string(&config_path) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.enabled)
        .unwrap_or(false)
}

/// Initialize tracing with console output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest_retry=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if file_logging_enabled {
        let log_path = readalong_core::paths::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
