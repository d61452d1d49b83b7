use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use live_voice::audio::{
    self, AudioBackend, CaptureConfig, CpalBackend, DeviceKind, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE,
};
use live_voice::prompt::{FilePromptStore, PromptStore};
use live_voice::session::GeminiTransport;
use live_voice::voice::PlaybackScheduler;
use live_voice::{Config, ConnectionState, SessionController};

/// live-voice - real-time voice conversations with a Gemini Live model
#[derive(Parser)]
#[command(name = "live-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Prebuilt voice for the model (e.g. "Charon")
    #[arg(long)]
    voice: Option<String>,

    /// Live model identifier
    #[arg(long)]
    model: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show or change the behavioral prompt
    Prompt {
        #[command(subcommand)]
        action: PromptAction,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Also save the capture as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
    /// List audio devices
    Devices,
}

#[derive(Subcommand)]
enum PromptAction {
    /// Print the active prompt
    Show,
    /// Save an override
    Set {
        /// Prompt text
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        text: Option<String>,
        /// Read the prompt from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Remove the override and go back to the built-in prompt
    Reset,
    /// Print where the override is stored
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,live_voice=info",
        1 => "info,live_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(voice) = cli.voice {
        config.session.voice = voice;
    }
    if let Some(model) = cli.model {
        config.session.model = model;
    }

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Prompt { action } => prompt_command(&config, action),
            Command::TestMic { duration, output } => test_mic(duration, output).await,
            Command::TestSpeaker => test_speaker(&config).await,
            Command::Devices => list_devices(),
        };
    }

    converse(config).await
}

/// Run one conversation until it ends or Ctrl-C
#[allow(clippy::future_not_send)]
async fn converse(config: Config) -> anyhow::Result<()> {
    let api_key = config.require_api_key()?;
    tracing::debug!(?config, "loaded configuration");

    let transport = Arc::new(GeminiTransport::new(config.session.endpoint.clone(), api_key));
    let prompts = Arc::new(FilePromptStore::new(&config.data_dir));
    let mut controller = SessionController::new(
        transport,
        Box::new(CpalBackend::new()),
        prompts,
        config.controller_settings(),
    );

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    tokio::spawn(report_status(
        controller.subscribe_state(),
        controller.subscribe_speaking(),
    ));

    let connected = tokio::select! {
        result = controller.connect() => Some(result),
        Some(()) = shutdown_rx.recv() => None,
    };
    match connected {
        Some(result) => result?,
        None => {
            controller.disconnect();
            return Ok(());
        }
    }

    controller.run(&mut shutdown_rx).await?;
    Ok(())
}

/// Print connection and speaking changes for the user
async fn report_status(
    mut state: watch::Receiver<ConnectionState>,
    mut speaking: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                match current {
                    ConnectionState::Connecting => println!("Connecting..."),
                    ConnectionState::Connected => println!("Connected - start talking (Ctrl-C to hang up)"),
                    ConnectionState::Disconnected => println!("Disconnected"),
                }
            }
            changed = speaking.changed() => {
                if changed.is_err() {
                    break;
                }
                if *speaking.borrow_and_update() {
                    println!("  model speaking...");
                }
            }
        }
    }
}

fn prompt_command(config: &Config, action: PromptAction) -> anyhow::Result<()> {
    let store = FilePromptStore::new(&config.data_dir);

    match action {
        PromptAction::Show => {
            let source = if store.is_overridden()? {
                "override"
            } else {
                "built-in"
            };
            println!("# {source} prompt\n");
            println!("{}", store.get()?);
        }
        PromptAction::Set { text, file } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)?,
                (None, None) => anyhow::bail!("provide prompt text or --file"),
            };
            store.set(&text)?;
            println!("Prompt override saved to {}", store.path().display());
        }
        PromptAction::Reset => {
            store.reset()?;
            println!("Prompt reset to built-in default");
        }
        PromptAction::Path => println!("{}", store.path().display()),
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let capture_config = CaptureConfig::default();
    let (tx, mut rx) = mpsc::channel(capture_config.channel_capacity);
    let mut input = CpalBackend::new().open_input(&capture_config, tx)?;

    println!("Sample rate: {INPUT_SAMPLE_RATE} Hz");
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        let mut second = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            second.extend_from_slice(&frame.samples);
        }

        let energy = calculate_rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if output.is_some() {
            recording.extend(second);
        }
    }

    input.stop();

    if let Some(path) = output {
        audio::write_wav(&path, &recording, INPUT_SAMPLE_RATE)?;
        println!("\nSaved {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: live-voice devices");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave, split into fragments and scheduled back to back
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let output =
        CpalBackend::new().open_output(OUTPUT_SAMPLE_RATE, config.audio.output_gain, ended_tx)?;
    let mut playback = PlaybackScheduler::new();
    playback.attach(output);

    // 2 seconds of 440Hz at 24kHz, sent as 0.25s fragments like streamed model audio
    let frequency = 440.0_f32;
    let num_samples = OUTPUT_SAMPLE_RATE as usize * 2;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    for chunk in samples.chunks(OUTPUT_SAMPLE_RATE as usize / 4) {
        playback.schedule(&audio::encode_frame(chunk).data)?;
    }

    println!(
        "Scheduled {} fragments ending at {:.2}s...",
        playback.active_count(),
        playback.cursor()
    );

    let wait = Duration::from_secs_f64(playback.cursor() + 1.0);
    let drained = tokio::time::timeout(wait, async {
        while let Some(id) = ended_rx.recv().await {
            if playback.on_source_ended(id) {
                break;
            }
        }
    })
    .await;
    playback.shutdown();

    if drained.is_err() {
        println!("Playback did not report completion in time");
    }

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: live-voice devices");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    let devices = audio::list_devices()?;
    if devices.is_empty() {
        println!("No audio devices found");
        return Ok(());
    }

    for device in devices {
        let kind = match device.kind {
            DeviceKind::Input => "input ",
            DeviceKind::Output => "output",
        };
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{kind}  {}{marker}", device.name);
    }

    Ok(())
}
