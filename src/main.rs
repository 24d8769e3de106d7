use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_gateway::voice::{
    samples_to_pcm16, samples_to_wav, spawn_chunk_pump, AudioCapture, AudioFrame, AudioSink,
    ChannelClose, CpalSink, HttpSpeechSynthesizer, TranscriptionSession,
};
use cadence_gateway::{
    fetch_session_key, Config, HttpResponseGenerator, StopHandle, TurnController, TurnState,
    TurnUpdate,
};

/// Cadence - real-time voice conversation gateway
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the captured audio to a WAV file
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,cadence_gateway=info",
        1 => "info,cadence_gateway=debug",
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, save } => test_mic(duration, save.as_deref()).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let config = Config::load(cli.config.as_deref())?;
    config.validate_for_session()?;
    tracing::debug!(?config, "loaded configuration");

    run_session(config).await
}

/// Run one conversation session until interrupted or the channel ends
#[allow(clippy::future_not_send)]
async fn run_session(config: Config) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let key = fetch_session_key(&client, &config.auth.endpoint).await?;

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let generator = Arc::new(HttpResponseGenerator::new(&config.generation)?);
    let synthesizer = Arc::new(HttpSpeechSynthesizer::new(&config.synthesis, &key));
    let sink: Arc<dyn AudioSink> = Arc::new(CpalSink::new(config.synthesis.sample_rate));

    let (updates_tx, updates_rx) = tokio::sync::mpsc::channel(32);
    let mut controller = TurnController::new(generator, synthesizer, sink, updates_tx);

    // Capture → channel plumbing: the pump forwards PCM chunks only while
    // the controller's gate is armed.
    let (chunk_tx, chunk_rx) = tokio::sync::mpsc::channel(32);
    let pump = spawn_chunk_pump(
        capture.buffer(),
        controller.gate_view(),
        Duration::from_millis(config.capture.chunk_interval_ms),
        chunk_tx,
    );

    let (utterance_tx, utterance_rx) = tokio::sync::mpsc::channel(8);
    let (interim_tx, interim_rx) = tokio::sync::mpsc::channel(8);
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();

    let session = TranscriptionSession::connect(
        &config.transcription,
        &config.capture,
        &key,
        chunk_rx,
        utterance_tx,
        interim_tx,
        closed_tx,
    )
    .await?;

    let (stop, stop_rx) = StopHandle::new();

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            ctrl_c_stop.stop();
        }
    });

    // The session cannot continue without its transcription channel; any
    // close, normal or not, winds it down.
    let channel_stop = stop.clone();
    tokio::spawn(async move {
        match closed_rx.await {
            Ok(ChannelClose::Abnormal(reason)) => {
                tracing::error!(%reason, "transcription channel failed, stopping session");
            }
            Ok(ChannelClose::Normal) | Err(_) => {
                tracing::info!("transcription channel ended");
            }
        }
        channel_stop.stop();
    });

    let display = tokio::spawn(render_updates(updates_rx, interim_rx));

    tracing::info!("cadence ready - start talking");
    controller.run(utterance_rx, stop_rx).await?;

    session.close();
    pump.abort();
    capture.stop();
    display.abort();
    tracing::info!("session ended");
    Ok(())
}

/// Render turn updates and interim captions to the terminal
async fn render_updates(
    mut updates_rx: tokio::sync::mpsc::Receiver<TurnUpdate>,
    mut interim_rx: tokio::sync::mpsc::Receiver<String>,
) {
    loop {
        tokio::select! {
            update = updates_rx.recv() => {
                let Some(update) = update else { break };
                match update {
                    TurnUpdate::State(state) => {
                        let label = match state {
                            TurnState::Idle => "idle",
                            TurnState::Listening => "listening...",
                            TurnState::Thinking => "thinking...",
                            TurnState::Speaking => "speaking...",
                        };
                        println!("[{label}]");
                    }
                    TurnUpdate::Transcript(text) => println!("you:   {text}"),
                    TurnUpdate::Response(text) => println!("agent: {text}"),
                    TurnUpdate::Error(message) => println!("error: {message}"),
                }
            }
            interim = interim_rx.recv() => {
                let Some(interim) = interim else { break };
                print!("\r       {interim}");
                let _ = std::io::stdout().flush();
            }
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, save: Option<&std::path::Path>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", cadence_gateway::voice::SAMPLE_RATE);
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        recording.extend_from_slice(&samples);
    }

    capture.stop();

    if let Some(path) = save {
        let wav = samples_to_wav(&recording, cadence_gateway::voice::SAMPLE_RATE)?;
        std::fs::write(path, wav)?;
        println!("\nSaved recording to {}", path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

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

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let sink = CpalSink::new(sample_rate);
    sink.play(AudioFrame {
        index: 0,
        data: samples_to_pcm16(&samples),
    })
    .await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
