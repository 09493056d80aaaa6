mod config;

use std::future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use realtime_console::capture::{AudioCapturer, MicrophoneSource, SyntheticSource};
use realtime_console::conversation::ConversationItem;
use realtime_console::types::audio::{PCM16_SAMPLE_RATE, TranscriptionModel, TurnDetection, Voice};
use realtime_console::types::session::Session;
use realtime_console::types::{Content, MessageRole};
use realtime_console::{ConversationUpdated, Delta, StreamSession, WebSocketTransport};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

const DEFAULT_INSTRUCTIONS: &str = "You are a great, upbeat friend.";

#[derive(Parser)]
#[command(version, about = "Talk to a realtime voice model from the terminal")]
struct Cli {
    /// Voice the assistant answers with.
    #[arg(long, global = true, default_value = "alloy")]
    voice: Voice,

    #[arg(long, global = true, default_value = DEFAULT_INSTRUCTIONS)]
    instructions: String,

    /// Disable server VAD; turns are committed explicitly.
    #[arg(long, global = true)]
    manual: bool,

    /// Seconds to keep listening for the response.
    #[arg(long, global = true, default_value_t = 10)]
    wait_secs: u64,

    /// Write the last assistant audio to a 24 kHz WAV file.
    #[arg(long, global = true)]
    save_audio: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a text message.
    Message {
        #[arg(default_value = "How are you?")]
        text: String,
    },
    /// Send a user message with an empty audio part and ask for a response.
    EmptyAudio,
    /// Stream noise, or a WAV file, as back-to-back blocks.
    Stream {
        #[arg(long)]
        wav: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        blocks: usize,
        #[arg(long, default_value_t = 2400)]
        block_size: usize,
    },
    /// Capture from a microphone for a fixed window.
    Capture {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
        #[arg(long)]
        device: Option<String>,
    },
    /// List audio input devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    if let Command::Devices = cli.command {
        println!("{}", realtime_console::utils::device::get_available_inputs()?);
        return Ok(());
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    let mut session = StreamSession::new(WebSocketTransport::new(config.transport()));

    session
        .configure(Session::new().with_instructions(&cli.instructions).build())
        .await?;
    session.configure(Session::new().with_voice(cli.voice.clone()).build()).await?;
    let turn_detection = if cli.manual {
        TurnDetection::Manual
    } else {
        TurnDetection::server_vad()
    };
    session
        .configure(
            Session::new()
                .with_turn_detection(turn_detection)
                .with_input_audio_transcription_enable(TranscriptionModel::Whisper)
                .build(),
        )
        .await?;
    session.on_conversation_updated(print_update);

    session.connect().await.context("Failed to connect")?;

    let outcome = run(&cli.command, &mut session).await;
    if outcome.is_ok() {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cli.wait_secs)) => {},
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down...");
            }
        }
    }

    let items = session.items();
    let stats = session.stats();
    session.disconnect().await;
    outcome?;

    println!();
    for item in &items {
        println!("{}", describe(item));
    }
    println!(
        "sent {} audio blocks ({} samples), {} responses, tokens total={} input={} output={}",
        stats.audio_blocks(),
        stats.audio_samples(),
        stats.responses(),
        stats.total_tokens(),
        stats.input_tokens(),
        stats.output_tokens()
    );

    if let Some(path) = &cli.save_audio {
        let audio = items
            .iter()
            .rev()
            .find(|item| item.role() == Some(MessageRole::Assistant) && !item.formatted().audio.is_empty())
            .map(|item| item.formatted().audio.as_slice());
        match audio {
            Some(audio) => {
                save_wav(path, audio)?;
                println!("saved {} samples to {}", audio.len(), path.display());
            }
            None => tracing::warn!("no assistant audio to save"),
        }
    }

    Ok(())
}

async fn run(command: &Command, session: &mut StreamSession<WebSocketTransport>) -> anyhow::Result<()> {
    match command {
        Command::Message { text } => session.send_text(text).await?,
        Command::EmptyAudio => {
            session
                .send_user_content(vec![Content::input_audio(String::new())])
                .await?
        }
        Command::Stream { wav, blocks, block_size } => {
            let source = match wav {
                Some(path) => SyntheticSource::from_wav(path, *block_size)?,
                None => SyntheticSource::noise(*blocks, *block_size),
            };
            let report = AudioCapturer::new(source)
                .capture_until(session, future::pending())
                .await?;
            tracing::info!("streamed {} blocks", report.blocks);
        }
        Command::Capture { seconds, device } => {
            let mut source = MicrophoneSource::new();
            if let Some(device) = device {
                source = source.with_device(device);
            }
            let report = AudioCapturer::new(source)
                .capture_for(session, Duration::from_secs(*seconds))
                .await?;
            tracing::info!("captured {} blocks", report.blocks);
        }
        Command::Devices => {}
    }
    Ok(())
}

fn print_update(update: &ConversationUpdated) {
    match &update.delta {
        Some(Delta::Text(fragment)) | Some(Delta::Transcript(fragment)) => {
            print!("{fragment}");
            let _ = std::io::stdout().flush();
        }
        Some(Delta::Audio(_)) | Some(Delta::Arguments(_)) => {}
        None => println!("\n{}", describe(&update.item)),
    }
}

fn describe(item: &ConversationItem) -> String {
    let who = match item.role() {
        Some(role) => format!("{role:?}").to_lowercase(),
        None => "function".to_string(),
    };
    let formatted = item.formatted();
    let body = [&formatted.text, &formatted.transcript, &formatted.arguments]
        .into_iter()
        .find(|body| !body.is_empty())
        .map_or("(no text)", String::as_str);
    format!("[{who}] {} ({:?}): {body}", item.id(), item.status())
}

fn save_wav(path: &Path, samples: &[i16]) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: PCM16_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("failed to create {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
