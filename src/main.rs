use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use voxgate::{Config, Coordinator, SessionStatus, SpeakRequest, Subscription};

/// Voxgate - audio session coordinator for voice assistants
#[derive(Parser)]
#[command(name = "voxgate", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet window after speech before recognition resumes, in milliseconds
    #[arg(long, env = "VOXGATE_REVERB_GATE_MS", global = true)]
    reverb_gate_ms: Option<u64>,

    /// Print status snapshots as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Speak each text in order
    Say {
        /// Texts to speak
        #[arg(required = true)]
        text: Vec<String>,
        /// Only use the on-device engine
        #[arg(long)]
        local: bool,
        /// Fail instead of falling back to the on-device engine
        #[arg(long)]
        no_fallback: bool,
    },
    /// List on-device voices
    Voices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,voxgate=info",
        1 => "info,voxgate=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    if let Some(ms) = cli.reverb_gate_ms {
        config.coordinator.reverb_gate = Duration::from_millis(ms);
    }

    let coordinator = Coordinator::from_config(&config)?;
    let subscription = report_status(&coordinator, cli.json);

    let result = match cli.command {
        Some(Command::Say {
            text,
            local,
            no_fallback,
        }) => say(&coordinator, text, local, no_fallback).await,
        Some(Command::Voices) => {
            list_voices(&coordinator);
            Ok(())
        }
        None => interactive(&coordinator).await,
    };

    subscription.unsubscribe();
    coordinator.dispose();
    result
}

fn report_status(coordinator: &Coordinator, json: bool) -> Subscription {
    coordinator.subscribe(move |status: &SessionStatus| {
        if json {
            match serde_json::to_string(status) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize status"),
            }
        } else {
            tracing::debug!(
                request_id = status.request_id,
                speaking = status.is_speaking,
                loading = status.is_loading,
                backend = %status.backend,
                listening = status.is_listening,
                reason = status.last_cancel_reason.as_deref(),
                "status"
            );
        }
    })
}

async fn say(
    coordinator: &Coordinator,
    texts: Vec<String>,
    local: bool,
    no_fallback: bool,
) -> anyhow::Result<()> {
    let tickets: Vec<_> = texts
        .into_iter()
        .map(|text| {
            let mut request = SpeakRequest::new(text);
            if local {
                request = request.local_only();
            }
            if no_fallback {
                request = request.without_fallback();
            }
            coordinator.speak(request)
        })
        .collect();

    let mut failed = 0usize;
    for result in futures::future::join_all(tickets).await {
        if let Err(e) = result {
            tracing::error!(kind = e.kind(), "speech failed: {e}");
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} request(s) failed");
    }
    Ok(())
}

fn list_voices(coordinator: &Coordinator) {
    let voices = coordinator.local_voices();
    if voices.is_empty() {
        println!("No on-device voices available");
        return;
    }

    for voice in voices {
        println!("{:<12} {:<32} {}", voice.language, voice.name, voice.id);
    }
}

/// Speak stdin line by line; `!text` interrupts, `/stop` stops
async fn interactive(coordinator: &Coordinator) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut outstanding = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "/stop" {
            coordinator.stop("user");
            continue;
        }

        let request = match line.strip_prefix('!') {
            Some(text) => SpeakRequest::new(text.trim()).interrupting(),
            None => SpeakRequest::new(line),
        };

        let ticket = coordinator.speak(request);
        outstanding.spawn(async move {
            match ticket.await {
                Ok(()) => {}
                Err(e) if e.is_abort() => tracing::debug!(reason = %e, "speech aborted"),
                Err(e) => tracing::error!(kind = e.kind(), "speech failed: {e}"),
            }
        });
    }

    // Let queued speech finish after EOF
    while outstanding.join_next().await.is_some() {}
    Ok(())
}
