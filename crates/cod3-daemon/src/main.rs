//! `cod3` - run one prompt against an ACP agent or a Koog completion
//! command and print the resulting events as JSON lines.

use clap::{Parser, Subcommand};
use cod3_core::agents::koog::{CommandBackend, KoogAgentService};
use cod3_core::approval::{ApprovalAnswer, ApprovalBroker, PendingApproval};
use cod3_core::{
    paths, tools, AcpAgentService, AgentService, AgentSettings, PermissionMode, StreamEvent,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "cod3")]
#[command(about = "Cod3 coding assistant engine", long_about = None)]
struct Cli {
    /// Settings file (JSON with camelCase keys)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Tool permission mode: chat, confirm or auto
    #[arg(long, global = true)]
    mode: Option<PermissionMode>,

    /// Project root the tools are confined to
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a prompt to an external ACP agent
    Acp {
        /// Agent command line, overriding the settings file
        #[arg(long)]
        agent: Option<String>,
        prompt: String,
    },
    /// Run a prompt through a Koog completion command
    Koog {
        /// Program that reads a JSON request on stdin and streams the answer
        #[arg(long = "model-command")]
        model_command: String,
        prompt: String,
    },
    /// Print the tools a model can call
    Tools,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> cod3_core::Result<ExitCode> {
    let mut settings = match &cli.settings {
        Some(path) => AgentSettings::load(path)?,
        None => AgentSettings::default(),
    }
    .with_env_overrides()?;
    if let Some(mode) = cli.mode {
        settings.permission_mode = mode;
    }
    if settings.log_dir.is_none() {
        settings.log_dir = paths::default_log_dir().map(|dir| dir.display().to_string());
    }

    let (broker, approvals) = ApprovalBroker::channel();
    let approver = tokio::spawn(answer_on_terminal(approvals));

    let code = match cli.command {
        Commands::Tools => {
            print!("{}", tools::catalogue());
            ExitCode::SUCCESS
        }
        Commands::Acp { agent, prompt } => {
            if let Some(agent) = agent {
                settings.command = agent;
            }
            let service = AcpAgentService::new(settings, cli.root).with_broker(broker);
            drive(&service, &prompt).await
        }
        Commands::Koog {
            model_command,
            prompt,
        } => {
            let root = settings.resolve_root(cli.root.as_deref());
            let backend = CommandBackend::from_command_line(&model_command, &root)?
                .with_log_dir(settings.log_dir());
            let service =
                KoogAgentService::new(Arc::new(backend), &root, settings.permission_mode)
                    .with_broker(broker);
            drive(&service, &prompt).await
        }
    };

    approver.abort();
    Ok(code)
}

/// Print every event of one turn; Ctrl-C stops the turn.
async fn drive<S: AgentService>(service: &S, prompt: &str) -> ExitCode {
    let mut events = service.submit_prompt(prompt).await;
    let mut code = ExitCode::SUCCESS;
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if matches!(event, StreamEvent::Error { .. }) {
                    code = ExitCode::FAILURE;
                }
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => log::warn!("Cannot encode event: {err}"),
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                log::info!("Interrupted, stopping the turn");
                interrupted = true;
                service.stop().await;
                code = ExitCode::from(130);
            }
        }
    }

    service.dispose().await;
    code
}

/// Ask on stderr, read the answer from stdin.
async fn answer_on_terminal(mut approvals: mpsc::UnboundedReceiver<PendingApproval>) {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stderr = tokio::io::stderr();

    while let Some(pending) = approvals.recv().await {
        if pending.is_abandoned() {
            continue;
        }
        let question = format!(
            "Allow {}? [y]es / [a]lways / [N]o: ",
            pending.request.summary()
        );
        let _ = stderr.write_all(question.as_bytes()).await;
        let _ = stderr.flush().await;

        let answer = match stdin.next_line().await {
            Ok(Some(line)) => parse_answer(&line),
            _ => ApprovalAnswer::Decline,
        };
        pending.respond(answer);
    }
}

fn parse_answer(line: &str) -> ApprovalAnswer {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalAnswer::Allow,
        "a" | "always" => ApprovalAnswer::AllowAlways,
        _ => ApprovalAnswer::Decline,
    }
}
