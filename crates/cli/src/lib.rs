pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use leadflow_core::domain::lead::Channel;
use tracing_subscriber::EnvFilter;

use crate::commands::simulate::SimulateRequest;

#[derive(Debug, Parser)]
#[command(
    name = "leadflow",
    about = "Leadflow operator CLI",
    long_about = "Operate Leadflow readiness, migrations, config inspection, knowledge ingestion, and conversation simulation.",
    after_help = "Examples:\n  leadflow doctor --json\n  leadflow knowledge ingest --from docs --out docs/rag_documents.json\n  leadflow simulate --contact +5493510000000 \"Hola, soy Juan\" \"Estoy en Córdoba\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, territories, CRM readiness, knowledge and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Manage the technical knowledge base")]
    Knowledge(KnowledgeCommand),
    #[command(about = "Replay a conversation through the agent runtime without CRM or persistence")]
    Simulate {
        #[arg(long, default_value = "simulated-contact", help = "Contact identifier for the lead")]
        contact: String,
        #[arg(long, value_enum, default_value_t = ChannelArg::Whatsapp)]
        channel: ChannelArg,
        #[arg(long, help = "File with one inbound message per line; `#` lines are ignored")]
        script: Option<PathBuf>,
        #[arg(help = "Inbound messages, processed in order")]
        messages: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum KnowledgeCommand {
    #[command(about = "Build the JSON document store from directories of .txt files")]
    Ingest {
        #[arg(long = "from", help = "Source directory; repeatable (defaults to knowledge.text_dirs)")]
        sources: Vec<PathBuf>,
        #[arg(long = "out", help = "Output store path (defaults to knowledge.documents_path)")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ChannelArg {
    Whatsapp,
    Instagram,
}

impl From<ChannelArg> for Channel {
    fn from(value: ChannelArg) -> Self {
        match value {
            ChannelArg::Whatsapp => Channel::Whatsapp,
            ChannelArg::Instagram => Channel::Instagram,
        }
    }
}

/// Logs go to stderr so stdout stays parseable JSON.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Knowledge(KnowledgeCommand::Ingest { sources, output }) => {
            commands::knowledge::ingest(sources, output)
        }
        Command::Simulate { contact, channel, script, messages } => {
            commands::simulate::run(SimulateRequest {
                contact_id: contact,
                channel: channel.into(),
                messages,
                script,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
