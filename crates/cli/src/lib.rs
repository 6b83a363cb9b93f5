pub mod commands;
pub mod logging;
pub mod session;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use datapilot_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "datapilot",
    about = "Datapilot query agent CLI",
    long_about = "Ask natural-language questions about the analytical database, inspect its schema, seed the demo dataset, and inspect configuration.",
    after_help = "Examples:\n  datapilot seed\n  datapilot ask \"How many scenarios are in the database?\"\n  datapilot ask --thread demo --stream \"Which pathway emits least in 2050?\"\n  datapilot config"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Path to a datapilot.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(long, global = true, help = "Override llm.provider (openai|ollama)")]
    provider: Option<LlmProvider>,
    #[arg(long, global = true, help = "Override llm.model")]
    model: Option<String>,
    #[arg(long, global = true, help = "Enable the chart tool")]
    visualization: bool,
}

impl GlobalArgs {
    fn load_options(self) -> LoadOptions {
        let require_file = self.config.is_some();
        LoadOptions {
            config_path: self.config,
            require_file,
            overrides: ConfigOverrides {
                database_url: self.database_url,
                log_level: self.log_level,
                llm_provider: self.provider,
                llm_model: self.model,
                visualization: self.visualization.then_some(true),
                ..ConfigOverrides::default()
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Answer a question about the data and print a structured result")]
    Ask {
        #[arg(help = "Natural-language question")]
        question: String,
        #[arg(long, help = "Conversation thread id; history is kept between invocations")]
        thread: Option<String>,
        #[arg(long, help = "Print progress and answer chunks as JSON lines before the result")]
        stream: bool,
    },
    #[command(about = "Describe the tables and columns the agent can query")]
    Schema,
    #[command(about = "Apply migrations and load the deterministic demo dataset")]
    Seed,
    #[command(about = "Forget the stored history of a conversation thread")]
    Clear {
        #[arg(long, help = "Conversation thread id")]
        thread: String,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.global.load_options();

    let result = match cli.command {
        Command::Ask { question, thread, stream } => {
            commands::ask::run(options, commands::ask::AskArgs { question, thread, stream })
        }
        Command::Schema => commands::schema::run(options),
        Command::Seed => commands::seed::run(options),
        Command::Clear { thread } => commands::clear::run(options, &thread),
        Command::Config => commands::config::run(options),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
