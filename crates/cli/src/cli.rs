use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dialogc", author, version, about = "Compile, inspect, and run dialog scripts")]
pub struct Cli {
    /// Log filter used when `RUST_LOG` is unset, e.g. `info` or `basic_dialog_runtime=debug`
    #[arg(long, default_value = "warn", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile scripts and report every error and warning
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Treat warnings as failures
        #[arg(long)]
        deny_warnings: bool,
    },

    /// Print the tool schema generated for a script
    Schema {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = SchemaFormat::Mcp)]
        format: SchemaFormat,
    },

    /// Print the token stream of a script
    Tokens {
        file: PathBuf,
        /// Only show tokens within five lines of this one
        #[arg(long)]
        line: Option<usize>,
    },

    /// Hold a conversation with a script on the terminal
    Run {
        /// Script path relative to the bot directory
        script: String,
        /// Directory holding one sub-directory of scripts per bot
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long, default_value = "default")]
        bot: String,
        #[arg(long, default_value = "console")]
        session: String,
        /// JSON runtime configuration
        #[arg(long, env = "DIALOGC_CONFIG")]
        config: Option<PathBuf>,
        /// Override `engine.step_budget`
        #[arg(long, env = "DIALOGC_STEP_BUDGET")]
        step_budget: Option<u64>,
        /// Recompile scripts when they change on disk
        #[arg(long)]
        watch: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaFormat {
    /// MCP tool listing entry
    Mcp,
    /// Function-calling tool definition
    Function,
}
