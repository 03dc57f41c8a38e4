//! CLI module for quarry
//!
//! Provides command-line interface parsing for the quarry binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod init;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// quarry - multi-stage deep research from the command line
///
/// Plans a research query into sub-tasks, retrieves and analyzes sources for
/// each, and synthesizes a cited report while streaming progress.
#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    about = "quarry - multi-stage deep research with cited reports",
    long_about = "Plans a research query into sub-tasks, retrieves and analyzes sources for each,\n\
                  and synthesizes a cited report while streaming progress.\n\n\
                  Use 'init' to scaffold a quarry.toml, then 'research' to run a query.",
    after_help = "EXAMPLES:\n    \
                  quarry init                                   # Scaffold quarry.toml\n    \
                  quarry research \"Impact of remote work\"       # Run a research query\n    \
                  quarry research --memory data/memory.json \\\n        \
                  --conversation c1 \"What about suburbs?\"      # Follow-up in a conversation\n    \
                  quarry config --validate                      # Check quarry.toml"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "quarry.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a research query and print the report
    Research {
        /// The research query
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Conversation identifier; earlier turns are used as context
        #[arg(long)]
        conversation: Option<String>,

        /// Snapshot file to load sessions from and save them to
        #[arg(long)]
        memory: Option<PathBuf>,

        /// Print the report as JSON instead of Markdown
        #[arg(long)]
        json: bool,
    },

    /// Initialize a quarry configuration in a directory
    ///
    /// Creates quarry.toml, .env.example and a data/ directory.
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files without prompting
        #[arg(short, long)]
        force: bool,

        /// LLM provider to configure (ollama, openai, or both)
        #[arg(long, default_value = "ollama")]
        provider: String,

        /// Retrieval backend (web or generative)
        #[arg(long, default_value = "web")]
        retrieval: String,
    },

    /// Show configuration information
    Config {
        /// Show the full configuration
        #[arg(short = 'f', long)]
        full: bool,

        /// Validate the configuration file
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Commands {
    /// The research query as a single string
    pub fn joined_query(query: &[String]) -> String {
        query.join(" ")
    }
}
