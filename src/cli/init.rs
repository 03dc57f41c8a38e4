//! Init command implementation
//!
//! Scaffolds a quarry configuration in a directory.

use super::output::Output;
use std::fs;
use std::path::Path;

/// Result of the init operation
pub enum InitResult {
    /// Initialization completed successfully
    Success,
    /// quarry.toml already exists
    AlreadyExists,
    /// An error occurred during initialization
    Error(String),
}

/// Configuration for the init command
pub struct InitConfig {
    /// Directory to initialize
    pub path: std::path::PathBuf,
    /// Overwrite existing files
    pub force: bool,
    /// LLM provider to configure (ollama, openai, or both)
    pub provider: String,
    /// Retrieval backend (web or generative)
    pub retrieval: String,
}

/// Run the init command
pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing quarry");

    let base_path = &config.path;
    let config_path = base_path.join("quarry.toml");
    if config_path.exists() && !config.force {
        output.warning("quarry.toml already exists!");
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    let data_dir = base_path.join("data");
    if !data_dir.exists() {
        if let Err(e) = fs::create_dir_all(&data_dir) {
            output.error(&format!("Failed to create data: {}", e));
            return InitResult::Error(e.to_string());
        }
        output.created("directory", "data");
    } else {
        output.skipped("data", "already exists");
    }

    let toml_content = generate_quarry_toml(&config);
    if let Err(e) = write_file(&config_path, &toml_content, config.force) {
        output.error(&format!("Failed to create quarry.toml: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("config", "quarry.toml");

    let env_example_path = base_path.join(".env.example");
    if let Err(e) = write_file(&env_example_path, &generate_env_example(), config.force) {
        output.error(&format!("Failed to create .env.example: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("env", ".env.example");

    let gitignore_path = base_path.join(".gitignore");
    if !gitignore_path.exists() {
        if let Err(e) = write_file(&gitignore_path, &generate_gitignore(), false) {
            output.warning(&format!("Failed to create .gitignore: {}", e));
        } else {
            output.created("file", ".gitignore");
        }
    }

    output.complete("quarry initialized successfully!");

    output.header("Next Steps");
    if config.provider != "openai" {
        output.info("Start Ollama and pull the default model:");
        output.command("ollama serve");
        output.command("ollama pull llama3.2");
    }
    if config.provider != "ollama" {
        output.info("Set your API key:");
        output.command("cp .env.example .env  # then edit OPENAI_API_KEY");
    }
    output.info("Run a research query:");
    output.command("quarry research \"Impact of remote work on urban real estate\"");
    output.hint("Add --memory data/memory.json to keep follow-up questions in context");

    InitResult::Success
}

fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<()> {
    if path.exists() && !force {
        return Ok(()); // Skip existing files unless force is true
    }
    fs::write(path, content)
}

fn generate_quarry_toml(config: &InitConfig) -> String {
    let ollama = r#"# Ollama - Local inference (no API key required)
[providers.local]
type = "ollama"
base_url = "http://localhost:11434"
default_model = "llama3.2"
"#;
    let openai = r#"# OpenAI API (set OPENAI_API_KEY in .env)
[providers.openai]
type = "openai"
api_key_env = "OPENAI_API_KEY"
api_base = "https://api.openai.com/v1"
default_model = "gpt-4o-mini"
"#;

    let (provider_section, default_provider) = match config.provider.as_str() {
        "openai" => (openai.to_string(), "openai"),
        "both" => (format!("{}\n{}", ollama, openai), "local"),
        _ => (ollama.to_string(), "local"),
    };

    // report writing benefits most from the stronger model when both are set up
    let report_override = if config.provider == "both" {
        "provider = \"openai\"\n"
    } else {
        ""
    };

    let retrieval_backend = match config.retrieval.as_str() {
        "generative" => "generative",
        _ => "web",
    };

    format!(
        r#"# quarry configuration
# =====================
# Generated by: quarry init

[logging]
level = "info"
json = false

# =============================================================================
# LLM Providers
# =============================================================================
{provider_section}
# =============================================================================
# Stage Models
# =============================================================================
[llm]
provider = "{default_provider}"

[llm.stages.planning]
temperature = 0.2
max_tokens = 4096

[llm.stages.retrieval]
temperature = 0.1
max_tokens = 2048

[llm.stages.analysis]
temperature = 0.3
max_tokens = 4096

[llm.stages.report]
{report_override}temperature = 0.2
max_tokens = 8192

# =============================================================================
# Research Bounds
# =============================================================================
[research]
max_subtasks = 5
max_parallel_subtasks = 3
max_query_chars = 2000
analysis_context_tokens = 3000
conversation_context_tokens = 1000

[retrieval]
backend = "{retrieval_backend}"
max_candidates = 20
max_documents = 8
fetch_pages = 0

# Set backend = "jina" and JINA_API_KEY to rerank candidates
[reranker]
backend = "none"

# =============================================================================
# Resilience
# =============================================================================
[retry]
max_attempts = 3
initial_backoff_ms = 500
max_backoff_ms = 8000
multiplier = 2.0
jitter = 0.1

[timeouts]
generation_secs = 60
retrieval_secs = 30
rerank_secs = 15

[memory]
max_sessions = 256
session_ttl_secs = 86400
"#
    )
}

fn generate_env_example() -> String {
    r#"# quarry environment variables
# Copy to .env and fill in the keys for the providers you use.

# OpenAI or compatible provider
OPENAI_API_KEY=

# Jina reranker (only when [reranker] backend = "jina")
JINA_API_KEY=

# Log filter, overrides [logging] level
# RUST_LOG=quarry=debug
"#
    .to_string()
}

fn generate_gitignore() -> String {
    r#"# quarry
/data/
.env
*.snapshot.json

# Rust
/target/

# OS
.DS_Store
"#
    .to_string()
}
