use anyhow::Context;
use futures::StreamExt;
use quarry::cli::init::{self, InitConfig, InitResult};
use quarry::cli::output::Output;
use quarry::cli::{Cli, Commands};
use quarry::{MemoryStore, QuarryConfig, ResearchCoordinator, ResearchError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    match cli.command {
        Commands::Init {
            path,
            force,
            provider,
            retrieval,
        } => {
            let result = init::run(
                InitConfig {
                    path,
                    force,
                    provider,
                    retrieval,
                },
                &output,
            );
            match result {
                InitResult::Success | InitResult::AlreadyExists => Ok(()),
                InitResult::Error(e) => anyhow::bail!("init failed: {}", e),
            }
        }
        Commands::Config { full, validate } => show_config(&cli.config, full, validate, &output),
        Commands::Research {
            query,
            conversation,
            memory,
            json,
        } => {
            let config = QuarryConfig::load_or_default(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            init_tracing(&config, cli.verbose, cli.log_json);

            let query = Commands::joined_query(&query);
            run_research(&config, &query, conversation, memory, json, &output).await
        }
    }
}

fn init_tracing(config: &QuarryConfig, verbose: bool, log_json: bool) {
    let fallback = if verbose {
        "quarry=debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // stdout carries the report; logs always go to stderr
    let registry = tracing_subscriber::registry().with(filter);
    if log_json || config.logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run_research(
    config: &QuarryConfig,
    query: &str,
    conversation: Option<String>,
    memory_path: Option<PathBuf>,
    json: bool,
    output: &Output,
) -> anyhow::Result<()> {
    let snapshot_path = memory_path.or_else(|| config.memory.snapshot_path.clone().map(PathBuf::from));

    let memory = Arc::new(MemoryStore::new(&config.memory));
    if let Some(ref path) = snapshot_path {
        memory
            .load_from_path(path)
            .await
            .with_context(|| format!("loading memory snapshot {}", path.display()))?;
    }

    let conversation = match (conversation, &snapshot_path) {
        (Some(id), _) => Some(id),
        (None, Some(_)) => {
            let id = uuid::Uuid::new_v4().to_string();
            if !json {
                output.hint(&format!("Continue this conversation with --conversation {}", id));
            }
            Some(id)
        }
        (None, None) => None,
    };

    let coordinator = Arc::new(ResearchCoordinator::from_config(config, memory).await?);
    let session_id = coordinator.submit(query, conversation)?;

    let printer = (!json).then(|| {
        let printer = Output {
            colored: output.colored,
        };
        let mut events = Box::pin(coordinator.events(&session_id, 0));
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                printer.progress(&event);
            }
        })
    });

    let interrupt = {
        let coordinator = Arc::clone(&coordinator);
        let session_id = session_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok()
                && let Err(e) = coordinator.cancel(&session_id, "interrupted")
            {
                tracing::debug!(error = %e, "Cancel after completion ignored");
            }
        })
    };

    let result = coordinator.run(&session_id).await;
    interrupt.abort();
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    if let Some(ref path) = snapshot_path {
        coordinator
            .memory()
            .save_to_path(path)
            .await
            .with_context(|| format!("saving memory snapshot {}", path.display()))?;
    }

    match result {
        Ok(report) if json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Ok(report) => {
            output.report(&report);
            Ok(())
        }
        Err(ResearchError::SessionClosed(reason)) => {
            output.warning(&format!("Research stopped: {}", reason));
            anyhow::bail!("session {} did not complete", session_id)
        }
        Err(e) => Err(e.into()),
    }
}

fn show_config(path: &Path, full: bool, validate: bool, output: &Output) -> anyhow::Result<()> {
    if validate {
        return match QuarryConfig::load(path) {
            Ok(_) => {
                output.success(&format!("{} is valid", path.display()));
                Ok(())
            }
            Err(e) => {
                output.error(&e.to_string());
                anyhow::bail!("invalid configuration")
            }
        };
    }

    let config = QuarryConfig::load_or_default(path)?;
    if full {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    output.header("Configuration");
    output.kv("file", &path.display().to_string());
    output.kv("provider", &config.llm.provider);

    output.header("Providers");
    let mut providers: Vec<_> = config.providers.iter().collect();
    providers.sort_by(|a, b| a.0.cmp(b.0));
    for (name, provider) in providers {
        output.list_item(&format!("{} ({})", name, provider.default_model()));
    }

    output.header("Stages");
    for (stage, settings) in config.llm.stages.iter() {
        output.kv(
            stage,
            &format!(
                "{} / {} (temperature {}, max_tokens {})",
                settings.provider.as_deref().unwrap_or(&config.llm.provider),
                settings.model.as_deref().unwrap_or("default"),
                settings.temperature,
                settings.max_tokens
            ),
        );
    }

    output.header("Research");
    output.kv("max_subtasks", &config.research.max_subtasks.to_string());
    output.kv(
        "max_parallel_subtasks",
        &config.research.max_parallel_subtasks.to_string(),
    );
    output.kv("retrieval", &format!("{:?}", config.retrieval.backend).to_lowercase());
    output.kv("reranker", &format!("{:?}", config.reranker.backend).to_lowercase());
    output.hint("Use --full to print the complete configuration");
    Ok(())
}
