//! knowledge-crawler CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use knowledge_crawler::{
    commands::{
        cmd_init, cmd_process, cmd_start, print_diagnostics, print_init, print_log_line,
        print_logs, print_processing_result, print_source, print_source_completions,
        print_sources, resolve_config_path, CrawlOverrides, InitOptions,
    },
    config::Config,
    error::{Error, Result},
    ingest::{IngestService, RunOutcome},
    meta::SourceStatus,
    progress::LogWriterFactory,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "knowledge-crawler")]
#[command(version, about = "Crawl websites into agent knowledge bases", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Register a website as a knowledge source for an agent
    Add {
        /// Owning agent ID
        agent_id: String,

        /// Display name
        name: String,

        /// Seed URL; crawling stays under its path
        url: String,
    },

    /// Crawl a source in the foreground and print the result
    Process {
        /// Knowledge source ID
        source_id: String,

        #[command(flatten)]
        crawl: CrawlArgs,
    },

    /// Start a crawl in the background and follow its processing log
    Start {
        /// Knowledge source ID
        source_id: String,

        #[command(flatten)]
        crawl: CrawlArgs,

        /// Log polling interval in milliseconds
        #[arg(long, default_value = "500")]
        poll_ms: u64,
    },

    /// Show the processing log of a source with statistics
    Logs {
        /// Knowledge source ID
        source_id: String,
    },

    /// Force the status of a source (e.g. release a stuck crawl)
    Reset {
        /// Knowledge source ID
        source_id: String,

        /// New status: pending, processing, completed or failed
        #[arg(default_value = "pending")]
        status: String,
    },

    /// Explain why a source may be stuck or empty
    Diagnose {
        /// Knowledge source ID
        source_id: String,
    },

    /// List knowledge sources
    Sources {
        /// Only sources of this agent
        #[arg(long)]
        agent: Option<String>,

        /// Output only source IDs (one per line)
        #[arg(long)]
        ids_only: bool,

        /// Output completion candidates for the given shell
        #[arg(long, value_enum, hide = true)]
        completion: Option<Shell>,
    },

    /// Remove a source with its documents and logs
    Remove {
        /// Knowledge source ID
        source_id: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct CrawlArgs {
    /// Maximum pages to fetch (1-1000)
    #[arg(long)]
    max_pages: Option<u32>,

    /// Maximum link depth from the seed URL (0-10)
    #[arg(long)]
    max_depth: Option<u32>,

    /// Delay between requests to the same host in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Store documents without embeddings
    #[arg(long)]
    no_embeddings: bool,

    /// Do not consult robots.txt
    #[arg(long)]
    ignore_robots: bool,
}

impl From<CrawlArgs> for CrawlOverrides {
    fn from(args: CrawlArgs) -> Self {
        Self {
            max_pages: args.max_pages,
            max_depth: args.max_depth,
            delay_ms: args.delay_ms,
            no_embeddings: args.no_embeddings,
            ignore_robots: args.ignore_robots,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    let config_path = resolve_config_path(cli.config.clone());

    // Init and completions don't need an existing config
    if let Commands::Init { force } = cli.command {
        let config = cmd_init(InitOptions { config_path, force }).await?;
        if cli.json {
            println!(
                "{}",
                serde_json::json!({
                    "config": config.paths.config_file,
                    "database": config.paths.db_file,
                })
            );
        } else {
            print_init(&config);
        }
        return Ok(());
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "knowledge-crawler", &mut std::io::stdout());
        print_completion_extras(shell);
        return Ok(());
    }

    let config = load_config(&config_path)?;
    let service = IngestService::from_config(&config)
        .await?
        .with_progress(!cli.json);

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Add {
            agent_id,
            name,
            url,
        } => {
            let source = service
                .create_knowledge_source(&agent_id, &name, &url)
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&source)?);
            } else {
                println!("✓ Added knowledge source");
                print_source(&source);
            }
        }

        Commands::Process { source_id, crawl } => {
            let result = cmd_process(&service, &source_id, &crawl.into()).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_processing_result(&result);
            }
            if result.outcome == RunOutcome::Failed {
                std::process::exit(2);
            }
        }

        Commands::Start {
            source_id,
            crawl,
            poll_ms,
        } => {
            let json = cli.json;
            let result = cmd_start(
                &service,
                &source_id,
                &crawl.into(),
                Duration::from_millis(poll_ms.max(50)),
                |log| {
                    if json {
                        if let Ok(line) = serde_json::to_string(log) {
                            println!("{}", line);
                        }
                    } else {
                        print_log_line(log);
                    }
                },
            )
            .await?;

            if cli.json {
                println!("{}", serde_json::to_string(&result)?);
            } else {
                print_processing_result(&result);
            }
            if result.outcome == RunOutcome::Failed {
                std::process::exit(2);
            }
        }

        Commands::Logs { source_id } => {
            let report = service.get_logs(&source_id).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_logs(&report);
            }
        }

        Commands::Reset { source_id, status } => {
            let status: SourceStatus = status.parse()?;
            let source = service.reset_status(&source_id, status).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&source)?);
            } else {
                println!("✓ Source '{}' is now {}", source.id, source.status);
            }
        }

        Commands::Diagnose { source_id } => {
            let report = service.diagnose(&source_id).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_diagnostics(&report);
            }
        }

        Commands::Sources {
            agent,
            ids_only,
            completion,
        } => {
            let sources = service.list_sources(agent.as_deref()).await?;

            if let Some(shell) = completion {
                print_source_completions(&sources, shell);
            } else if ids_only {
                for source in &sources {
                    println!("{}", source.id);
                }
            } else if cli.json {
                println!("{}", serde_json::to_string_pretty(&sources)?);
            } else {
                print_sources(&sources);
            }
        }

        Commands::Remove { source_id } => {
            service.delete_source(&source_id).await?;

            if cli.json {
                println!("{}", serde_json::json!({ "removed": source_id }));
            } else {
                println!("✓ Source '{}' removed", source_id);
            }
        }
    }

    Ok(())
}

/// Source ID completion for the subcommands that take one
fn print_completion_extras(shell: Shell) {
    const SOURCE_COMMANDS: &str = "process start logs reset diagnose remove";

    match shell {
        Shell::Zsh => {
            println!();
            println!("_knowledge_crawler_source_ids() {{");
            println!("    local -a entries");
            println!(
                "    entries=(\"${{(@f)$(knowledge-crawler sources --completion zsh 2>/dev/null)}}\")"
            );
            println!("    _describe -t sources 'source ids' entries");
            println!("}}");
            for command in SOURCE_COMMANDS.split(' ') {
                println!(
                    "compdef _knowledge_crawler_source_ids 'knowledge-crawler {}'",
                    command
                );
            }
        }
        Shell::Fish => {
            println!();
            println!(
                "complete -c knowledge-crawler -n '__fish_seen_subcommand_from {}' -a '(knowledge-crawler sources --completion fish 2>/dev/null)'",
                SOURCE_COMMANDS
            );
        }
        _ => {}
    }
}

fn load_config(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'knowledge-crawler init' first.",
            config_path.display()
        );
        return Err(Error::NotInitialized);
    }

    Config::load(config_path)
}
