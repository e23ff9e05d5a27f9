use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod agent;
mod collection;
mod config;
mod error;
mod protocol;
mod provider;
mod resource;
mod sandbox;
mod tools;
mod vfs;

use agent::{Agent, AgentRunRequest, DEFAULT_STEP_BUDGET};
use collection::{CollectionAssembler, CollectionMetadataStore, LoadRequest};
use config::{ConfigResourceLoader, ProviderSettings, QuarryConfig};
use protocol::{
    create_stream, CatalogPricingSource, CollectionInfo, MetaPayload, StreamRequest,
};
use provider::OpenAiCompatibleModel;
use vfs::VfsRegistry;

/// Quarry - ask questions about repos, packages, and local directories
#[derive(Parser)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to resources.json (defaults to ~/.quarry/resources.json)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question over one or more configured resources
    Ask {
        /// The question to answer
        question: String,

        /// Resource name to search (repeatable)
        #[arg(short = 'r', long = "resource")]
        resources: Vec<String>,

        /// Model to use, as provider/model
        #[arg(short = 'm', long)]
        model: Option<String>,

        /// Emit raw wire frames instead of only the final answer
        #[arg(long)]
        stream: bool,

        /// Maximum model turns
        #[arg(long, default_value_t = DEFAULT_STEP_BUDGET)]
        steps: usize,
    },
    /// List configured resources
    Resources,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = QuarryConfig::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Ask {
            question,
            resources,
            model,
            stream,
            steps,
        }) => {
            run_ask(config, question, resources, model.as_deref(), stream, steps).await?;
        }
        Some(Commands::Resources) => {
            run_resources(&config);
        }
        None => {
            eprintln!("No command specified. Use --help for usage information.");
            eprintln!("Try 'quarry ask \"<question>\" -r <resource>' to get started.");
        }
    }

    Ok(())
}

async fn run_ask(
    config: QuarryConfig,
    question: String,
    resources: Vec<String>,
    model: Option<&str>,
    stream: bool,
    steps: usize,
) -> Result<()> {
    let registry = Arc::new(VfsRegistry::new());
    let metadata = Arc::new(CollectionMetadataStore::new());
    let loader = Arc::new(ConfigResourceLoader::new(&config));
    let assembler = CollectionAssembler::new(registry.clone(), metadata.clone(), loader);

    let collection = assembler
        .load(LoadRequest {
            resource_names: resources,
            quiet: stream,
        })
        .await?;

    let settings = ProviderSettings::from_env(model);
    let model: Arc<dyn agent::LanguageModel> = Arc::new(OpenAiCompatibleModel::new(
        settings.base_url.clone(),
        settings.api_key.clone(),
        &settings.provider_id,
        &settings.model_id,
    ));
    let runner = Agent::new(model.clone(), registry);

    let mut request = AgentRunRequest::new(
        collection.root_path.clone(),
        collection.vfs_instance_id.clone(),
        collection.agent_instructions.clone(),
        question.clone(),
    );
    request.step_budget = steps;

    if stream {
        let meta = MetaPayload {
            model: model.id().to_string(),
            resources: collection.resources.clone(),
            collection: CollectionInfo {
                key: collection.collection_key.clone(),
                path: collection.root_path.clone(),
            },
        };
        let events = runner.run_streaming(request);
        let stream_request = StreamRequest::new(
            meta,
            question,
            settings.provider_id.clone(),
            settings.model_id.clone(),
        )
        .with_pricing(Arc::new(CatalogPricingSource::default()));

        // The encoder owns the collection teardown from here on.
        let mut frames = create_stream(stream_request, events, Some(collection.cleanup.clone()));
        let mut stdout = std::io::stdout();
        while let Some(frame) = frames.next_frame().await {
            stdout.write_all(frame.as_bytes())?;
            stdout.flush()?;
        }
    } else {
        let outcome = runner.run_collected(request).await;
        collection.cleanup.run();
        let run = outcome?;
        println!("{}", run.answer.trim());
    }

    Ok(())
}

fn run_resources(config: &QuarryConfig) {
    if config.resources.is_empty() {
        println!("No resources configured.");
        println!("Add entries to resources.json (see --help for the config path).");
        return;
    }
    for definition in &config.resources {
        match definition {
            resource::ResourceDefinition::Git { name, url, branch, .. } => {
                let branch = branch.as_deref().unwrap_or("default branch");
                println!("{}  (git)  {} [{}]", name, url, branch);
            }
            resource::ResourceDefinition::Package {
                name,
                ecosystem,
                package,
                version,
                ..
            } => {
                let version = version.as_deref().unwrap_or("latest");
                println!("{}  (package)  {}:{}@{}", name, ecosystem, package, version);
            }
            resource::ResourceDefinition::Local { name, path, .. } => {
                println!("{}  (local)  {}", name, path.display());
            }
        }
    }
}
