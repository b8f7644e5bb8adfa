//! CryoET Scout - command line entry point.
//!
//! Runs one research session for a protein and resolution range and prints
//! the conversation and final answer to stdout. Logs go to stderr.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cryoet_scout::agent::{
    build_executor_prompt, build_initiator_prompt, build_task_prompt, AgentProxy,
};
use cryoet_scout::browser::{BrowserEngine, WebDriverEngine};
use cryoet_scout::config::Config;
use cryoet_scout::conversation::{
    ConversationDriver, DriverConfig, DriverEvent, ResultAggregator, Session,
};
use cryoet_scout::llm::{LlmClient, OpenRouterClient};
use cryoet_scout::message::AgentRole;
use cryoet_scout::portal::{CryoEtPortalClient, DataPortal, ResolutionRange};
use cryoet_scout::tools::{browser_tools, portal_tools, ToolDescriptor, ToolRegistry};

const INITIATOR_NAME: &str = "Researcher";
const EXECUTOR_NAME: &str = "Assistant";

#[derive(Parser)]
#[command(name = "cryoet-scout")]
#[command(about = "Search the CryoET Data Portal for protein tomograms with two cooperating agents")]
#[command(version)]
struct Cli {
    /// Protein to search for
    #[arg(default_value = "spike protein")]
    protein_type: String,

    /// Voxel spacing range in Ångström, as min-max
    #[arg(default_value = "0-5")]
    resolution: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cryoet_scout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    println!(
        "\nStarting search for: {} (Resolution: {})",
        cli.protein_type, cli.resolution
    );
    println!("{}", "=".repeat(50));

    if let Err(e) = run(cli).await {
        println!("\nError during execution: {:#}", e);
    }
    println!("\nSearch completed.");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let resolution: ResolutionRange = cli.resolution.parse().map_err(anyhow::Error::msg)?;

    let config = Config::from_env()?;
    info!(
        initiator_model = %config.initiator_model,
        executor_model = %config.executor_model,
        max_steps = config.max_steps,
        "Loaded configuration"
    );

    let mut client = OpenRouterClient::new(config.api_key.clone());
    if let Some(url) = &config.base_url {
        client = client.with_base_url(url);
    }
    let llm: Arc<dyn LlmClient> = Arc::new(client);

    let mut registry = ToolRegistry::new();
    let portal: Arc<dyn DataPortal> = Arc::new(CryoEtPortalClient::new(&config.portal_url)?);
    registry.register_all(portal_tools(portal, config.output_dir.clone()))?;

    let browser: Option<Arc<dyn BrowserEngine>> = match &config.browser.webdriver_url {
        Some(url) => {
            let engine: Arc<dyn BrowserEngine> =
                Arc::new(WebDriverEngine::new(url, config.browser.headless)?);
            registry.register_all(browser_tools(engine.clone()))?;
            info!(webdriver = %url, "Browser tools enabled");
            Some(engine)
        }
        None => None,
    };

    let task_prompt = build_task_prompt(&cli.protein_type, resolution);
    let executor_tools: Vec<&ToolDescriptor> = registry.descriptors().iter().collect();

    let initiator = AgentProxy::new(
        AgentRole::Initiator,
        INITIATOR_NAME,
        build_initiator_prompt(
            &task_prompt,
            INITIATOR_NAME,
            EXECUTOR_NAME,
            &config.termination_sentinel,
        ),
        llm.clone(),
        config.initiator_model.clone(),
    )
    .with_temperature(config.temperature);

    let executor = AgentProxy::new(
        AgentRole::Executor,
        EXECUTOR_NAME,
        build_executor_prompt(&task_prompt, INITIATOR_NAME, EXECUTOR_NAME, &executor_tools),
        llm,
        config.executor_model.clone(),
    )
    .with_tools(registry.names())
    .with_temperature(config.temperature);

    let session = Session::new(task_prompt, initiator, executor);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling session");
                cancel.cancel();
            }
        });
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(rx));

    println!("\nInitializing chat...");
    let mut driver =
        ConversationDriver::new(session, registry, DriverConfig::from(&config)).with_events(tx);
    let outcome = driver.run(&cancel).await;

    // Dropping the driver closes the event channel.
    let session = driver.into_session();
    let _ = printer.await;

    let answer =
        ResultAggregator::new(config.termination_sentinel.clone()).summarize_session(&session);
    println!("\n{}", answer);

    if let Some(engine) = browser {
        if let Err(e) = engine.close().await {
            warn!(error = %e, "Failed to close browser session");
        }
    }

    outcome?;
    println!("\nSearch completed successfully!");
    Ok(())
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<DriverEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            DriverEvent::MessageAppended(message) if message.sequence == 0 => {
                println!("Initial message: {}", message.display_line());
            }
            DriverEvent::MessageAppended(message) => {
                println!("\nResponse: {}", message.display_line());
            }
            DriverEvent::ToolStarted { tool_name, .. } => {
                println!("  ... running {}", tool_name);
            }
            DriverEvent::ToolFinished { .. } | DriverEvent::Finished(_) => {}
        }
    }
}
