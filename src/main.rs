use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zenml_bridge::collections::{CollectionProvider, TreeEntry, BUILTIN_SOURCES};
use zenml_bridge::sidecar::commands::ConnectRequest;
use zenml_bridge::{BridgeConfig, BridgeContext};

#[derive(Parser)]
#[command(name = "zenml-bridge")]
#[command(about = "Drive the ZenML sidecar and browse its collections from the terminal")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ~/.zenml-bridge/config.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the sidecar launcher, e.g. "python3 bundled/tool/lsp_server.py"
    #[arg(long, global = true)]
    sidecar_command: Option<String>,

    /// Seconds to wait for the sidecar to report it is ready
    #[arg(long, global = true, default_value = "60")]
    ready_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print one page of a collection
    List {
        /// One of: stacks, components, runs, models, projects, deployments
        collection: String,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long)]
        per_page: Option<u32>,
        /// Component type or project, depending on the collection
        #[arg(long)]
        scope: Option<String>,
    },
    /// Connect to a remote ZenML server
    Connect {
        url: String,
        #[arg(long)]
        no_verify_ssl: bool,
    },
    /// Disconnect from the current server
    Disconnect,
    /// Make a stack active
    SwitchStack { stack: String },
    /// Make a project active
    SwitchProject { project: String },
    /// Keep the collections refreshed and print them whenever they change
    Watch {
        /// Collections to watch (all when omitted)
        collections: Vec<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("[zenml-bridge] Warning: a tracing subscriber was already installed");
    }
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::load_or_default(cli.config.as_deref())?;
    if let Some(launcher) = &cli.sidecar_command {
        let mut parts = launcher.split_whitespace().map(str::to_string);
        config.sidecar.command = parts.next().context("--sidecar-command is empty")?;
        config.sidecar.args = parts.collect();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let context = BridgeContext::new(config);
    context
        .start()
        .await
        .context("Failed to start the ZenML sidecar")?;

    let result = run(&cli, &context).await;
    context.shutdown().await;
    result
}

async fn run(cli: &Cli, context: &Arc<BridgeContext>) -> Result<()> {
    wait_until_ready(context, Duration::from_secs(cli.ready_timeout)).await?;
    let commands = context.commands();

    match &cli.command {
        Command::List {
            collection,
            page,
            per_page,
            scope,
        } => {
            let provider = find_provider(context, collection)?;
            if let Some(per_page) = per_page {
                provider.update_items_per_page(*per_page).await?;
            }
            if scope.is_some() {
                provider.set_scope(scope.clone()).await;
            }
            provider.refresh().await;
            while provider.pagination().current_page < *page {
                if !provider.go_to_next_page().await {
                    break;
                }
            }
            print_collection(collection, provider);
        }
        Command::Connect { url, no_verify_ssl } => {
            let mut request = ConnectRequest::remote(url.clone());
            request.verify_ssl = !no_verify_ssl;
            let response = commands.connect(&request).await?;
            println!("{}", non_empty(&response.message, "Connected"));
        }
        Command::Disconnect => {
            let response = commands.disconnect().await?;
            println!("{}", non_empty(&response.message, "Disconnected"));
        }
        Command::SwitchStack { stack } => {
            let active = commands.switch_active_stack(stack).await?;
            println!("Active stack: {} ({})", active.name, active.id);
        }
        Command::SwitchProject { project } => {
            let active = commands.switch_active_project(project).await?;
            println!("Active project: {} ({})", active.name, active.id);
        }
        Command::Watch { collections } => watch(context, collections).await?,
    }
    Ok(())
}

async fn wait_until_ready(context: &BridgeContext, timeout: Duration) -> Result<()> {
    let mut ready = context.readiness().subscribe();
    tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
        .await
        .context("Timed out waiting for the ZenML sidecar to become ready")?
        .context("Readiness channel closed")?;
    Ok(())
}

fn find_provider<'a>(
    context: &'a BridgeContext,
    name: &str,
) -> Result<&'a Arc<CollectionProvider>> {
    context.provider(name).with_context(|| {
        format!(
            "Unknown collection '{}' (expected one of: {})",
            name,
            BUILTIN_SOURCES.join(", ")
        )
    })
}

fn print_collection(name: &str, provider: &CollectionProvider) {
    let pagination = provider.pagination();
    println!(
        "== {} (page {}/{}, {} total) ==",
        name,
        pagination.current_page,
        pagination.total_pages.max(1),
        pagination.total_items
    );
    for entry in provider.get_children(None) {
        println!("{}", entry.display_line());
        if matches!(entry, TreeEntry::Data(_)) {
            for child in provider.get_children(Some(&entry)) {
                println!("    {}", child.display_line());
            }
        }
    }
}

async fn watch(context: &Arc<BridgeContext>, requested: &[String]) -> Result<()> {
    let names: Vec<String> = if requested.is_empty() {
        BUILTIN_SOURCES.iter().map(|s| s.to_string()).collect()
    } else {
        requested.to_vec()
    };
    let mut watched = Vec::new();
    for name in &names {
        watched.push((name.clone(), Arc::clone(find_provider(context, name)?)));
    }
    context.refresh_all().await;
    for (name, provider) in &watched {
        print_collection(name, provider);
    }

    let (changed_tx, mut changed_rx) = tokio::sync::mpsc::unbounded_channel();
    for (index, (_, provider)) in watched.iter().enumerate() {
        let mut versions = provider.subscribe();
        let changed_tx = changed_tx.clone();
        tokio::spawn(async move {
            while versions.changed().await.is_ok() {
                if changed_tx.send(index).is_err() {
                    break;
                }
            }
        });
    }
    drop(changed_tx);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changed_rx.recv() => {
                let Some(index) = changed else { break };
                if let Some((name, provider)) = watched.get(index) {
                    print_collection(name, provider);
                }
            }
        }
    }
    Ok(())
}

fn non_empty<'a>(message: &'a str, fallback: &'a str) -> &'a str {
    if message.trim().is_empty() {
        fallback
    } else {
        message
    }
}
