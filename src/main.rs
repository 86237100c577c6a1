use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;

use inferq::auth::Role;
use inferq::cli::{Cli, Command, KeysAction, NodeAction, ServerAction};
use inferq::client::{Client, HttpQueue, JobHandle};
use inferq::config::Config;
use inferq::llm::ChatInvoker;
use inferq::queue::{Broker, JobQueue, JobStore};
use inferq::shutdown::install_shutdown_handler;
use inferq::worker::Worker;
use inferq::{logging, server, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Server { action } => match action {
            ServerAction::Start { bind } => server_start(&config, bind).await,
            ServerAction::Init => server_init(&config),
        },
        Command::Keys {
            action: KeysAction::Add { name, role },
        } => keys_add(&config, &name, role.into()),
        Command::Node { action } => node(&config, action).await,
        Command::Submit {
            prompt,
            model,
            priority,
            wait,
            timeout,
        } => submit(&config, &prompt, &model, priority, wait, timeout).await,
        Command::Poll { id, wait, timeout } => poll(&config, &id, wait, timeout).await,
    }
}

fn open_broker(config: &Config) -> Result<Broker> {
    let path = config.broker.resolved_db_path();
    let store = JobStore::open(&path)
        .with_context(|| format!("failed to open job store at {}", path.display()))?;
    Ok(Broker::new(store))
}

async fn server_start(config: &Config, bind: Option<String>) -> Result<()> {
    let broker = open_broker(config)?;
    let addr = bind.unwrap_or_else(|| config.broker.bind.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let shutdown = install_shutdown_handler()?;

    server::serve(listener, broker, shutdown).await?;
    Ok(())
}

fn server_init(config: &Config) -> Result<()> {
    let broker = open_broker(config)?;
    eprintln!(
        "Database initialized at {}",
        config.broker.resolved_db_path().display()
    );
    let secret = broker.gate().issue("Admin", Role::Admin)?;
    ui::print_issued_key("Admin", Role::Admin, &secret);
    Ok(())
}

fn keys_add(config: &Config, name: &str, role: Role) -> Result<()> {
    let broker = open_broker(config)?;
    let secret = broker.gate().issue(name, role)?;
    ui::print_issued_key(name, role, &secret);
    Ok(())
}

fn remote_queue(config: &Config) -> Result<HttpQueue> {
    let api_key = config
        .server
        .api_key
        .clone()
        .context("no API key configured: set server.api_key or INFERQ_API_KEY")?;
    Ok(HttpQueue::new(&config.server.url, api_key)?)
}

async fn node(config: &Config, action: NodeAction) -> Result<()> {
    let queue = remote_queue(config)?;
    let invoker = ChatInvoker::from_config(&config.llm, &config.local_llm)?;
    let worker = Worker::new(queue, invoker)
        .with_batch_size(config.worker.batch_size)
        .with_idle_backoff(config.worker.idle_backoff());

    info!(server = %config.server.url, local_llm = config.local_llm.enabled, "Starting node");
    match action {
        NodeAction::Run => {
            let shutdown = install_shutdown_handler()?;
            worker.run_loop(shutdown).await;
        }
        NodeAction::Batch => {
            let processed = worker.drain().await;
            info!(processed, "Batch finished");
        }
    }
    Ok(())
}

fn remote_client(config: &Config) -> Result<Client<HttpQueue>> {
    Ok(Client::new(remote_queue(config)?).with_poll_interval(config.client.poll_interval()))
}

async fn submit(
    config: &Config,
    prompt: &str,
    model: &str,
    priority: i64,
    wait: bool,
    timeout: Option<u64>,
) -> Result<()> {
    let client = remote_client(config)?;
    let payload = json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
    });
    let mut handle = client.submit(payload, priority).await?;
    ui::print_submitted(handle.id());

    if wait {
        wait_for(&mut handle, wait_timeout(config, timeout)).await?;
    }
    Ok(())
}

async fn poll(config: &Config, id: &str, wait: bool, timeout: Option<u64>) -> Result<()> {
    let client = remote_client(config)?;
    let mut handle = client.find(id).await?;

    if wait && !handle.is_terminal() {
        return wait_for(&mut handle, wait_timeout(config, timeout)).await;
    }

    if let Some(status) = handle.status() {
        ui::print_status(status);
    }
    if let Some(result) = handle.result() {
        ui::print_result(result);
    }
    Ok(())
}

fn wait_timeout(config: &Config, timeout: Option<u64>) -> Duration {
    timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.client.wait_timeout())
}

async fn wait_for<Q: JobQueue>(handle: &mut JobHandle<'_, Q>, timeout: Duration) -> Result<()> {
    let progress = ui::WaitProgress::start(handle.id());
    match handle.get(true, timeout).await {
        Ok(result) => {
            progress.finish(handle.status());
            if let Some(result) = result {
                ui::print_result(&result);
            }
            Ok(())
        }
        Err(e) => {
            progress.abandon(&e.to_string());
            Err(e.into())
        }
    }
}
