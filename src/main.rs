use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use merge_readiness::config::EngineConfig;
use merge_readiness::detector::MergeDetector;
use merge_readiness::git::{GitRunner, ProcessRunner, RepoWorkingPool};
use merge_readiness::patch::{PatchStore, PatchTester};
use merge_readiness::retry::RetryConfig;
use merge_readiness::server::{AppState, build_router};
use merge_readiness::service::PullService;
use merge_readiness::state::{MemoryStore, MergeReadiness, PullStore, Seed};
use merge_readiness::webhooks::{
    HookQueue, HookRegistry, HttpHookSender, Notifier, NotifierWorker, Translator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "merge_readiness=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env()?;

    let store: Arc<dyn PullStore> = Arc::new(load_store(&config)?);
    let registry = match &config.hooks_file {
        Some(path) => HookRegistry::load(path)
            .with_context(|| format!("reading hooks from {}", path.display()))?,
        None => HookRegistry::new(),
    };
    info!(repos = registry.repo_count(), "webhook endpoints loaded");

    let runner: Arc<dyn GitRunner> =
        Arc::new(ProcessRunner::new(&config.git_binary, config.command_timeout));
    let pool = RepoWorkingPool::new();
    let tester = PatchTester::new(
        Arc::clone(&runner),
        PatchStore::new(config.patch_dir()),
        pool.clone(),
        &config.scratch_dir,
    );
    let detector = MergeDetector::new(Arc::clone(&runner), pool, &config.scratch_dir);

    let sender = Arc::new(HttpHookSender::new(config.delivery_timeout)?);
    let hooks = HookQueue::new(
        sender,
        registry,
        config.hook_queue_length,
        RetryConfig::DELIVERY,
    );
    let (notifier, events) = Notifier::channel();
    let worker = NotifierWorker::new(
        events,
        Translator::new(config.wip_prefixes.clone()),
        Arc::clone(&store),
        hooks.clone(),
    );
    let notifier_shutdown = CancellationToken::new();
    let notifier_task = tokio::spawn(worker.run(notifier_shutdown.clone()));

    let machine = Arc::new(MergeReadiness::new(
        store,
        Arc::new(tester),
        Arc::new(detector),
        notifier,
        config.pull_queue_length,
        RetryConfig::CHECK.with_max_retries(config.max_check_retries),
    ));
    let service = Arc::new(PullService::new(machine, runner));

    let app = build_router(AppState::new(Arc::clone(&service)));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!("listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    service.drain().await;
    notifier_shutdown.cancel();
    notifier_task.await?;
    hooks.drain().await;
    info!("shutdown complete");
    Ok(())
}

/// Builds the store from the seed file, resolving relative repository paths
/// under the configured repository root.
fn load_store(config: &EngineConfig) -> anyhow::Result<MemoryStore> {
    let Some(path) = &config.seed_file else {
        return Ok(MemoryStore::new());
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("reading seed {}", path.display()))?;
    let mut seed: Seed = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing seed {}", path.display()))?;

    if let Some(root) = &config.repo_root {
        for repo in &mut seed.repos {
            if repo.path.is_relative() {
                repo.path = root.join(&repo.path);
            }
        }
    }
    info!(repos = seed.repos.len(), pulls = seed.pulls.len(), "store seeded");
    Ok(MemoryStore::from_seed(seed))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
