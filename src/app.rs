use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use orchestrator_api::{create_app, AppState};
use orchestrator_core::AppConfig;
use orchestrator_dispatcher::{
    Dispatcher, JobController, JobStore, RecoveryService, RetryPolicy, StateListener,
    StatusQueryService, TimeoutMonitor, TimeoutMonitorConfig,
};
use orchestrator_domain::MessageQueue;
use orchestrator_infrastructure::{
    message_queue::mask_url, DatabaseManager, MessageQueueFactory, MetricsCollector,
};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Which components this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// Dispatch loop, result listener and timeout monitor
    Dispatcher,
    /// HTTP control surface only
    Api,
    All,
}

/// Wired-up orchestrator process
#[derive(Clone)]
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    instance_id: String,
    database: Arc<DatabaseManager>,
    message_queue: Arc<dyn MessageQueue>,
    job_store: Arc<JobStore>,
    status_service: Arc<StatusQueryService>,
    metrics: Arc<MetricsCollector>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!(?mode, "initializing orchestrator");

        let metrics_handle = if config.observability.metrics_enabled {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .context("failed to install the Prometheus recorder")?;
            Some(handle)
        } else {
            None
        };

        info!("opening job store at {}", config.database.url);
        let database = Arc::new(
            DatabaseManager::new(&config.database)
                .await
                .context("failed to open the job store database")?,
        );

        info!("connecting message queue at {}", mask_url(&config.message_queue.url));
        let message_queue = MessageQueueFactory::create(&config.message_queue)
            .await
            .context("failed to connect the message queue")?;

        let job_store = Arc::new(JobStore::new(
            database.job_repository(),
            RetryPolicy::new(config.orchestrator.retry.clone()),
            config.orchestrator.default_max_attempts,
        ));
        let status_service = Arc::new(StatusQueryService::new(
            job_store.clone(),
            message_queue.clone(),
            config.message_queue.clone(),
        ));

        Ok(Self {
            instance_id: instance_id(),
            config,
            mode,
            database,
            message_queue,
            job_store,
            status_service,
            metrics: Arc::new(MetricsCollector::new()),
            metrics_handle,
        })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(mode = ?self.mode, instance_id = %self.instance_id, "starting orchestrator");

        match self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown_rx).await?,
            AppMode::Api => self.run_api(shutdown_rx).await?,
            AppMode::All => self.run_all_components(shutdown_rx).await?,
        }

        if let Err(e) = self.message_queue.close().await {
            warn!("failed to close message queue: {}", e);
        }
        self.database.close().await;
        info!("orchestrator stopped");
        Ok(())
    }

    async fn run_dispatcher(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let orchestrator = &self.config.orchestrator;

        if orchestrator.recover_on_startup {
            let report = RecoveryService::new(self.job_store.clone())
                .recover_system_state()
                .await
                .context("startup recovery failed")?;
            if !report.errors.is_empty() {
                warn!(errors = report.errors.len(), "recovery finished with errors");
            }
        }

        let dispatcher = Arc::new(Dispatcher::new(
            self.job_store.clone(),
            self.message_queue.clone(),
            self.config.message_queue.clone(),
            self.instance_id.clone(),
            self.metrics.clone(),
        ));
        let monitor = Arc::new(TimeoutMonitor::new(
            self.job_store.clone(),
            TimeoutMonitorConfig {
                scan_interval: Duration::from_secs(orchestrator.monitor_interval_seconds),
                deadlines: orchestrator.stage_deadlines.clone(),
            },
            self.metrics.clone(),
        ));
        let listener = Arc::new(StateListener::new(
            self.job_store.clone(),
            self.status_service.clone(),
            self.message_queue.clone(),
            self.config.message_queue.result_queue.clone(),
            self.config.message_queue.status_request_queue.clone(),
            Duration::from_millis(orchestrator.listener_idle_poll_ms),
            self.metrics.clone(),
        ));

        let dispatch_handle = tokio::spawn(run_dispatch_loop(
            dispatcher,
            orchestrator.dispatch_interval_seconds,
            shutdown_rx.resubscribe(),
        ));
        let monitor_handle = tokio::spawn(run_monitor_loop(monitor, shutdown_rx.resubscribe()));
        let listener_handle =
            tokio::spawn(run_state_listener_loop(listener, shutdown_rx.resubscribe()));

        let _ = shutdown_rx.recv().await;
        info!("dispatcher received shutdown signal");

        let _ = tokio::join!(dispatch_handle, monitor_handle, listener_handle);

        info!("dispatcher stopped");
        Ok(())
    }

    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let bind_address = &self.config.api.bind_address;

        let controller = Arc::new(JobController::new(
            self.job_store.clone(),
            self.message_queue.clone(),
            self.config.message_queue.clone(),
            self.metrics.clone(),
        ));
        let state = AppState {
            controller,
            status_service: self.status_service.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };
        let app = create_app(state, &self.config.api, &self.config.observability);

        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("failed to bind {bind_address}"))?;
        info!("API listening on http://{}", bind_address);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API received shutdown signal");
            })
            .await
            .context("API server failed")?;

        info!("API stopped");
        Ok(())
    }

    async fn run_all_components(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut handles = Vec::new();

        let app = self.clone_for_mode(AppMode::Dispatcher);
        let rx = shutdown_rx.resubscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = app.run_dispatcher(rx).await {
                error!("dispatcher failed: {:#}", e);
            }
        }));

        if self.config.api.enabled {
            let app = self.clone_for_mode(AppMode::Api);
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = app.run_api(rx).await {
                    error!("API failed: {:#}", e);
                }
            }));
        } else {
            info!("API disabled by configuration");
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(())
    }

    fn clone_for_mode(&self, mode: AppMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}

/// Hostname plus a short random suffix, recorded on every claim
fn instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "orchestrator".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}

async fn run_dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = dispatcher.dispatch_eligible().await {
                    error!("dispatch pass failed: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("dispatch loop received shutdown signal");
                break;
            }
        }
    }
}

async fn run_monitor_loop(monitor: Arc<TimeoutMonitor>, mut shutdown_rx: broadcast::Receiver<()>) {
    tokio::select! {
        result = monitor.start() => {
            if let Err(e) = result {
                error!("timeout monitor failed: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            monitor.stop().await;
        }
    }
}

async fn run_state_listener_loop(
    listener: Arc<StateListener>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    tokio::select! {
        result = listener.listen_for_updates() => {
            if let Err(e) = result {
                error!("state listener failed: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            listener.stop().await;
        }
    }
}
