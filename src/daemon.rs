//! Sync daemon
//!
//! Periodically reconciles every configured project. Runs as a tokio event
//! loop; projects within one cycle are synced concurrently, and a failed
//! project is simply retried on the next tick.

use crate::metrics;
use crate::reconcile::{Reconciler, SyncReport};
use crate::{MirrorError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Default tick interval (5 minutes)
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Project keys synced on every tick
    pub projects: Vec<String>,

    /// Time between sync cycles
    pub interval: Duration,

    /// Event broadcast channel capacity (default 256)
    pub event_channel_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            interval: DEFAULT_SYNC_INTERVAL,
            event_channel_capacity: 256,
        }
    }
}

impl DaemonConfig {
    pub fn new(projects: Vec<String>) -> Self {
        Self {
            projects,
            ..Self::default()
        }
    }

    /// Set the tick interval; a zero interval is ignored
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            tracing::warn!("Ignoring zero sync interval");
        } else {
            self.interval = interval;
        }
        self
    }
}

/// Reject an interval the tick loop cannot run with
pub fn validate_interval(interval: Duration) -> Result<Duration> {
    if interval.is_zero() {
        return Err(MirrorError::Config(
            "Sync interval must be greater than zero".to_string(),
        ));
    }
    Ok(interval)
}

/// Events emitted by the daemon
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    Started,
    Stopped,
    CycleStarted,

    /// A project committed a sync
    ProjectSynced(SyncReport),

    /// A project sync failed and was rolled back
    ProjectFailed {
        project_key: String,
        kind: &'static str,
        message: String,
    },

    CycleCompleted {
        succeeded: usize,
        failed: usize,
    },
}

/// Commands accepted by a running daemon
#[derive(Debug, Clone)]
pub enum DaemonCommand {
    /// Run a full cycle immediately
    SyncNow,

    /// Sync one project immediately, even if it is not configured
    SyncProject(String),

    /// Change the tick interval
    SetInterval(Duration),

    /// Stop the daemon
    Shutdown,
}

enum CommandResult {
    Continue,
    Stop,
}

/// Periodic reconciliation loop
pub struct SyncDaemon {
    config: DaemonConfig,
    reconciler: Arc<Reconciler>,
    event_tx: broadcast::Sender<DaemonEvent>,
    command_rx: Option<mpsc::Receiver<DaemonCommand>>,
    command_tx: mpsc::Sender<DaemonCommand>,
}

impl SyncDaemon {
    pub fn new(config: DaemonConfig, reconciler: Arc<Reconciler>) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(10);

        Self {
            config,
            reconciler,
            event_tx,
            command_rx: Some(command_rx),
            command_tx,
        }
    }

    /// Get an event subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.event_tx.subscribe()
    }

    /// Get a command sender
    pub fn command_sender(&self) -> mpsc::Sender<DaemonCommand> {
        self.command_tx.clone()
    }

    fn send_event(&self, event: DaemonEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("Daemon event sent with no subscribers");
        }
    }

    /// Run until a shutdown command or SIGTERM/SIGINT
    pub async fn run(&mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| MirrorError::Config("Daemon already running".to_string()))?;
        let period = validate_interval(self.config.interval)?;

        tracing::info!(
            projects = ?self.config.projects,
            interval_secs = self.config.interval.as_secs(),
            "Sync daemon started"
        );
        metrics::set_health_status(true);
        self.send_event(DaemonEvent::Started);

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        #[cfg(unix)]
        self.run_with_signals(&mut interval, &mut command_rx).await?;

        #[cfg(not(unix))]
        self.run_without_signals(&mut interval, &mut command_rx).await;

        metrics::set_health_status(false);
        self.send_event(DaemonEvent::Stopped);
        tracing::info!("Sync daemon stopped");
        Ok(())
    }

    #[cfg(unix)]
    async fn run_with_signals(
        &mut self,
        interval: &mut tokio::time::Interval,
        command_rx: &mut mpsc::Receiver<DaemonCommand>,
    ) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            MirrorError::Other(format!("Failed to set up SIGTERM handler: {}", e))
        })?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            MirrorError::Other(format!("Failed to set up SIGINT handler: {}", e))
        })?;

        loop {
            tokio::select! {
                _ = interval.tick() => self.sync_cycle().await,
                Some(cmd) = command_rx.recv() => {
                    if let CommandResult::Stop = self.handle_command(cmd, interval).await {
                        break;
                    }
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn run_without_signals(
        &mut self,
        interval: &mut tokio::time::Interval,
        command_rx: &mut mpsc::Receiver<DaemonCommand>,
    ) {
        loop {
            tokio::select! {
                _ = interval.tick() => self.sync_cycle().await,
                Some(cmd) = command_rx.recv() => {
                    if let CommandResult::Stop = self.handle_command(cmd, interval).await {
                        break;
                    }
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        cmd: DaemonCommand,
        interval: &mut tokio::time::Interval,
    ) -> CommandResult {
        match cmd {
            DaemonCommand::SyncNow => self.sync_cycle().await,
            DaemonCommand::SyncProject(project_key) => {
                let result = self.reconciler.sync_project(&project_key).await;
                self.report(project_key, result);
            }
            DaemonCommand::SetInterval(duration) if duration.is_zero() => {
                tracing::warn!("Ignoring request to set a zero sync interval");
            }
            DaemonCommand::SetInterval(duration) => {
                *interval = tokio::time::interval(duration);
                interval.tick().await;
                self.config.interval = duration;
            }
            DaemonCommand::Shutdown => {
                tracing::info!("Received shutdown command");
                return CommandResult::Stop;
            }
        }
        CommandResult::Continue
    }

    /// Sync every configured project once
    async fn sync_cycle(&self) {
        self.send_event(DaemonEvent::CycleStarted);

        let results = self.reconciler.sync_projects(&self.config.projects).await;
        let mut succeeded = 0;
        let mut failed = 0;
        for (project_key, result) in results {
            if result.is_ok() {
                succeeded += 1;
            } else {
                failed += 1;
            }
            self.report(project_key, result);
        }

        tracing::debug!(succeeded, failed, "Sync cycle complete");
        self.send_event(DaemonEvent::CycleCompleted { succeeded, failed });
    }

    fn report(&self, project_key: String, result: Result<SyncReport>) {
        match result {
            Ok(report) => self.send_event(DaemonEvent::ProjectSynced(report)),
            Err(e) => self.send_event(DaemonEvent::ProjectFailed {
                project_key,
                kind: e.kind(),
                message: e.to_string(),
            }),
        }
    }
}
