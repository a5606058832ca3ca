//! Application lifecycle: assemble the world, serve, report health and shut
//! down in order when a signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use realm_server::health::metrics::names;
use realm_server::health::{self, HealthStatus};
use realm_server::{RealmServer, ServerContext, WorldServices};
use realm_world::{
    ChannelEventSink, CharacterStore, ContentLookup, Directory, EventEnvelope,
    InMemoryCharacterStore, ShutdownState, StaticContent, TickScheduler, TickStats,
    WorldContext, ZoneSupervisor,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::logging::display_banner;
use crate::signals::{wait_for_shutdown_signal, wait_for_shutdown_signal_silent};

/// How long the accept loop gets to drain sessions after shutdown starts.
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(15);
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Application {
    config: AppConfig,
    config_path: PathBuf,
}

impl Application {
    /// Loads the configuration, applies CLI overrides and validates the result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let config = AppConfig::load_from_file(&args.config_path).await?;
        let config = Self::apply_overrides(config, &args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();
        Ok(Self {
            config,
            config_path: args.config_path,
        })
    }

    fn apply_overrides(mut config: AppConfig, args: &CliArgs) -> AppConfig {
        if let Some(content) = &args.content_path {
            config.content.path = Some(content.to_string_lossy().to_string());
        }
        if let Some(bind_address) = &args.bind_address {
            config.server.bind_address = bind_address.clone();
        }
        if let Some(log_level) = &args.log_level {
            config.logging.level = log_level.clone();
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        config
    }

    fn load_content(&self) -> Result<Arc<dyn ContentLookup>, Box<dyn std::error::Error>> {
        let content = match self.config.content_path() {
            Some(path) => {
                let content = StaticContent::load(&path)?;
                info!(
                    "📦 Loaded content from {}: {} zone(s), {} template(s), {} spawn(s)",
                    path.display(),
                    content.zone_ids().len(),
                    content.template_count(),
                    content.spawn_count()
                );
                content
            }
            None => {
                info!("📦 No content file configured, using starter content");
                StaticContent::starter()
            }
        };
        Ok(Arc::new(content))
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Realm zone server");
        self.log_configuration_summary();

        let server_config = self.config.to_server_config()?;
        let content = self.load_content()?;

        let (events, event_log) = ChannelEventSink::new(self.config.monitoring.event_buffer);
        let event_task = tokio::spawn(log_game_events(event_log));

        let directory = Directory::new();
        let world = WorldContext::new(
            self.config.world.clone(),
            content,
            Arc::new(events),
            directory.clone(),
        );
        let (supervisor, supervisor_task) = ZoneSupervisor::spawn(world);

        let shutdown = ShutdownState::new();
        let scheduler = TickScheduler::new(directory.clone(), self.config.world.tick_interval_ms);
        let tick_stats = scheduler.stats();
        let scheduler_task = scheduler.spawn(shutdown.clone());

        let store: Arc<dyn CharacterStore> = if self.config.content.auto_create_characters {
            Arc::new(InMemoryCharacterStore::with_auto_create(
                self.config.content.character_defaults(),
            ))
        } else {
            Arc::new(InMemoryCharacterStore::new())
        };

        let server = RealmServer::bind(
            server_config,
            WorldServices {
                directory,
                supervisor: supervisor.clone(),
                store,
            },
            shutdown.clone(),
        )
        .await?;
        let local_addr = server.local_addr()?;
        let context = server.context();
        let server_task = server.spawn();

        let monitoring_task = spawn_monitoring(
            Arc::clone(&context),
            Arc::clone(&tick_stats),
            Duration::from_secs(self.config.monitoring.stats_interval_secs),
        );

        info!("✅ Realm server is now running!");
        info!("🎮 Ready to accept connections on {}", local_addr);
        info!(
            "🔍 Health monitoring active - stats every {} seconds",
            self.config.monitoring.stats_interval_secs
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        wait_for_shutdown_signal().await?;

        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_signal_silent().await {
                error!("Failed to set up forced shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown signal received again, exiting immediately");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        shutdown.initiate_shutdown();
        monitoring_task.abort();

        info!("📡 Phase 1: Disconnecting sessions and saving characters...");
        match tokio::time::timeout(SERVER_STOP_TIMEOUT, server_task).await {
            Ok(Ok(Ok(()))) => info!("✅ Server task completed gracefully"),
            Ok(Ok(Err(e))) => error!("❌ Server error during shutdown: {}", e),
            Ok(Err(e)) => error!("❌ Server task failed: {}", e),
            Err(_) => warn!("⏰ Server task did not complete within timeout, proceeding"),
        }

        info!("🗺️ Phase 2: Stopping zones...");
        supervisor.shutdown().await;
        await_task("zone supervisor", supervisor_task).await;
        await_task("tick scheduler", scheduler_task).await;

        shutdown.complete_shutdown();
        log_final_statistics(&context, &tick_stats).await;

        // Every EventSink clone is gone once the zones and supervisor are.
        await_task("event log", event_task).await;

        info!("✅ Realm server shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        let world = &self.config.world;
        info!("📋 Configuration Summary:");
        info!("  📂 Config file: {}", self.config_path.display());
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!(
            "  🌍 Region: {:.0}x{:.0}x{:.0} units",
            world.region.max.x - world.region.min.x,
            world.region.max.y - world.region.min.y,
            world.region.max.z - world.region.min.z
        );
        info!(
            "  🕒 Tick: {}ms | Cell: {} | Players/instance: {}",
            world.tick_interval_ms, world.cell_size, world.max_players_per_instance
        );
        if !world.persistent_zones.is_empty() {
            info!("  📌 Persistent zones: {:?}", world.persistent_zones);
        }
        if !self.config.security.banned_ips.is_empty() {
            info!("  🚫 Banned IPs: {}", self.config.security.banned_ips.len());
        }
    }
}

fn spawn_monitoring(
    context: Arc<ServerContext>,
    ticks: Arc<TickStats>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        let mut last_commands = 0u64;

        loop {
            interval.tick().await;

            let stats = context.stats().await;
            let snapshot = ticks.snapshot();
            let report = health::assess(&stats, snapshot, context.config.max_connections);

            let commands = stats.metrics.counter(names::COMMANDS);
            let commands_this_period = commands.saturating_sub(last_commands);
            last_commands = commands;

            info!(
                "📊 System Health ({:?}) - {} sessions | {} zones | {} players | {} commands | ticks {} delivered / {} skipped",
                report.status,
                stats.sessions_in_world,
                stats.zones,
                stats.players,
                commands_this_period,
                snapshot.delivered,
                snapshot.skipped
            );
            if report.status != HealthStatus::Healthy {
                for warning in &report.warnings {
                    warn!("⚠️ {}", warning);
                }
            }
            match serde_json::to_string(&stats) {
                Ok(json) => debug!(stats = %json, "server stats"),
                Err(e) => debug!("could not serialize server stats: {}", e),
            }
        }
    })
}

async fn log_final_statistics(context: &ServerContext, ticks: &TickStats) {
    let stats = context.stats().await;
    let snapshot = ticks.snapshot();
    info!("📊 Final Statistics:");
    info!("  - Scheduler ticks: {}", snapshot.ticks);
    info!(
        "  - Zone ticks delivered/skipped: {}/{}",
        snapshot.delivered, snapshot.skipped
    );
    info!(
        "  - Connections accepted: {}",
        stats.metrics.counter(names::CONNECTIONS_ACCEPTED)
    );
    info!(
        "  - Sessions established: {}",
        stats.metrics.counter(names::SESSIONS_ESTABLISHED)
    );
    info!("  - Handshakes denied: {}", stats.metrics.total_denials());
    info!("  - Commands relayed: {}", stats.metrics.counter(names::COMMANDS));
    info!(
        "  - Rate-limited commands: {}",
        stats.security.rate_limited_commands
    );
}

async fn log_game_events(mut events: mpsc::Receiver<EventEnvelope>) {
    while let Some(envelope) = events.recv().await {
        match serde_json::to_string(&envelope) {
            Ok(json) => debug!(target: "realm::events", event = %json, "game event"),
            Err(e) => warn!("could not serialize game event {}: {}", envelope.id, e),
        }
    }
}

async fn await_task(name: &str, task: JoinHandle<()>) {
    match tokio::time::timeout(TASK_STOP_TIMEOUT, task).await {
        Ok(Ok(())) => debug!("{} stopped", name),
        Ok(Err(e)) => error!("❌ {} task failed: {}", name, e),
        Err(_) => warn!("⏰ {} did not stop within timeout", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CliArgs {
        CliArgs {
            config_path: PathBuf::from("realm.toml"),
            content_path: None,
            bind_address: None,
            log_level: None,
            json_logs: false,
        }
    }

    #[test]
    fn cli_values_override_file_values() {
        let args = CliArgs {
            content_path: Some(PathBuf::from("zones.json")),
            bind_address: Some("0.0.0.0:9001".to_string()),
            log_level: Some("warn".to_string()),
            json_logs: true,
            ..args()
        };
        let config = Application::apply_overrides(AppConfig::default(), &args);
        assert_eq!(config.server.bind_address, "0.0.0.0:9001");
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
        assert_eq!(config.content.path.as_deref(), Some("zones.json"));
    }

    #[test]
    fn absent_cli_values_keep_file_values() {
        let mut file = AppConfig::default();
        file.server.bind_address = "10.0.0.5:7000".to_string();
        file.logging.json_format = true;
        let config = Application::apply_overrides(file, &args());
        assert_eq!(config.server.bind_address, "10.0.0.5:7000");
        assert!(config.logging.json_format);
    }

    #[tokio::test]
    async fn new_rejects_invalid_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        tokio::fs::write(&path, "[world]\ntick_interval_ms = 0\n").await.unwrap();

        let result = Application::new(CliArgs {
            config_path: path,
            ..args()
        })
        .await;
        let err = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("validation failed"), "{err}");
    }

    #[tokio::test]
    async fn missing_content_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.content.path = Some(dir.path().join("absent.json").to_string_lossy().to_string());
        let app = Application {
            config,
            config_path: PathBuf::from("realm.toml"),
        };
        assert!(app.load_content().is_err());
    }
}
