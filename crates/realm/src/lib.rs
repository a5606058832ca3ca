//! # Realm zone server
//!
//! Process entry point: parses the command line, loads `realm.toml`
//! (writing a default one if it is missing), installs logging and runs the
//! [`app::Application`] until SIGINT/SIGTERM.
//!
//! ```bash
//! realm --config production.toml --content world.json --json-logs
//! ```

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging needs the file's settings before anything else can log.
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("Failed to setup logging: {e:?}");
        std::process::exit(1);
    }

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            error!("❌ Failed to create application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Application error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
