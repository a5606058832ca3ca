//! Connects a crowd of scripted players to a Realm server and reports what
//! they saw.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use realm_protocol::TokenAuthority;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod bot;
mod stats;
mod view;

use bot::{Bot, BotConfig};
use stats::RunStats;

#[derive(Parser, Debug)]
#[command(name = "realm-bot")]
#[command(about = "Scripted load client for the Realm zone server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7777")]
    addr: SocketAddr,

    /// Number of bots to connect
    #[arg(short, long, default_value = "5")]
    bots: u64,

    /// Token secret shared with the server
    #[arg(short, long, default_value = "change-me")]
    secret: String,

    /// Account/character id of the first bot; the rest count up from here
    #[arg(long, default_value = "1000")]
    first_id: u64,

    /// Run duration in seconds
    #[arg(short, long, default_value = "60")]
    duration: u64,

    /// Move commands per second
    #[arg(short, long, default_value = "2.0")]
    move_freq: f64,

    /// Movement speed in units per second
    #[arg(long, default_value = "5.0")]
    speed: f32,

    /// Attack attempts per minute
    #[arg(long, default_value = "60.0")]
    attack_freq: f64,

    /// Chat lines per minute (0 disables chat)
    #[arg(short, long, default_value = "2.0")]
    chat_freq: f64,

    /// How far a bot wanders from where it entered the zone
    #[arg(long, default_value = "30.0")]
    wander_radius: f32,

    /// Delay between bot connections in milliseconds
    #[arg(long, default_value = "50")]
    stagger_ms: u64,
}

fn per_minute(rate: f64) -> Option<Duration> {
    (rate > 0.0).then(|| Duration::from_secs_f64(60.0 / rate))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let move_interval = Duration::from_secs_f64(1.0 / args.move_freq.max(0.1));
    let config = Arc::new(BotConfig {
        server: args.addr,
        authority: TokenAuthority::new(args.secret.as_bytes().to_vec()),
        token_lifetime_ms: (args.duration + 300) * 1000,
        duration: Duration::from_secs(args.duration),
        move_interval,
        step: args.speed * move_interval.as_secs_f32(),
        wander_radius: args.wander_radius,
        attack_reach: 4.5,
        attack_interval: per_minute(args.attack_freq).context("attack_freq must be positive")?,
        chat_interval: per_minute(args.chat_freq),
    });

    info!("🚀 Starting {} bot(s) against {}", args.bots, args.addr);
    info!("   • Duration: {}s", args.duration);
    info!("   • Movement: {:.1} Hz at {:.1} units/s", args.move_freq, args.speed);
    info!("   • Attacks: {:.1}/min | Chat: {:.1}/min", args.attack_freq, args.chat_freq);

    let stats = Arc::new(RunStats::default());
    let mut handles = Vec::new();
    for n in 0..args.bots {
        let id = args.first_id + n;
        let config = Arc::clone(&config);
        let stats = Arc::clone(&stats);
        handles.push(tokio::spawn(async move {
            let result = match Bot::connect(id, config, Arc::clone(&stats)).await {
                Ok(bot) => bot.run().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                RunStats::bump(&stats.failed);
                error!(bot = id, "❌ Bot failed: {:#}", e);
            }
        }));
        tokio::time::sleep(Duration::from_millis(args.stagger_ms)).await;
    }
    info!("🤖 All {} bot(s) launched", args.bots);

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Bot task panicked: {}", e);
        }
    }

    report(&stats);
    Ok(())
}

fn report(stats: &RunStats) {
    info!("✅ Run complete");
    info!("📋 Summary:");
    info!(
        "   • Connected: {} | Denied: {} | Failed: {}",
        RunStats::get(&stats.connected),
        RunStats::get(&stats.denied),
        RunStats::get(&stats.failed)
    );
    info!("   • Zone entries: {}", RunStats::get(&stats.entered));
    info!(
        "   • Commands sent: {} | Packets received: {} | Rejected: {}",
        RunStats::get(&stats.commands_sent),
        RunStats::get(&stats.packets_received),
        RunStats::get(&stats.rejected)
    );
    info!(
        "   • Kills: {} | Deaths: {}",
        RunStats::get(&stats.kills),
        RunStats::get(&stats.deaths)
    );
    info!(
        "   • Chat heard: {} | Whispers: {} | Server disconnects: {}",
        RunStats::get(&stats.chat_heard),
        RunStats::get(&stats.whispers),
        RunStats::get(&stats.disconnects)
    );
    match stats.average_rtt_ms() {
        Some(rtt) => info!("   • Average ping: {:.1} ms", rtt),
        None => info!("   • Average ping: n/a"),
    }
}
