//! One simulated player: log in, wander, hunt the nearest creature, chat,
//! then log out when the run ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use realm_protocol::{
    ClientEvent, ClientPacket, ClientSession, ServerPacket, TokenAuthority, DEFAULT_MAX_FRAME,
};
use realm_world::current_timestamp_ms;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::stats::RunStats;
use crate::view::{Notable, WorldView};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const LOGOUT_GRACE: Duration = Duration::from_secs(3);
const PING_EVERY: Duration = Duration::from_secs(5);

/// Behaviour shared by every bot in a run.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub server: SocketAddr,
    pub authority: TokenAuthority,
    pub token_lifetime_ms: u64,
    pub duration: Duration,
    pub move_interval: Duration,
    /// Distance covered per move command
    pub step: f32,
    pub wander_radius: f32,
    /// Distance at which a creature is attacked instead of approached
    pub attack_reach: f32,
    pub attack_interval: Duration,
    pub chat_interval: Option<Duration>,
}

pub struct Bot {
    id: u64,
    config: Arc<BotConfig>,
    stats: Arc<RunStats>,
    session: ClientSession,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    view: WorldView,
    rng: StdRng,
    buf: Vec<u8>,
}

impl Bot {
    /// Connects and completes the handshake. `id` doubles as account and
    /// character id.
    pub async fn connect(id: u64, config: Arc<BotConfig>, stats: Arc<RunStats>) -> anyhow::Result<Self> {
        let grant = config
            .authority
            .grant(id, id, current_timestamp_ms(), config.token_lifetime_ms)
            .map_err(|e| anyhow!("cannot sign token: {e}"))?;
        let stream = TcpStream::connect(config.server)
            .await
            .with_context(|| format!("bot {id} failed to connect to {}", config.server))?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let mut rng = StdRng::from_entropy();
        let session = ClientSession::new(grant, rng.gen(), DEFAULT_MAX_FRAME);
        let mut bot = Self {
            id,
            config,
            stats,
            session,
            reader,
            writer,
            view: WorldView::default(),
            rng,
            buf: vec![0u8; 16 * 1024],
        };

        timeout(HANDSHAKE_TIMEOUT, bot.handshake())
            .await
            .map_err(|_| anyhow!("bot {id} handshake timed out"))??;
        Ok(bot)
    }

    async fn handshake(&mut self) -> anyhow::Result<()> {
        loop {
            while let Some(event) = self.session.poll()? {
                self.flush().await?;
                match event {
                    ClientEvent::Established { session_id } => {
                        RunStats::bump(&self.stats.connected);
                        debug!(bot = self.id, session_id, "handshake complete");
                        return Ok(());
                    }
                    ClientEvent::Denied(reason) => {
                        RunStats::bump(&self.stats.denied);
                        bail!("bot {} denied: {}", self.id, reason);
                    }
                    ClientEvent::Packet(packet) => {
                        self.on_packet(&packet);
                    }
                }
            }
            self.flush().await?;
            if !self.read_some().await? {
                bail!("bot {} connection closed during handshake", self.id);
            }
        }
    }

    /// Reads once into the session. `false` once the server closed.
    async fn read_some(&mut self) -> anyhow::Result<bool> {
        let n = self.reader.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(false);
        }
        self.session.push(&self.buf[..n]);
        Ok(true)
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        let out = self.session.take_outbound();
        if !out.is_empty() {
            self.writer.write_all(&out).await?;
        }
        Ok(())
    }

    async fn send(&mut self, packet: ClientPacket) -> anyhow::Result<()> {
        self.session.send(&packet)?;
        RunStats::bump(&self.stats.commands_sent);
        self.flush().await
    }

    /// Returns `false` when the server said goodbye.
    fn on_packet(&mut self, packet: &ServerPacket) -> bool {
        RunStats::bump(&self.stats.packets_received);
        match packet {
            ServerPacket::Pong { client_time, .. } => {
                self.stats
                    .record_rtt(current_timestamp_ms().saturating_sub(*client_time));
            }
            ServerPacket::Disconnect { reason } => {
                RunStats::bump(&self.stats.disconnects);
                info!(bot = self.id, "🔌 Server disconnected bot: {:?}", reason);
                return false;
            }
            _ => {}
        }
        if let Some(notable) = self.view.apply(packet) {
            if notable == Notable::EnteredZone {
                if let Some((zone, instance)) = self.view.zone {
                    info!(bot = self.id, zone, instance, "✅ Bot entered zone");
                }
            }
            self.stats.record(notable);
        }
        true
    }

    /// Drains decoded events. `false` once the server disconnected us.
    async fn drain(&mut self) -> anyhow::Result<bool> {
        let mut open = true;
        while let Some(event) = self.session.poll()? {
            if let ClientEvent::Packet(packet) = event {
                open &= self.on_packet(&packet);
            }
        }
        self.flush().await?;
        Ok(open)
    }

    async fn on_move(&mut self) -> anyhow::Result<()> {
        if !self.view.in_world() || self.view.dead {
            return Ok(());
        }
        let destination = match self.view.nearest_creature() {
            Some((_, at)) if at.distance(self.view.position) > self.config.attack_reach => {
                self.view.step_towards(at, self.config.step)
            }
            Some(_) => return Ok(()),
            None => self
                .view
                .wander(&mut self.rng, self.config.step, self.config.wander_radius),
        };
        let heading = destination - self.view.position;
        let rotation = heading.z.atan2(heading.x);
        // Optimistic; the server echoes the authoritative position.
        self.view.position = destination;
        self.send(ClientPacket::Move {
            position: destination,
            rotation,
        })
        .await
    }

    async fn on_attack(&mut self) -> anyhow::Result<()> {
        if self.view.dead {
            return Ok(());
        }
        let Some((target, at)) = self.view.nearest_creature() else {
            return Ok(());
        };
        if at.distance(self.view.position) <= self.config.attack_reach {
            self.send(ClientPacket::Attack { target }).await?;
        }
        Ok(())
    }

    async fn on_chat(&mut self) -> anyhow::Result<()> {
        const LINES: [&str; 4] = ["hello there", "anyone seen the wolves?", "lfg", "nice weather"];
        let line = LINES[self.rng.gen_range(0..LINES.len())];
        self.send(ClientPacket::Say {
            message: format!("[bot {}] {}", self.id, line),
        })
        .await
    }

    /// Plays until the configured duration elapses, then logs out.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut movement = interval(self.config.move_interval);
        movement.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut attacks = interval(self.config.attack_interval);
        attacks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ping = interval(PING_EVERY);
        let chat_every = self.config.chat_interval.unwrap_or(Duration::from_secs(3600));
        let mut chat = tokio::time::interval_at(Instant::now() + chat_every, chat_every);
        let deadline = sleep(self.config.duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                read = self.reader.read(&mut self.buf) => {
                    let n = read?;
                    if n == 0 {
                        warn!(bot = self.id, "🔌 Server closed the connection");
                        return Ok(());
                    }
                    self.session.push(&self.buf[..n]);
                    if !self.drain().await? {
                        return Ok(());
                    }
                }
                _ = movement.tick() => self.on_move().await?,
                _ = attacks.tick() => self.on_attack().await?,
                _ = chat.tick(), if self.config.chat_interval.is_some() => self.on_chat().await?,
                _ = ping.tick() => {
                    self.send(ClientPacket::Ping { client_time: current_timestamp_ms() }).await?;
                }
                _ = &mut deadline => {
                    info!(bot = self.id, "⏰ Bot run complete, logging out");
                    self.send(ClientPacket::Logout).await?;
                    break;
                }
            }
        }
        self.finish_logout().await
    }

    async fn finish_logout(mut self) -> anyhow::Result<()> {
        let goodbye = async {
            loop {
                if !self.drain().await? || !self.read_some().await? {
                    return anyhow::Ok(());
                }
            }
        };
        let finished = timeout(LOGOUT_GRACE, goodbye).await;
        if finished.is_err() {
            warn!(bot = self.id, "⏰ No goodbye from server after logout");
        }
        Ok(())
    }
}
