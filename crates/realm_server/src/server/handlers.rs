//! Connection handling from greeting to goodbye.
//!
//! One task per socket. The task runs the whole handshake, from greeting to
//! accept or deny, under one deadline. It decides accept or deny, places the character into a zone through the supervisor
//! and then forwards decoded commands to that zone while draining the
//! session's outbound queue. It never mutates world state itself.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use realm_protocol::{
    ClientPacket, DenyReason, DisconnectReason, Guid, ProtocolError, RejectReason, ServerPacket,
    SessionToken, TokenError, PROTOCOL_VERSION, SESSION_SECRET_BYTES,
};
use realm_world::{
    current_timestamp_ms, player_guid, CharacterId, CharacterRecord, PlayerAddress,
    PlayerRegistration, StoreError, ZoneCommand, ZoneEntry, ZoneError, ZoneHandle,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout_at, Duration, Instant as Deadline, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::ServerContext;
use crate::connection::{ConnectionId, Hello, Inbound, ProtocolSession};
use crate::error::SessionError;
use crate::health::metrics::{denial_counter, names};
use crate::security::validate_chat_message;

const READ_BUFFER: usize = 4096;
/// Placement attempts before a hello is denied.
const ENTER_ATTEMPTS: usize = 3;
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(100);

/// Runs one connection to completion and releases everything it held.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: Arc<ServerContext>) {
    let id = ctx.connections.add_connection(addr).await;
    if let Err(e) = stream.set_nodelay(true) {
        trace!(connection = id, error = %e, "could not disable nagle");
    }

    match run_connection(stream, addr, id, &ctx).await {
        Ok(()) => {}
        Err(SessionError::Protocol(e)) => {
            ctx.metrics.increment_counter(names::PROTOCOL_ERRORS, 1).await;
            warn!(connection = id, %addr, error = %e, "⚠️ Protocol violation, closing connection");
        }
        Err(SessionError::HandshakeTimeout(ms)) => {
            ctx.metrics.increment_counter(names::HANDSHAKE_TIMEOUTS, 1).await;
            info!(connection = id, %addr, "⏰ Handshake not completed within {}ms", ms);
        }
        Err(e) => debug!(connection = id, %addr, error = %e, "connection ended"),
    }

    ctx.connections.remove_connection(id).await;
    ctx.security.on_disconnect(addr.ip()).await;
    ctx.metrics
        .set_gauge(names::ACTIVE_SESSIONS, ctx.connections.in_world_count().await as f64)
        .await;
}

async fn run_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnectionId,
    ctx: &ServerContext,
) -> Result<(), SessionError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut protocol = ProtocolSession::new(rand::random(), ctx.config.max_frame_size);
    writer.write_all(&protocol.greeting()).await?;

    let started = Instant::now();
    let limit = ctx.config.handshake_timeout_ms;
    // Covers reading the hello and admission. Dropping a late admission
    // releases its registration and withdraws the zone entry.
    let deadline = Deadline::now() + Duration::from_millis(limit);
    let hello = match timeout_at(deadline, read_hello(&mut reader, &mut protocol)).await {
        Ok(hello) => hello?,
        Err(_) => return Err(SessionError::HandshakeTimeout(limit)),
    };

    let admitted = match timeout_at(deadline, admit(ctx, &hello)).await {
        Ok(admitted) => admitted,
        Err(_) => {
            warn!(
                connection = id,
                %addr,
                character = hello.token.character_id,
                "admission did not finish within the handshake window"
            );
            let _ = writer.write_all(&protocol.deny(DenyReason::Unavailable)).await;
            return Err(SessionError::HandshakeTimeout(limit));
        }
    };
    let admission = match admitted {
        Ok(admission) => admission,
        Err(reason) => {
            ctx.metrics.increment_counter(&denial_counter(reason), 1).await;
            info!(
                connection = id,
                %addr,
                account = hello.token.account_id,
                character = hello.token.character_id,
                "🚫 Hello denied: {}",
                reason
            );
            writer.write_all(&protocol.deny(reason)).await?;
            let _ = writer.shutdown().await;
            return Ok(());
        }
    };

    ctx.connections
        .enter_world(id, CharacterId(admission.record.character_id), admission.entry.zone)
        .await;
    ctx.metrics.increment_counter(names::SESSIONS_ESTABLISHED, 1).await;
    ctx.metrics
        .record_histogram(names::HANDSHAKE_SECONDS, started.elapsed().as_secs_f64())
        .await;
    ctx.metrics
        .set_gauge(names::ACTIVE_SESSIONS, ctx.connections.in_world_count().await as f64)
        .await;
    info!(
        connection = id,
        %addr,
        character = admission.record.character_id,
        zone = %admission.entry.zone,
        "👋 {} entered the world",
        admission.record.name
    );

    let mut session = Session {
        ctx,
        id,
        ip: addr.ip(),
        protocol,
        reader,
        writer,
        token: hello.token.clone(),
        record: admission.record,
        guid: admission.entry.guid,
        zone: admission.zone,
        outbound: admission.outbound,
        outbound_tx: admission.outbound_tx,
        registration: admission.registration,
        rate_violations: 0,
    };
    let result = session.start(&hello, &admission.secret).await;
    session.leave_world().await;
    result
}

async fn read_hello(
    reader: &mut OwnedReadHalf,
    protocol: &mut ProtocolSession,
) -> Result<Hello, SessionError> {
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(SessionError::ClosedDuringHandshake);
        }
        if let Some(Inbound::Hello(hello)) = protocol.on_bytes(&buf[..n])?.into_iter().next() {
            return Ok(hello);
        }
    }
}

struct Admission {
    record: CharacterRecord,
    entry: ZoneEntry,
    zone: ZoneHandle,
    outbound: mpsc::Receiver<ServerPacket>,
    outbound_tx: mpsc::Sender<ServerPacket>,
    registration: PlayerRegistration,
    secret: [u8; SESSION_SECRET_BYTES],
}

/// Decides accept or deny. On success the character is registered in the
/// directory and already present in a zone.
async fn admit(ctx: &ServerContext, hello: &Hello) -> Result<Admission, DenyReason> {
    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(DenyReason::VersionMismatch);
    }
    ctx.tokens
        .verify(&hello.token, current_timestamp_ms(), ctx.config.token_ttl_ms)
        .map_err(|e| match e {
            TokenError::Expired { .. } | TokenError::TooOld { .. } => DenyReason::TokenExpired,
            _ => DenyReason::InvalidToken,
        })?;
    let secret = ctx
        .tokens
        .session_secret(&hello.token)
        .map_err(|_| DenyReason::Unavailable)?;
    if ctx.shutdown.is_shutdown_initiated() {
        return Err(DenyReason::Unavailable);
    }
    if ctx.connections.in_world_count().await >= ctx.config.max_connections {
        return Err(DenyReason::NoCapacity);
    }

    let character = CharacterId(hello.token.character_id);
    let mut record = ctx
        .store
        .load_character_state(hello.token.account_id, character)
        .await
        .map_err(|e| {
            warn!(%character, error = %e, "character load failed");
            match e {
                StoreError::Backend(_) => DenyReason::Unavailable,
                StoreError::NotFound(_) | StoreError::AccountMismatch { .. } => {
                    DenyReason::InvalidToken
                }
            }
        })?;
    if record.account_suspended {
        return Err(DenyReason::AccountSuspended);
    }

    let (outbound_tx, outbound) = mpsc::channel(ctx.config.outbound_queue_depth.max(1));
    let guid = player_guid(record.character_id);
    let registration = ctx
        .directory
        .register_player(PlayerAddress {
            character_id: character,
            name: record.name.clone(),
            guid,
            outbound: outbound_tx.clone(),
        })
        .map_err(|_| DenyReason::AlreadyOnline)?;

    let (zone, entry) = enter_world(ctx, &mut record, &outbound_tx).await?;
    Ok(Admission {
        record,
        entry,
        zone,
        outbound,
        outbound_tx,
        registration,
        secret,
    })
}

/// Places the character into an instance of its zone, overflowing or
/// retrying when an instance is full or going away.
async fn enter_world(
    ctx: &ServerContext,
    record: &mut CharacterRecord,
    outbound: &mpsc::Sender<ServerPacket>,
) -> Result<(ZoneHandle, ZoneEntry), DenyReason> {
    let mut last = DenyReason::Unavailable;
    for attempt in 1..=ENTER_ATTEMPTS {
        let zone = match ctx.supervisor.ensure_instance(record.zone_id).await {
            Ok(zone) => zone,
            Err(ZoneError::UnknownZone(zone_id)) if zone_id != ctx.config.default_zone => {
                warn!(
                    character = record.character_id,
                    zone_id, "saved zone does not exist, using default zone {}", ctx.config.default_zone
                );
                record.zone_id = ctx.config.default_zone;
                record.position = None;
                continue;
            }
            Err(e) => {
                warn!(character = record.character_id, error = %e, "no zone instance available");
                return Err(DenyReason::Unavailable);
            }
        };
        match zone.add_player(record.clone(), outbound.clone()).await {
            Ok(entry) => return Ok((zone, entry)),
            Err(ZoneError::AlreadyPresent(_)) => return Err(DenyReason::AlreadyOnline),
            Err(ZoneError::Full(key)) => {
                debug!(zone = %key, attempt, "instance filled up, retrying");
                last = DenyReason::NoCapacity;
            }
            Err(e) => {
                debug!(zone = %zone.key(), attempt, error = %e, "instance refused entry, retrying");
                last = DenyReason::Unavailable;
            }
        }
    }
    Err(last)
}

/// What the session loop does next.
enum Flow {
    Continue,
    /// Close the connection, telling the client why when a reason is given.
    Close(Option<DisconnectReason>),
}

struct Session<'a> {
    ctx: &'a ServerContext,
    id: ConnectionId,
    ip: IpAddr,
    protocol: ProtocolSession,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    token: SessionToken,
    record: CharacterRecord,
    guid: Guid,
    zone: ZoneHandle,
    outbound: mpsc::Receiver<ServerPacket>,
    outbound_tx: mpsc::Sender<ServerPacket>,
    registration: PlayerRegistration,
    rate_violations: u32,
}

impl Session<'_> {
    async fn start(
        &mut self,
        hello: &Hello,
        secret: &[u8; SESSION_SECRET_BYTES],
    ) -> Result<(), SessionError> {
        let accept = self.protocol.accept(hello, self.id, secret)?;
        self.writer.write_all(&accept).await?;
        self.run().await
    }

    async fn run(&mut self) -> Result<(), SessionError> {
        let mut buf = vec![0u8; READ_BUFFER];
        let mut recheck = interval(Duration::from_millis(
            self.ctx.config.token_recheck_interval_ms.max(1),
        ));
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping = interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let flow = tokio::select! {
                read = self.reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        debug!(connection = self.id, "peer closed the connection");
                        return Ok(());
                    }
                    let mut flow = Flow::Continue;
                    for inbound in self.protocol.on_bytes(&buf[..n])? {
                        flow = self.handle_inbound(inbound).await?;
                        if !matches!(flow, Flow::Continue) {
                            break;
                        }
                    }
                    flow
                }
                Some(packet) = self.outbound.recv() => {
                    self.send(&packet).await?;
                    Flow::Continue
                }
                _ = recheck.tick() => self.check_token(),
                _ = housekeeping.tick() => self.housekeeping().await,
            };

            if let Flow::Close(reason) = flow {
                if let Some(reason) = reason {
                    info!(connection = self.id, character = self.record.character_id, ?reason, "🔌 Disconnecting session");
                    self.send(&ServerPacket::Disconnect { reason }).await?;
                }
                let _ = self.writer.shutdown().await;
                return Ok(());
            }
        }
    }

    async fn send(&mut self, packet: &ServerPacket) -> Result<(), SessionError> {
        let bytes = self.protocol.seal(packet)?;
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    async fn reject(&mut self, command_opcode: u16, reason: RejectReason) -> Result<(), SessionError> {
        self.send(&ServerPacket::CommandRejected {
            command_opcode,
            reason,
        })
        .await
    }

    async fn handle_inbound(&mut self, inbound: Inbound) -> Result<Flow, SessionError> {
        let packet = match inbound {
            Inbound::Packet(packet) => packet,
            Inbound::Hello(_) => {
                return Err(ProtocolError::UnexpectedOpcode {
                    opcode: realm_protocol::opcode::HELLO,
                    phase: "encrypted session",
                }
                .into())
            }
        };
        let opcode = packet.opcode();

        let command = match packet {
            ClientPacket::Ping { client_time } => {
                self.send(&ServerPacket::Pong {
                    client_time,
                    server_time: current_timestamp_ms(),
                })
                .await?;
                return Ok(Flow::Continue);
            }
            ClientPacket::Logout => return Ok(Flow::Close(Some(DisconnectReason::Logout))),
            ClientPacket::Unrecognized {
                opcode,
                payload_len,
            } => {
                self.ctx.metrics.increment_counter(names::UNKNOWN_OPCODES, 1).await;
                debug!(connection = self.id, opcode = format_args!("{opcode:#06x}"), payload_len, "dropping unrecognized packet");
                return Ok(Flow::Continue);
            }
            ClientPacket::Hello { .. } => {
                return Err(ProtocolError::UnexpectedOpcode {
                    opcode,
                    phase: "encrypted session",
                }
                .into())
            }
            ClientPacket::Whisper {
                target_character,
                message,
            } => {
                if let Some(flow) = self.charge_rate(opcode).await? {
                    return Ok(flow);
                }
                return self.whisper(target_character, message).await;
            }
            ClientPacket::Move { position, rotation } => ZoneCommand::Move { position, rotation },
            ClientPacket::Attack { target } => ZoneCommand::Attack { target },
            ClientPacket::Say { message } => {
                match validate_chat_message(&message, self.ctx.config.max_chat_length) {
                    Ok(clean) => ZoneCommand::Say {
                        message: clean.to_string(),
                    },
                    Err(e) => {
                        self.ctx.metrics.increment_counter(names::CHAT_REJECTED, 1).await;
                        debug!(connection = self.id, error = %e, "say rejected");
                        self.reject(opcode, RejectReason::InvalidMessage).await?;
                        return Ok(Flow::Continue);
                    }
                }
            }
        };

        if let Some(flow) = self.charge_rate(opcode).await? {
            return Ok(flow);
        }
        self.ctx.metrics.increment_counter(names::COMMANDS, 1).await;
        match self
            .zone
            .command(self.guid, command, current_timestamp_ms())
            .await
        {
            Ok(()) => Ok(Flow::Continue),
            Err(e) => {
                debug!(connection = self.id, error = %e, "zone unreachable, command dropped");
                Ok(self.reenter_world().await)
            }
        }
    }

    /// Returns the flow to use instead of processing the command when the
    /// sender is over its rate.
    async fn charge_rate(&mut self, opcode: u16) -> Result<Option<Flow>, SessionError> {
        if self.ctx.security.check_command_rate(self.ip).await.is_ok() {
            return Ok(None);
        }
        self.ctx
            .metrics
            .increment_counter(names::COMMANDS_RATE_LIMITED, 1)
            .await;
        self.rate_violations += 1;
        if self.rate_violations > self.ctx.security.config().max_rate_violations {
            warn!(connection = self.id, ip = %self.ip, "🚫 Rate limit violated repeatedly");
            return Ok(Some(Flow::Close(Some(DisconnectReason::RateLimited))));
        }
        self.reject(opcode, RejectReason::RateLimited).await?;
        Ok(Some(Flow::Continue))
    }

    async fn whisper(&mut self, target_character: u64, message: String) -> Result<Flow, SessionError> {
        let message = match validate_chat_message(&message, self.ctx.config.max_chat_length) {
            Ok(clean) => clean.to_string(),
            Err(e) => {
                self.ctx.metrics.increment_counter(names::CHAT_REJECTED, 1).await;
                debug!(connection = self.id, error = %e, "whisper rejected");
                self.reject(realm_protocol::opcode::WHISPER, RejectReason::InvalidMessage)
                    .await?;
                return Ok(Flow::Continue);
            }
        };
        let outcome = self
            .ctx
            .directory
            .deliver_to_player(
                CharacterId(target_character),
                ServerPacket::WhisperReceived {
                    from_character: self.record.character_id,
                    from_name: self.record.name.clone(),
                    message,
                },
                Duration::from_millis(self.ctx.config.whisper_timeout_ms),
            )
            .await;
        self.ctx.metrics.increment_counter(names::WHISPERS, 1).await;
        trace!(connection = self.id, target_character, ?outcome, "whisper routed");
        self.send(&ServerPacket::WhisperResult {
            target_character,
            outcome,
        })
        .await?;
        Ok(Flow::Continue)
    }

    fn check_token(&self) -> Flow {
        if self.token.is_expired(current_timestamp_ms()) {
            info!(connection = self.id, account = self.token.account_id, "⏰ Session token expired");
            return Flow::Close(Some(DisconnectReason::TokenExpired));
        }
        Flow::Continue
    }

    async fn housekeeping(&mut self) -> Flow {
        if self.ctx.shutdown.is_shutdown_initiated() {
            return Flow::Close(Some(DisconnectReason::ServerShutdown));
        }
        if self.zone.is_closed() {
            return self.reenter_world().await;
        }
        Flow::Continue
    }

    /// The zone this player was in stopped; place the player again.
    async fn reenter_world(&mut self) -> Flow {
        self.ctx.metrics.increment_counter(names::ZONE_REENTRIES, 1).await;
        let lost = self.zone.key();
        match enter_world(self.ctx, &mut self.record, &self.outbound_tx).await {
            Ok((zone, entry)) => {
                info!(connection = self.id, from = %lost, to = %entry.zone, "🔁 Player moved to a fresh zone instance");
                self.guid = entry.guid;
                self.zone = zone;
                self.ctx.connections.set_zone(self.id, entry.zone).await;
                Flow::Continue
            }
            Err(reason) => {
                warn!(connection = self.id, zone = %lost, %reason, "zone lost and no replacement available");
                Flow::Close(Some(DisconnectReason::ZoneUnavailable))
            }
        }
    }

    /// Takes the player out of its zone and saves the final state.
    async fn leave_world(self) {
        let mut record = self.record;
        match self.zone.remove_player(self.guid).await {
            Ok(Some(entity)) => {
                record.zone_id = entity.zone.zone_id;
                record.position = Some(entity.position);
                record.rotation = entity.rotation;
                record.health = entity.health;
                record.max_health = entity.max_health;
            }
            Ok(None) => debug!(connection = self.id, "player was already gone from its zone"),
            Err(e) => debug!(connection = self.id, error = %e, "zone gone, saving last known state"),
        }
        if let Err(e) = self.ctx.store.save_character_state(&record).await {
            warn!(character = record.character_id, error = %e, "⚠️ Failed to save character");
        }
        drop(self.registration);
        info!(connection = self.id, character = record.character_id, "👋 {} left the world", record.name);
    }
}
