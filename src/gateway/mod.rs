//! The persistent gateway session: connect, identify, heartbeat, resume,
//! and demultiplex the event stream into the controller's queues.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::model::{
    ChannelId, Event, GatewayCommand, GatewayMessage, GuildId, IdentifyPayload,
    IdentifyProperties, RequestMembersPayload, ResumePayload, UserId, VoiceServerUpdate,
    VoiceStateCommand,
};
use crate::serial::Opcode;
use crate::{Error, Result};

mod demux;
pub use demux::{queues, EventQueues, EventRouter};

mod heartbeat;
use heartbeat::HeartbeatState;

pub(crate) mod socket;
use socket::connect;

mod subscriptions;
pub use subscriptions::SubscriptionManager;

/// Gateway protocol version and transport options.
const GATEWAY_QUERY: &str = "/?v=9&encoding=json&compress=zlib-stream";

/// Identify capabilities bitset expected from a first-party client.
const CAPABILITIES: u64 = 16381;

/// Delay between reconnect attempts while offline.
const WAIT_ONLINE_DELAY: Duration = Duration::from_secs(5);

/// Session-duration telemetry: grace after READY, then the repeat period.
const TIME_SPENT_GRACE: Duration = Duration::from_secs(10);
const TIME_SPENT_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Ready = 2,
}

/// The voice handshake latch: both halves must arrive before the voice
/// gateway can open.
#[derive(Debug, Default, Clone)]
pub struct VoiceHandshake {
    pub session_id: Option<String>,
    pub server: Option<VoiceServerUpdate>,
}

impl VoiceHandshake {
    pub fn complete(&self) -> bool {
        self.session_id.is_some() && self.server.is_some()
    }
}

/// Connection settings for the session.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    /// Gateway host, e.g. `gateway.discord.gg`.
    pub host: String,
    pub os: String,
    pub browser: String,
    pub device: String,
}

struct SessionShared {
    state: AtomicU8,
    fatal: Mutex<Option<String>>,
    session_id: Mutex<Option<String>>,
    resume_url: Mutex<Option<String>>,
    voice: Mutex<VoiceHandshake>,
    token_update: Mutex<Option<String>>,
    my_id: Mutex<Option<UserId>>,
}

/// Handle to the running gateway session.
pub struct Gateway {
    outbound: mpsc::UnboundedSender<Value>,
    shared: Arc<SessionShared>,
    subscriptions: Mutex<SubscriptionManager>,
}

impl Gateway {
    /// Spawn the session task. Events arrive through the returned queues.
    pub fn connect(config: GatewayConfig) -> (Gateway, EventQueues) {
        let (router, queues) = queues();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared {
            state: AtomicU8::new(SessionState::Disconnected as u8),
            fatal: Mutex::new(None),
            session_id: Mutex::new(None),
            resume_url: Mutex::new(None),
            voice: Mutex::new(VoiceHandshake::default()),
            token_update: Mutex::new(None),
            my_id: Mutex::new(None),
        });

        let task_shared = shared.clone();
        let session = tokio::spawn(run_session(
            config,
            task_shared,
            router,
            outbound_rx,
            outbound_tx.clone(),
        ));

        // panics in the session task surface as a fatal session error
        let monitor_shared = shared.clone();
        tokio::spawn(async move {
            if let Err(err) = session.await {
                if err.is_panic() {
                    *monitor_shared.fatal.lock().expect("fatal slot poisoned") =
                        Some("gateway task panicked".to_owned());
                    monitor_shared
                        .state
                        .store(SessionState::Disconnected as u8, Ordering::Relaxed);
                }
            }
        });

        (
            Gateway {
                outbound: outbound_tx,
                shared,
                subscriptions: Mutex::new(SubscriptionManager::default()),
            },
            queues,
        )
    }

    pub fn state(&self) -> SessionState {
        match self.shared.state.load(Ordering::Relaxed) {
            1 => SessionState::Connecting,
            2 => SessionState::Ready,
            _ => SessionState::Disconnected,
        }
    }

    /// A fatal session error (bad token, task panic), if one occurred.
    pub fn fatal_error(&self) -> Option<String> {
        self.shared.fatal.lock().expect("fatal slot poisoned").clone()
    }

    fn send_value(&self, value: Value) -> Result<()> {
        self.outbound
            .send(value)
            .map_err(|_| Error::Other("gateway session is gone"))
    }

    pub fn send_command(&self, command: &GatewayCommand) -> Result<()> {
        self.send_value(serde_json::to_value(command)?)
    }

    /// Declare presence (op 3).
    pub fn update_presence(&self, status: &str, custom_status: Option<&str>) -> Result<()> {
        let mut activities = Vec::new();
        if let Some(text) = custom_status {
            activities.push(json!({
                "type": 4,
                "name": "Custom Status",
                "state": text,
            }));
        }
        self.send_command(&GatewayCommand::UpdatePresence {
            op: Opcode,
            payload: json!({
                "status": status,
                "since": 0,
                "activities": activities,
                "afk": false,
            }),
        })
    }

    /// Ask the main gateway for a voice session (op 4). The replies latch
    /// into the voice handshake.
    pub fn request_voice(
        &self,
        guild_id: Option<GuildId>,
        channel_id: Option<ChannelId>,
        mute: bool,
        video: bool,
        preferred_regions: Vec<String>,
    ) -> Result<()> {
        self.send_command(&GatewayCommand::UpdateVoiceState {
            op: Opcode,
            payload: VoiceStateCommand {
                guild_id,
                channel_id,
                self_mute: mute,
                self_deaf: false,
                self_video: video,
                preferred_regions,
            },
        })
    }

    /// Request member chunks; responses correlate by `nonce`.
    pub fn request_members(
        &self,
        guild_id: GuildId,
        user_ids: Vec<UserId>,
        nonce: String,
    ) -> Result<()> {
        self.send_command(&GatewayCommand::RequestMembers {
            op: Opcode,
            payload: RequestMembersPayload {
                guild_id,
                query: None,
                user_ids: Some(user_ids),
                limit: 0,
                presences: true,
                nonce,
            },
        })
    }

    /// Query members by name prefix (assist username search).
    pub fn query_members(&self, guild_id: GuildId, query: String, nonce: String) -> Result<()> {
        self.send_command(&GatewayCommand::RequestMembers {
            op: Opcode,
            payload: RequestMembersPayload {
                guild_id,
                query: Some(query),
                user_ids: None,
                limit: 10,
                presences: true,
                nonce,
            },
        })
    }

    /// Subscribe a guild channel, sending the guild's complete set.
    pub fn subscribe(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        let payload = self
            .subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .subscribe_channel(guild_id, channel_id);
        match payload {
            Some(payload) => self.send_value(payload),
            None => Ok(()),
        }
    }

    /// Subscribe member updates for a set of users in a guild.
    pub fn subscribe_members(
        &self,
        guild_id: GuildId,
        member_ids: Vec<UserId>,
    ) -> Result<()> {
        let payload = self
            .subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .subscribe_members(guild_id, member_ids);
        match payload {
            Some(payload) => self.send_value(payload),
            None => Ok(()),
        }
    }

    /// Subscribe a DM channel (call-connect opcode).
    pub fn subscribe_dm(&self, channel_id: ChannelId) -> Result<()> {
        let payload = self
            .subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .subscribe_dm(channel_id);
        match payload {
            Some(payload) => self.send_value(payload),
            None => Ok(()),
        }
    }

    /// Take the completed voice handshake, clearing the latch.
    pub fn take_voice_handshake(&self) -> Option<(String, VoiceServerUpdate)> {
        let mut latch = self.shared.voice.lock().expect("voice latch poisoned");
        if latch.complete() {
            let taken = std::mem::take(&mut *latch);
            Some((taken.session_id.unwrap(), taken.server.unwrap()))
        } else {
            None
        }
    }

    /// Take a rotated token delivered on READY, if any.
    pub fn take_token_update(&self) -> Option<String> {
        self.shared
            .token_update
            .lock()
            .expect("token slot poisoned")
            .take()
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared
            .session_id
            .lock()
            .expect("session id poisoned")
            .clone()
    }
}

enum ConnectionEnd {
    /// Try to resume with the remembered session.
    Resumable,
    /// Reconnect fresh with a full identify.
    Fresh,
    Fatal(String),
}

async fn run_session(
    config: GatewayConfig,
    shared: Arc<SessionShared>,
    router: EventRouter,
    mut outbound_rx: mpsc::UnboundedReceiver<Value>,
    outbound_tx: mpsc::UnboundedSender<Value>,
) {
    let mut resume = false;
    // the dispatch sequence outlives individual connections; resume
    // replays from it
    let heartbeat_state = HeartbeatState::new();
    loop {
        let end = run_connection(
            &config,
            &shared,
            &router,
            &mut outbound_rx,
            &outbound_tx,
            &heartbeat_state,
            resume,
        )
        .await;
        shared
            .state
            .store(SessionState::Disconnected as u8, Ordering::Relaxed);
        match end {
            ConnectionEnd::Resumable => resume = true,
            ConnectionEnd::Fresh => resume = false,
            ConnectionEnd::Fatal(message) => {
                *shared.fatal.lock().expect("fatal slot poisoned") = Some(message);
                return;
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn run_connection(
    config: &GatewayConfig,
    shared: &Arc<SessionShared>,
    router: &EventRouter,
    outbound_rx: &mut mpsc::UnboundedReceiver<Value>,
    outbound_tx: &mpsc::UnboundedSender<Value>,
    heartbeat_state: &Arc<HeartbeatState>,
    resume: bool,
) -> ConnectionEnd {
    shared
        .state
        .store(SessionState::Connecting as u8, Ordering::Relaxed);

    let resume_host = shared
        .resume_url
        .lock()
        .expect("resume url poisoned")
        .clone();
    let url = match (&resume_host, resume) {
        (Some(host), true) => format!("{}{}", host.trim_end_matches('/'), GATEWAY_QUERY),
        _ => format!("wss://{}{}", config.host, GATEWAY_QUERY),
    };

    // wait-online loop: a dead network keeps retrying quietly
    let (mut reader, mut writer) = loop {
        match connect(&url, true).await {
            Ok(halves) => break halves,
            Err(err) => {
                debug!(?err, "gateway unreachable, waiting for network");
                tokio::time::sleep(WAIT_ONLINE_DELAY).await;
            }
        }
    };

    // HELLO carries the heartbeat interval
    let heartbeat_interval = match reader.recv().await.map(decode_message) {
        Ok(Ok(GatewayMessage::Hello { payload, .. })) => payload.heartbeat_interval,
        Ok(_) => return ConnectionEnd::Fresh,
        Err(_) => return ConnectionEnd::Resumable,
    };

    heartbeat_state
        .ack_received
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let (missed_tx, mut missed_rx) = mpsc::unbounded_channel();
    let _heartbeat = heartbeat::spawn(
        heartbeat_interval,
        heartbeat_state.clone(),
        outbound_tx.clone(),
        missed_tx,
    );

    let session_id = shared
        .session_id
        .lock()
        .expect("session id poisoned")
        .clone();
    let handshake = match (resume, session_id) {
        (true, Some(session_id)) => {
            let seq = heartbeat_state.last_sequence().unwrap_or(0);
            info!(seq, "resuming gateway session");
            serde_json::to_value(&GatewayCommand::Resume {
                op: Opcode,
                payload: ResumePayload {
                    token: config.token.clone(),
                    session_id,
                    last_sequence: seq,
                },
            })
        }
        _ => serde_json::to_value(&GatewayCommand::Identify {
            op: Opcode,
            payload: identify_payload(config),
        }),
    };
    let handshake = match handshake {
        Ok(value) => value,
        Err(_) => return ConnectionEnd::Fatal("could not encode handshake".to_owned()),
    };
    if writer.send(&handshake).await.is_err() {
        return ConnectionEnd::Resumable;
    }

    let mut next_time_spent: Option<Instant> = None;
    let connected_at = Instant::now();

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(value) = outgoing else {
                    // engine shut down
                    writer.close().await;
                    return ConnectionEnd::Fatal("engine stopped".to_owned());
                };
                if writer.send(&value).await.is_err() {
                    return ConnectionEnd::Resumable;
                }
            }

            _ = missed_rx.recv() => {
                writer.close().await;
                return ConnectionEnd::Resumable;
            }

            _ = sleep_until_opt(next_time_spent) => {
                let payload = json!({
                    "op": 41,
                    "d": {"session_duration": connected_at.elapsed().as_secs()},
                });
                let _ = writer.send(&payload).await;
                next_time_spent = Some(Instant::now() + TIME_SPENT_PERIOD);
            }

            inbound = reader.recv() => {
                let value = match inbound {
                    Ok(value) => value,
                    Err(Error::Closed(code, reason)) => {
                        warn!(?code, reason, "gateway closed");
                        return classify_close(code);
                    }
                    Err(err) => {
                        warn!(?err, "gateway receive error");
                        return ConnectionEnd::Resumable;
                    }
                };
                let message = match decode_message(value) {
                    Ok(message) => message,
                    Err(err) => {
                        debug!(?err, "undecodable gateway frame");
                        continue;
                    }
                };
                match message {
                    GatewayMessage::Dispatch { dispatch, .. } => {
                        heartbeat_state.observe_sequence(dispatch.sequence);
                        match handle_dispatch(dispatch.event, shared, &mut next_time_spent) {
                            Some(event) => {
                                if !router.route(event).await {
                                    return ConnectionEnd::Resumable;
                                }
                            }
                            None => {}
                        }
                    }
                    GatewayMessage::HeartbeatRequest { .. } => {
                        let beat = json!({"op": 1, "d": heartbeat_state.last_sequence()});
                        if writer.send(&beat).await.is_err() {
                            return ConnectionEnd::Resumable;
                        }
                    }
                    GatewayMessage::HeartbeatAck { .. } => {
                        heartbeat_state.ack_received.store(true, Ordering::Relaxed);
                    }
                    GatewayMessage::Reconnect { .. } => {
                        info!("gateway requested reconnect");
                        writer.close().await;
                        return ConnectionEnd::Resumable;
                    }
                    GatewayMessage::InvalidSession { resumable, .. } => {
                        info!(resumable, "session invalidated");
                        if resumable {
                            return ConnectionEnd::Resumable;
                        }
                        *shared.session_id.lock().expect("session id poisoned") = None;
                        let identify = match serde_json::to_value(&GatewayCommand::Identify {
                            op: Opcode,
                            payload: identify_payload(config),
                        }) {
                            Ok(value) => value,
                            Err(_) => return ConnectionEnd::Fresh,
                        };
                        if writer.send(&identify).await.is_err() {
                            return ConnectionEnd::Fresh;
                        }
                    }
                    GatewayMessage::Hello { .. } => {
                        debug!("late hello ignored");
                    }
                }
            }
        }
    }
}

/// Latch session-level data and decide whether the event continues on to
/// the controller queues.
fn handle_dispatch(
    event: Event,
    shared: &Arc<SessionShared>,
    next_time_spent: &mut Option<Instant>,
) -> Option<Event> {
    match event {
        Event::Ready(ready) => {
            *shared.session_id.lock().expect("session id poisoned") =
                Some(ready.session_id.clone());
            if let Some(url) = ready.resume_gateway_url.clone() {
                *shared.resume_url.lock().expect("resume url poisoned") = Some(url);
            }
            if let Some(token) = ready.auth_token.clone() {
                *shared.token_update.lock().expect("token slot poisoned") = Some(token);
            }
            *shared.my_id.lock().expect("my id poisoned") = Some(ready.user.id);
            shared
                .state
                .store(SessionState::Ready as u8, Ordering::Relaxed);
            *next_time_spent = Some(Instant::now() + TIME_SPENT_GRACE);
            info!("gateway ready");
            Some(Event::Ready(ready))
        }
        Event::Resumed(_) => {
            shared
                .state
                .store(SessionState::Ready as u8, Ordering::Relaxed);
            info!("gateway resumed");
            None
        }
        Event::VoiceStateUpdate(ref state) => {
            let my_id = *shared.my_id.lock().expect("my id poisoned");
            if Some(state.user_id) == my_id {
                let mut latch = shared.voice.lock().expect("voice latch poisoned");
                latch.session_id = Some(state.session_id.clone());
            }
            Some(event)
        }
        Event::VoiceServerUpdate(ref server) => {
            let mut latch = shared.voice.lock().expect("voice latch poisoned");
            latch.server = Some(server.clone());
            Some(event)
        }
        other => Some(other),
    }
}

fn identify_payload(config: &GatewayConfig) -> IdentifyPayload {
    IdentifyPayload {
        token: config.token.clone(),
        capabilities: CAPABILITIES,
        properties: IdentifyProperties {
            os: config.os.clone(),
            browser: config.browser.clone(),
            device: config.device.clone(),
        },
        compress: false,
    }
}

fn decode_message(value: Value) -> Result<GatewayMessage> {
    serde_json::from_value(value).map_err(Error::Json)
}

fn classify_close(code: Option<u16>) -> ConnectionEnd {
    match code {
        // resumable protocol hiccups
        Some(4000) | Some(4009) => ConnectionEnd::Resumable,
        Some(4004) => ConnectionEnd::Fatal("authentication failed".to_owned()),
        // session-ended codes
        Some(4014) | Some(4022) => ConnectionEnd::Fresh,
        _ => ConnectionEnd::Resumable,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_classify_per_contract() {
        assert!(matches!(classify_close(Some(4000)), ConnectionEnd::Resumable));
        assert!(matches!(classify_close(Some(4009)), ConnectionEnd::Resumable));
        assert!(matches!(classify_close(Some(4014)), ConnectionEnd::Fresh));
        assert!(matches!(classify_close(Some(4022)), ConnectionEnd::Fresh));
        assert!(matches!(classify_close(Some(4004)), ConnectionEnd::Fatal(_)));
        assert!(matches!(classify_close(None), ConnectionEnd::Resumable));
    }

    #[test]
    fn voice_handshake_latch_completes_with_both_halves() {
        let mut latch = VoiceHandshake::default();
        assert!(!latch.complete());
        latch.session_id = Some("abc".into());
        assert!(!latch.complete());
        latch.server = Some(VoiceServerUpdate {
            token: "tok".into(),
            guild_id: None,
            channel_id: Some(ChannelId(5)),
            endpoint: Some("voice.example".into()),
        });
        assert!(latch.complete());
    }
}
