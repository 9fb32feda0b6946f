//! The voice call pipeline: signalling over a second websocket, media over
//! AEAD-protected RTP on UDP.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::codec::aead::{Cipher, EncryptionMode};
use crate::gateway::socket;
use crate::model::{ChannelId, GuildId, UserId, VoiceEvent};

mod player;
pub use player::Player;

mod udp;
pub use udp::{PcmFrame, CHANNELS, SAMPLE_RATE};

/// Voice gateway protocol version.
const VOICE_QUERY: &str = "/?v=8";

/// Bounded playback queue length, in 20 ms frames.
const PLAYBACK_QUEUE_FRAMES: usize = 10;

/// Grace between closing UDP and closing the websocket on leave.
const LEAVE_GRACE: Duration = Duration::from_millis(500);

/// Voice connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoiceSessionState {
    Disconnected = 0,
    Connecting = 1,
    Ready = 2,
}

/// Call participation changes surfaced to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallUpdate {
    UserJoined(UserId),
    UserLeft(UserId),
    Speaking(UserId, bool),
    /// The media session ended (gateway close, failure, or leave).
    Ended,
}

/// Everything needed to open the voice gateway, gathered from the main
/// gateway's VOICE_STATE_UPDATE + VOICE_SERVER_UPDATE pair.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub endpoint: String,
    pub token: String,
    pub session_id: String,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub mute: bool,
}

struct VoiceShared {
    state: AtomicU8,
    mute: AtomicBool,
    media_session_id: Mutex<Option<String>>,
    leave: Notify,
}

/// Handle to an active (or connecting) voice session. There is at most one
/// per client.
pub struct VoiceSession {
    shared: Arc<VoiceShared>,
}

impl VoiceSession {
    /// Open the voice gateway and start the media pipeline. Call updates
    /// arrive on the returned receiver; `Ended` is always the last one.
    pub fn connect(config: VoiceConfig) -> (VoiceSession, mpsc::Receiver<CallUpdate>) {
        let shared = Arc::new(VoiceShared {
            state: AtomicU8::new(VoiceSessionState::Connecting as u8),
            mute: AtomicBool::new(config.mute),
            media_session_id: Mutex::new(None),
            leave: Notify::new(),
        });
        let (updates_tx, updates_rx) = mpsc::channel(64);

        let task_shared = shared.clone();
        tokio::spawn(async move {
            if let Err(err) = run_voice(config, task_shared.clone(), updates_tx.clone()).await {
                warn!(?err, "voice session failed");
            }
            task_shared
                .state
                .store(VoiceSessionState::Disconnected as u8, Ordering::Relaxed);
            let _ = updates_tx.send(CallUpdate::Ended).await;
        });

        (VoiceSession { shared }, updates_rx)
    }

    pub fn state(&self) -> VoiceSessionState {
        match self.shared.state.load(Ordering::Relaxed) {
            1 => VoiceSessionState::Connecting,
            2 => VoiceSessionState::Ready,
            _ => VoiceSessionState::Disconnected,
        }
    }

    /// Flip the local mute flag. The capture path consults it; the
    /// controller separately resends the main-gateway voice state.
    pub fn set_mute(&self, mute: bool) {
        self.shared.mute.store(mute, Ordering::Relaxed);
    }

    pub fn muted(&self) -> bool {
        self.shared.mute.load(Ordering::Relaxed)
    }

    pub fn media_session_id(&self) -> Option<String> {
        self.shared
            .media_session_id
            .lock()
            .expect("media session id poisoned")
            .clone()
    }

    /// Leave the call: UDP closes first (unblocking the decoder), the
    /// websocket after a short grace.
    pub fn disconnect(&self) {
        // notify_one stores a permit, so a leave before the session task
        // reaches its select loop still lands
        self.shared.leave.notify_one();
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_voice(
    config: VoiceConfig,
    shared: Arc<VoiceShared>,
    updates: mpsc::Sender<CallUpdate>,
) -> crate::Result<()> {
    // the endpoint sometimes carries a legacy :80 suffix
    let endpoint = config.endpoint.trim_end_matches(":80");
    let url = format!("wss://{}{}", endpoint, VOICE_QUERY);
    let (mut reader, mut writer) = socket::connect(&url, false).await?;

    // HELLO first
    let hello = reader.recv().await?;
    let (event, _) = VoiceEvent::decode(hello)?;
    let heartbeat_interval = match event {
        VoiceEvent::Hello { heartbeat_interval } => heartbeat_interval,
        _ => return Err(crate::Error::Protocol("expected voice hello")),
    };
    debug!(heartbeat_interval, "voice gateway hello");

    // IDENTIFY with simulcast stream descriptors
    writer
        .send(&json!({
            "op": 0,
            "d": {
                "server_id": config.guild_id.map(|g| g.to_string())
                    .unwrap_or_else(|| config.channel_id.to_string()),
                "channel_id": config.channel_id,
                "user_id": config.user_id,
                "session_id": config.session_id,
                "token": config.token,
                "video": true,
                "streams": [
                    {"type": "video", "rid": "100", "quality": 100},
                    {"type": "video", "rid": "50", "quality": 50},
                ],
            },
        }))
        .await?;

    let mut sequence: u64 = 0;
    let mut ack_received = true;
    let mut ssrc = 0u32;
    let mut udp_socket: Option<Arc<tokio::net::UdpSocket>> = None;
    let mut receive_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut player: Option<Player> = None;

    let jitter = rand::thread_rng().gen_range(0.1..0.9);
    let mut heartbeat = tokio::time::interval(Duration::from_millis(
        (heartbeat_interval as f64 * jitter) as u64,
    ));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // immediate first tick

    let result = loop {
        tokio::select! {
            _ = shared.leave.notified() => {
                info!("leaving voice call");
                break Ok(());
            }

            _ = heartbeat.tick() => {
                if !ack_received {
                    warn!("voice heartbeat ack missed");
                    break Ok(());
                }
                ack_received = false;
                let beat = json!({
                    "op": 3,
                    "d": {
                        "t": Utc::now().timestamp_millis(),
                        "seq_ack": sequence,
                    },
                });
                if writer.send(&beat).await.is_err() {
                    break Ok(());
                }
            }

            inbound = reader.recv() => {
                let value = match inbound {
                    Ok(value) => value,
                    Err(crate::Error::Closed(code, reason)) => {
                        info!(?code, reason, "voice gateway closed");
                        break Ok(());
                    }
                    Err(err) => break Err(err),
                };
                let (event, seq) = match VoiceEvent::decode(value) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        debug!(?err, "undecodable voice frame dropped");
                        continue;
                    }
                };
                if let Some(seq) = seq {
                    sequence = sequence.max(seq);
                }

                match event {
                    VoiceEvent::HeartbeatAck => ack_received = true,
                    VoiceEvent::HeartbeatRequest => {
                        let beat = json!({
                            "op": 3,
                            "d": {"t": Utc::now().timestamp_millis(), "seq_ack": sequence},
                        });
                        if writer.send(&beat).await.is_err() {
                            break Ok(());
                        }
                    }

                    VoiceEvent::Ready { ssrc: ready_ssrc, ip, port, modes } => {
                        ssrc = ready_ssrc;
                        let Some(mode) = EncryptionMode::negotiate(&modes) else {
                            break Err(crate::Error::Protocol(
                                "no supported voice encryption mode",
                            ));
                        };
                        let socket = match udp::open_socket(&ip, port).await {
                            Ok(socket) => socket,
                            Err(err) => break Err(err),
                        };
                        let (client_ip, client_port) = match udp::discover(&socket, ssrc).await {
                            Ok(address) => address,
                            Err(err) => break Err(err),
                        };
                        udp_socket = Some(Arc::new(socket));

                        let select = json!({
                            "op": 1,
                            "d": {
                                "protocol": "udp",
                                "data": {
                                    "address": client_ip,
                                    "port": client_port,
                                    "mode": mode.wire_name(),
                                },
                                "codecs": [
                                    {"name": "opus", "type": "audio",
                                     "priority": 1000, "payload_type": 120},
                                ],
                            },
                        });
                        if writer.send(&select).await.is_err() {
                            break Ok(());
                        }
                    }

                    VoiceEvent::SessionDescription {
                        mode,
                        secret_key,
                        media_session_id,
                        ..
                    } => {
                        let Some(mode) = EncryptionMode::from_wire_name(&mode) else {
                            break Err(crate::Error::Protocol("unknown negotiated mode"));
                        };
                        let cipher = match Cipher::new(mode, &secret_key) {
                            Ok(cipher) => cipher,
                            Err(err) => break Err(err),
                        };
                        *shared
                            .media_session_id
                            .lock()
                            .expect("media session id poisoned") = media_session_id;
                        shared
                            .state
                            .store(VoiceSessionState::Ready as u8, Ordering::Relaxed);
                        info!("voice session ready");

                        // media path: udp -> decode -> bounded queue -> player
                        if let Some(socket) = udp_socket.clone() {
                            let (frames_tx, frames_rx) = mpsc::channel(PLAYBACK_QUEUE_FRAMES);
                            receive_task = Some(tokio::spawn(udp::receive_loop(
                                socket, cipher, frames_tx,
                            )));
                            player = Player::spawn(frames_rx);
                        }

                        let speaking = json!({
                            "op": 5,
                            "d": {"speaking": 0, "delay": 0, "ssrc": ssrc},
                        });
                        if writer.send(&speaking).await.is_err() {
                            break Ok(());
                        }
                    }

                    VoiceEvent::SessionUpdate { media_session_id } => {
                        if media_session_id.is_some() {
                            *shared
                                .media_session_id
                                .lock()
                                .expect("media session id poisoned") = media_session_id;
                        }
                    }

                    VoiceEvent::ClientConnect { user_ids } => {
                        for user_id in user_ids {
                            let _ = updates.send(CallUpdate::UserJoined(user_id)).await;
                        }
                    }
                    VoiceEvent::ClientDisconnect { user_id } => {
                        let _ = updates.send(CallUpdate::UserLeft(user_id)).await;
                    }
                    VoiceEvent::Speaking { user_id, speaking } => {
                        let _ = updates.send(CallUpdate::Speaking(user_id, speaking)).await;
                    }

                    VoiceEvent::Hello { .. } => debug!("late voice hello ignored"),
                    VoiceEvent::Unknown(op, _) => debug!(op, "unknown voice opcode"),
                }
            }
        }
    };

    // teardown: udp first (unblocks the decoder), socket after a grace
    if let Some(task) = receive_task {
        task.abort();
    }
    drop(udp_socket);
    if let Some(player) = &player {
        player.stop();
    }
    tokio::time::sleep(LEAVE_GRACE).await;
    writer.close().await;
    result
}
