//! The voice media path: IP discovery and the RTP receive/decrypt/decode
//! loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::codec::aead::Cipher;
use crate::codec::rtp;
use crate::{Error, Result};

/// Discovery responses must arrive within this window or the call fails.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Audio constants: Opus at 48 kHz stereo, 20 ms frames.
pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
const FRAME_SAMPLES: usize = 960;

/// A decoded stereo PCM frame ready for playback.
pub type PcmFrame = Vec<i16>;

/// Bind a UDP socket and connect it to the media server.
pub async fn open_socket(ip: &str, port: u16) -> Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((ip, port)).await?;
    debug!(local = ?socket.local_addr(), remote = %format!("{}:{}", ip, port), "voice udp open");
    Ok(socket)
}

/// Run the IP discovery exchange, returning this client's external
/// address as seen by the media server.
pub async fn discover(socket: &UdpSocket, ssrc: u32) -> Result<(String, u16)> {
    let request = rtp::encode_discovery_request(ssrc);
    socket.send(&request).await?;

    let mut buffer = [0u8; 256];
    let len = tokio::time::timeout(DISCOVERY_TIMEOUT, socket.recv(&mut buffer))
        .await
        .map_err(|_| Error::Protocol("ip discovery timed out"))??;
    let (ip, port) = rtp::decode_discovery_response(&buffer[..len], ssrc)?;
    info!(%ip, port, "ip discovery complete");
    Ok((ip, port))
}

/// Receive datagrams until the socket closes: parse RTP, drop RTCP,
/// decrypt, decode Opus, and push PCM frames into the playback queue.
///
/// A packet that fails authentication is dropped and the loop continues;
/// a closed socket ends the loop.
pub async fn receive_loop(
    socket: Arc<UdpSocket>,
    cipher: Cipher,
    playback: mpsc::Sender<PcmFrame>,
) {
    let mut decoder = match opus::Decoder::new(SAMPLE_RATE, opus::Channels::Stereo) {
        Ok(decoder) => decoder,
        Err(err) => {
            warn!(?err, "could not create opus decoder");
            return;
        }
    };
    let mut datagram = [0u8; 4096];
    let mut pcm = [0i16; FRAME_SAMPLES * CHANNELS as usize];

    loop {
        let len = match socket.recv(&mut datagram).await {
            Ok(len) => len,
            Err(err) => {
                info!(?err, "voice udp closed");
                break;
            }
        };
        let data = &datagram[..len];
        if data.is_empty() || rtp::is_rtcp(data) {
            continue;
        }

        let packet = match rtp::parse(data) {
            Ok(packet) => packet,
            Err(_) => {
                trace!("malformed rtp datagram dropped");
                continue;
            }
        };

        let payload = match cipher.open(packet.ciphertext, packet.header, packet.counter) {
            Ok(payload) => payload,
            Err(_) => {
                trace!(seq = packet.sequence, "voice packet failed decryption");
                continue;
            }
        };
        if payload.len() <= rtp::OPUS_PREAMBLE_LEN {
            continue;
        }
        let opus_payload = &payload[rtp::OPUS_PREAMBLE_LEN..];

        match decoder.decode(opus_payload, &mut pcm, false) {
            Ok(samples) => {
                let frame = pcm[..samples * CHANNELS as usize].to_vec();
                // bounded queue: drop the frame when the player is behind
                if playback.try_send(frame).is_err() {
                    trace!("playback queue full, frame dropped");
                }
            }
            Err(err) => {
                trace!(?err, "opus decode failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_round_trip_against_echo_peer() {
        // a local peer that answers discovery like the media server would
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let ssrc = 77;
        tokio::spawn(async move {
            let mut buffer = [0u8; 256];
            let (len, from) = server.recv_from(&mut buffer).await.unwrap();
            assert_eq!(len, rtp::DISCOVERY_LEN);
            let mut response = [0u8; rtp::DISCOVERY_LEN];
            response.copy_from_slice(&buffer[..len]);
            response[1] = 2; // type: response
            let ip = from.ip().to_string();
            response[8..8 + ip.len()].copy_from_slice(ip.as_bytes());
            response[72] = (from.port() >> 8) as u8;
            response[73] = (from.port() & 0xFF) as u8;
            server.send_to(&response, from).await.unwrap();
        });

        let socket = open_socket(&server_addr.ip().to_string(), server_addr.port())
            .await
            .unwrap();
        let (ip, port) = discover(&socket, ssrc).await.unwrap();
        assert_eq!(ip, "127.0.0.1");
        assert!(port > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_times_out_without_response() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();
        let socket = open_socket(&target.ip().to_string(), target.port())
            .await
            .unwrap();
        let result = discover(&socket, 5).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
