//! Playback of decoded voice audio on the default output device.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated thread:
//! a bridge drains the bounded frame queue into a ring buffer the audio
//! callback consumes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::udp::{PcmFrame, CHANNELS, SAMPLE_RATE};

/// Cap on buffered samples (~500 ms of stereo audio); beyond this the
/// oldest samples are dropped to keep latency bounded.
const RING_CAP: usize = (SAMPLE_RATE as usize) * (CHANNELS as usize) / 2;

/// Handle to the playback thread; dropping it stops playback.
pub struct Player {
    stop: Arc<AtomicBool>,
}

impl Player {
    /// Spawn the playback thread consuming `frames`.
    ///
    /// Returns `None` when no output device is available; the call then
    /// proceeds without local audio, matching a headless machine.
    pub fn spawn(mut frames: mpsc::Receiver<PcmFrame>) -> Option<Player> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        std::thread::Builder::new()
            .name("voice playback".to_owned())
            .spawn(move || {
                let host = cpal::default_host();
                let Some(device) = host.default_output_device() else {
                    warn!("no audio output device, voice playback disabled");
                    return;
                };
                let config = cpal::StreamConfig {
                    channels: CHANNELS,
                    sample_rate: cpal::SampleRate(SAMPLE_RATE),
                    buffer_size: cpal::BufferSize::Default,
                };

                let ring: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
                let callback_ring = ring.clone();
                let stream = device.build_output_stream(
                    &config,
                    move |out: &mut [f32], _| {
                        let mut ring = callback_ring.lock().expect("audio ring poisoned");
                        for sample in out.iter_mut() {
                            *sample = match ring.pop_front() {
                                Some(value) => value as f32 / i16::MAX as f32,
                                None => 0.0,
                            };
                        }
                    },
                    |err| warn!(?err, "audio stream error"),
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(?err, "could not open audio stream");
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    warn!(?err, "could not start audio stream");
                    return;
                }
                info!("voice playback started");

                // bridge: queue -> ring, until the queue closes or stop
                while let Some(frame) = frames.blocking_recv() {
                    if thread_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let mut ring = ring.lock().expect("audio ring poisoned");
                    ring.extend(frame);
                    while ring.len() > RING_CAP {
                        ring.pop_front();
                    }
                }
                debug!("voice playback stopped");
            })
            .ok()?;

        Some(Player { stop })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
