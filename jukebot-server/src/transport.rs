// jukebot-server/src/transport.rs
//
// Decodes each track with ffmpeg and pumps raw PCM (s16le, 48 kHz stereo)
// into a sink file or FIFO. One ffmpeg child per started handle.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use jukebot_common::error::Collaborator;
use jukebot_common::models::{Track, TransportFinished, TransportHandle, TransportOutcome};
use jukebot_common::traits::Transport;
use jukebot_core::Error;

/// 20 ms of 48 kHz stereo s16le.
const FRAME_BYTES: usize = 3840;

struct Player {
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    /// f32 bits.
    volume: Arc<AtomicU32>,
}

pub struct FfmpegTransport {
    binary: String,
    sink: PathBuf,
    finished_tx: mpsc::Sender<TransportFinished>,
    players: Arc<DashMap<TransportHandle, Player>>,
}

impl FfmpegTransport {
    pub fn new(binary: impl Into<String>, sink: PathBuf, finished_tx: mpsc::Sender<TransportFinished>) -> Self {
        Self {
            binary: binary.into(),
            sink,
            finished_tx,
            players: Arc::new(DashMap::new()),
        }
    }

    fn spawn_decoder(&self, stream_url: &str) -> Result<Child, Error> {
        Command::new(&self.binary)
            .args(["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"])
            .args(["-loglevel", "error", "-i", stream_url])
            .args(["-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::fatal(Collaborator::Transport, format!("could not spawn {}: {e}", self.binary)))
    }

    fn player(&self, handle: &TransportHandle) -> Result<dashmap::mapref::one::Ref<'_, TransportHandle, Player>, Error> {
        self.players
            .get(handle)
            .ok_or_else(|| Error::NotFound(format!("transport handle {handle}")))
    }
}

/// Scales interleaved s16le samples in place.
fn apply_gain(frame: &mut [u8], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in frame.chunks_exact_mut(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]) as f32 * gain;
        let clamped = value.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        sample.copy_from_slice(&clamped.to_le_bytes());
    }
}

async fn pump(
    mut child: Child,
    sink: PathBuf,
    mut paused: watch::Receiver<bool>,
    cancel: CancellationToken,
    volume: Arc<AtomicU32>,
) -> TransportOutcome {
    let Some(mut stdout) = child.stdout.take() else {
        return TransportOutcome::Errored;
    };
    let mut out = match OpenOptions::new().create(true).append(true).open(&sink).await {
        Ok(f) => f,
        Err(e) => {
            error!("FfmpegTransport: cannot open sink {}: {}", sink.display(), e);
            let _ = child.kill().await;
            return TransportOutcome::Errored;
        }
    };

    let mut frame = vec![0u8; FRAME_BYTES];
    loop {
        if *paused.borrow() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                res = paused.wait_for(|p| !*p) => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            res = stdout.read_exact(&mut frame) => res,
        };
        match read {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return match child.wait().await {
                    Ok(status) if status.success() => TransportOutcome::Completed,
                    Ok(status) => {
                        warn!("FfmpegTransport: decoder exited with {}", status);
                        TransportOutcome::Errored
                    }
                    Err(e) => {
                        warn!("FfmpegTransport: wait failed: {}", e);
                        TransportOutcome::Errored
                    }
                };
            }
            Err(e) => {
                warn!("FfmpegTransport: read failed: {}", e);
                let _ = child.kill().await;
                return TransportOutcome::Errored;
            }
        }
        apply_gain(&mut frame, f32::from_bits(volume.load(Ordering::Relaxed)));
        if let Err(e) = out.write_all(&frame).await {
            warn!("FfmpegTransport: sink write failed: {}", e);
            let _ = child.kill().await;
            return TransportOutcome::Errored;
        }
    }

    let _ = child.kill().await;
    TransportOutcome::Superseded
}

#[async_trait]
impl Transport for FfmpegTransport {
    async fn start(&self, handle: &TransportHandle, track: &Track) -> Result<(), Error> {
        let stream = track.stream.as_ref().ok_or_else(|| {
            Error::fatal(Collaborator::Transport, format!("'{}' has no stream", track.title))
        })?;
        let child = self.spawn_decoder(&stream.stream_url)?;

        let (paused_tx, paused_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let volume = Arc::new(AtomicU32::new(1.0f32.to_bits()));
        self.players.insert(
            *handle,
            Player {
                paused: paused_tx,
                cancel: cancel.clone(),
                volume: volume.clone(),
            },
        );

        let players = self.players.clone();
        let finished_tx = self.finished_tx.clone();
        let sink = self.sink.clone();
        let handle = *handle;
        let track_id = track.id.clone();
        info!("FfmpegTransport: {} started '{}'", handle, track.title);
        tokio::spawn(async move {
            let outcome = pump(child, sink, paused_rx, cancel, volume).await;
            players.remove(&handle);
            debug!("FfmpegTransport: {} finished ({:?})", handle, outcome);
            let _ = finished_tx
                .send(TransportFinished { handle, track_id, outcome })
                .await;
        });
        Ok(())
    }

    async fn pause(&self, handle: &TransportHandle) -> Result<(), Error> {
        self.player(handle)?.paused.send_replace(true);
        Ok(())
    }

    async fn resume(&self, handle: &TransportHandle) -> Result<(), Error> {
        self.player(handle)?.paused.send_replace(false);
        Ok(())
    }

    /// Idempotent; unknown handles are fine.
    async fn stop(&self, handle: &TransportHandle) -> Result<(), Error> {
        if let Some(player) = self.players.get(handle) {
            player.cancel.cancel();
        }
        Ok(())
    }

    async fn set_volume(&self, handle: &TransportHandle, volume: f32) -> Result<(), Error> {
        self.player(handle)?
            .volume
            .store(volume.clamp(0.0, 2.0).to_bits(), Ordering::Relaxed);
        Ok(())
    }
}
