//! Backend média simulé : une horloge remplace le décodeur audio.
//!
//! Un thread dédié reçoit les commandes par canal et avance la position à
//! chaque tick. Il publie les mêmes événements qu'un vrai lecteur, ce qui
//! permet de faire tourner le client sans sortie audio.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use tracing::{debug, info, warn};

use crate::backend::{EQUALIZER_MAX_DB, EQUALIZER_MIN_DB, MediaBackend, SeekTarget};
use crate::events::{MediaEvents, MediaState};

const TICK_MS: u64 = 200;

/// Bandes de l'égaliseur, en Hz
pub const EQUALIZER_BANDS: [u32; 10] = [60, 170, 310, 600, 1000, 3000, 6000, 12000, 14000, 16000];

#[derive(Debug)]
enum Command {
    Play(String),
    Pause,
    Resume,
    Stop,
    Seek(SeekTarget),
    Shutdown,
}

pub struct SimulatedBackend {
    commands: Sender<Command>,
    events: MediaEvents,
    volume: AtomicU8,
    equalizer: Mutex<Vec<f32>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedBackend {
    /// Chaque piste « dure » `track_length`.
    pub fn new(track_length: Duration) -> Result<Self> {
        Self::with_tick(track_length, Duration::from_millis(TICK_MS))
    }

    pub fn with_tick(track_length: Duration, tick: Duration) -> Result<Self> {
        let (tx, rx) = unbounded::<Command>();
        let events = MediaEvents::new();

        let mut engine = Engine {
            events: events.clone(),
            current: None,
            playing: false,
            position: Duration::ZERO,
            length: track_length.max(Duration::from_millis(1)),
            last_tick: Instant::now(),
        };

        let worker = thread::Builder::new()
            .name("simulated-backend".to_string())
            .spawn(move || {
                loop {
                    match rx.recv_timeout(tick) {
                        Ok(cmd) => {
                            if engine.handle_command(cmd) {
                                break;
                            }
                            while let Ok(cmd) = rx.try_recv() {
                                if engine.handle_command(cmd) {
                                    return;
                                }
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    engine.tick();
                }
                debug!("Simulated backend stopped");
            })?;

        info!(
            track_length_ms = track_length.as_millis() as u64,
            tick_ms = tick.as_millis() as u64,
            "Simulated media backend started"
        );

        Ok(Self {
            commands: tx,
            events,
            volume: AtomicU8::new(100),
            equalizer: Mutex::new(vec![0.0; EQUALIZER_BANDS.len()]),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|err| anyhow!("simulated backend is gone: {:?}", err.0))
    }
}

impl MediaBackend for SimulatedBackend {
    fn play(&self, url: &str) -> Result<()> {
        if url.is_empty() {
            bail!("cannot play an empty URL");
        }
        self.send(Command::Play(url.to_string()))
    }

    fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    fn seek(&self, target: SeekTarget) -> Result<()> {
        self.send(Command::Seek(target))
    }

    fn set_volume(&self, volume: u8) -> Result<()> {
        self.volume.store(volume.min(100), Ordering::Relaxed);
        Ok(())
    }

    fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    fn equalizer_frequencies(&self) -> Vec<u32> {
        EQUALIZER_BANDS.to_vec()
    }

    fn equalizer_amps(&self) -> Vec<f32> {
        self.equalizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_equalizer_band(&self, band: usize, amp: f32) -> Result<()> {
        let mut amps = self.equalizer.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = amps
            .get_mut(band)
            .ok_or_else(|| anyhow!("equalizer band {band} out of range"))?;
        *slot = amp.clamp(EQUALIZER_MIN_DB, EQUALIZER_MAX_DB);
        Ok(())
    }

    fn events(&self) -> &MediaEvents {
        &self.events
    }

    fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // Un abonné qui arrête le backend depuis le thread du moteur ne
            // peut pas l'attendre.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Simulated backend thread panicked");
            }
        }
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// État du moteur, propriété exclusive du thread de lecture.
struct Engine {
    events: MediaEvents,
    current: Option<String>,
    playing: bool,
    position: Duration,
    length: Duration,
    last_tick: Instant,
}

impl Engine {
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Play(url) => {
                debug!(url = %url, "Simulated playback started");
                self.current = Some(url);
                self.position = Duration::ZERO;
                self.playing = true;
                self.last_tick = Instant::now();
                self.publish_state();
                self.events.position_changed.publish(0.0);
            }
            Command::Pause => {
                if self.current.is_some() && self.playing {
                    self.advance_clock();
                    self.playing = false;
                    self.publish_state();
                }
            }
            Command::Resume => {
                if self.current.is_some() && !self.playing {
                    self.playing = true;
                    self.last_tick = Instant::now();
                    self.publish_state();
                }
            }
            Command::Stop => {
                self.current = None;
                self.playing = false;
                self.position = Duration::ZERO;
                self.publish_state();
            }
            Command::Seek(target) => {
                if self.current.is_some() {
                    self.advance_clock();
                    let fraction = target.apply(self.fraction());
                    self.position = self.length.mul_f32(fraction);
                    self.events.position_changed.publish(fraction);
                }
            }
            Command::Shutdown => return true,
        }

        false
    }

    fn tick(&mut self) {
        if self.current.is_none() || !self.playing {
            return;
        }

        self.advance_clock();
        if self.position >= self.length {
            self.events.position_changed.publish(1.0);
            self.current = None;
            self.playing = false;
            self.position = Duration::ZERO;
            self.events.end_reached.publish(());
        } else {
            self.events.position_changed.publish(self.fraction());
        }
    }

    fn advance_clock(&mut self) {
        let now = Instant::now();
        if self.playing {
            self.position += now.duration_since(self.last_tick);
        }
        self.last_tick = now;
    }

    fn fraction(&self) -> f32 {
        (self.position.as_secs_f32() / self.length.as_secs_f32()).clamp(0.0, 1.0)
    }

    fn publish_state(&self) {
        self.events.state_changed.publish(MediaState {
            loading: false,
            playing: self.playing,
        });
    }
}
