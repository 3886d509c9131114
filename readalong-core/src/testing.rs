//! Scripted fakes for the platform seams.

use crate::error::{CoreError, Result};
use crate::narration::AudioClip;
use crate::output::{AudioOutput, LocalSpeech, OutputEvent, OutputEvents, Playback, SpeechParams};
use crate::provider::{AlignedSpeech, SpeechProvider};
use crate::timing::CharacterAlignment;
use crate::unit::NarrationRequest;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a fake remote endpoint answers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Script {
    Succeed,
    /// Answer after a delay
    Delay(Duration),
    /// Non-success HTTP status
    Reject(u16),
    /// Aligned endpoint answers without alignment
    NoAlignment,
    /// Aligned endpoint answers with fewer end times than characters
    MalformedAlignment,
    /// Aligned endpoint answers with audio that is not base64
    BadAudio,
    /// Never answers
    Hang,
}

/// Remote source whose two endpoints follow a [`Script`].
///
/// Audio is the UTF-8 text itself; alignment gives every character 0.1s.
pub struct FakeProvider {
    aligned: Script,
    plain: Script,
    aligned_calls: AtomicUsize,
    plain_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(aligned: Script, plain: Script) -> Arc<Self> {
        Arc::new(Self {
            aligned,
            plain,
            aligned_calls: AtomicUsize::new(0),
            plain_calls: AtomicUsize::new(0),
        })
    }

    pub fn aligned_calls(&self) -> usize {
        self.aligned_calls.load(Ordering::SeqCst)
    }

    pub fn plain_calls(&self) -> usize {
        self.plain_calls.load(Ordering::SeqCst)
    }

    async fn follow(script: Script) -> Result<()> {
        match script {
            Script::Succeed | Script::NoAlignment | Script::MalformedAlignment | Script::BadAudio => Ok(()),
            Script::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Script::Reject(status) => Err(CoreError::AcquisitionRejected {
                provider: "fake".to_string(),
                status,
                message: "scripted rejection".to_string(),
            }),
            Script::Hang => std::future::pending().await,
        }
    }
}

pub fn alignment_for(text: &str) -> CharacterAlignment {
    let characters: Vec<String> = text.chars().map(String::from).collect();
    let mut start_times = Vec::with_capacity(characters.len());
    let mut end_times = Vec::with_capacity(characters.len());
    let mut t = 0.0;
    for _ in &characters {
        start_times.push(t);
        t += 0.1;
        end_times.push(t);
    }
    CharacterAlignment {
        characters,
        start_times,
        end_times,
    }
}

#[async_trait]
impl SpeechProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn synthesize_with_alignment(&self, request: &NarrationRequest) -> Result<AlignedSpeech> {
        self.aligned_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.aligned;
        Self::follow(script).await?;
        let text = request.unit.text();
        let audio_base64 = if script == Script::BadAudio {
            "not base64!".to_string()
        } else {
            base64::engine::general_purpose::STANDARD.encode(text)
        };
        let alignment = match script {
            Script::NoAlignment => None,
            Script::MalformedAlignment => {
                let mut alignment = alignment_for(text);
                alignment.end_times.pop();
                Some(alignment)
            }
            _ => Some(alignment_for(text)),
        };
        Ok(AlignedSpeech {
            audio_base64,
            alignment,
        })
    }

    async fn synthesize(&self, request: &NarrationRequest) -> Result<Bytes> {
        self.plain_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.plain;
        Self::follow(script).await?;
        Ok(Bytes::copy_from_slice(request.unit.text().as_bytes()))
    }
}

struct FakePlayback {
    stopped: Arc<AtomicBool>,
}

impl Playback for FakePlayback {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// One started playback, as seen by the test
#[derive(Clone)]
pub struct Started {
    pub label: String,
    pub rate: f32,
    pub events: OutputEvents,
    pub stopped: Arc<AtomicBool>,
}

impl Started {
    pub fn send(&self, event: OutputEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Recorder {
    started: Mutex<Vec<Started>>,
}

impl Recorder {
    fn record(&self, label: String, rate: f32, events: OutputEvents) -> Box<dyn Playback> {
        let stopped = Arc::new(AtomicBool::new(false));
        self.started.lock().unwrap().push(Started {
            label,
            rate,
            events,
            stopped: Arc::clone(&stopped),
        });
        Box::new(FakePlayback { stopped })
    }

    fn all(&self) -> Vec<Started> {
        self.started.lock().unwrap().clone()
    }
}

/// Audio output that "plays" by recording the clip and handing its event sender to the test
#[derive(Default)]
pub struct FakeAudioOutput {
    recorder: Recorder,
    fail_start: AtomicBool,
}

impl FakeAudioOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let output = Self::default();
        output.fail_start.store(true, Ordering::SeqCst);
        Arc::new(output)
    }

    pub fn started(&self) -> Vec<Started> {
        self.recorder.all()
    }

    pub fn last(&self) -> Started {
        self.recorder.all().pop().expect("nothing was played")
    }
}

#[async_trait]
impl AudioOutput for FakeAudioOutput {
    async fn play(&self, clip: &AudioClip, rate: f32, events: OutputEvents) -> Result<Box<dyn Playback>> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CoreError::PlaybackStartFailure {
                reason: "scripted start failure".to_string(),
            });
        }
        let label = String::from_utf8_lossy(clip.bytes()).into_owned();
        Ok(self.recorder.record(label, rate, events))
    }
}

/// Platform speech fake; records what was spoken
pub struct FakeLocalSpeech {
    available: bool,
    recorder: Recorder,
    params: Mutex<Vec<SpeechParams>>,
}

impl FakeLocalSpeech {
    pub fn available() -> Arc<Self> {
        Arc::new(Self {
            available: true,
            recorder: Recorder::default(),
            params: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            available: false,
            recorder: Recorder::default(),
            params: Mutex::new(Vec::new()),
        })
    }

    pub fn spoken(&self) -> Vec<Started> {
        self.recorder.all()
    }

    pub fn last(&self) -> Started {
        self.recorder.all().pop().expect("nothing was spoken")
    }

    pub fn last_params(&self) -> Option<SpeechParams> {
        self.params.lock().unwrap().last().copied()
    }
}

#[async_trait]
impl LocalSpeech for FakeLocalSpeech {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn speak(&self, text: &str, params: &SpeechParams, events: OutputEvents) -> Result<Box<dyn Playback>> {
        if !self.available {
            return Err(CoreError::LocalSynthesisUnavailable {
                reason: "scripted".to_string(),
            });
        }
        self.params.lock().unwrap().push(*params);
        Ok(self.recorder.record(text.to_string(), params.rate, events))
    }
}
