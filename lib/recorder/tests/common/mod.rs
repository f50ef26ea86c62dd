#![allow(dead_code)]

use audio_utils::PcmFormat;
use recorder::{
    AudioCaptureDevice, AudioCaptureError, AudioDirection, Clock, FrameRenderer, ManualClock,
    MouseStyle, Receiver, RecorderConfig, RecorderError, RecorderEvent, RecordingBackend, Result,
    Sender, SessionContext,
};
use screen_capture::{
    AcquireOutcome, ActiveClick, Capture, CaptureError, CaptureSession, CapturedFrame,
    LogicalSize, OverlaySource, PointerSnapshot, PointerState, RecordingSource, Rectangle,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use video_encoder::{
    AudioEncoderConfig, EncodedOutput, EncoderError, EncoderSink, OutputTarget,
    VideoEncoderConfig,
};

pub const MS: Duration = Duration::from_millis(1);
pub const NATIVE_SIZE: LogicalSize = LogicalSize {
    width: 8,
    height: 6,
};
/// Texture id of the frames fed while capture recovers.
pub const BLANK: u64 = u64::MAX;
/// Set on the texture id of a frame scaled into the encoder input.
pub const FITTED: u64 = 1 << 32;

fn ticks(time: Duration) -> i64 {
    (time.as_nanos() / 100) as i64
}

#[derive(Debug, Clone)]
pub enum Step {
    Frame(Duration),
    /// A frame whose sources cover only part of the capture.
    Resized(Duration, LogicalSize),
    /// A frame that signals the gate and blocks until it is released.
    Hold(Duration),
    Error(Duration, CaptureError),
}

impl Step {
    fn at(&self) -> Duration {
        match self {
            Self::Frame(at) | Self::Resized(at, _) | Self::Hold(at) | Self::Error(at, _) => *at,
        }
    }
}

pub fn frames_every(interval: Duration, until: Duration) -> Vec<Step> {
    let mut steps = vec![];
    let mut at = Duration::ZERO;
    while at <= until {
        steps.push(Step::Frame(at));
        at += interval;
    }
    steps
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSample {
    pub texture: u64,
    pub start: i64,
    pub duration: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub len: usize,
    pub silent: bool,
    pub start: i64,
    pub duration: i64,
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub video: Vec<VideoSample>,
    pub audio: Vec<AudioSample>,
    pub source_rects: Vec<Rectangle>,
    pub markers: u32,
    pub finalized: bool,
}

#[derive(Debug, Default, Clone)]
pub struct Faults {
    pub fail_sink: bool,
    pub fail_video_write: bool,
}

/// Frame source following a timeline on the shared manual clock.
pub struct ScriptedCapture {
    clock: Arc<ManualClock>,
    steps: VecDeque<Step>,
    running: bool,
    next_id: u64,
    starts: Arc<AtomicU32>,
    reads: Arc<AtomicU32>,
    restart_size: Option<LogicalSize>,
    gate: Option<(Sender<()>, Receiver<()>)>,
}

impl ScriptedCapture {
    /// Size of the capture, `restart_size` once it was started again.
    fn size(&self) -> LogicalSize {
        match self.restart_size {
            Some(size) if self.starts.load(Ordering::SeqCst) > 1 => size,
            _ => NATIVE_SIZE,
        }
    }

    fn frame(&mut self, content_size: LogicalSize) -> AcquireOutcome<u64> {
        let texture = self.next_id;
        self.next_id += 1;
        AcquireOutcome::Frame(CapturedFrame {
            texture,
            update_count: 1,
            content_size,
            pointer: PointerSnapshot::default(),
        })
    }
}

impl CaptureSession for ScriptedCapture {
    type Texture = u64;

    fn start_capture(
        &mut self,
        sources: &[RecordingSource],
        _overlays: &[OverlaySource],
    ) -> std::result::Result<(), CaptureError> {
        if sources.is_empty() {
            return Err(CaptureError::InvalidSource("no sources".to_string()));
        }
        self.running = true;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn acquire_next_frame(
        &mut self,
        _timeout_ms: u32,
    ) -> std::result::Result<AcquireOutcome<u64>, CaptureError> {
        if !self.running {
            return Err(CaptureError::Other("capture not started".to_string()));
        }

        let now = self.clock.now();
        if !self.steps.front().is_some_and(|step| step.at() <= now) {
            return Ok(AcquireOutcome::Timeout);
        }

        match self.steps.pop_front() {
            Some(Step::Error(_, error)) => Err(error),
            Some(Step::Frame(_)) => Ok(self.frame(self.size())),
            Some(Step::Resized(_, content)) => Ok(self.frame(content)),
            Some(Step::Hold(_)) => {
                if let Some((held, release)) = &self.gate {
                    held.send(()).unwrap();
                    release.recv().unwrap();
                }
                Ok(self.frame(self.size()))
            }
            None => Ok(AcquireOutcome::Timeout),
        }
    }

    fn stop_capture(&mut self) {
        self.running = false;
    }

    fn native_size(&self) -> Option<LogicalSize> {
        self.running.then(|| self.size())
    }
}

impl FrameRenderer for ScriptedCapture {
    type Texture = u64;

    fn draw_pointer(
        &self,
        _frame: &u64,
        _pointer: &PointerState,
        _click: Option<ActiveClick>,
        _style: &MouseStyle,
    ) -> std::result::Result<(), CaptureError> {
        Ok(())
    }

    fn read_image(&self, _frame: &u64) -> std::result::Result<Capture, CaptureError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Capture::blank(
            NATIVE_SIZE.width as u32,
            NATIVE_SIZE.height as u32,
        ))
    }

    fn blank_frame(&self, _size: LogicalSize) -> std::result::Result<u64, CaptureError> {
        Ok(BLANK)
    }

    fn fit_frame(&self, frame: &u64, _size: LogicalSize) -> std::result::Result<u64, CaptureError> {
        Ok(frame | FITTED)
    }
}

pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    target: OutputTarget,
    fail_video_write: bool,
}

impl EncoderSink for RecordingSink {
    type Texture = u64;

    fn write_video(
        &mut self,
        texture: &u64,
        start: i64,
        duration: i64,
    ) -> video_encoder::Result<()> {
        if self.fail_video_write {
            return Err(EncoderError::VideoEncodingFailed(
                "injected write failure".to_string(),
            ));
        }
        self.log.lock().unwrap().video.push(VideoSample {
            texture: *texture,
            start,
            duration,
        });
        Ok(())
    }

    fn write_audio(&mut self, pcm: &[u8], start: i64, duration: i64) -> video_encoder::Result<()> {
        self.log.lock().unwrap().audio.push(AudioSample {
            len: pcm.len(),
            silent: pcm.iter().all(|&b| b == 0),
            start,
            duration,
        });
        Ok(())
    }

    fn place_marker(&mut self) -> video_encoder::Result<()> {
        self.log.lock().unwrap().markers += 1;
        Ok(())
    }

    fn wait_for_marker(&mut self, _timeout: Duration) -> video_encoder::Result<bool> {
        Ok(true)
    }

    fn set_source_rect(
        &mut self,
        rect: Rectangle,
        _input_size: LogicalSize,
    ) -> video_encoder::Result<()> {
        self.log.lock().unwrap().source_rects.push(rect);
        Ok(())
    }

    fn finalize(&mut self, _timeout: Duration) -> video_encoder::Result<EncodedOutput> {
        self.log.lock().unwrap().finalized = true;
        Ok(match &self.target {
            OutputTarget::File(path) => EncodedOutput::File(path.clone()),
            OutputTarget::Memory => EncodedOutput::Memory(vec![]),
        })
    }
}

/// Produces non-zero PCM for clock time before `loud_until`, nothing after it.
pub struct ClockAudio {
    clock: Arc<ManualClock>,
    loud_until: Duration,
    format: Option<PcmFormat>,
    last: Mutex<Duration>,
    leftover: Mutex<Vec<u8>>,
}

impl AudioCaptureDevice for ClockAudio {
    fn start_capture(&mut self, format: PcmFormat) -> std::result::Result<(), AudioCaptureError> {
        self.format = Some(format);
        *self.last.lock().unwrap() = self.clock.now();
        Ok(())
    }

    fn recorded_bytes(&self) -> std::result::Result<Vec<u8>, AudioCaptureError> {
        let format = self.format.ok_or(AudioCaptureError::NotRunning)?;
        let now = self.clock.now();
        let mut last = self.last.lock().unwrap();
        let mut bytes = std::mem::take(&mut *self.leftover.lock().unwrap());

        let end = now.min(self.loud_until);
        if end > *last {
            bytes.extend(vec![0x11; format.silence_len(ticks(end - *last))]);
        }
        *last = now;
        Ok(bytes)
    }

    fn return_bytes(&self, bytes: &[u8]) {
        let mut leftover = self.leftover.lock().unwrap();
        let mut front = bytes.to_vec();
        front.append(&mut leftover);
        *leftover = front;
    }

    fn clear(&self) {
        *self.last.lock().unwrap() = self.clock.now();
        self.leftover.lock().unwrap().clear();
    }

    fn stop_capture(&mut self) {
        self.format = None;
    }
}

pub struct FakeBackend {
    pub clock: Arc<ManualClock>,
    pub steps: Mutex<Vec<Step>>,
    pub sink_log: Arc<Mutex<SinkLog>>,
    pub starts: Arc<AtomicU32>,
    pub reads: Arc<AtomicU32>,
    pub loud_until: Duration,
    pub faults: Faults,
    pub restart_size: Option<LogicalSize>,
    pub gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl FakeBackend {
    pub fn new(clock: Arc<ManualClock>, steps: Vec<Step>) -> Self {
        Self {
            clock,
            steps: Mutex::new(steps),
            sink_log: Arc::new(Mutex::new(SinkLog::default())),
            starts: Arc::new(AtomicU32::new(0)),
            reads: Arc::new(AtomicU32::new(0)),
            loud_until: Duration::ZERO,
            faults: Faults::default(),
            restart_size: None,
            gate: Mutex::new(None),
        }
    }

    pub fn with_loud_until(mut self, loud_until: Duration) -> Self {
        self.loud_until = loud_until;
        self
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Report `size` once capture was restarted.
    pub fn with_restart_size(mut self, size: LogicalSize) -> Self {
        self.restart_size = Some(size);
        self
    }

    /// `Step::Hold` sends on `held`, then waits for `release`.
    pub fn with_gate(self, held: Sender<()>, release: Receiver<()>) -> Self {
        *self.gate.lock().unwrap() = Some((held, release));
        self
    }
}

impl RecordingBackend for FakeBackend {
    type Texture = u64;
    type Capture = ScriptedCapture;
    type Sink = RecordingSink;
    type Audio = ClockAudio;
    type ThreadGuard = ();

    fn attach_thread(&self) -> Result<()> {
        Ok(())
    }

    fn create_capture(&self, _ctx: &SessionContext) -> Result<ScriptedCapture> {
        let steps = std::mem::take(&mut *self.steps.lock().unwrap());
        Ok(ScriptedCapture {
            clock: self.clock.clone(),
            steps: steps.into(),
            running: false,
            next_id: 0,
            starts: self.starts.clone(),
            reads: self.reads.clone(),
            restart_size: self.restart_size,
            gate: self.gate.lock().unwrap().take(),
        })
    }

    fn create_sink(
        &self,
        _capture: &ScriptedCapture,
        video: &VideoEncoderConfig,
        audio: Option<&AudioEncoderConfig>,
        target: OutputTarget,
    ) -> Result<RecordingSink> {
        if self.faults.fail_sink {
            return Err(RecorderError::encoder(
                EncoderError::Configuration("injected sink failure".to_string()),
                video.hardware_encoding,
            ));
        }
        video
            .validate()
            .map_err(|e| RecorderError::encoder(e, video.hardware_encoding))?;
        if let Some(audio) = audio {
            audio
                .validate()
                .map_err(|e| RecorderError::encoder(e, video.hardware_encoding))?;
        }

        Ok(RecordingSink {
            log: self.sink_log.clone(),
            target,
            fail_video_write: self.faults.fail_video_write,
        })
    }

    fn create_audio_device(&self, _direction: AudioDirection, _device_id: &str) -> Result<ClockAudio> {
        Ok(ClockAudio {
            clock: self.clock.clone(),
            loud_until: self.loud_until,
            format: None,
            last: Mutex::new(Duration::ZERO),
            leftover: Mutex::new(vec![]),
        })
    }
}

/// A config recording one fake display, audio off.
pub fn config(output: OutputTarget) -> RecorderConfig {
    let mut config = RecorderConfig::new(vec![RecordingSource::display("FAKE1")], output);
    config.audio.output_enabled = false;
    config.audio.input_enabled = false;
    config
}

pub fn terminal_events(events: &[RecorderEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
