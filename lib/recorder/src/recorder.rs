use crate::{
    AudioDirection, AudioLevel, AudioManager, Clock, EventEmitter, FrameDelay, FrameRenderer,
    ImageFormat, MouseStyle, PacingDecision, PacingState, RecorderConfig, RecorderError,
    RecorderEvent, RecorderMode, RecorderState, RecorderStatus, RecordingBackend, Result,
    SessionContext, SilencePadder, StateCell, SystemClock, image_output,
};
use audio_utils::{PcmFormat, pcm};
use chrono::Local;
use crossbeam::channel::{Receiver, Sender, bounded};
use screen_capture::{
    AcquireOutcome, Capture, CaptureSession, LogicalSize, Rectangle,
};
use std::{
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};
use video_encoder::{EncodedOutput, EncoderSink, OutputTarget};

const POLL_STEP: Duration = Duration::from_millis(1);
const RECOVERY_RETRY_INTERVAL: Duration = Duration::from_millis(250);
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);
const START_TIMEOUT: Duration = Duration::from_secs(30);

/// Convert a media time to 100ns ticks.
fn ticks(time: Duration) -> i64 {
    (time.as_nanos() / 100) as i64
}

/// What a finished recording produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOutcome {
    pub output: EncodedOutput,
    /// Only filled in slideshow mode.
    pub frame_delays: Vec<FrameDelay>,
}

struct ActiveRun {
    ctx: SessionContext,
    events: EventEmitter,
    handle: JoinHandle<Result<RecordingOutcome>>,
}

/// One recorder, able to run any number of recordings one after another.
///
/// A recording runs on its own orchestrator thread. Progress arrives as
/// [`RecorderEvent`]s on [`RecordingSession::events`], and every recording
/// that started ends with exactly one `Completed` or `Failed` event.
///
/// # Examples
///
/// ```no_run
/// # #[cfg(target_os = "windows")]
/// # fn main() -> recorder::Result<()> {
/// use recorder::{RecorderConfig, RecordingSession, WindowsRecordingBackend};
/// use screen_capture::RecordingSource;
/// use video_encoder::OutputTarget;
///
/// let config = RecorderConfig::new(
///     vec![RecordingSource::display("\\\\.\\DISPLAY1")],
///     OutputTarget::File("recording.mp4".into()),
/// )
/// .with_max_duration_ms(5_000);
///
/// let mut session = RecordingSession::new(WindowsRecordingBackend, config)?;
/// session.begin_recording()?;
/// let outcome = session.wait()?;
/// println!("{:?}", outcome.output);
/// # Ok(())
/// # }
/// # #[cfg(not(target_os = "windows"))]
/// # fn main() {}
/// ```
pub struct RecordingSession<B: RecordingBackend> {
    backend: Arc<B>,
    config: RecorderConfig,
    state: Arc<StateCell>,
    events: EventEmitter,
    event_receiver: Receiver<RecorderEvent>,
    clock: Arc<dyn Clock>,
    audio_level_sender: Option<Sender<AudioLevel>>,
    run: Option<ActiveRun>,
}

impl<B: RecordingBackend> RecordingSession<B> {
    pub fn new(backend: B, config: RecorderConfig) -> Result<Self> {
        config.validate()?;
        let (events, event_receiver) = EventEmitter::new();

        Ok(Self {
            backend: Arc::new(backend),
            config,
            state: Arc::new(StateCell::default()),
            events,
            event_receiver,
            clock: Arc::new(SystemClock::default()),
            audio_level_sender: None,
            run: None,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receive the level of the mixed audio once per written frame interval.
    pub fn with_audio_level_sender(mut self, sender: Sender<AudioLevel>) -> Self {
        self.audio_level_sender = Some(sender);
        self
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn events(&self) -> Receiver<RecorderEvent> {
        self.event_receiver.clone()
    }

    pub fn state(&self) -> RecorderState {
        self.state.get()
    }

    /// Replace the configuration used by the next recording.
    pub fn set_config(&mut self, config: RecorderConfig) -> Result<()> {
        if self.state.get() != RecorderState::Idle {
            return Err(RecorderError::InvalidState {
                from: self.state.get(),
                to: RecorderState::Idle,
            });
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn prepare_output(&self) -> Result<()> {
        if let (RecorderMode::Slideshow, OutputTarget::File(dir)) =
            (self.config.mode, &self.config.output)
        {
            std::fs::create_dir_all(dir)?;
        }

        if self.config.mode == RecorderMode::Video && self.config.snapshot.enabled {
            std::fs::create_dir_all(self.config.snapshot_directory())?;
        }
        Ok(())
    }

    /// Start a recording. Returns once capture and encoding are running, or
    /// with the error that kept them from starting.
    pub fn begin_recording(&mut self) -> Result<()> {
        if let Some(run) = self.run.take() {
            if !run.handle.is_finished() {
                self.run = Some(run);
                return Err(RecorderError::InvalidState {
                    from: self.state.get(),
                    to: RecorderState::Recording,
                });
            }
            if run.handle.join().is_err() {
                log::warn!("join previous orchestrator thread failed");
            }
        }

        if self.state.get() != RecorderState::Idle {
            return Err(RecorderError::InvalidState {
                from: self.state.get(),
                to: RecorderState::Recording,
            });
        }

        self.config.validate()?;
        self.prepare_output()?;

        let session_id = Local::now().format("rec-%Y%m%d-%H%M%S%.3f").to_string();
        let ctx = SessionContext::new(
            session_id,
            self.config.mouse.click_duration(),
            self.clock.clone(),
        );
        let events = self.events.for_run();
        let (ready_sender, ready_receiver) = bounded(1);

        let handle = {
            let backend = self.backend.clone();
            let config = self.config.clone();
            let ctx = ctx.clone();
            let state = self.state.clone();
            let events = events.clone();
            let audio_level_sender = self.audio_level_sender.clone();

            thread::spawn(move || {
                let session_id = ctx.session_id.clone();
                log::info!("[{session_id}] orchestrator thread start");

                let setup = Orchestrator::<B>::setup(
                    backend.as_ref(),
                    config,
                    ctx,
                    state.clone(),
                    events.clone(),
                    audio_level_sender,
                );

                let (_guard, orchestrator) = match setup {
                    Ok(v) => v,
                    Err(e) => {
                        let message = e.to_string();
                        let _ = ready_sender.send(Err(e));
                        log::info!("[{session_id}] orchestrator thread exit");
                        return Err(RecorderError::Other(message));
                    }
                };

                if let Err(e) = state.transition(RecorderState::Recording) {
                    let message = e.to_string();
                    let _ = ready_sender.send(Err(e));
                    return Err(RecorderError::Other(message));
                }
                events.status(RecorderStatus::Recording);
                let _ = ready_sender.send(Ok(()));

                let result = orchestrator.run();
                log::info!("[{session_id}] orchestrator thread exit");
                result
            })
        };

        let started = match ready_receiver.recv_timeout(START_TIMEOUT) {
            Ok(result) => result,
            Err(e) => Err(RecorderError::Other(format!(
                "recording did not start: {e}"
            ))),
        };

        match started {
            Ok(()) => {
                self.run = Some(ActiveRun {
                    ctx,
                    events,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                ctx.cancel.cancel();
                if handle.join().is_err() {
                    log::warn!("join orchestrator thread failed");
                }
                Err(e)
            }
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        let run = self.active_run(RecorderState::Paused)?;
        self.state.transition(RecorderState::Paused)?;
        run.events.status(RecorderStatus::Paused);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state.get() != RecorderState::Paused {
            return Err(RecorderError::InvalidState {
                from: self.state.get(),
                to: RecorderState::Recording,
            });
        }
        let run = self.active_run(RecorderState::Recording)?;
        self.state.transition(RecorderState::Recording)?;
        run.events.status(RecorderStatus::Recording);
        Ok(())
    }

    /// Ask the running recording to finish. Does not block, see [`Self::wait`].
    pub fn stop(&self) {
        if let Some(run) = &self.run {
            run.ctx.cancel.cancel();
        }
    }

    /// Block until the running recording finished.
    pub fn wait(&mut self) -> Result<RecordingOutcome> {
        let run = self.run.take().ok_or_else(|| RecorderError::InvalidState {
            from: self.state.get(),
            to: RecorderState::Idle,
        })?;

        run.handle
            .join()
            .map_err(|_| RecorderError::Other("orchestrator thread panicked".to_string()))?
    }

    fn active_run(&self, to: RecorderState) -> Result<&ActiveRun> {
        self.run.as_ref().ok_or(RecorderError::InvalidState {
            from: self.state.get(),
            to,
        })
    }
}

impl<B: RecordingBackend> Drop for RecordingSession<B> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.ctx.cancel.cancel();
            if run.handle.join().is_err() {
                log::warn!("join orchestrator thread failed");
            }
        }
    }
}

struct Frame<T> {
    texture: T,
    content_size: LogicalSize,
}

/// The frame on screen since `start`, written once the next one replaces it.
struct Displayed<T> {
    frame: Frame<T>,
    start: Duration,
}

enum ModeOutput<S> {
    Video {
        sink: S,
    },
    Slideshow {
        dir: PathBuf,
        delays: Vec<FrameDelay>,
        last_save: Option<Duration>,
    },
    Snapshot {
        result: Option<EncodedOutput>,
    },
}

enum Flow {
    Continue,
    Done,
}

struct AudioTrack<D: crate::AudioCaptureDevice> {
    manager: AudioManager<D>,
    padder: SilencePadder,
    format: PcmFormat,
    /// Media time up to which audio was collected.
    boundary: Option<Duration>,
    /// Start of the next audio sample in ticks.
    position: i64,
}

struct Recovery {
    next_retry: Duration,
}

struct Pause {
    started: Duration,
}

struct VideoSnapshots {
    interval: Duration,
    dir: PathBuf,
    format: ImageFormat,
    next: Duration,
}

struct Orchestrator<B: RecordingBackend> {
    config: RecorderConfig,
    ctx: SessionContext,
    state: Arc<StateCell>,
    events: EventEmitter,
    capture: B::Capture,
    output: ModeOutput<B::Sink>,
    audio: Option<AudioTrack<B::Audio>>,
    audio_level_sender: Option<Sender<AudioLevel>>,
    click_detector: Option<JoinHandle<()>>,
    snapshot_threads: Vec<JoinHandle<()>>,
    snapshots: Option<VideoSnapshots>,

    style: MouseStyle,
    pacing: PacingState,
    native_size: LogicalSize,
    /// Frame size the encoder was set up with, fixed for the session.
    encoder_input: LogicalSize,
    encoder_content: LogicalSize,
    last_shape_generation: Option<u64>,
    last_draw: Option<Duration>,

    displayed: Option<Displayed<B::Texture>>,
    cached: Option<Frame<B::Texture>>,

    /// Clock time of the first frame, media time zero.
    origin: Option<Duration>,
    paused_total: Duration,
    pause: Option<Pause>,
    recovery: Option<Recovery>,
}

impl<B: RecordingBackend> Orchestrator<B> {
    fn setup(
        backend: &B,
        config: RecorderConfig,
        ctx: SessionContext,
        state: Arc<StateCell>,
        events: EventEmitter,
        audio_level_sender: Option<Sender<AudioLevel>>,
    ) -> Result<(B::ThreadGuard, Self)> {
        let guard = backend.attach_thread()?;

        let mut capture = backend.create_capture(&ctx)?;
        capture.start_capture(&config.sources, &config.overlays)?;
        let native_size = capture
            .native_size()
            .ok_or_else(|| RecorderError::Other("capture reported no size".to_string()))?;
        log::info!("[{}] native size {native_size:?}", ctx.session_id);

        let output = match config.mode {
            RecorderMode::Video => {
                let video = config.video_encoder_config(native_size);
                let audio = config
                    .records_audio()
                    .then(|| config.audio.encoder_config());
                let sink =
                    backend.create_sink(&capture, &video, audio.as_ref(), config.output.clone())?;
                ModeOutput::Video { sink }
            }
            RecorderMode::Slideshow => match &config.output {
                OutputTarget::File(dir) => ModeOutput::Slideshow {
                    dir: dir.clone(),
                    delays: vec![],
                    last_save: None,
                },
                OutputTarget::Memory => {
                    return Err(RecorderError::InvalidConfig(
                        "slideshow needs an output directory".to_string(),
                    ));
                }
            },
            RecorderMode::Snapshot => ModeOutput::Snapshot { result: None },
        };

        let audio = if config.records_audio() {
            let format = config.audio.pcm_format();
            let mut manager = AudioManager::new(format);
            if config.audio.output_enabled {
                let device = backend
                    .create_audio_device(AudioDirection::Output, &config.audio.output_device_id)?;
                manager = manager.with_device(
                    AudioDirection::Output,
                    device,
                    config.audio.output_volume,
                );
            }
            if config.audio.input_enabled {
                let device = backend
                    .create_audio_device(AudioDirection::Input, &config.audio.input_device_id)?;
                manager =
                    manager.with_device(AudioDirection::Input, device, config.audio.input_volume);
            }
            manager.start()?;

            Some(AudioTrack {
                manager,
                padder: SilencePadder::new(format),
                format,
                boundary: None,
                position: 0,
            })
        } else {
            None
        };

        let click_detector = if config.mouse.detect_clicks {
            let handle =
                backend.spawn_click_detector(config.mouse.mode, ctx.clicks.clone(), &ctx.cancel);
            if handle.is_none() {
                log::warn!("[{}] click detection is not available", ctx.session_id);
            }
            handle
        } else {
            None
        };

        let snapshots = (config.mode == RecorderMode::Video && config.snapshot.enabled).then(|| {
            VideoSnapshots {
                interval: config.snapshot.interval(),
                dir: config.snapshot_directory(),
                format: config.snapshot.format,
                next: config.snapshot.interval(),
            }
        });

        let pacing = PacingState::new(
            config.video.frame_interval(),
            config.video.max_frame_length(),
            config.video.fixed_framerate,
        );

        let style = config.mouse.style();
        Ok((
            guard,
            Self {
                config,
                ctx,
                state,
                events,
                capture,
                output,
                audio,
                audio_level_sender,
                click_detector,
                snapshot_threads: vec![],
                snapshots,
                style,
                pacing,
                native_size,
                encoder_input: native_size,
                encoder_content: native_size,
                last_shape_generation: None,
                last_draw: None,
                displayed: None,
                cached: None,
                origin: None,
                paused_total: Duration::ZERO,
                pause: None,
                recovery: None,
            },
        ))
    }

    fn run(mut self) -> Result<RecordingOutcome> {
        match self.acquisition_loop() {
            Ok(end) => self.finish(end),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn now(&self) -> Duration {
        self.ctx.clock.now()
    }

    /// Media time, frozen while paused. `None` before the first frame.
    fn media_time(&self, now: Duration) -> Option<Duration> {
        let origin = self.origin?;
        let now = self.pause.as_ref().map_or(now, |p| p.started);
        Some(now.saturating_sub(origin).saturating_sub(self.paused_total))
    }

    /// Returns the media time the recording ends at.
    fn acquisition_loop(&mut self) -> Result<Duration> {
        let max_duration = self.config.max_duration();

        loop {
            if self.ctx.cancel.is_cancelled() {
                log::info!("[{}] recording cancelled", self.ctx.session_id);
                break;
            }

            let now = self.now();
            if self.update_pause(now) {
                if let Some(audio) = self.audio.as_mut() {
                    audio.manager.clear();
                }
                self.ctx.clock.sleep(POLL_STEP);
                continue;
            }

            if let (Some(max), Some(media)) = (max_duration, self.media_time(now))
                && media >= max
            {
                log::info!("[{}] reached max duration {max:?}", self.ctx.session_id);
                break;
            }

            self.retry_capture(now)?;

            let fresh = if self.recovery.is_some() {
                None
            } else {
                match self.next_frame(now) {
                    Ok(frame) => frame,
                    Err(e) if e.is_recoverable() => {
                        self.begin_recovery(now, &e)?;
                        Some(self.blank_frame()?)
                    }
                    Err(e) => return Err(e),
                }
            };

            if fresh.is_some() && self.origin.is_none() {
                self.origin = Some(now);
                if let Some(audio) = self.audio.as_mut() {
                    audio.manager.clear();
                }
                log::info!("[{}] first frame", self.ctx.session_id);
            }

            let Some(media) = self.media_time(now) else {
                self.ctx.clock.sleep(POLL_STEP);
                continue;
            };

            let shape_changed = fresh.as_ref().is_some_and(|(_, changed)| *changed);
            let decision =
                self.pacing
                    .decide(media, fresh.is_some(), self.cached.is_some(), shape_changed);

            match decision {
                PacingDecision::Submit => {
                    let boundary = self.pacing.submitted(media);
                    if let Flow::Done = self.submit(boundary, fresh.map(|(frame, _)| frame))? {
                        return Ok(boundary);
                    }
                }
                PacingDecision::Cache => self.cached = fresh.map(|(frame, _)| frame),
                PacingDecision::Wait => {}
            }

            self.take_video_snapshot(media)?;
            self.sleep_until_next(media, max_duration);
        }

        let now = self.now();
        let end = self.media_time(now).unwrap_or_default();
        Ok(max_duration.map_or(end, |max| end.min(max)))
    }

    /// Track pause state changes. Returns `true` while paused.
    fn update_pause(&mut self, now: Duration) -> bool {
        let paused = self.state.get() == RecorderState::Paused;
        match (paused, self.pause.as_ref()) {
            (true, None) => {
                log::info!("[{}] paused", self.ctx.session_id);
                self.pause = Some(Pause { started: now });
            }
            (false, Some(pause)) => {
                if self.origin.is_some() {
                    self.paused_total += now.saturating_sub(pause.started);
                }
                self.pause = None;
                log::info!(
                    "[{}] resumed, paused {:?} in total",
                    self.ctx.session_id,
                    self.paused_total
                );
            }
            _ => {}
        }
        paused
    }

    fn sleep_until_next(&self, media: Duration, max_duration: Option<Duration>) {
        let mut step = POLL_STEP;

        if let Some(deadline) = self.pacing.next_deadline(self.cached.is_some()) {
            step = step.min(deadline.saturating_sub(media));
        }
        if let Some(max) = max_duration {
            step = step.min(max.saturating_sub(media));
        }
        if let (Some(recovery), Some(origin)) = (&self.recovery, self.origin) {
            let media_retry = recovery
                .next_retry
                .saturating_sub(origin)
                .saturating_sub(self.paused_total);
            step = step.min(media_retry.saturating_sub(media));
        }

        if !step.is_zero() {
            self.ctx.clock.sleep(step);
        }
    }

    /// Poll once for a new frame and draw the pointer onto it.
    /// The flag tells whether the pointer shape changed.
    fn next_frame(&mut self, now: Duration) -> Result<Option<(Frame<B::Texture>, bool)>> {
        let AcquireOutcome::Frame(frame) = self.capture.acquire_next_frame(0)? else {
            return Ok(None);
        };

        let elapsed = self.last_draw.map_or(Duration::ZERO, |last| now.saturating_sub(last));
        self.last_draw = Some(now);
        let click = self.ctx.clicks.advance(elapsed);

        if self.style.draw_pointer || click.is_some() {
            let pointer = self
                .ctx
                .pointer
                .lock()
                .map_err(|_| RecorderError::Other("pointer state lock poisoned".to_string()))?;
            self.capture
                .draw_pointer(&frame.texture, &pointer, click, &self.style)?;
        }

        let generation = frame.pointer.shape_generation;
        let shape_changed = self
            .last_shape_generation
            .is_some_and(|last| last != generation);
        self.last_shape_generation = Some(generation);

        log::debug!(
            "[{}] frame with {} updates",
            self.ctx.session_id,
            frame.update_count
        );

        let (texture, content_size) = self.fit_to_encoder(frame.texture, frame.content_size)?;
        Ok(Some((
            Frame {
                texture,
                content_size,
            },
            shape_changed,
        )))
    }

    /// Scale frames of a source that came back at another size into the encoder input.
    fn fit_to_encoder(
        &self,
        texture: B::Texture,
        content: LogicalSize,
    ) -> Result<(B::Texture, LogicalSize)> {
        if self.native_size == self.encoder_input
            || !matches!(self.output, ModeOutput::Video { .. })
        {
            return Ok((texture, content));
        }
        let fitted = self.capture.fit_frame(&texture, self.encoder_input)?;
        Ok((fitted, self.encoder_input))
    }

    fn blank_frame(&self) -> Result<(Frame<B::Texture>, bool)> {
        let texture = self.capture.blank_frame(self.encoder_input)?;
        Ok((
            Frame {
                texture,
                content_size: self.encoder_input,
            },
            false,
        ))
    }

    fn begin_recovery(&mut self, now: Duration, error: &RecorderError) -> Result<()> {
        log::warn!(
            "[{}] capture interrupted, restarting: {error}",
            self.ctx.session_id
        );
        if self.config.mode == RecorderMode::Snapshot {
            return Err(RecorderError::Other(format!(
                "capture interrupted before the snapshot: {error}"
            )));
        }

        self.capture.stop_capture();
        self.recovery = Some(Recovery {
            next_retry: now + RECOVERY_RETRY_INTERVAL,
        });
        Ok(())
    }

    fn retry_capture(&mut self, now: Duration) -> Result<()> {
        let Some(recovery) = self.recovery.as_mut() else {
            return Ok(());
        };
        if now < recovery.next_retry {
            return Ok(());
        }

        match self
            .capture
            .start_capture(&self.config.sources, &self.config.overlays)
        {
            Ok(()) => {
                self.recovery = None;
                let size = self.capture.native_size().unwrap_or(self.native_size);
                if size == self.native_size {
                    log::info!("[{}] capture restarted", self.ctx.session_id);
                    return Ok(());
                }

                log::info!(
                    "[{}] capture restarted at {size:?}, was {:?}",
                    self.ctx.session_id,
                    self.native_size
                );
                self.native_size = size;
                // The next frame resends its geometry to the encoder.
                self.encoder_content = LogicalSize::default();
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                log::debug!("[{}] capture restart failed: {e}", self.ctx.session_id);
                recovery.next_retry = now + RECOVERY_RETRY_INTERVAL;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close the displayed frame at `boundary` and show the next one.
    fn submit(&mut self, boundary: Duration, fresh: Option<Frame<B::Texture>>) -> Result<Flow> {
        let next = match fresh {
            Some(frame) => {
                self.cached = None;
                Some(frame)
            }
            None => self.cached.take(),
        };

        if matches!(self.output, ModeOutput::Video { .. }) {
            self.write_displayed(boundary)?;
            self.write_audio(boundary)?;

            let frame = match (next, self.displayed.take()) {
                (Some(frame), _) => {
                    self.apply_content_size(frame.content_size, boundary)?;
                    frame
                }
                (None, Some(repeat)) => repeat.frame,
                (None, None) => return Ok(Flow::Continue),
            };
            self.displayed = Some(Displayed {
                frame,
                start: boundary,
            });
            return Ok(Flow::Continue);
        }

        match &mut self.output {
            ModeOutput::Video { .. } => Ok(Flow::Continue),
            ModeOutput::Slideshow {
                dir,
                delays,
                last_save,
            } => {
                // Unchanged frames are not written again.
                let Some(frame) = next else {
                    return Ok(Flow::Continue);
                };

                let filename = image_output::slideshow_filename(delays.len(), self.config.image_format);
                let image = self.capture.read_image(&frame.texture)?;
                image_output::save_capture(&image, &dir.join(&filename), self.config.image_format)?;

                let delay_ms = last_save
                    .map(|last| boundary.saturating_sub(last).as_millis() as u64)
                    .unwrap_or(0);
                *last_save = Some(boundary);
                log::debug!("[{}] slideshow image {filename} after {delay_ms}ms", self.ctx.session_id);
                delays.push(FrameDelay { filename, delay_ms });

                self.displayed = Some(Displayed {
                    frame,
                    start: boundary,
                });
                Ok(Flow::Continue)
            }
            ModeOutput::Snapshot { result } => {
                let Some(frame) = next else {
                    return Ok(Flow::Continue);
                };

                let image = self.capture.read_image(&frame.texture)?;
                *result = Some(write_snapshot(&image, &self.config.output, self.config.image_format)?);
                Ok(Flow::Done)
            }
        }
    }

    fn write_displayed(&mut self, end: Duration) -> Result<()> {
        let (Some(displayed), ModeOutput::Video { sink }) = (&self.displayed, &mut self.output)
        else {
            return Ok(());
        };
        if end <= displayed.start {
            return Ok(());
        }

        let start = ticks(displayed.start);
        let duration = ticks(end) - start;
        sink.write_video(&displayed.frame.texture, start, duration)
            .map_err(|e| RecorderError::encoder(e, self.config.video.hardware_encoding))
    }

    /// Write the audio captured since the previous boundary.
    fn write_audio(&mut self, boundary: Duration) -> Result<()> {
        let (Some(audio), ModeOutput::Video { sink }) = (self.audio.as_mut(), &mut self.output)
        else {
            return Ok(());
        };

        let Some(previous) = audio.boundary.replace(boundary) else {
            audio.manager.clear();
            audio.position = ticks(boundary);
            return Ok(());
        };

        let captured = audio.manager.take()?;
        let interval = ticks(boundary.saturating_sub(previous));
        let Some(bytes) = audio.padder.fill(captured, interval) else {
            return Ok(());
        };

        let duration = audio.format.duration_of(bytes.len());
        if duration <= 0 {
            return Ok(());
        }
        sink.write_audio(&bytes, audio.position, duration)
            .map_err(|e| RecorderError::encoder(e, self.config.video.hardware_encoding))?;
        audio.position += duration;

        if let Some(sender) = &self.audio_level_sender
            && let Some(level) = AudioLevel::from_pcm(&pcm::bytes_to_i16(&bytes))
            && let Err(e) = sender.try_send(level)
        {
            log::debug!("try send audio level failed: {e}");
        }
        Ok(())
    }

    /// Crop the encoder input to the content of the sources once their size changed.
    fn apply_content_size(&mut self, content: LogicalSize, boundary: Duration) -> Result<()> {
        if content == self.encoder_content || content.is_empty() {
            return Ok(());
        }
        let ModeOutput::Video { sink } = &mut self.output else {
            return Ok(());
        };
        let hw = self.config.video.hardware_encoding;

        sink.place_marker().map_err(|e| RecorderError::encoder(e, hw))?;
        if !sink
            .wait_for_marker(self.pacing.interval())
            .map_err(|e| RecorderError::encoder(e, hw))?
        {
            log::debug!("[{}] encoder marker timed out", self.ctx.session_id);
        }

        let rect = Rectangle::new(
            0,
            0,
            content.width.min(self.encoder_input.width),
            content.height.min(self.encoder_input.height),
        );
        sink.set_source_rect(rect, self.encoder_input)
            .map_err(|e| RecorderError::encoder(e, hw))?;

        log::info!(
            "[{}] content size {:?} -> {content:?} at {boundary:?}",
            self.ctx.session_id,
            self.encoder_content
        );
        self.encoder_content = content;
        Ok(())
    }

    fn take_video_snapshot(&mut self, media: Duration) -> Result<()> {
        let Some(snapshots) = self.snapshots.as_mut() else {
            return Ok(());
        };
        let Some(displayed) = &self.displayed else {
            return Ok(());
        };
        if media < snapshots.next {
            return Ok(());
        }
        snapshots.next = media + snapshots.interval;

        let image = self.capture.read_image(&displayed.frame.texture)?;
        let path = image_output::snapshot_path(&snapshots.dir, media, snapshots.format);
        let format = snapshots.format;
        let events = self.events.clone();
        let session_id = self.ctx.session_id.clone();

        self.snapshot_threads.retain(|handle| !handle.is_finished());
        self.snapshot_threads.push(thread::spawn(move || {
            match image_output::save_capture(&image, &path, format) {
                Ok(()) => {
                    log::info!("[{session_id}] snapshot {}", path.display());
                    events.emit(RecorderEvent::SnapshotCreated { path });
                }
                Err(e) => log::warn!("[{session_id}] save snapshot {} failed: {e}", path.display()),
            }
        }));
        Ok(())
    }

    /// Stop every producer and join the helper threads.
    fn release(&mut self) {
        self.ctx.cancel.cancel();
        self.capture.stop_capture();
        if let Some(audio) = self.audio.as_mut() {
            audio.manager.stop();
        }

        if let Some(handle) = self.click_detector.take()
            && handle.join().is_err()
        {
            log::warn!("[{}] join click detection thread failed", self.ctx.session_id);
        }

        for handle in self.snapshot_threads.drain(..) {
            if handle.join().is_err() {
                log::warn!("[{}] join snapshot thread failed", self.ctx.session_id);
            }
        }
    }

    fn finish(mut self, end: Duration) -> Result<RecordingOutcome> {
        if let Err(e) = self.state.transition(RecorderState::Finalizing) {
            return Err(self.fail(e));
        }
        self.events.status(RecorderStatus::Finalizing);

        let outcome = match self.finalize_output(end) {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e)),
        };

        if let Err(e) = self.state.transition(RecorderState::Idle) {
            log::warn!("[{}] {e}", self.ctx.session_id);
        }
        self.events.status(RecorderStatus::Idle);
        self.events.emit(RecorderEvent::Completed {
            output: outcome.output.clone(),
            frame_delays: outcome.frame_delays.clone(),
        });
        log::info!("[{}] recording completed: {:?}", self.ctx.session_id, outcome.output);
        Ok(outcome)
    }

    fn finalize_output(&mut self, end: Duration) -> Result<RecordingOutcome> {
        if matches!(self.output, ModeOutput::Video { .. }) {
            // A cached frame never shown gets the rest of the timeline.
            if let Some(frame) = self.cached.take()
                && let Some(displayed) = self.displayed.as_ref()
                && end > displayed.start + self.pacing.interval()
            {
                let boundary = displayed.start + self.pacing.interval();
                self.write_displayed(boundary)?;
                self.displayed = Some(Displayed {
                    frame,
                    start: boundary,
                });
            }
            self.write_displayed(end)?;
            self.write_audio(end)?;
        }

        self.release();

        let hw = self.config.video.hardware_encoding;
        match &mut self.output {
            ModeOutput::Video { sink } => Ok(RecordingOutcome {
                output: sink
                    .finalize(FINALIZE_TIMEOUT)
                    .map_err(|e| RecorderError::encoder(e, hw))?,
                frame_delays: vec![],
            }),
            ModeOutput::Slideshow { dir, delays, .. } => Ok(RecordingOutcome {
                output: EncodedOutput::File(dir.clone()),
                frame_delays: std::mem::take(delays),
            }),
            ModeOutput::Snapshot { result } => result
                .take()
                .map(|output| RecordingOutcome {
                    output,
                    frame_delays: vec![],
                })
                .ok_or_else(|| RecorderError::Other("no frame was captured".to_string())),
        }
    }

    fn fail(mut self, error: RecorderError) -> RecorderError {
        log::error!("[{}] recording failed: {error}", self.ctx.session_id);
        if let Err(e) = self.state.transition(RecorderState::Failed) {
            log::warn!("[{}] {e}", self.ctx.session_id);
        }

        self.release();
        self.displayed = None;
        self.cached = None;

        if let Err(e) = self.state.transition(RecorderState::Idle) {
            log::warn!("[{}] {e}", self.ctx.session_id);
        }
        self.events.status(RecorderStatus::Idle);
        self.events.emit(RecorderEvent::Failed {
            message: error.to_string(),
            encoder_failure: error.is_encoder_failure(),
        });
        error
    }
}

fn write_snapshot(image: &Capture, target: &OutputTarget, format: ImageFormat) -> Result<EncodedOutput> {
    match target {
        OutputTarget::File(path) => {
            image_output::save_capture(image, path, format)?;
            Ok(EncodedOutput::File(path.clone()))
        }
        OutputTarget::Memory => Ok(EncodedOutput::Memory(image_output::encode_capture(
            image, format,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks() {
        assert_eq!(ticks(Duration::from_millis(100)), 1_000_000);
        assert_eq!(ticks(Duration::from_nanos(150)), 1);
        assert_eq!(ticks(Duration::ZERO), 0);
    }
}
