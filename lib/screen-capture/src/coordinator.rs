use crate::{
    AcquireOutcome, CaptureError, CaptureSession, CapturedFrame, LogicalSize, OverlaySource,
    PointerState, RecordingSource, Rectangle, SourceLayout, layout_sources,
};
use crossbeam::channel::{Receiver, Sender, bounded};
use spin_sleep::SpinSleeper;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub type SharedPointer = Arc<Mutex<PointerState>>;

const WORKER_TIMEOUT_MS: u32 = 100;
const FAULT_CHANNEL_SIZE: usize = 16;

/// Result of one acquisition attempt by a source worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerUpdate {
    /// The shared surface or the pointer changed.
    pub updated: bool,
    /// Size of the content currently drawn inside the source's destination.
    pub content_size: Option<LogicalSize>,
}

/// Per-source acquisition loop body, created and run on the source's own thread.
pub trait SourceWorker {
    fn capture(&mut self, timeout_ms: u32) -> Result<WorkerUpdate, CaptureError>;
}

/// Platform side of the coordinator: shared surface, workers and overlays.
pub trait CompositionBackend: Send + Sync + 'static {
    type Texture: Clone + Send + 'static;
    type ThreadGuard;
    type Worker: SourceWorker;

    /// Desktop rectangle of a source before layout.
    fn native_rect(&self, source: &RecordingSource) -> Result<Rectangle, CaptureError>;

    /// Allocate the shared surface and its exclusive-access token.
    fn create_surface(&self, layout: &SourceLayout) -> Result<(), CaptureError>;

    /// Thread setup that must precede worker creation.
    fn attach_thread(&self) -> Result<Self::ThreadGuard, CaptureError>;

    fn create_worker(
        &self,
        index: usize,
        source: &RecordingSource,
        destination: Rectangle,
        pointer: SharedPointer,
    ) -> Result<Self::Worker, CaptureError>;

    /// Copy the shared surface into a consumer-owned texture while holding the
    /// access token. `None` when the token could not be taken in time.
    fn copy_surface(&self, timeout_ms: u32) -> Result<Option<Self::Texture>, CaptureError>;

    /// Prepare overlays, returns whether any will be drawn.
    fn set_overlays(&self, overlays: &[OverlaySource]) -> Result<bool, CaptureError>;

    fn draw_overlays(&self, frame: &Self::Texture) -> Result<(), CaptureError>;

    /// Wake workers blocked inside platform waits.
    fn signal_stop(&self) {}

    fn release_surface(&self);
}

#[derive(Debug)]
pub struct SourceFault {
    pub index: usize,
    pub error: CaptureError,
}

#[derive(Debug, Default)]
struct SourceStatus {
    has_frame: AtomicBool,
    last_update: AtomicI64,
    update_count: AtomicU32,
    content_width: AtomicI32,
    content_height: AtomicI32,
}

impl SourceStatus {
    fn mark_updated(&self, stamp: i64) {
        self.last_update.fetch_max(stamp, Ordering::AcqRel);
        self.update_count.fetch_add(1, Ordering::AcqRel);
        self.has_frame.store(true, Ordering::Release);
    }

    fn set_content(&self, size: LogicalSize) {
        self.content_width.store(size.width, Ordering::Release);
        self.content_height.store(size.height, Ordering::Release);
    }

    fn content(&self) -> LogicalSize {
        LogicalSize::new(
            self.content_width.load(Ordering::Acquire),
            self.content_height.load(Ordering::Acquire),
        )
    }
}

/// Runs one capture thread per source and hands composited frames to the consumer.
pub struct CaptureCoordinator<B: CompositionBackend> {
    backend: Arc<B>,
    pointer: SharedPointer,
    epoch: Instant,
    stop_sig: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    statuses: Vec<Arc<SourceStatus>>,
    fault_receiver: Option<Receiver<SourceFault>>,
    layout: Option<SourceLayout>,
    last_consumed: i64,
    overlays_pending: bool,
}

impl<B: CompositionBackend> CaptureCoordinator<B> {
    pub fn new(backend: B, pointer: SharedPointer) -> Self {
        Self {
            backend: Arc::new(backend),
            pointer,
            epoch: Instant::now(),
            stop_sig: Arc::new(AtomicBool::new(false)),
            workers: vec![],
            statuses: vec![],
            fault_receiver: None,
            layout: None,
            last_consumed: 0,
            overlays_pending: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn pointer(&self) -> SharedPointer {
        self.pointer.clone()
    }

    pub fn layout(&self) -> Option<&SourceLayout> {
        self.layout.as_ref()
    }

    fn all_sources_started(&self) -> bool {
        !self.statuses.is_empty()
            && self
                .statuses
                .iter()
                .all(|s| s.has_frame.load(Ordering::Acquire))
    }

    fn newest_update(&self) -> i64 {
        self.statuses
            .iter()
            .map(|s| s.last_update.load(Ordering::Acquire))
            .max()
            .unwrap_or(0)
    }

    fn content_size(&self, layout: &SourceLayout) -> LogicalSize {
        let (width, height) = layout
            .destinations
            .iter()
            .zip(&self.statuses)
            .map(|(dest, status)| {
                let content = status.content();
                (dest.x + content.width, dest.y + content.height)
            })
            .fold((0, 0), |(w, h), (x, y)| (w.max(x), h.max(y)));
        LogicalSize::new(width, height)
    }

    fn spawn_worker(
        &mut self,
        index: usize,
        source: RecordingSource,
        destination: Rectangle,
        fault_sender: Sender<SourceFault>,
    ) {
        let backend = self.backend.clone();
        let pointer = self.pointer.clone();
        let stop_sig = self.stop_sig.clone();
        let epoch = self.epoch;
        let status = Arc::new(SourceStatus::default());
        status.set_content(destination.size());
        self.statuses.push(status.clone());

        let handle = thread::spawn(move || {
            let report = |error: CaptureError| {
                log::warn!("capture source[{index}] failed: {error}");
                if let Err(e) = fault_sender.try_send(SourceFault { index, error }) {
                    log::warn!("try send capture source[{index}] fault failed: {e}");
                }
            };

            let _guard = match backend.attach_thread() {
                Ok(guard) => guard,
                Err(e) => return report(e),
            };

            let mut worker = match backend.create_worker(index, &source, destination, pointer) {
                Ok(worker) => worker,
                Err(e) => return report(e),
            };

            log::info!("capture source[{index}] thread started: {:?}", source.kind);

            while !stop_sig.load(Ordering::Relaxed) {
                match worker.capture(WORKER_TIMEOUT_MS) {
                    Ok(update) => {
                        if let Some(size) = update.content_size {
                            status.set_content(size);
                        }
                        if update.updated {
                            status.mark_updated(epoch.elapsed().as_nanos() as i64 / 100 + 1);
                        }
                    }
                    Err(CaptureError::Timeout) => {}
                    Err(e) => {
                        report(e);
                        break;
                    }
                }
            }

            log::info!("capture source[{index}] thread exit");
        });

        self.workers.push(handle);
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }
}

impl<B: CompositionBackend> CaptureSession for CaptureCoordinator<B> {
    type Texture = B::Texture;

    fn start_capture(
        &mut self,
        sources: &[RecordingSource],
        overlays: &[OverlaySource],
    ) -> Result<(), CaptureError> {
        if self.is_running() {
            self.stop_capture();
        }

        let native_rects = sources
            .iter()
            .map(|s| self.backend.native_rect(s))
            .collect::<Result<Vec<_>, _>>()?;
        let layout = layout_sources(sources, &native_rects)?;
        log::info!(
            "capture layout: surface {:?}, destinations {:?}",
            layout.surface_size(),
            layout.destinations
        );

        self.backend.create_surface(&layout)?;
        self.overlays_pending = self.backend.set_overlays(overlays)?;

        self.stop_sig.store(false, Ordering::Relaxed);
        self.last_consumed = 0;
        self.statuses.clear();

        let (fault_sender, fault_receiver) = bounded(FAULT_CHANNEL_SIZE);
        for (index, (source, destination)) in sources.iter().zip(&layout.destinations).enumerate()
        {
            self.spawn_worker(index, source.clone(), *destination, fault_sender.clone());
        }

        self.fault_receiver = Some(fault_receiver);
        self.layout = Some(layout);
        Ok(())
    }

    fn acquire_next_frame(
        &mut self,
        timeout_ms: u32,
    ) -> Result<AcquireOutcome<Self::Texture>, CaptureError> {
        let Some(layout) = self.layout.clone() else {
            return Err(CaptureError::Other("capture not started".to_string()));
        };

        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let sleeper = SpinSleeper::default();

        loop {
            if let Some(fault) = self.fault_receiver.as_ref().and_then(|r| r.try_recv().ok()) {
                log::warn!("capture source[{}] fault: {}", fault.index, fault.error);
                return Err(fault.error);
            }

            let newest = self.newest_update();
            let has_new_data = newest > self.last_consumed || self.overlays_pending;

            if has_new_data
                && self.all_sources_started()
                && let Some(texture) = self.backend.copy_surface(timeout_ms)?
            {
                self.backend.draw_overlays(&texture)?;
                self.last_consumed = newest;
                self.overlays_pending = false;

                let update_count: u32 = self
                    .statuses
                    .iter()
                    .map(|s| s.update_count.swap(0, Ordering::AcqRel))
                    .sum();
                let pointer = self
                    .pointer
                    .lock()
                    .map_err(|_| CaptureError::Other("pointer state lock poisoned".to_string()))?
                    .snapshot();

                return Ok(AcquireOutcome::Frame(CapturedFrame {
                    texture,
                    update_count,
                    content_size: self.content_size(&layout),
                    pointer,
                }));
            }

            if Instant::now() >= deadline {
                return Ok(AcquireOutcome::Timeout);
            }

            sleeper.sleep(Duration::from_millis(1));
        }
    }

    fn stop_capture(&mut self) {
        self.stop_sig.store(true, Ordering::Relaxed);
        self.backend.signal_stop();

        for (index, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                log::warn!("join capture source[{index}] thread failed");
            }
        }

        self.fault_receiver = None;
        if self.layout.take().is_some() {
            self.backend.release_surface();
        }
    }

    fn native_size(&self) -> Option<LogicalSize> {
        self.layout.as_ref().map(|l| l.surface_size())
    }
}

impl<B: CompositionBackend> Drop for CaptureCoordinator<B> {
    fn drop(&mut self) {
        self.stop_capture();
    }
}
