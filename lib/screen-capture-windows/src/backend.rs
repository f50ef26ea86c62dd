//! The Windows side of the capture coordinator.

use crate::{
    com::CoInitGuard,
    d3d11::{D3DDevice, GpuTexture},
    desktop::InputDesktopGuard,
    duplication::DuplicationWorker,
    monitor::{resolve_output, window_handle, window_rect},
    pointer_renderer::PointerRenderer,
    shared_surface::{KeyedMutex, SharedSurface},
    wgc::{WgcTarget, WgcWorker},
};
use screen_capture::{
    CaptureApi, CaptureError, CompositionBackend, LogicalSize, OverlayKind, OverlaySource,
    RecordingSource, Rectangle, SharedPointer, SourceKind, SourceLayout, SourceWorker,
    WorkerUpdate,
};
use std::sync::{Mutex, MutexGuard};
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;

/// Per source thread setup, undone in reverse order on drop.
pub struct ThreadAttachment {
    _desktop: Option<InputDesktopGuard>,
    _com: CoInitGuard,
}

pub enum WindowsWorker {
    Duplication(DuplicationWorker),
    Wgc(WgcWorker),
}

impl SourceWorker for WindowsWorker {
    fn capture(&mut self, timeout_ms: u32) -> Result<WorkerUpdate, CaptureError> {
        match self {
            Self::Duplication(worker) => worker.capture(timeout_ms),
            Self::Wgc(worker) => worker.capture(timeout_ms),
        }
    }
}

struct SurfaceState {
    shared: SharedSurface,
    mutex: KeyedMutex,
}

struct OverlayImage {
    texture: ID3D11Texture2D,
    size: LogicalSize,
    overlay: OverlaySource,
}

// SAFETY: both only hold COM objects of the multithread protected
// compositing device and are reached through a `Mutex`.
unsafe impl Send for SurfaceState {}
unsafe impl Send for OverlayImage {}

pub struct WindowsCompositionBackend {
    renderer: PointerRenderer,
    surface: Mutex<Option<SurfaceState>>,
    overlays: Mutex<Vec<OverlayImage>>,
}

impl WindowsCompositionBackend {
    pub fn new() -> Result<Self, CaptureError> {
        let device = D3DDevice::new(None)?;
        Ok(Self {
            renderer: PointerRenderer::new(device)?,
            surface: Mutex::new(None),
            overlays: Mutex::new(vec![]),
        })
    }

    pub fn device(&self) -> &D3DDevice {
        self.renderer.device()
    }

    /// Renderer on the compositing device, for drawing onto acquired frames.
    pub fn renderer(&self) -> &PointerRenderer {
        &self.renderer
    }

    fn surface(&self) -> Result<MutexGuard<'_, Option<SurfaceState>>, CaptureError> {
        self.surface
            .lock()
            .map_err(|_| CaptureError::Other("shared surface lock poisoned".to_string()))
    }
}

fn load_overlay(device: &D3DDevice, overlay: &OverlaySource) -> Result<OverlayImage, CaptureError> {
    let OverlayKind::Image { path } = &overlay.kind;
    let image = image::open(path)
        .map_err(|e| CaptureError::InvalidSource(format!("open overlay {}: {e}", path.display())))?
        .to_rgba8();

    let size = LogicalSize::new(image.width() as i32, image.height() as i32);
    let bgra = image
        .pixels()
        .flat_map(|p| [p[2], p[1], p[0], p[3]])
        .collect::<Vec<u8>>();

    Ok(OverlayImage {
        texture: device.upload_texture(size, &bgra)?,
        size,
        overlay: overlay.clone(),
    })
}

impl CompositionBackend for WindowsCompositionBackend {
    type Texture = GpuTexture;
    type ThreadGuard = ThreadAttachment;
    type Worker = WindowsWorker;

    fn native_rect(&self, source: &RecordingSource) -> Result<Rectangle, CaptureError> {
        match &source.kind {
            SourceKind::Display { device_name } => Ok(resolve_output(device_name)?.info.rect),
            SourceKind::Window { handle } => window_rect(window_handle(*handle)?),
        }
    }

    fn create_surface(&self, layout: &SourceLayout) -> Result<(), CaptureError> {
        let shared = SharedSurface::new(self.device(), layout.surface_size())?;
        let mutex = KeyedMutex::new(&shared.texture)?;
        *self.surface()? = Some(SurfaceState { shared, mutex });
        Ok(())
    }

    fn attach_thread(&self) -> Result<ThreadAttachment, CaptureError> {
        let com = CoInitGuard::init_multithreaded()?;
        let desktop = match InputDesktopGuard::attach() {
            Ok(guard) => Some(guard),
            Err(e) => {
                log::debug!("attach input desktop failed: {e}");
                None
            }
        };

        Ok(ThreadAttachment {
            _desktop: desktop,
            _com: com,
        })
    }

    fn create_worker(
        &self,
        index: usize,
        source: &RecordingSource,
        destination: Rectangle,
        pointer: SharedPointer,
    ) -> Result<WindowsWorker, CaptureError> {
        let surface = self.surface()?;
        let Some(state) = surface.as_ref() else {
            return Err(CaptureError::Other("shared surface not created".to_string()));
        };
        let shared = &state.shared;
        let device = self.device();

        match (&source.kind, source.api) {
            (SourceKind::Display { device_name }, CaptureApi::DesktopDuplication) => {
                let output = resolve_output(device_name)?;
                Ok(WindowsWorker::Duplication(DuplicationWorker::new(
                    index,
                    source,
                    &output,
                    destination,
                    shared,
                    device,
                    pointer,
                )?))
            }
            (SourceKind::Display { device_name }, CaptureApi::WindowsGraphicsCapture) => {
                let output = resolve_output(device_name)?;
                let target = WgcTarget::Monitor {
                    monitor: output.monitor,
                    rect: output.info.rect,
                };
                Ok(WindowsWorker::Wgc(WgcWorker::new(
                    index,
                    source,
                    target,
                    destination,
                    shared,
                    device,
                    pointer,
                )?))
            }
            (SourceKind::Window { handle }, api) => {
                if api == CaptureApi::DesktopDuplication {
                    log::debug!("capture source[{index}]: windows are captured with graphics capture");
                }
                let target = WgcTarget::Window(window_handle(*handle)?);
                Ok(WindowsWorker::Wgc(WgcWorker::new(
                    index,
                    source,
                    target,
                    destination,
                    shared,
                    device,
                    pointer,
                )?))
            }
        }
    }

    fn copy_surface(&self, timeout_ms: u32) -> Result<Option<GpuTexture>, CaptureError> {
        let surface = self.surface()?;
        let Some(state) = surface.as_ref() else {
            return Err(CaptureError::Other("shared surface not created".to_string()));
        };

        let Some(_guard) = state.mutex.acquire(timeout_ms)? else {
            return Ok(None);
        };

        let device = self.device();
        let copy = device.create_render_texture(state.shared.size)?;
        unsafe { device.context.CopyResource(&copy, &state.shared.texture) };
        Ok(Some(GpuTexture(copy)))
    }

    fn set_overlays(&self, overlays: &[OverlaySource]) -> Result<bool, CaptureError> {
        let images = overlays
            .iter()
            .map(|o| load_overlay(self.device(), o))
            .collect::<Result<Vec<_>, _>>()?;
        let any = !images.is_empty();

        *self
            .overlays
            .lock()
            .map_err(|_| CaptureError::Other("overlay lock poisoned".to_string()))? = images;
        Ok(any)
    }

    fn draw_overlays(&self, frame: &GpuTexture) -> Result<(), CaptureError> {
        let overlays = self
            .overlays
            .lock()
            .map_err(|_| CaptureError::Other("overlay lock poisoned".to_string()))?;
        let frame_size = frame.size();

        for image in overlays.iter() {
            let dest = image.overlay.placement(image.size, frame_size);
            self.renderer.draw_image(&frame.0, &image.texture, dest)?;
        }
        Ok(())
    }

    fn release_surface(&self) {
        match self.surface.lock() {
            Ok(mut surface) => {
                if surface.take().is_some() {
                    log::info!("shared surface released");
                }
            }
            Err(_) => log::warn!("release shared surface: lock poisoned"),
        }
    }
}
