//! Windows Graphics Capture source for monitors and windows.

use crate::{
    cursor::{CursorSample, cursor_shape, sample_cursor},
    d3d11::{D3DDevice, texture_size, to_box},
    monitor::window_rect,
    platform_error,
    shared_surface::SharedSurface,
    surface_writer::SurfaceWriter,
};
use crossbeam::channel::{Receiver, RecvTimeoutError, bounded};
use screen_capture::{
    CaptureError, LogicalSize, PointerUpdate, Position, RecordingSource, Rectangle,
    SharedPointer, SourceWorker, WorkerUpdate,
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use windows::{
    Foundation::{EventRegistrationToken, TypedEventHandler},
    Graphics::{
        Capture::{Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession},
        DirectX::{Direct3D11::IDirect3DDevice, DirectXPixelFormat},
        SizeInt32,
    },
    Win32::{
        Foundation::HWND,
        Graphics::{
            Direct3D11::{ID3D11RenderTargetView, ID3D11Texture2D},
            Dxgi::IDXGIDevice,
            Gdi::HMONITOR,
        },
        System::WinRT::{
            Direct3D11::{CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess},
            Graphics::Capture::IGraphicsCaptureItemInterop,
        },
        UI::WindowsAndMessaging::IsIconic,
    },
    core::{IInspectable, Interface},
};

const FRAME_POOL_BUFFERS: i32 = 2;
const PIXEL_FORMAT: DirectXPixelFormat = DirectXPixelFormat::B8G8R8A8UIntNormalized;

#[derive(Clone, Copy)]
pub enum WgcTarget {
    Monitor { monitor: HMONITOR, rect: Rectangle },
    Window(HWND),
}

fn create_winrt_device(device: &D3DDevice) -> Result<IDirect3DDevice, CaptureError> {
    let dxgi_device: IDXGIDevice = device
        .device
        .cast()
        .map_err(|e| platform_error(e, "cast ID3D11Device to IDXGIDevice failed"))?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device) }
        .map_err(|e| platform_error(e, "CreateDirect3D11DeviceFromDXGIDevice failed"))?;
    inspectable
        .cast()
        .map_err(|e| platform_error(e, "cast IInspectable to IDirect3DDevice failed"))
}

fn create_capture_item(target: WgcTarget) -> Result<GraphicsCaptureItem, CaptureError> {
    let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
        .map_err(|e| platform_error(e, "IGraphicsCaptureItemInterop factory failed"))?;

    match target {
        WgcTarget::Monitor { monitor, .. } => unsafe { interop.CreateForMonitor(monitor) }
            .map_err(|e| platform_error(e, "CreateForMonitor failed")),
        WgcTarget::Window(hwnd) => unsafe { interop.CreateForWindow(hwnd) }
            .map_err(|e| platform_error(e, "CreateForWindow failed")),
    }
}

pub fn is_supported() -> bool {
    GraphicsCaptureSession::IsSupported().unwrap_or(false)
}

/// Solid black texture used to clear a source's part of the surface.
struct BlankTexture {
    texture: ID3D11Texture2D,
}

impl BlankTexture {
    fn new(device: &D3DDevice, size: LogicalSize) -> Result<Self, CaptureError> {
        let texture = device.create_render_texture(size)?;
        let target: ID3D11RenderTargetView = device.create_render_target_view(&texture)?;
        unsafe {
            device
                .context
                .ClearRenderTargetView(&target, &[0.0, 0.0, 0.0, 1.0])
        };
        Ok(Self { texture })
    }
}

pub struct WgcWorker {
    index: usize,
    writer: SurfaceWriter,
    winrt_device: IDirect3DDevice,
    item: GraphicsCaptureItem,
    frame_pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    arrived_token: EventRegistrationToken,
    closed_token: EventRegistrationToken,
    latest: Arc<Mutex<Option<Direct3D11CaptureFrame>>>,
    arrived: Receiver<()>,
    closed: Arc<AtomicBool>,
    pool_size: SizeInt32,
    target: WgcTarget,
    /// Recorded part of the content, in content coordinates.
    crop: Option<Rectangle>,
    destination: Rectangle,
    pointer: SharedPointer,
    capture_cursor: bool,
    cursor_handle: isize,
    cursor_hotspot: Position,
    last_cursor: Option<CursorSample>,
    blank: BlankTexture,
    last_content: LogicalSize,
    minimized: bool,
}

// SAFETY: created on and used by a single source thread. The frame arrival
// handler only touches the shared slot, the channel and the flag.
unsafe impl Send for WgcWorker {}

impl WgcWorker {
    pub fn new(
        index: usize,
        source: &RecordingSource,
        target: WgcTarget,
        destination: Rectangle,
        surface: &SharedSurface,
        compositing: &D3DDevice,
        pointer: SharedPointer,
    ) -> Result<Self, CaptureError> {
        if !is_supported() {
            return Err(CaptureError::Unsupported(
                "Windows Graphics Capture is not available".to_string(),
            ));
        }

        let device = D3DDevice::new(Some(&compositing.adapter()?))?;
        let writer = SurfaceWriter::open(surface, device)?;
        let blank = BlankTexture::new(&writer.device, destination.size())?;
        let winrt_device = create_winrt_device(&writer.device)?;
        let item = create_capture_item(target)?;
        let pool_size = item
            .Size()
            .map_err(|e| platform_error(e, "GraphicsCaptureItem::Size failed"))?;

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &winrt_device,
            PIXEL_FORMAT,
            FRAME_POOL_BUFFERS,
            pool_size,
        )
        .map_err(|e| platform_error(e, "Direct3D11CaptureFramePool::CreateFreeThreaded failed"))?;
        let session = frame_pool
            .CreateCaptureSession(&item)
            .map_err(|e| platform_error(e, "CreateCaptureSession failed"))?;

        // The pointer is drawn by the renderer, from the shared pointer state.
        let _ = session.SetIsCursorCaptureEnabled(false);
        let _ = session.SetIsBorderRequired(false);

        let latest = Arc::new(Mutex::new(None::<Direct3D11CaptureFrame>));
        let (sender, arrived) = bounded(1);
        let slot = latest.clone();
        let arrived_token = frame_pool
            .FrameArrived(&TypedEventHandler::<Direct3D11CaptureFramePool, IInspectable>::new(
                move |pool, _| {
                    if let Some(pool) = pool.as_ref() {
                        let mut newest: Option<Direct3D11CaptureFrame> = None;
                        while let Ok(frame) = pool.TryGetNextFrame() {
                            if let Some(previous) = newest.replace(frame) {
                                let _ = previous.Close();
                            }
                        }

                        if let Some(frame) = newest
                            && let Ok(mut slot) = slot.lock()
                        {
                            if let Some(previous) = slot.replace(frame) {
                                let _ = previous.Close();
                            }
                            let _ = sender.try_send(());
                        }
                    }
                    Ok(())
                },
            ))
            .map_err(|e| platform_error(e, "FrameArrived registration failed"))?;

        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();
        let closed_token = item
            .Closed(&TypedEventHandler::<GraphicsCaptureItem, IInspectable>::new(
                move |_, _| {
                    closed_flag.store(true, Ordering::Release);
                    Ok(())
                },
            ))
            .map_err(|e| platform_error(e, "GraphicsCaptureItem::Closed registration failed"))?;

        session
            .StartCapture()
            .map_err(|e| platform_error(e, "GraphicsCaptureSession::StartCapture failed"))?;

        log::info!(
            "capture source[{index}]: graphics capture started, item size {}x{}",
            pool_size.Width,
            pool_size.Height
        );

        Ok(Self {
            index,
            writer,
            winrt_device,
            item,
            frame_pool,
            session,
            arrived_token,
            closed_token,
            latest,
            arrived,
            closed,
            pool_size,
            target,
            crop: source.source_rect,
            destination,
            pointer: pointer.clone(),
            capture_cursor: source.capture_cursor,
            cursor_handle: 0,
            cursor_hotspot: Position::default(),
            last_cursor: None,
            blank,
            last_content: LogicalSize::default(),
            minimized: false,
        })
    }

    /// Desktop rectangle of the captured content.
    fn target_rect(&self) -> Result<Rectangle, CaptureError> {
        match self.target {
            WgcTarget::Monitor { rect, .. } => Ok(rect),
            WgcTarget::Window(hwnd) => window_rect(hwnd),
        }
    }

    fn visible_region(&self) -> Result<Rectangle, CaptureError> {
        let content = Rectangle::from_size(self.target_rect()?.size());
        Ok(self
            .crop
            .and_then(|c| content.intersect(&c))
            .unwrap_or(content))
    }

    fn update_pointer(&mut self) -> Result<bool, CaptureError> {
        let Some(sample) = sample_cursor() else {
            return Ok(false);
        };

        let mut state = self
            .pointer
            .lock()
            .map_err(|_| CaptureError::Other("pointer state lock poisoned".to_string()))?;
        let mut updated = false;

        if sample.visible && sample.handle != self.cursor_handle {
            match cursor_shape(sample.handle) {
                Ok((info, data)) => {
                    state.set_shape(info, &data)?;
                    self.cursor_handle = sample.handle;
                    self.cursor_hotspot = info.hotspot;
                    updated = true;
                }
                Err(e) => log::debug!("capture source[{}] read cursor shape failed: {e}", self.index),
            }
        }

        let moved = self.last_cursor.is_none_or(|last| {
            last.visible != sample.visible || last.screen_position != sample.screen_position
        });
        self.last_cursor = Some(sample);

        if moved {
            let target = self.target_rect()?;
            let visible = self.visible_region()?;
            let local = Position::new(
                sample.screen_position.x - target.x - visible.x,
                sample.screen_position.y - target.y - visible.y,
            );
            let inside = Rectangle::from_size(visible.size())
                .contains(&Rectangle::new(local.x, local.y, 1, 1));

            updated |= state.apply_update(PointerUpdate {
                source_index: self.index,
                timestamp: sample.timestamp,
                visible: sample.visible && inside,
                position: Position::new(
                    self.destination.x + local.x - self.cursor_hotspot.x,
                    self.destination.y + local.y - self.cursor_hotspot.y,
                ),
            });
        }

        Ok(updated)
    }

    fn clear_destination(&self) {
        unsafe {
            self.writer.device.context.CopySubresourceRegion(
                &self.writer.texture,
                0,
                self.destination.x as u32,
                self.destination.y as u32,
                0,
                &self.blank.texture,
                0,
                None,
            );
        }
    }

    /// Copy the visible part of `frame` into the destination, returns the
    /// copied size or `None` when the surface was busy.
    fn copy_frame(
        &mut self,
        frame: &Direct3D11CaptureFrame,
        timeout_ms: u32,
    ) -> Result<Option<LogicalSize>, CaptureError> {
        let size = frame
            .ContentSize()
            .map_err(|e| platform_error(e, "Direct3D11CaptureFrame::ContentSize failed"))?;

        if size.Width != self.pool_size.Width || size.Height != self.pool_size.Height {
            log::info!(
                "capture source[{}] content resized to {}x{}",
                self.index,
                size.Width,
                size.Height
            );
            self.frame_pool
                .Recreate(&self.winrt_device, PIXEL_FORMAT, FRAME_POOL_BUFFERS, size)
                .map_err(|e| platform_error(e, "Direct3D11CaptureFramePool::Recreate failed"))?;
            self.pool_size = size;
        }

        let surface = frame
            .Surface()
            .map_err(|e| platform_error(e, "Direct3D11CaptureFrame::Surface failed"))?;
        let access: IDirect3DDxgiInterfaceAccess = surface
            .cast()
            .map_err(|e| platform_error(e, "cast surface to IDirect3DDxgiInterfaceAccess failed"))?;
        let texture: ID3D11Texture2D = unsafe { access.GetInterface() }
            .map_err(|e| platform_error(e, "IDirect3DDxgiInterfaceAccess::GetInterface failed"))?;

        let texture_size = texture_size(&texture);
        let content = Rectangle::new(
            0,
            0,
            size.Width.min(texture_size.width),
            size.Height.min(texture_size.height),
        );
        let crop = self.crop.unwrap_or(content);
        let visible = content.intersect(&crop);

        let copy = visible.map(|v| {
            let dx = v.x - crop.x;
            let dy = v.y - crop.y;
            let width = v.width.min(self.destination.width - dx);
            let height = v.height.min(self.destination.height - dy);
            (Rectangle::new(v.x, v.y, width, height), dx, dy)
        });
        let copied = copy.map_or(LogicalSize::default(), |(r, dx, dy)| {
            LogicalSize::new(dx + r.width, dy + r.height)
        });

        let Some(_guard) = self.writer.lock(timeout_ms)? else {
            log::debug!("capture source[{}] shared surface busy", self.index);
            return Ok(None);
        };

        if copied != self.last_content {
            self.clear_destination();
            self.last_content = copied;
        }

        if let Some((region, dx, dy)) = copy
            && !region.is_empty()
        {
            unsafe {
                self.writer.device.context.CopySubresourceRegion(
                    &self.writer.texture,
                    0,
                    (self.destination.x + dx) as u32,
                    (self.destination.y + dy) as u32,
                    0,
                    &texture,
                    0,
                    Some(&to_box(region)),
                );
            }
        }

        Ok(Some(copied))
    }
}

impl SourceWorker for WgcWorker {
    fn capture(&mut self, timeout_ms: u32) -> Result<WorkerUpdate, CaptureError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CaptureError::AccessLost(format!(
                "capture source[{}] item closed",
                self.index
            )));
        }

        let pointer_updated = self.capture_cursor && self.update_pointer()?;
        let timeout = Duration::from_millis(timeout_ms as u64);

        if let WgcTarget::Window(hwnd) = self.target
            && unsafe { IsIconic(hwnd) }.as_bool()
        {
            let mut updated = pointer_updated;
            if !self.minimized
                && let Some(_guard) = self.writer.lock(timeout_ms)?
            {
                log::info!("capture source[{}] window minimized", self.index);
                self.clear_destination();
                self.last_content = LogicalSize::default();
                self.minimized = true;
                updated = true;
            }

            let _ = self.arrived.recv_timeout(timeout);
            return Ok(WorkerUpdate {
                updated,
                content_size: Some(self.destination.size()),
            });
        }
        self.minimized = false;

        match self.arrived.recv_timeout(timeout) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => {
                return Ok(WorkerUpdate {
                    updated: pointer_updated,
                    content_size: None,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CaptureError::AccessLost(
                    "frame arrival handler dropped".to_string(),
                ));
            }
        }

        let frame = self
            .latest
            .lock()
            .map_err(|_| CaptureError::Other("capture frame slot lock poisoned".to_string()))?
            .take();
        let Some(frame) = frame else {
            return Ok(WorkerUpdate {
                updated: pointer_updated,
                content_size: None,
            });
        };

        let copied = self.copy_frame(&frame, timeout_ms);
        let _ = frame.Close();

        Ok(match copied? {
            Some(size) => WorkerUpdate {
                updated: true,
                content_size: Some(size),
            },
            None => WorkerUpdate {
                updated: pointer_updated,
                content_size: None,
            },
        })
    }
}

impl Drop for WgcWorker {
    fn drop(&mut self) {
        let _ = self.frame_pool.RemoveFrameArrived(self.arrived_token);
        let _ = self.item.RemoveClosed(self.closed_token);
        let _ = self.session.Close();
        let _ = self.frame_pool.Close();
        if let Ok(mut slot) = self.latest.lock()
            && let Some(frame) = slot.take()
        {
            let _ = frame.Close();
        }
        log::info!("capture source[{}] graphics capture closed", self.index);
    }
}
