use crate::{
    d3d11::D3DDevice,
    shared_surface::{KeyedMutex, KeyedMutexGuard, SharedSurface},
};
use screen_capture::{CaptureError, LogicalSize};
use windows::Win32::Graphics::Direct3D11::{ID3D11RenderTargetView, ID3D11Texture2D};

/// A source thread's view of the shared surface.
pub struct SurfaceWriter {
    pub device: D3DDevice,
    pub texture: ID3D11Texture2D,
    pub target: ID3D11RenderTargetView,
    pub size: LogicalSize,
    mutex: KeyedMutex,
}

impl SurfaceWriter {
    pub fn open(surface: &SharedSurface, device: D3DDevice) -> Result<Self, CaptureError> {
        let texture = surface.open_on(&device)?;
        let target = device.create_render_target_view(&texture)?;
        let mutex = KeyedMutex::new(&texture)?;

        Ok(Self {
            device,
            texture,
            target,
            size: surface.size,
            mutex,
        })
    }

    pub fn lock(&self, timeout_ms: u32) -> Result<Option<KeyedMutexGuard>, CaptureError> {
        self.mutex.acquire(timeout_ms)
    }
}
