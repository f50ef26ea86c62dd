use crate::{d3d11::D3DDevice, platform_error};
use screen_capture::{CaptureError, LogicalSize};
use windows::{
    Win32::{
        Foundation::{HANDLE, WAIT_ABANDONED, WAIT_TIMEOUT},
        Graphics::{
            Direct3D11::{
                D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE,
                D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX, ID3D11Texture2D,
            },
            Dxgi::{IDXGIKeyedMutex, IDXGIResource},
        },
    },
    core::Interface,
};

/// Key every acquire and release of the shared surface uses.
const SURFACE_KEY: u64 = 0;

/// The composited desktop surface, allocated once per capture session on
/// the compositing device and opened by every source thread.
pub struct SharedSurface {
    pub texture: ID3D11Texture2D,
    pub handle: HANDLE,
    pub size: LogicalSize,
}

// SAFETY: the raw handle is a process-wide identifier that is only passed to
// `OpenSharedResource`. The texture belongs to a multithread protected device.
unsafe impl Send for SharedSurface {}
unsafe impl Sync for SharedSurface {}

impl SharedSurface {
    pub fn new(device: &D3DDevice, size: LogicalSize) -> Result<Self, CaptureError> {
        let texture = device.create_texture(
            size,
            D3D11_BIND_RENDER_TARGET | D3D11_BIND_SHADER_RESOURCE,
            D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX,
        )?;

        let resource: IDXGIResource = texture
            .cast()
            .map_err(|e| platform_error(e, "cast shared surface to IDXGIResource failed"))?;
        let handle = unsafe { resource.GetSharedHandle() }
            .map_err(|e| platform_error(e, "IDXGIResource::GetSharedHandle failed"))?;

        log::info!("shared surface created: {size:?}");
        Ok(Self {
            texture,
            handle,
            size,
        })
    }

    /// Open the surface on another device of the same adapter.
    pub fn open_on(&self, device: &D3DDevice) -> Result<ID3D11Texture2D, CaptureError> {
        unsafe { device.device.OpenSharedResource::<ID3D11Texture2D>(self.handle) }
            .map_err(|e| platform_error(e, "OpenSharedResource failed"))
    }
}

/// Exclusive-access token of one opened view of the shared surface.
pub struct KeyedMutex {
    mutex: IDXGIKeyedMutex,
}

impl KeyedMutex {
    pub fn new(texture: &ID3D11Texture2D) -> Result<Self, CaptureError> {
        let mutex = texture
            .cast()
            .map_err(|e| platform_error(e, "cast shared surface to IDXGIKeyedMutex failed"))?;
        Ok(Self { mutex })
    }

    /// `None` when the token was not handed over within `timeout_ms`.
    pub fn acquire(&self, timeout_ms: u32) -> Result<Option<KeyedMutexGuard>, CaptureError> {
        // Timeouts come back as a success code, which the generated wrapper
        // would fold into `Ok`, so the raw result is inspected.
        let hr = unsafe {
            (Interface::vtable(&self.mutex).AcquireSync)(
                Interface::as_raw(&self.mutex),
                SURFACE_KEY,
                timeout_ms,
            )
        };

        if hr.0 == WAIT_TIMEOUT.0 as i32 {
            return Ok(None);
        }

        if hr.0 == WAIT_ABANDONED.0 as i32 {
            return Err(CaptureError::AccessDenied(
                "shared surface keyed mutex abandoned".to_string(),
            ));
        }

        hr.ok()
            .map_err(|e| platform_error(e, "IDXGIKeyedMutex::AcquireSync failed"))?;
        Ok(Some(KeyedMutexGuard {
            mutex: self.mutex.clone(),
        }))
    }
}

/// Releases the token with the same key when dropped.
pub struct KeyedMutexGuard {
    mutex: IDXGIKeyedMutex,
}

impl Drop for KeyedMutexGuard {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.mutex.ReleaseSync(SURFACE_KEY) } {
            log::warn!("IDXGIKeyedMutex::ReleaseSync failed: {e}");
        }
    }
}
