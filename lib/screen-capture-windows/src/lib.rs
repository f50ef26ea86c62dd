//! Windows capture backend: DXGI desktop duplication and Windows Graphics
//! Capture sources composited into a keyed-mutex shared surface, plus the
//! pointer and click renderer.

#[cfg(target_os = "windows")]
mod backend;
#[cfg(target_os = "windows")]
mod click;
#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
mod cursor;
#[cfg(target_os = "windows")]
mod d3d11;
#[cfg(target_os = "windows")]
mod desktop;
#[cfg(target_os = "windows")]
mod duplication;
#[cfg(target_os = "windows")]
mod monitor;
#[cfg(target_os = "windows")]
mod pointer_renderer;
#[cfg(target_os = "windows")]
mod shader;
#[cfg(target_os = "windows")]
mod shared_surface;
#[cfg(target_os = "windows")]
mod surface_writer;
#[cfg(target_os = "windows")]
mod wgc;

#[cfg(target_os = "windows")]
pub use {
    backend::{ThreadAttachment, WindowsCompositionBackend, WindowsWorker},
    click::spawn_click_detector,
    com::CoInitGuard,
    d3d11::{D3DDevice, GpuTexture, texture_size},
    duplication::{DuplicationFrame, DuplicationManager},
    monitor::{ResolvedOutput, enumerate_outputs, resolve_output, screen_infos},
    pointer_renderer::PointerRenderer,
    wgc::is_supported as graphics_capture_supported,
};

/// Wrap a platform error with its call site, keeping the HRESULT class.
#[cfg(target_os = "windows")]
pub(crate) fn platform_error(
    e: windows::core::Error,
    context: impl std::fmt::Display,
) -> screen_capture::CaptureError {
    screen_capture::CaptureError::from_hresult(e.code().0, format!("{context}: {e}"))
}
