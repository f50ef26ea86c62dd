use crate::platform_error;
use screen_capture::{Capture, CaptureError, LogicalSize, Rectangle};
use windows::{
    Win32::{
        Foundation::RECT,
        Graphics::{
            Direct3D::{D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_11_0},
            Direct3D11::{
                D3D11_BIND_FLAG, D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_BOX,
                D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_RESOURCE_MISC_FLAG,
                D3D11_SDK_VERSION, D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING,
                D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Multithread,
                ID3D11RenderTargetView, ID3D11ShaderResourceView, ID3D11Texture2D,
            },
            Dxgi::{
                Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC},
                IDXGIAdapter, IDXGIDevice,
            },
        },
    },
    core::Interface,
};

/// A device and its immediate context.
#[derive(Clone)]
pub struct D3DDevice {
    pub device: ID3D11Device,
    pub context: ID3D11DeviceContext,
}

// SAFETY: the device is created with multithread protection enabled, so the
// immediate context serializes calls made from different threads.
unsafe impl Send for D3DDevice {}
unsafe impl Sync for D3DDevice {}

impl D3DDevice {
    /// Create a device on `adapter`, or on the default hardware adapter.
    pub fn new(adapter: Option<&IDXGIAdapter>) -> Result<Self, CaptureError> {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        let feature_levels = [D3D_FEATURE_LEVEL_11_0];

        unsafe {
            D3D11CreateDevice(
                adapter,
                if adapter.is_some() {
                    D3D_DRIVER_TYPE_UNKNOWN
                } else {
                    D3D_DRIVER_TYPE_HARDWARE
                },
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }
        .map_err(|e| platform_error(e, "D3D11CreateDevice failed"))?;

        let device = device
            .ok_or_else(|| CaptureError::Other("D3D11CreateDevice returned no device".to_string()))?;
        let context = context.ok_or_else(|| {
            CaptureError::Other("D3D11CreateDevice returned no device context".to_string())
        })?;

        if let Ok(multithread) = device.cast::<ID3D11Multithread>() {
            let _ = unsafe { multithread.SetMultithreadProtected(true) };
        } else {
            log::warn!("ID3D11Multithread is unavailable, device is not multithread protected");
        }

        Ok(Self { device, context })
    }

    pub fn adapter(&self) -> Result<IDXGIAdapter, CaptureError> {
        let dxgi_device: IDXGIDevice = self
            .device
            .cast()
            .map_err(|e| platform_error(e, "cast ID3D11Device to IDXGIDevice failed"))?;
        unsafe { dxgi_device.GetAdapter() }
            .map_err(|e| platform_error(e, "IDXGIDevice::GetAdapter failed"))
    }

    /// Locally unique id of the adapter the device runs on.
    pub fn adapter_luid(&self) -> Result<i64, CaptureError> {
        let desc = unsafe { self.adapter()?.GetDesc() }
            .map_err(|e| platform_error(e, "IDXGIAdapter::GetDesc failed"))?;
        Ok(luid_value(desc.AdapterLuid.HighPart, desc.AdapterLuid.LowPart))
    }

    pub fn create_texture(
        &self,
        size: LogicalSize,
        bind: D3D11_BIND_FLAG,
        misc: D3D11_RESOURCE_MISC_FLAG,
    ) -> Result<ID3D11Texture2D, CaptureError> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: size.width.max(1) as u32,
            Height: size.height.max(1) as u32,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: bind.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: misc.0 as u32,
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .map_err(|e| platform_error(e, format!("CreateTexture2D {size:?} failed")))?;
        texture.ok_or_else(|| CaptureError::Other("CreateTexture2D returned None".to_string()))
    }

    /// A texture the compositor can render into and sample from.
    pub fn create_render_texture(&self, size: LogicalSize) -> Result<ID3D11Texture2D, CaptureError> {
        self.create_texture(
            size,
            D3D11_BIND_RENDER_TARGET | D3D11_BIND_SHADER_RESOURCE,
            D3D11_RESOURCE_MISC_FLAG(0),
        )
    }

    /// An immutable shader resource initialized from tightly packed BGRA rows.
    pub fn upload_texture(
        &self,
        size: LogicalSize,
        bgra: &[u8],
    ) -> Result<ID3D11Texture2D, CaptureError> {
        let row_bytes = size.width as usize * 4;
        if size.is_empty() || bgra.len() < row_bytes * size.height as usize {
            return Err(CaptureError::Other(format!(
                "upload of {} bytes does not cover {size:?}",
                bgra.len()
            )));
        }

        let desc = D3D11_TEXTURE2D_DESC {
            Width: size.width as u32,
            Height: size.height as u32,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let data = D3D11_SUBRESOURCE_DATA {
            pSysMem: bgra.as_ptr() as *const _,
            SysMemPitch: row_bytes as u32,
            SysMemSlicePitch: 0,
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .CreateTexture2D(&desc, Some(&data), Some(&mut texture))
        }
        .map_err(|e| platform_error(e, format!("CreateTexture2D (upload {size:?}) failed")))?;
        texture.ok_or_else(|| CaptureError::Other("CreateTexture2D returned None".to_string()))
    }

    pub fn create_staging_texture(
        &self,
        size: LogicalSize,
    ) -> Result<ID3D11Texture2D, CaptureError> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: size.width.max(1) as u32,
            Height: size.height.max(1) as u32,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .map_err(|e| platform_error(e, "CreateTexture2D (staging) failed"))?;
        texture.ok_or_else(|| CaptureError::Other("CreateTexture2D returned None".to_string()))
    }

    pub fn create_render_target_view(
        &self,
        texture: &ID3D11Texture2D,
    ) -> Result<ID3D11RenderTargetView, CaptureError> {
        let mut rtv: Option<ID3D11RenderTargetView> = None;
        unsafe {
            self.device
                .CreateRenderTargetView(texture, None, Some(&mut rtv))
        }
        .map_err(|e| platform_error(e, "CreateRenderTargetView failed"))?;
        rtv.ok_or_else(|| CaptureError::Other("CreateRenderTargetView returned None".to_string()))
    }

    pub fn create_shader_resource_view(
        &self,
        texture: &ID3D11Texture2D,
    ) -> Result<ID3D11ShaderResourceView, CaptureError> {
        let mut srv: Option<ID3D11ShaderResourceView> = None;
        unsafe {
            self.device
                .CreateShaderResourceView(texture, None, Some(&mut srv))
        }
        .map_err(|e| platform_error(e, "CreateShaderResourceView failed"))?;
        srv.ok_or_else(|| CaptureError::Other("CreateShaderResourceView returned None".to_string()))
    }

    /// Read `rect` of `texture` back as tightly packed `0xAARRGGBB` pixels.
    pub fn read_pixels(
        &self,
        texture: &ID3D11Texture2D,
        rect: Rectangle,
    ) -> Result<Vec<u32>, CaptureError> {
        if rect.is_empty() {
            return Ok(vec![]);
        }

        let staging = self.create_staging_texture(rect.size())?;
        let source_box = to_box(rect);
        unsafe {
            self.context
                .CopySubresourceRegion(&staging, 0, 0, 0, 0, texture, 0, Some(&source_box));
        }

        let bytes = self.map_staging(&staging, rect.size())?;
        Ok(bytes
            .chunks_exact(4)
            .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]]))
            .collect())
    }

    /// Read the whole texture back as an RGBA image.
    pub fn read_capture(&self, texture: &ID3D11Texture2D) -> Result<Capture, CaptureError> {
        let size = texture_size(texture);
        let staging = self.create_staging_texture(size)?;
        unsafe { self.context.CopyResource(&staging, texture) };

        let bytes = self.map_staging(&staging, size)?;
        Capture::from_bgra(
            size.width as u32,
            size.height as u32,
            size.width as usize * 4,
            &bytes,
        )
        .ok_or_else(|| CaptureError::Other(format!("short readback of {size:?} texture")))
    }

    /// A render texture filled with opaque black.
    pub fn create_blank_texture(&self, size: LogicalSize) -> Result<ID3D11Texture2D, CaptureError> {
        let texture = self.create_render_texture(size)?;
        let target = self.create_render_target_view(&texture)?;
        unsafe {
            self.context
                .ClearRenderTargetView(&target, &[0.0, 0.0, 0.0, 1.0])
        };
        Ok(texture)
    }

    /// Map a staging texture and copy its rows into a tightly packed buffer.
    pub fn map_staging(
        &self,
        staging: &ID3D11Texture2D,
        size: LogicalSize,
    ) -> Result<Vec<u8>, CaptureError> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
        }
        .map_err(|e| platform_error(e, "Map staging texture failed"))?;

        let row_bytes = size.width as usize * 4;
        let pitch = mapped.RowPitch as usize;
        let mut bytes = Vec::with_capacity(row_bytes * size.height as usize);
        unsafe {
            let base = mapped.pData as *const u8;
            for row in 0..size.height as usize {
                let line = std::slice::from_raw_parts(base.add(row * pitch), row_bytes);
                bytes.extend_from_slice(line);
            }
            self.context.Unmap(staging, 0);
        }

        Ok(bytes)
    }
}

/// A frame texture handed from the capture side to the consumer.
#[derive(Clone, Debug)]
pub struct GpuTexture(pub ID3D11Texture2D);

// SAFETY: textures of a multithread protected device, see `D3DDevice`.
unsafe impl Send for GpuTexture {}
unsafe impl Sync for GpuTexture {}

impl GpuTexture {
    pub fn size(&self) -> LogicalSize {
        texture_size(&self.0)
    }
}

pub fn texture_size(texture: &ID3D11Texture2D) -> LogicalSize {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    LogicalSize::new(desc.Width as i32, desc.Height as i32)
}

pub fn to_box(rect: Rectangle) -> D3D11_BOX {
    D3D11_BOX {
        left: rect.x.max(0) as u32,
        top: rect.y.max(0) as u32,
        front: 0,
        right: rect.right().max(0) as u32,
        bottom: rect.bottom().max(0) as u32,
        back: 1,
    }
}

pub fn to_rect(rect: Rectangle) -> RECT {
    RECT {
        left: rect.x,
        top: rect.y,
        right: rect.right(),
        bottom: rect.bottom(),
    }
}

pub fn from_rect(rect: &RECT) -> Rectangle {
    Rectangle::from_ltrb(rect.left, rect.top, rect.right, rect.bottom)
}

pub fn luid_value(high: i32, low: u32) -> i64 {
    ((high as i64) << 32) | low as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luid_value() {
        assert_eq!(luid_value(0, 0x1234), 0x1234);
        assert_eq!(luid_value(1, 0xFFFF_FFFF), 0x1_FFFF_FFFF);
        assert_ne!(luid_value(1, 0), luid_value(0, 1));
    }

    #[test]
    fn test_rect_conversions() {
        let rect = Rectangle::new(-1920, 10, 1920, 1080);
        let raw = to_rect(rect);
        assert_eq!((raw.left, raw.top, raw.right, raw.bottom), (-1920, 10, 0, 1090));
        assert_eq!(from_rect(&raw), rect);

        let region = to_box(Rectangle::new(4, 8, 16, 32));
        assert_eq!((region.left, region.top, region.right, region.bottom), (4, 8, 20, 40));
        assert_eq!((region.front, region.back), (0, 1));
    }
}
