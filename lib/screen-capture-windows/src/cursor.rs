//! Pointer shape and position read from the window manager, for sources
//! whose frames carry no pointer channel.

use screen_capture::{CaptureError, PointerShapeInfo, PointerShapeType, Position};
use std::{ffi::c_void, mem};
use windows::Win32::{
    Graphics::Gdi::{
        BI_RGB, BITMAP, BITMAPINFO, BITMAPINFOHEADER, DIB_RGB_COLORS, DeleteObject, GetDC,
        GetDIBits, GetObjectW, HBITMAP, HDC, RGBQUAD, ReleaseDC,
    },
    System::Performance::QueryPerformanceCounter,
    UI::WindowsAndMessaging::{
        CURSOR_SHOWING, CURSORINFO, GetCursorInfo, GetIconInfo, HCURSOR, ICONINFO,
    },
};

#[derive(Debug, Clone, Copy)]
pub struct CursorSample {
    pub visible: bool,
    /// Hot-spot position in desktop coordinates.
    pub screen_position: Position,
    pub handle: isize,
    pub timestamp: i64,
}

pub fn sample_cursor() -> Option<CursorSample> {
    let mut info = CURSORINFO {
        cbSize: mem::size_of::<CURSORINFO>() as u32,
        ..Default::default()
    };

    if unsafe { GetCursorInfo(&mut info) }.is_err() {
        return None;
    }

    let mut timestamp = 0i64;
    if unsafe { QueryPerformanceCounter(&mut timestamp) }.is_err() {
        return None;
    }

    Some(CursorSample {
        visible: info.flags.0 & CURSOR_SHOWING.0 != 0,
        screen_position: Position::new(info.ptScreenPos.x, info.ptScreenPos.y),
        handle: info.hCursor.0 as isize,
        timestamp,
    })
}

/// BITMAPINFO with room for the two palette entries of a 1-bit DIB.
#[repr(C)]
struct MonochromeBitmapInfo {
    header: BITMAPINFOHEADER,
    colors: [RGBQUAD; 2],
}

struct ScreenDc(HDC);

impl ScreenDc {
    fn new() -> Result<Self, CaptureError> {
        let hdc = unsafe { GetDC(None) };
        if hdc.is_invalid() {
            return Err(CaptureError::Other("GetDC failed".to_string()));
        }
        Ok(Self(hdc))
    }
}

impl Drop for ScreenDc {
    fn drop(&mut self) {
        unsafe { ReleaseDC(None, self.0) };
    }
}

struct IconBitmaps(ICONINFO);

impl Drop for IconBitmaps {
    fn drop(&mut self) {
        unsafe {
            if !self.0.hbmMask.is_invalid() {
                let _ = DeleteObject(self.0.hbmMask.into());
            }
            if !self.0.hbmColor.is_invalid() {
                let _ = DeleteObject(self.0.hbmColor.into());
            }
        }
    }
}

fn bitmap_size(bitmap: HBITMAP) -> Result<(u32, u32), CaptureError> {
    let mut desc = BITMAP::default();
    let written = unsafe {
        GetObjectW(
            bitmap.into(),
            mem::size_of::<BITMAP>() as i32,
            Some(&mut desc as *mut BITMAP as *mut c_void),
        )
    };
    if written == 0 {
        return Err(CaptureError::Other("GetObjectW on cursor bitmap failed".to_string()));
    }
    Ok((desc.bmWidth.max(0) as u32, desc.bmHeight.max(0) as u32))
}

fn bitmap_header(width: u32, height: u32, bit_count: u16) -> BITMAPINFOHEADER {
    BITMAPINFOHEADER {
        biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
        biWidth: width as i32,
        // top-down rows
        biHeight: -(height as i32),
        biPlanes: 1,
        biBitCount: bit_count,
        biCompression: BI_RGB.0,
        ..Default::default()
    }
}

fn read_bitmap_32(
    dc: &ScreenDc,
    bitmap: HBITMAP,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CaptureError> {
    let mut info = BITMAPINFO {
        bmiHeader: bitmap_header(width, height, 32),
        ..Default::default()
    };
    let mut pixels = vec![0u8; (width * height * 4) as usize];
    let lines = unsafe {
        GetDIBits(
            dc.0,
            bitmap,
            0,
            height,
            Some(pixels.as_mut_ptr() as *mut c_void),
            &mut info,
            DIB_RGB_COLORS,
        )
    };
    if lines == 0 {
        return Err(CaptureError::Other("GetDIBits (32 bpp) failed".to_string()));
    }
    Ok(pixels)
}

fn read_bitmap_1(
    dc: &ScreenDc,
    bitmap: HBITMAP,
    width: u32,
    height: u32,
) -> Result<(Vec<u8>, u32), CaptureError> {
    let pitch = width.div_ceil(32) * 4;
    let mut info = MonochromeBitmapInfo {
        header: bitmap_header(width, height, 1),
        colors: [RGBQUAD::default(); 2],
    };
    let mut bits = vec![0u8; (pitch * height) as usize];
    let lines = unsafe {
        GetDIBits(
            dc.0,
            bitmap,
            0,
            height,
            Some(bits.as_mut_ptr() as *mut c_void),
            &mut info as *mut MonochromeBitmapInfo as *mut BITMAPINFO,
            DIB_RGB_COLORS,
        )
    };
    if lines == 0 {
        return Err(CaptureError::Other("GetDIBits (1 bpp) failed".to_string()));
    }
    Ok((bits, pitch))
}

/// Read the shape of `handle` in the same layout desktop duplication reports.
pub fn cursor_shape(handle: isize) -> Result<(PointerShapeInfo, Vec<u8>), CaptureError> {
    let mut icon = ICONINFO::default();
    unsafe { GetIconInfo(HCURSOR(handle as *mut c_void).into(), &mut icon) }
        .map_err(|e| crate::platform_error(e, "GetIconInfo failed"))?;
    let icon = IconBitmaps(icon);
    let hotspot = Position::new(icon.0.xHotspot as i32, icon.0.yHotspot as i32);
    let dc = ScreenDc::new()?;

    if icon.0.hbmColor.is_invalid() {
        // AND mask stacked on top of the XOR mask.
        let (width, height) = bitmap_size(icon.0.hbmMask)?;
        let (bits, pitch) = read_bitmap_1(&dc, icon.0.hbmMask, width, height)?;
        let info = PointerShapeInfo {
            shape_type: PointerShapeType::Monochrome,
            width,
            height,
            pitch,
            hotspot,
        };
        return Ok((info, bits));
    }

    let (width, height) = bitmap_size(icon.0.hbmColor)?;
    let mut pixels = read_bitmap_32(&dc, icon.0.hbmColor, width, height)?;

    if pixels.chunks_exact(4).all(|px| px[3] == 0) {
        // No alpha channel, derive opacity from the AND mask.
        let mask = read_bitmap_32(&dc, icon.0.hbmMask, width, height)?;
        for (px, m) in pixels.chunks_exact_mut(4).zip(mask.chunks_exact(4)) {
            px[3] = if m[0] == 0 { 0xFF } else { 0 };
        }
    }

    let info = PointerShapeInfo {
        shape_type: PointerShapeType::Color,
        width,
        height,
        pitch: width * 4,
        hotspot,
    };
    Ok((info, pixels))
}
