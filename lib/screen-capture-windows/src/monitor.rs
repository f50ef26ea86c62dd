use crate::{d3d11::from_rect, d3d11::luid_value, platform_error};
use screen_capture::{CaptureError, Rectangle, Rotation, ScreenInfo, find_screen};
use windows::{
    Win32::{
        Foundation::HWND,
        Graphics::{
            Dxgi::{
                CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, DXGI_MODE_ROTATION,
                DXGI_MODE_ROTATION_ROTATE90, DXGI_MODE_ROTATION_ROTATE180,
                DXGI_MODE_ROTATION_ROTATE270, IDXGIAdapter, IDXGIFactory1, IDXGIOutput,
            },
            Gdi::HMONITOR,
        },
        UI::WindowsAndMessaging::{GetWindowRect, IsWindow},
    },
    core::Interface,
};

/// An attached output together with the DXGI objects needed to capture it.
#[derive(Clone)]
pub struct ResolvedOutput {
    pub info: ScreenInfo,
    pub adapter: IDXGIAdapter,
    pub output: IDXGIOutput,
    pub monitor: HMONITOR,
    pub adapter_luid: i64,
}

fn utf16z_to_string(chars: &[u16]) -> String {
    let len = chars.iter().position(|&c| c == 0).unwrap_or(chars.len());
    String::from_utf16_lossy(&chars[..len])
}

fn rotation_from_dxgi(rotation: DXGI_MODE_ROTATION) -> Rotation {
    match rotation {
        DXGI_MODE_ROTATION_ROTATE90 => Rotation::Rotate90,
        DXGI_MODE_ROTATION_ROTATE180 => Rotation::Rotate180,
        DXGI_MODE_ROTATION_ROTATE270 => Rotation::Rotate270,
        _ => Rotation::Identity,
    }
}

pub fn enumerate_outputs() -> Result<Vec<ResolvedOutput>, CaptureError> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .map_err(|e| platform_error(e, "CreateDXGIFactory1 failed"))?;

    let mut outputs = vec![];
    let mut adapter_index = 0u32;

    loop {
        let adapter1 = match unsafe { factory.EnumAdapters1(adapter_index) } {
            Ok(adapter) => adapter,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => return Err(platform_error(e, format!("EnumAdapters1({adapter_index}) failed"))),
        };

        let adapter_desc = unsafe { adapter1.GetDesc1() }
            .map_err(|e| platform_error(e, "IDXGIAdapter1::GetDesc1 failed"))?;
        let adapter_name = utf16z_to_string(&adapter_desc.Description);
        let adapter_luid = luid_value(
            adapter_desc.AdapterLuid.HighPart,
            adapter_desc.AdapterLuid.LowPart,
        );

        let adapter: IDXGIAdapter = adapter1
            .cast()
            .map_err(|e| platform_error(e, "cast IDXGIAdapter1 to IDXGIAdapter failed"))?;

        let mut output_index = 0u32;
        loop {
            let output = match unsafe { adapter.EnumOutputs(output_index) } {
                Ok(output) => output,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(platform_error(
                        e,
                        format!("EnumOutputs({output_index}) on adapter {adapter_index} failed"),
                    ));
                }
            };

            let desc = unsafe { output.GetDesc() }
                .map_err(|e| platform_error(e, "IDXGIOutput::GetDesc failed"))?;

            if desc.AttachedToDesktop.as_bool() {
                let rect = from_rect(&desc.DesktopCoordinates);
                outputs.push(ResolvedOutput {
                    info: ScreenInfo {
                        name: utf16z_to_string(&desc.DeviceName),
                        adapter_name: adapter_name.clone(),
                        rect,
                        rotation: rotation_from_dxgi(desc.Rotation),
                        primary: rect.x == 0 && rect.y == 0,
                        adapter_index,
                        output_index,
                    },
                    adapter: adapter.clone(),
                    output,
                    monitor: desc.Monitor,
                    adapter_luid,
                });
            }

            output_index += 1;
        }

        adapter_index += 1;
    }

    Ok(outputs)
}

/// Every output attached to the desktop.
pub fn screen_infos() -> Result<Vec<ScreenInfo>, CaptureError> {
    Ok(enumerate_outputs()?.into_iter().map(|o| o.info).collect())
}

/// Find an output by device name, an empty name selects the primary output.
pub fn resolve_output(name: &str) -> Result<ResolvedOutput, CaptureError> {
    let outputs = enumerate_outputs()?;
    let infos = outputs.iter().map(|o| o.info.clone()).collect::<Vec<_>>();

    let found = find_screen(&infos, name)
        .ok_or_else(|| CaptureError::InvalidSource(format!("no attached output named `{name}`")))?;

    outputs
        .into_iter()
        .find(|o| o.info.name == found.name)
        .ok_or_else(|| CaptureError::InvalidSource(format!("output `{name}` disappeared")))
}

pub fn window_handle(handle: isize) -> Result<HWND, CaptureError> {
    let hwnd = HWND(handle as *mut _);
    if !unsafe { IsWindow(Some(hwnd)) }.as_bool() {
        return Err(CaptureError::InvalidSource(format!(
            "window {handle:#x} does not exist"
        )));
    }
    Ok(hwnd)
}

pub fn window_rect(hwnd: HWND) -> Result<Rectangle, CaptureError> {
    let mut rect = Default::default();
    unsafe { GetWindowRect(hwnd, &mut rect) }
        .map_err(|e| platform_error(e, "GetWindowRect failed"))?;
    Ok(from_rect(&rect))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16z_to_string() {
        let mut name = [0u16; 32];
        for (slot, c) in name.iter_mut().zip("\\\\.\\DISPLAY1".encode_utf16()) {
            *slot = c;
        }
        assert_eq!(utf16z_to_string(&name), "\\\\.\\DISPLAY1");
        assert_eq!(utf16z_to_string(&[0u16; 4]), "");
        assert_eq!(utf16z_to_string(&[0x41, 0x42]), "AB");
    }

    #[test]
    fn test_rotation_from_dxgi() {
        assert_eq!(rotation_from_dxgi(DXGI_MODE_ROTATION_ROTATE90), Rotation::Rotate90);
        assert_eq!(rotation_from_dxgi(DXGI_MODE_ROTATION_ROTATE270), Rotation::Rotate270);
        assert_eq!(rotation_from_dxgi(DXGI_MODE_ROTATION(0)), Rotation::Identity);
    }
}
