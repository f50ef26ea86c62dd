//! Draws the pointer and click indicators onto composited frames.

use crate::{
    d3d11::{D3DDevice, texture_size},
    shader::{QuadFill, QuadPipeline},
};
use screen_capture::{
    ActiveClick, CaptureError, Color, PointerShapeType, PointerState, Position, Rectangle,
    Rotation, clip_pointer_rect, decode_pointer, tessellation::image_quad,
};
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;

pub struct PointerRenderer {
    device: D3DDevice,
    pipeline: QuadPipeline,
}

impl PointerRenderer {
    pub fn new(device: D3DDevice) -> Result<Self, CaptureError> {
        let pipeline = QuadPipeline::new(&device)?;
        Ok(Self { device, pipeline })
    }

    pub fn device(&self) -> &D3DDevice {
        &self.device
    }

    pub fn draw_pointer(
        &self,
        texture: &ID3D11Texture2D,
        pointer: &PointerState,
    ) -> Result<(), CaptureError> {
        if !pointer.visible {
            return Ok(());
        }
        let Some((info, shape)) = pointer.shape() else {
            return Ok(());
        };

        let size = texture_size(texture);
        let bounds = Rectangle::from_size(size);

        // Monochrome and masked shapes invert what is underneath.
        let background = match info.shape_type {
            PointerShapeType::Color => vec![],
            PointerShapeType::Monochrome | PointerShapeType::MaskedColor => {
                match clip_pointer_rect(info, pointer.position, bounds) {
                    Some((rect, _, _)) => self.device.read_pixels(texture, rect)?,
                    None => return Ok(()),
                }
            }
        };

        let decoded = decode_pointer(info, shape, pointer.position, bounds, &background)?;
        if decoded.rect.is_empty() {
            return Ok(());
        }

        let upload = self
            .device
            .upload_texture(decoded.rect.size(), &decoded.to_bgra_bytes())?;
        let view = self.device.create_shader_resource_view(&upload)?;
        let target = self.device.create_render_target_view(texture)?;

        self.pipeline.draw(
            &target,
            size,
            bounds,
            &image_quad(decoded.rect, size, Rotation::Identity),
            QuadFill::Texture {
                view: &view,
                blend: true,
            },
        )
    }

    /// A fading disc of `radius` centered on `position`.
    pub fn draw_click(
        &self,
        texture: &ID3D11Texture2D,
        position: Position,
        click: ActiveClick,
        color: Color,
        radius: i32,
    ) -> Result<(), CaptureError> {
        let size = texture_size(texture);
        let disc = Rectangle::new(
            position.x - radius,
            position.y - radius,
            radius * 2,
            radius * 2,
        );
        if disc.is_empty() || disc.intersect(&Rectangle::from_size(size)).is_none() {
            return Ok(());
        }

        let target = self.device.create_render_target_view(texture)?;
        self.pipeline.draw(
            &target,
            size,
            Rectangle::from_size(size),
            &image_quad(disc, size, Rotation::Identity),
            QuadFill::Circle(color.with_alpha(color.a * click.strength)),
        )
    }

    /// Draw `image` (an upload texture) into `dest` of `texture`.
    pub fn draw_image(
        &self,
        texture: &ID3D11Texture2D,
        image: &ID3D11Texture2D,
        dest: Rectangle,
    ) -> Result<(), CaptureError> {
        self.draw_texture(texture, image, dest, true)
    }

    /// Scale `source` into `dest` of `texture`, replacing what was there.
    pub fn copy_scaled(
        &self,
        texture: &ID3D11Texture2D,
        source: &ID3D11Texture2D,
        dest: Rectangle,
    ) -> Result<(), CaptureError> {
        self.draw_texture(texture, source, dest, false)
    }

    fn draw_texture(
        &self,
        texture: &ID3D11Texture2D,
        image: &ID3D11Texture2D,
        dest: Rectangle,
        blend: bool,
    ) -> Result<(), CaptureError> {
        let size = texture_size(texture);
        let view = self.device.create_shader_resource_view(image)?;
        let target = self.device.create_render_target_view(texture)?;
        self.pipeline.draw(
            &target,
            size,
            Rectangle::from_size(size),
            &image_quad(dest, size, Rotation::Identity),
            QuadFill::Texture { view: &view, blend },
        )
    }
}
