//! Quad tessellation shared by the dirty-rect compositor and the pointer renderer.
//!
//! Every quad is two triangles in the slot order
//! `[left-bottom, left-top, right-bottom, right-bottom, left-top, right-top]`.
//! Only the texture coordinates depend on the rotation.

use crate::{LogicalSize, Rectangle, Rotation};

pub const QUAD_VERTEX_COUNT: usize = 6;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub tex: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Corner {
    LeftTop,
    LeftBottom,
    RightTop,
    RightBottom,
}

use Corner::*;

/// Texture corner sampled by quad slots 0, 1, 2 and 5 for each rotation.
const UV_CORNERS: [[Corner; 4]; 4] = [
    [LeftBottom, LeftTop, RightBottom, RightTop],
    [RightBottom, LeftBottom, RightTop, LeftTop],
    [RightTop, RightBottom, LeftTop, LeftBottom],
    [LeftTop, RightTop, LeftBottom, RightBottom],
];

fn uv_corner(corner: Corner, uv: Rectangle, space: LogicalSize) -> [f32; 2] {
    let w = space.width.max(1) as f32;
    let h = space.height.max(1) as f32;
    let (x, y) = match corner {
        LeftTop => (uv.x, uv.y),
        LeftBottom => (uv.x, uv.bottom()),
        RightTop => (uv.right(), uv.y),
        RightBottom => (uv.right(), uv.bottom()),
    };
    [x as f32 / w, y as f32 / h]
}

fn ndc(x: i32, y: i32, target: LogicalSize) -> [f32; 3] {
    let cx = target.width.max(1) as f32 / 2.0;
    let cy = target.height.max(1) as f32 / 2.0;
    [(x as f32 - cx) / cx, -(y as f32 - cy) / cy, 0.0]
}

/// Build a quad covering `dest` (pixels in `target`) that samples `uv`
/// (pixels in a texture of size `uv_space`), remapped for `rotation`.
pub fn quad_vertices(
    dest: Rectangle,
    target: LogicalSize,
    uv: Rectangle,
    uv_space: LogicalSize,
    rotation: Rotation,
) -> [Vertex; QUAD_VERTEX_COUNT] {
    let corners = UV_CORNERS[rotation.degrees() as usize / 90];
    let tex = |slot: usize| uv_corner(corners[slot], uv, uv_space);

    let lb = Vertex {
        pos: ndc(dest.x, dest.bottom(), target),
        tex: tex(0),
    };
    let lt = Vertex {
        pos: ndc(dest.x, dest.y, target),
        tex: tex(1),
    };
    let rb = Vertex {
        pos: ndc(dest.right(), dest.bottom(), target),
        tex: tex(2),
    };
    let rt = Vertex {
        pos: ndc(dest.right(), dest.y, target),
        tex: tex(3),
    };

    [lb, lt, rb, rb, lt, rt]
}

/// Quad for one dirty rectangle of a source texture composited at `offset`
/// into a desktop-oriented target.
pub fn dirty_rect_quad(
    dirty: Rectangle,
    source_size: LogicalSize,
    rotation: Rotation,
    offset: (i32, i32),
    target: LogicalSize,
) -> [Vertex; QUAD_VERTEX_COUNT] {
    let dest = rotation
        .to_desktop(dirty, source_size)
        .offset(offset.0, offset.1);
    quad_vertices(dest, target, dirty, source_size, rotation)
}

/// Quad for an upright image such as a pointer shape drawn at `dest`.
pub fn image_quad(
    dest: Rectangle,
    target: LogicalSize,
    rotation: Rotation,
) -> [Vertex; QUAD_VERTEX_COUNT] {
    let size = dest.size();
    quad_vertices(dest, target, Rectangle::from_size(size), size, rotation)
}
