//! Desktop duplication of one output composited into the shared surface.

use crate::{
    d3d11::{D3DDevice, from_rect, texture_size, to_box},
    monitor::ResolvedOutput,
    platform_error,
    shader::{QuadFill, QuadPipeline},
    shared_surface::SharedSurface,
    surface_writer::SurfaceWriter,
};
use screen_capture::{
    CaptureError, LogicalSize, MoveRect, PointerShapeInfo, PointerShapeType, PointerUpdate,
    Position, RecordingSource, Rectangle, Rotation, ScreenInfo, SharedPointer, SourceWorker,
    WorkerUpdate,
    tessellation::{QUAD_VERTEX_COUNT, Vertex, dirty_rect_quad},
};
use std::{ffi::c_void, mem};
use windows::{
    Win32::{
        Foundation::RECT,
        Graphics::{
            Direct3D11::{
                D3D11_BIND_FLAG, D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_FLAG, ID3D11ShaderResourceView,
                ID3D11Texture2D,
            },
            Dxgi::{
                DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT,
                DXGI_OUTDUPL_POINTER_SHAPE_INFO, IDXGIOutput1, IDXGIOutputDuplication,
                IDXGIResource,
            },
        },
    },
    core::Interface,
};

/// A frame held by the duplication until [`DuplicationManager::release_frame`].
pub struct DuplicationFrame {
    pub texture: ID3D11Texture2D,
    pub info: DXGI_OUTDUPL_FRAME_INFO,
    pub moves: Vec<MoveRect>,
    pub dirty: Vec<Rectangle>,
}

fn grow<T: Default + Clone>(buffer: &mut Vec<T>, len: usize) -> Result<(), CaptureError> {
    if buffer.len() < len {
        buffer
            .try_reserve_exact(len - buffer.len())
            .map_err(|e| CaptureError::OutOfMemory(format!("frame metadata buffer: {e}")))?;
        buffer.resize(len, T::default());
    }
    Ok(())
}

pub struct DuplicationManager {
    duplication: IDXGIOutputDuplication,
    info: ScreenInfo,
    move_buffer: Vec<DXGI_OUTDUPL_MOVE_RECT>,
    dirty_buffer: Vec<RECT>,
    frame_held: bool,
}

impl DuplicationManager {
    pub fn new(output: &ResolvedOutput, device: &D3DDevice) -> Result<Self, CaptureError> {
        let output1: IDXGIOutput1 = output
            .output
            .cast()
            .map_err(|e| platform_error(e, "cast IDXGIOutput to IDXGIOutput1 failed"))?;
        let duplication = unsafe { output1.DuplicateOutput(&device.device) }
            .map_err(|e| platform_error(e, format!("DuplicateOutput({}) failed", output.info.name)))?;

        log::info!(
            "duplicating {} on {}: {:?} {:?}",
            output.info.name,
            output.info.adapter_name,
            output.info.rect,
            output.info.rotation
        );

        Ok(Self {
            duplication,
            info: output.info.clone(),
            move_buffer: vec![],
            dirty_buffer: vec![],
            frame_held: false,
        })
    }

    pub fn info(&self) -> &ScreenInfo {
        &self.info
    }

    /// Wait up to `timeout_ms` for the next frame, `None` on timeout.
    pub fn get_frame(&mut self, timeout_ms: u32) -> Result<Option<DuplicationFrame>, CaptureError> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;

        match unsafe {
            self.duplication
                .AcquireNextFrame(timeout_ms, &mut info, &mut resource)
        } {
            Ok(()) => self.frame_held = true,
            Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(None),
            Err(e) => return Err(platform_error(e, "AcquireNextFrame failed")),
        }

        let Some(resource) = resource else {
            self.release_frame()?;
            return Ok(None);
        };

        let texture: ID3D11Texture2D = resource
            .cast()
            .map_err(|e| platform_error(e, "cast desktop resource to ID3D11Texture2D failed"))?;

        let (moves, dirty) = if info.TotalMetadataBufferSize > 0 {
            (self.move_rects(&info)?, self.dirty_rects(&info)?)
        } else {
            (vec![], vec![])
        };

        Ok(Some(DuplicationFrame {
            texture,
            info,
            moves,
            dirty,
        }))
    }

    fn move_rects(&mut self, info: &DXGI_OUTDUPL_FRAME_INFO) -> Result<Vec<MoveRect>, CaptureError> {
        let capacity = info.TotalMetadataBufferSize as usize / mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>();
        grow(&mut self.move_buffer, capacity.max(1))?;

        let mut required = 0u32;
        unsafe {
            self.duplication.GetFrameMoveRects(
                (self.move_buffer.len() * mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>()) as u32,
                self.move_buffer.as_mut_ptr(),
                &mut required,
            )
        }
        .map_err(|e| platform_error(e, "GetFrameMoveRects failed"))?;

        let count = (required as usize / mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>())
            .min(self.move_buffer.len());
        Ok(self.move_buffer[..count]
            .iter()
            .map(|m| MoveRect {
                source: Position::new(m.SourcePoint.x, m.SourcePoint.y),
                destination: from_rect(&m.DestinationRect),
            })
            .collect())
    }

    fn dirty_rects(&mut self, info: &DXGI_OUTDUPL_FRAME_INFO) -> Result<Vec<Rectangle>, CaptureError> {
        let capacity = info.TotalMetadataBufferSize as usize / mem::size_of::<RECT>();
        grow(&mut self.dirty_buffer, capacity.max(1))?;

        let mut required = 0u32;
        unsafe {
            self.duplication.GetFrameDirtyRects(
                (self.dirty_buffer.len() * mem::size_of::<RECT>()) as u32,
                self.dirty_buffer.as_mut_ptr(),
                &mut required,
            )
        }
        .map_err(|e| platform_error(e, "GetFrameDirtyRects failed"))?;

        let count = (required as usize / mem::size_of::<RECT>()).min(self.dirty_buffer.len());
        Ok(self.dirty_buffer[..count]
            .iter()
            .map(from_rect)
            .filter(|r| !r.is_empty())
            .collect())
    }

    /// Publish the pointer position and shape reported with `info`.
    ///
    /// `origin` maps output coordinates into surface coordinates.
    pub fn update_pointer(
        &self,
        info: &DXGI_OUTDUPL_FRAME_INFO,
        pointer: &SharedPointer,
        source_index: usize,
        origin: Position,
    ) -> Result<bool, CaptureError> {
        if info.LastMouseUpdateTime == 0 {
            return Ok(false);
        }

        let mut state = pointer
            .lock()
            .map_err(|_| CaptureError::Other("pointer state lock poisoned".to_string()))?;

        let position = info.PointerPosition.Position;
        let updated = state.apply_update(PointerUpdate {
            source_index,
            timestamp: info.LastMouseUpdateTime,
            visible: info.PointerPosition.Visible.as_bool(),
            position: Position::new(position.x + origin.x, position.y + origin.y),
        });

        if info.PointerShapeBufferSize == 0 {
            return Ok(updated);
        }

        let size = info.PointerShapeBufferSize;
        let buffer = state.shape_buffer_mut(size as usize)?;
        let mut required = 0u32;
        let mut shape_info = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
        unsafe {
            self.duplication.GetFramePointerShape(
                size,
                buffer.as_mut_ptr() as *mut c_void,
                &mut required,
                &mut shape_info,
            )
        }
        .map_err(|e| platform_error(e, "GetFramePointerShape failed"))?;

        let Some(shape_type) = PointerShapeType::from_raw(shape_info.Type) else {
            log::warn!("unknown pointer shape type {}", shape_info.Type);
            return Ok(updated);
        };

        state.commit_shape(
            PointerShapeInfo {
                shape_type,
                width: shape_info.Width,
                height: shape_info.Height,
                pitch: shape_info.Pitch,
                hotspot: Position::new(shape_info.HotSpot.x, shape_info.HotSpot.y),
            },
            required as usize,
        );

        Ok(true)
    }

    pub fn release_frame(&mut self) -> Result<(), CaptureError> {
        if !self.frame_held {
            return Ok(());
        }
        self.frame_held = false;
        unsafe { self.duplication.ReleaseFrame() }
            .map_err(|e| platform_error(e, "ReleaseFrame failed"))
    }
}

impl Drop for DuplicationManager {
    fn drop(&mut self) {
        if let Err(e) = self.release_frame() {
            log::debug!("release duplication frame on drop failed: {e}");
        }
    }
}

/// Copy between two devices on different adapters through system memory.
struct CrossAdapterUpload {
    staging: ID3D11Texture2D,
    upload: ID3D11Texture2D,
    view: ID3D11ShaderResourceView,
    size: LogicalSize,
}

/// Source worker for one duplicated output.
pub struct DuplicationWorker {
    index: usize,
    manager: DuplicationManager,
    capture_device: D3DDevice,
    writer: SurfaceWriter,
    pipeline: QuadPipeline,
    pointer: SharedPointer,
    capture_cursor: bool,
    /// Visible part of the output in surface coordinates.
    destination: Rectangle,
    /// Maps desktop-oriented output coordinates into surface coordinates.
    origin: Position,
    scratch: Option<ID3D11Texture2D>,
    upload: Option<CrossAdapterUpload>,
    full_redraw: bool,
}

// SAFETY: created on and used by a single source thread; the devices are
// multithread protected.
unsafe impl Send for DuplicationWorker {}

impl DuplicationWorker {
    pub fn new(
        index: usize,
        source: &RecordingSource,
        output: &ResolvedOutput,
        destination: Rectangle,
        surface: &SharedSurface,
        compositing: &D3DDevice,
        pointer: SharedPointer,
    ) -> Result<Self, CaptureError> {
        let capture_device = D3DDevice::new(Some(&output.adapter))?;
        let cross_adapter = output.adapter_luid != compositing.adapter_luid()?;

        let writer_device = if cross_adapter {
            log::info!(
                "capture source[{index}]: {} is on another adapter, copying through system memory",
                output.info.name
            );
            D3DDevice::new(Some(&compositing.adapter()?))?
        } else {
            capture_device.clone()
        };

        let writer = SurfaceWriter::open(surface, writer_device)?;
        let pipeline = QuadPipeline::new(&writer.device)?;
        let manager = DuplicationManager::new(output, &capture_device)?;

        let full = Rectangle::from_size(output.info.logical_size());
        let crop = source
            .source_rect
            .and_then(|r| full.intersect(&r))
            .unwrap_or(full);

        Ok(Self {
            index,
            manager,
            capture_device,
            writer,
            pipeline,
            pointer,
            capture_cursor: source.capture_cursor,
            destination,
            origin: Position::new(destination.x - crop.x, destination.y - crop.y),
            scratch: None,
            upload: None,
            full_redraw: true,
        })
    }

    fn source_view(
        &mut self,
        texture: &ID3D11Texture2D,
    ) -> Result<ID3D11ShaderResourceView, CaptureError> {
        let size = texture_size(texture);

        if Interface::as_raw(&self.capture_device.device)
            == Interface::as_raw(&self.writer.device.device)
        {
            return self.writer.device.create_shader_resource_view(texture);
        }

        if self.upload.as_ref().is_none_or(|u| u.size != size) {
            let upload = self.writer.device.create_texture(
                size,
                D3D11_BIND_SHADER_RESOURCE,
                D3D11_RESOURCE_MISC_FLAG(0),
            )?;
            self.upload = Some(CrossAdapterUpload {
                staging: self.capture_device.create_staging_texture(size)?,
                view: self.writer.device.create_shader_resource_view(&upload)?,
                upload,
                size,
            });
        }

        let Some(upload) = self.upload.as_ref() else {
            return Err(CaptureError::Other("cross adapter upload missing".to_string()));
        };

        unsafe {
            self.capture_device
                .context
                .CopyResource(&upload.staging, texture)
        };
        let bytes = self.capture_device.map_staging(&upload.staging, size)?;
        unsafe {
            self.writer.device.context.UpdateSubresource(
                &upload.upload,
                0,
                None,
                bytes.as_ptr() as *const c_void,
                size.width as u32 * 4,
                0,
            );
        }

        Ok(upload.view.clone())
    }

    fn scratch_texture(&mut self) -> Result<ID3D11Texture2D, CaptureError> {
        if let Some(scratch) = &self.scratch {
            return Ok(scratch.clone());
        }
        let scratch = self.writer.device.create_texture(
            self.writer.size,
            D3D11_BIND_FLAG(0),
            D3D11_RESOURCE_MISC_FLAG(0),
        )?;
        self.scratch = Some(scratch.clone());
        Ok(scratch)
    }

    /// Apply move rectangles in place. Moves touching pixels outside the
    /// visible part are returned for a redraw from the desktop image.
    fn apply_moves(
        &mut self,
        moves: &[MoveRect],
        rotation: Rotation,
        source_size: LogicalSize,
    ) -> Result<Vec<Rectangle>, CaptureError> {
        let mut redraw = vec![];

        for mv in moves {
            let (src, dst) = rotation.move_to_desktop(mv, source_size);
            let src = src.offset(self.origin.x, self.origin.y);
            let dst = dst.offset(self.origin.x, self.origin.y);

            if !self.destination.contains(&src) || !self.destination.contains(&dst) {
                redraw.push(mv.destination);
                continue;
            }

            let scratch = self.scratch_texture()?;
            let context = &self.writer.device.context;
            unsafe {
                context.CopySubresourceRegion(
                    &scratch,
                    0,
                    src.x as u32,
                    src.y as u32,
                    0,
                    &self.writer.texture,
                    0,
                    Some(&to_box(src)),
                );
                context.CopySubresourceRegion(
                    &self.writer.texture,
                    0,
                    dst.x as u32,
                    dst.y as u32,
                    0,
                    &scratch,
                    0,
                    Some(&to_box(src)),
                );
            }
        }

        Ok(redraw)
    }

    fn compose(&mut self, frame: &DuplicationFrame) -> Result<(), CaptureError> {
        let rotation = self.manager.info().rotation;
        let source_size = texture_size(&frame.texture);
        let view = self.source_view(&frame.texture)?;

        let dirty = if self.full_redraw {
            vec![Rectangle::from_size(source_size)]
        } else {
            let mut dirty = self.apply_moves(&frame.moves, rotation, source_size)?;
            dirty.extend_from_slice(&frame.dirty);
            dirty
        };

        let mut vertices: Vec<Vertex> = Vec::with_capacity(dirty.len() * QUAD_VERTEX_COUNT);
        for rect in dirty {
            vertices.extend(dirty_rect_quad(
                rect,
                source_size,
                rotation,
                (self.origin.x, self.origin.y),
                self.writer.size,
            ));
        }

        self.pipeline.draw(
            &self.writer.target,
            self.writer.size,
            self.destination,
            &vertices,
            QuadFill::Texture {
                view: &view,
                blend: false,
            },
        )?;

        self.full_redraw = false;
        Ok(())
    }

    fn process(
        &mut self,
        frame: &DuplicationFrame,
        timeout_ms: u32,
    ) -> Result<WorkerUpdate, CaptureError> {
        let pointer_updated = self.capture_cursor
            && self
                .manager
                .update_pointer(&frame.info, &self.pointer, self.index, self.origin)?;

        if frame.info.LastPresentTime == 0 {
            return Ok(WorkerUpdate {
                updated: pointer_updated,
                content_size: None,
            });
        }

        let locked = self.writer.lock(timeout_ms)?;
        if locked.is_none() {
            // The dirty regions of this frame are lost, repaint everything next time.
            log::debug!("capture source[{}] shared surface busy", self.index);
            self.full_redraw = true;
            return Ok(WorkerUpdate {
                updated: pointer_updated,
                content_size: None,
            });
        }

        let composed = self.compose(frame);
        drop(locked);
        composed?;

        Ok(WorkerUpdate {
            updated: true,
            content_size: None,
        })
    }
}

impl SourceWorker for DuplicationWorker {
    fn capture(&mut self, timeout_ms: u32) -> Result<WorkerUpdate, CaptureError> {
        let Some(frame) = self.manager.get_frame(timeout_ms)? else {
            return Ok(WorkerUpdate::default());
        };

        let processed = self.process(&frame, timeout_ms);
        let released = self.manager.release_frame();
        let update = processed?;
        released?;
        Ok(update)
    }
}
