use super::{FrameRenderer, RecordingBackend, click_center, click_color, fit_rect};
use crate::{
    AudioDirection, CancelToken, MouseStyle, RecorderError, Result, SessionContext, WasapiDevice,
};
use screen_capture::{
    ActiveClick, Capture, CaptureCoordinator, CaptureError, ClickDetectionMode, ClickState,
    LogicalSize, PointerState, Rectangle,
};
use screen_capture_windows::{CoInitGuard, GpuTexture, WindowsCompositionBackend};
use std::{sync::Arc, thread::JoinHandle, time::Duration};
use video_encoder::{
    AudioEncoderConfig, EncodedOutput, EncoderSink, MfSinkWriter, OutputTarget,
    VideoEncoderConfig,
};

/// DXGI/WGC capture, Media Foundation encoding and WASAPI audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsRecordingBackend;

impl FrameRenderer for CaptureCoordinator<WindowsCompositionBackend> {
    type Texture = GpuTexture;

    fn draw_pointer(
        &self,
        frame: &GpuTexture,
        pointer: &PointerState,
        click: Option<ActiveClick>,
        style: &MouseStyle,
    ) -> std::result::Result<(), CaptureError> {
        let renderer = self.backend().renderer();

        if let Some(click) = click {
            renderer.draw_click(
                &frame.0,
                click_center(pointer),
                click,
                click_color(style, &click),
                style.radius,
            )?;
        }

        if style.draw_pointer {
            renderer.draw_pointer(&frame.0, pointer)?;
        }
        Ok(())
    }

    fn read_image(&self, frame: &GpuTexture) -> std::result::Result<Capture, CaptureError> {
        self.backend().device().read_capture(&frame.0)
    }

    fn blank_frame(&self, size: LogicalSize) -> std::result::Result<GpuTexture, CaptureError> {
        self.backend()
            .device()
            .create_blank_texture(size)
            .map(GpuTexture)
    }

    fn fit_frame(
        &self,
        frame: &GpuTexture,
        size: LogicalSize,
    ) -> std::result::Result<GpuTexture, CaptureError> {
        let backend = self.backend();
        let target = backend.device().create_blank_texture(size)?;
        backend
            .renderer()
            .copy_scaled(&target, &frame.0, fit_rect(frame.size(), size))?;
        Ok(GpuTexture(target))
    }
}

/// [`MfSinkWriter`] fed with the capture backend's textures.
pub struct WindowsSink(MfSinkWriter);

impl EncoderSink for WindowsSink {
    type Texture = GpuTexture;

    fn write_video(
        &mut self,
        texture: &GpuTexture,
        start: i64,
        duration: i64,
    ) -> video_encoder::Result<()> {
        self.0.write_video(&texture.0, start, duration)
    }

    fn write_audio(&mut self, pcm: &[u8], start: i64, duration: i64) -> video_encoder::Result<()> {
        self.0.write_audio(pcm, start, duration)
    }

    fn place_marker(&mut self) -> video_encoder::Result<()> {
        self.0.place_marker()
    }

    fn wait_for_marker(&mut self, timeout: Duration) -> video_encoder::Result<bool> {
        self.0.wait_for_marker(timeout)
    }

    fn set_source_rect(
        &mut self,
        rect: Rectangle,
        input_size: LogicalSize,
    ) -> video_encoder::Result<()> {
        self.0.set_source_rect(rect, input_size)
    }

    fn finalize(&mut self, timeout: Duration) -> video_encoder::Result<EncodedOutput> {
        self.0.finalize(timeout)
    }
}

impl RecordingBackend for WindowsRecordingBackend {
    type Texture = GpuTexture;
    type Capture = CaptureCoordinator<WindowsCompositionBackend>;
    type Sink = WindowsSink;
    type Audio = WasapiDevice;
    type ThreadGuard = CoInitGuard;

    fn attach_thread(&self) -> Result<CoInitGuard> {
        Ok(CoInitGuard::init_multithreaded()?)
    }

    fn create_capture(&self, ctx: &SessionContext) -> Result<Self::Capture> {
        let backend = WindowsCompositionBackend::new()?;
        Ok(CaptureCoordinator::new(backend, ctx.pointer.clone()))
    }

    fn create_sink(
        &self,
        capture: &Self::Capture,
        video: &VideoEncoderConfig,
        audio: Option<&AudioEncoderConfig>,
        target: OutputTarget,
    ) -> Result<WindowsSink> {
        let device = &capture.backend().device().device;
        MfSinkWriter::new(device, video, audio, target)
            .map(WindowsSink)
            .map_err(|e| RecorderError::encoder(e, video.hardware_encoding))
    }

    fn create_audio_device(
        &self,
        direction: AudioDirection,
        device_id: &str,
    ) -> Result<WasapiDevice> {
        Ok(WasapiDevice::new(direction, device_id))
    }

    fn spawn_click_detector(
        &self,
        mode: ClickDetectionMode,
        clicks: Arc<ClickState>,
        cancel: &CancelToken,
    ) -> Option<JoinHandle<()>> {
        Some(screen_capture_windows::spawn_click_detector(
            mode,
            clicks,
            cancel.flag(),
        ))
    }
}
