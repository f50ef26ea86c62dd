use crate::{
    AudioEncoderConfig, EncodedOutput, EncoderError, EncoderSink, OutputTarget, Result,
    VideoEncoderConfig,
};
use screen_capture::{LogicalSize, Rectangle};
use std::{
    ffi::c_void,
    sync::{
        Arc,
        atomic::{AtomicI32, Ordering},
    },
    time::Duration,
};
use windows::{
    Win32::{
        Foundation::{CloseHandle, HANDLE, HGLOBAL, RECT, WAIT_OBJECT_0},
        Graphics::Direct3D11::{ID3D11Device, ID3D11Texture2D},
        Media::MediaFoundation::*,
        System::{
            Com::StructuredStorage::CreateStreamOnHGlobal,
            Threading::{CreateEventW, SetEvent, WaitForSingleObject},
        },
    },
    core::{GUID, HRESULT, HSTRING, Interface, PCWSTR},
};
use windows_core::implement;

fn platform(context: &'static str) -> impl FnOnce(windows::core::Error) -> EncoderError {
    move |e| EncoderError::Platform {
        code: e.code().0,
        message: format!("{context} failed: {}", e.message()),
    }
}

fn pack_u64(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | (lo as u64)
}

unsafe fn set_attribute_size(
    attributes: &IMFMediaType,
    guid: &GUID,
    size: LogicalSize,
) -> windows::core::Result<()> {
    unsafe { attributes.SetUINT64(guid, pack_u64(size.width as u32, size.height as u32)) }
}

unsafe fn set_attribute_ratio(
    attributes: &IMFMediaType,
    guid: &GUID,
    numerator: u32,
    denominator: u32,
) -> windows::core::Result<()> {
    unsafe { attributes.SetUINT64(guid, pack_u64(numerator, denominator)) }
}

/// Keeps Media Foundation started for as long as it lives.
pub struct MediaFoundationGuard;

impl MediaFoundationGuard {
    pub fn new() -> Result<Self> {
        unsafe { MFStartup(MF_VERSION, MFSTARTUP_FULL) }.map_err(platform("MFStartup"))?;
        Ok(Self)
    }
}

impl Drop for MediaFoundationGuard {
    fn drop(&mut self) {
        if let Err(e) = unsafe { MFShutdown() } {
            log::warn!("MFShutdown failed: {e}");
        }
    }
}

struct Event(HANDLE);

// Win32 event handles may be signaled and waited on from any thread.
unsafe impl Send for Event {}
unsafe impl Sync for Event {}

impl Event {
    fn new() -> Result<Self> {
        let handle = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map_err(platform("CreateEventW"))?;
        Ok(Self(handle))
    }

    fn set(&self) {
        if let Err(e) = unsafe { SetEvent(self.0) } {
            log::warn!("SetEvent failed: {e}");
        }
    }

    fn wait(&self, timeout: Duration) -> bool {
        let ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        unsafe { WaitForSingleObject(self.0, ms) == WAIT_OBJECT_0 }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

struct CallbackState {
    finalized: Event,
    marker: Event,
    finalize_status: AtomicI32,
}

#[implement(IMFSinkWriterCallback)]
struct SinkWriterCallback {
    state: Arc<CallbackState>,
}

impl IMFSinkWriterCallback_Impl for SinkWriterCallback_Impl {
    fn OnFinalize(&self, hrstatus: HRESULT) -> windows::core::Result<()> {
        self.state
            .finalize_status
            .store(hrstatus.0, Ordering::Release);
        self.state.finalized.set();
        Ok(())
    }

    fn OnMarker(&self, _dwstreamindex: u32, _pvcontext: *const c_void) -> windows::core::Result<()> {
        self.state.marker.set();
        Ok(())
    }
}

/// H.264/AAC MP4 writer on top of the Media Foundation sink writer.
///
/// Frames are consumed as D3D11 textures on the device the writer was
/// created with. Resizing to the output size happens in the sink writer's
/// own video processor.
pub struct MfSinkWriter {
    writer: IMFSinkWriter,
    callback: Arc<CallbackState>,
    video_stream: u32,
    audio_stream: Option<u32>,
    byte_stream: Option<IMFByteStream>,
    target: OutputTarget,
    finalized: bool,
    _device_manager: IMFDXGIDeviceManager,
    _mf: MediaFoundationGuard,
}

// Media Foundation objects are free-threaded and the D3D11 device is multithread protected.
unsafe impl Send for MfSinkWriter {}

impl MfSinkWriter {
    pub fn new(
        device: &ID3D11Device,
        video: &VideoEncoderConfig,
        audio: Option<&AudioEncoderConfig>,
        target: OutputTarget,
    ) -> Result<Self> {
        video.validate()?;
        if let Some(audio) = audio {
            audio.validate()?;
        }

        let mf = MediaFoundationGuard::new()?;

        let callback = Arc::new(CallbackState {
            finalized: Event::new()?,
            marker: Event::new()?,
            finalize_status: AtomicI32::new(0),
        });
        let callback_com: IMFSinkWriterCallback = SinkWriterCallback {
            state: callback.clone(),
        }
        .into();

        unsafe {
            let mut reset_token = 0;
            let mut device_manager = None;
            MFCreateDXGIDeviceManager(&mut reset_token, &mut device_manager)
                .map_err(platform("MFCreateDXGIDeviceManager"))?;
            let device_manager = device_manager.ok_or_else(|| {
                EncoderError::VideoEncodingFailed("no DXGI device manager".to_string())
            })?;
            device_manager
                .ResetDevice(device, reset_token)
                .map_err(platform("IMFDXGIDeviceManager::ResetDevice"))?;

            let mut attributes = None;
            MFCreateAttributes(&mut attributes, 8).map_err(platform("MFCreateAttributes"))?;
            let attributes = attributes.ok_or_else(|| {
                EncoderError::VideoEncodingFailed("no sink writer attributes".to_string())
            })?;

            attributes
                .SetUINT32(
                    &MF_READWRITE_ENABLE_HARDWARE_TRANSFORMS,
                    video.hardware_encoding as u32,
                )
                .map_err(platform("SetUINT32"))?;
            attributes
                .SetUnknown(&MF_SINK_WRITER_D3D_MANAGER, &device_manager)
                .map_err(platform("SetUnknown"))?;
            attributes
                .SetUnknown(&MF_SINK_WRITER_ASYNC_CALLBACK, &callback_com)
                .map_err(platform("SetUnknown"))?;

            let container = if video.fragmented {
                MFTranscodeContainerType_FMPEG4
            } else {
                MFTranscodeContainerType_MPEG4
            };
            attributes
                .SetGUID(&MF_TRANSCODE_CONTAINERTYPE, &container)
                .map_err(platform("SetGUID"))?;
            if video.fast_start && !video.fragmented {
                attributes
                    .SetUINT32(&MF_MPEG4SINK_MOOV_BEFORE_MDAT, 1)
                    .map_err(platform("SetUINT32"))?;
            }

            let (writer, byte_stream) = match &target {
                OutputTarget::File(path) => {
                    let url = HSTRING::from(path.as_os_str());
                    let writer =
                        MFCreateSinkWriterFromURL(&url, None::<&IMFByteStream>, &attributes)
                            .map_err(platform("MFCreateSinkWriterFromURL"))?;
                    (writer, None)
                }
                OutputTarget::Memory => {
                    let stream = CreateStreamOnHGlobal(HGLOBAL::default(), true)
                        .map_err(platform("CreateStreamOnHGlobal"))?;
                    let byte_stream = MFCreateMFByteStreamOnStream(&stream)
                        .map_err(platform("MFCreateMFByteStreamOnStream"))?;
                    let writer = MFCreateSinkWriterFromURL(
                        &HSTRING::from(".mp4"),
                        &byte_stream,
                        &attributes,
                    )
                    .map_err(platform("MFCreateSinkWriterFromURL"))?;
                    (writer, Some(byte_stream))
                }
            };

            let video_stream = add_video_stream(&writer, video)?;
            let audio_stream = match audio {
                Some(audio) => Some(add_audio_stream(&writer, audio)?),
                None => None,
            };

            writer
                .BeginWriting()
                .map_err(platform("IMFSinkWriter::BeginWriting"))?;

            log::info!(
                "media foundation sink writer ready: {}x{} -> {}x{} @ {}fps, audio: {}",
                video.input_size.width,
                video.input_size.height,
                video.output_size.width,
                video.output_size.height,
                video.fps,
                audio.is_some()
            );

            Ok(Self {
                writer,
                callback,
                video_stream,
                audio_stream,
                byte_stream,
                target,
                finalized: false,
                _device_manager: device_manager,
                _mf: mf,
            })
        }
    }

    fn video_processor(&self) -> Result<Option<IMFVideoProcessorControl>> {
        let writer_ex: IMFSinkWriterEx = self
            .writer
            .cast()
            .map_err(platform("IMFSinkWriter::cast"))?;

        for index in 0.. {
            let mut category = GUID::zeroed();
            let mut transform = None;
            let found = unsafe {
                writer_ex.GetTransformForStream(
                    self.video_stream,
                    index,
                    &mut category,
                    &mut transform,
                )
            };
            if found.is_err() {
                break;
            }

            if category == MFT_CATEGORY_VIDEO_PROCESSOR
                && let Some(transform) = transform
            {
                let control: IMFVideoProcessorControl = transform
                    .cast()
                    .map_err(platform("IMFTransform::cast"))?;
                return Ok(Some(control));
            }
        }

        Ok(None)
    }

    fn read_memory_output(&self) -> Result<Vec<u8>> {
        let Some(byte_stream) = self.byte_stream.as_ref() else {
            return Ok(vec![]);
        };

        unsafe {
            let len = byte_stream
                .GetLength()
                .map_err(platform("IMFByteStream::GetLength"))?;
            byte_stream
                .SetCurrentPosition(0)
                .map_err(platform("IMFByteStream::SetCurrentPosition"))?;

            let mut bytes = vec![0u8; len as usize];
            let mut offset = 0usize;
            while offset < bytes.len() {
                let mut read = 0u32;
                let chunk = (bytes.len() - offset).min(u32::MAX as usize) as u32;
                byte_stream
                    .Read(bytes.as_mut_ptr().add(offset), chunk, &mut read)
                    .map_err(platform("IMFByteStream::Read"))?;
                if read == 0 {
                    break;
                }
                offset += read as usize;
            }
            bytes.truncate(offset);
            Ok(bytes)
        }
    }
}

unsafe fn add_video_stream(writer: &IMFSinkWriter, config: &VideoEncoderConfig) -> Result<u32> {
    unsafe {
        let output = MFCreateMediaType().map_err(platform("MFCreateMediaType"))?;
        output
            .SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Video)
            .map_err(platform("SetGUID"))?;
        output
            .SetGUID(&MF_MT_SUBTYPE, &MFVideoFormat_H264)
            .map_err(platform("SetGUID"))?;
        output
            .SetUINT32(&MF_MT_AVG_BITRATE, config.bitrate)
            .map_err(platform("SetUINT32"))?;
        output
            .SetUINT32(&MF_MT_INTERLACE_MODE, MFVideoInterlace_Progressive.0 as u32)
            .map_err(platform("SetUINT32"))?;
        output
            .SetUINT32(&MF_MT_MPEG2_PROFILE, config.profile.profile_idc())
            .map_err(platform("SetUINT32"))?;
        set_attribute_size(&output, &MF_MT_FRAME_SIZE, config.output_size)
            .map_err(platform("MF_MT_FRAME_SIZE"))?;
        set_attribute_ratio(&output, &MF_MT_FRAME_RATE, config.fps, 1)
            .map_err(platform("MF_MT_FRAME_RATE"))?;
        set_attribute_ratio(&output, &MF_MT_PIXEL_ASPECT_RATIO, 1, 1)
            .map_err(platform("MF_MT_PIXEL_ASPECT_RATIO"))?;

        let stream = writer
            .AddStream(&output)
            .map_err(platform("IMFSinkWriter::AddStream"))?;

        let input = MFCreateMediaType().map_err(platform("MFCreateMediaType"))?;
        input
            .SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Video)
            .map_err(platform("SetGUID"))?;
        input
            .SetGUID(&MF_MT_SUBTYPE, &MFVideoFormat_ARGB32)
            .map_err(platform("SetGUID"))?;
        input
            .SetUINT32(&MF_MT_INTERLACE_MODE, MFVideoInterlace_Progressive.0 as u32)
            .map_err(platform("SetUINT32"))?;
        set_attribute_size(&input, &MF_MT_FRAME_SIZE, config.input_size)
            .map_err(platform("MF_MT_FRAME_SIZE"))?;
        set_attribute_ratio(&input, &MF_MT_FRAME_RATE, config.fps, 1)
            .map_err(platform("MF_MT_FRAME_RATE"))?;
        set_attribute_ratio(&input, &MF_MT_PIXEL_ASPECT_RATIO, 1, 1)
            .map_err(platform("MF_MT_PIXEL_ASPECT_RATIO"))?;

        let mut params = None;
        MFCreateAttributes(&mut params, 2).map_err(platform("MFCreateAttributes"))?;
        let params = params.ok_or_else(|| {
            EncoderError::VideoEncodingFailed("no encoding parameters".to_string())
        })?;
        params
            .SetUINT32(
                &CODECAPI_AVEncCommonRateControlMode,
                config.rate_control.mode_value(),
            )
            .map_err(platform("SetUINT32"))?;
        if config.rate_control == crate::RateControl::Quality {
            params
                .SetUINT32(&CODECAPI_AVEncCommonQuality, config.quality)
                .map_err(platform("SetUINT32"))?;
        }

        writer
            .SetInputMediaType(stream, &input, &params)
            .map_err(platform("IMFSinkWriter::SetInputMediaType(video)"))?;

        Ok(stream)
    }
}

unsafe fn add_audio_stream(writer: &IMFSinkWriter, config: &AudioEncoderConfig) -> Result<u32> {
    unsafe {
        let output = MFCreateMediaType().map_err(platform("MFCreateMediaType"))?;
        output
            .SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Audio)
            .map_err(platform("SetGUID"))?;
        output
            .SetGUID(&MF_MT_SUBTYPE, &MFAudioFormat_AAC)
            .map_err(platform("SetGUID"))?;
        output
            .SetUINT32(&MF_MT_AUDIO_BITS_PER_SAMPLE, 16)
            .map_err(platform("SetUINT32"))?;
        output
            .SetUINT32(&MF_MT_AUDIO_SAMPLES_PER_SECOND, config.sample_rate)
            .map_err(platform("SetUINT32"))?;
        output
            .SetUINT32(&MF_MT_AUDIO_NUM_CHANNELS, config.channels as u32)
            .map_err(platform("SetUINT32"))?;
        output
            .SetUINT32(&MF_MT_AUDIO_AVG_BYTES_PER_SECOND, config.bitrate / 8)
            .map_err(platform("SetUINT32"))?;

        let stream = writer
            .AddStream(&output)
            .map_err(platform("IMFSinkWriter::AddStream"))?;

        let input = MFCreateMediaType().map_err(platform("MFCreateMediaType"))?;
        input
            .SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Audio)
            .map_err(platform("SetGUID"))?;
        input
            .SetGUID(&MF_MT_SUBTYPE, &MFAudioFormat_PCM)
            .map_err(platform("SetGUID"))?;
        input
            .SetUINT32(&MF_MT_AUDIO_BITS_PER_SAMPLE, 16)
            .map_err(platform("SetUINT32"))?;
        input
            .SetUINT32(&MF_MT_AUDIO_SAMPLES_PER_SECOND, config.sample_rate)
            .map_err(platform("SetUINT32"))?;
        input
            .SetUINT32(&MF_MT_AUDIO_NUM_CHANNELS, config.channels as u32)
            .map_err(platform("SetUINT32"))?;
        input
            .SetUINT32(&MF_MT_AUDIO_BLOCK_ALIGNMENT, config.block_align())
            .map_err(platform("SetUINT32"))?;
        input
            .SetUINT32(
                &MF_MT_AUDIO_AVG_BYTES_PER_SECOND,
                config.block_align() * config.sample_rate,
            )
            .map_err(platform("SetUINT32"))?;

        writer
            .SetInputMediaType(stream, &input, None::<&IMFAttributes>)
            .map_err(platform("IMFSinkWriter::SetInputMediaType(audio)"))?;

        Ok(stream)
    }
}

impl EncoderSink for MfSinkWriter {
    type Texture = ID3D11Texture2D;

    fn write_video(&mut self, texture: &ID3D11Texture2D, start: i64, duration: i64) -> Result<()> {
        unsafe {
            let buffer = MFCreateDXGISurfaceBuffer(&ID3D11Texture2D::IID, texture, 0, false)
                .map_err(platform("MFCreateDXGISurfaceBuffer"))?;
            let buffer_2d: IMF2DBuffer = buffer.cast().map_err(platform("IMFMediaBuffer::cast"))?;
            let len = buffer_2d
                .GetContiguousLength()
                .map_err(platform("IMF2DBuffer::GetContiguousLength"))?;
            buffer
                .SetCurrentLength(len)
                .map_err(platform("IMFMediaBuffer::SetCurrentLength"))?;

            let sample = MFCreateSample().map_err(platform("MFCreateSample"))?;
            sample.AddBuffer(&buffer).map_err(platform("AddBuffer"))?;
            sample.SetSampleTime(start).map_err(platform("SetSampleTime"))?;
            sample
                .SetSampleDuration(duration)
                .map_err(platform("SetSampleDuration"))?;

            self.writer
                .WriteSample(self.video_stream, &sample)
                .map_err(|e| {
                    EncoderError::VideoEncodingFailed(format!(
                        "WriteSample at {start}: {} (HRESULT=0x{:08X})",
                        e.message(),
                        e.code().0
                    ))
                })
        }
    }

    fn write_audio(&mut self, pcm: &[u8], start: i64, duration: i64) -> Result<()> {
        let Some(stream) = self.audio_stream else {
            return Ok(());
        };
        if pcm.is_empty() {
            return Ok(());
        }

        unsafe {
            let buffer = MFCreateMemoryBuffer(pcm.len() as u32)
                .map_err(platform("MFCreateMemoryBuffer"))?;
            let mut data = std::ptr::null_mut();
            buffer
                .Lock(&mut data, None, None)
                .map_err(platform("IMFMediaBuffer::Lock"))?;
            std::ptr::copy_nonoverlapping(pcm.as_ptr(), data, pcm.len());
            buffer.Unlock().map_err(platform("IMFMediaBuffer::Unlock"))?;
            buffer
                .SetCurrentLength(pcm.len() as u32)
                .map_err(platform("IMFMediaBuffer::SetCurrentLength"))?;

            let sample = MFCreateSample().map_err(platform("MFCreateSample"))?;
            sample.AddBuffer(&buffer).map_err(platform("AddBuffer"))?;
            sample.SetSampleTime(start).map_err(platform("SetSampleTime"))?;
            sample
                .SetSampleDuration(duration)
                .map_err(platform("SetSampleDuration"))?;

            self.writer.WriteSample(stream, &sample).map_err(|e| {
                EncoderError::AudioEncodingFailed(format!(
                    "WriteSample at {start}: {} (HRESULT=0x{:08X})",
                    e.message(),
                    e.code().0
                ))
            })
        }
    }

    fn place_marker(&mut self) -> Result<()> {
        unsafe {
            self.writer
                .PlaceMarker(self.video_stream, std::ptr::null())
                .map_err(platform("IMFSinkWriter::PlaceMarker"))
        }
    }

    fn wait_for_marker(&mut self, timeout: Duration) -> Result<bool> {
        Ok(self.callback.marker.wait(timeout))
    }

    fn set_source_rect(&mut self, rect: Rectangle, input_size: LogicalSize) -> Result<()> {
        let Some(processor) = self.video_processor()? else {
            log::warn!("no video processor in the sink writer, keeping source rectangle");
            return Ok(());
        };

        let clipped = rect
            .intersect(&Rectangle::from_size(input_size))
            .unwrap_or_else(|| Rectangle::from_size(input_size));
        let native = RECT {
            left: clipped.x,
            top: clipped.y,
            right: clipped.right(),
            bottom: clipped.bottom(),
        };

        log::debug!("video processor source rectangle: {clipped:?}");
        unsafe {
            processor
                .SetSourceRectangle(Some(&native as *const RECT))
                .map_err(platform("IMFVideoProcessorControl::SetSourceRectangle"))
        }
    }

    fn finalize(&mut self, timeout: Duration) -> Result<EncodedOutput> {
        if !self.finalized {
            self.finalized = true;
            unsafe { self.writer.Finalize() }.map_err(platform("IMFSinkWriter::Finalize"))?;

            if !self.callback.finalized.wait(timeout) {
                return Err(EncoderError::FinalizeTimeout);
            }

            let status = HRESULT(self.callback.finalize_status.load(Ordering::Acquire));
            if status.is_err() {
                return Err(EncoderError::Platform {
                    code: status.0,
                    message: "sink writer finalize completed with an error".to_string(),
                });
            }
            log::info!("media foundation sink writer finalized");
        }

        match &self.target {
            OutputTarget::File(path) => Ok(EncodedOutput::File(path.clone())),
            OutputTarget::Memory => Ok(EncodedOutput::Memory(self.read_memory_output()?)),
        }
    }
}
