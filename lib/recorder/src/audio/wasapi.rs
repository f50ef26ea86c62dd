//! WASAPI capture of an input endpoint or the loopback of an output endpoint.

use super::{AudioCaptureDevice, AudioDirection};
use crate::AudioCaptureError;
use audio_utils::{AudioByteQueue, PcmFormat, Resampler, create_resampler, pcm};
use crossbeam::channel::bounded;
use screen_capture_windows::CoInitGuard;
use spin_sleep::SpinSleeper;
use std::{
    collections::BTreeMap,
    ffi::c_void,
    ptr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use windows::{
    Win32::{
        Devices::FunctionDiscovery::PKEY_Device_FriendlyName,
        Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT},
        Media::Audio::{
            AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_LOOPBACK, DEVICE_STATE_ACTIVE, EDataFlow,
            IAudioCaptureClient, IAudioClient, IMMDevice, IMMDeviceEnumerator,
            MMDeviceEnumerator, WAVEFORMATEX, WAVEFORMATEXTENSIBLE, eCapture, eConsole, eRender,
        },
        System::{
            Com::{CLSCTX_ALL, CoCreateInstance, CoTaskMemFree, STGM_READ},
            Threading::{
                CREATE_WAITABLE_TIMER_HIGH_RESOLUTION, CreateEventW, CreateWaitableTimerExW,
                SetEvent, SetWaitableTimer, TIMER_ALL_ACCESS, WaitForMultipleObjects,
            },
        },
    },
    core::{GUID, HSTRING, PCWSTR, PROPVARIANT},
};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;
const KSDATAFORMAT_SUBTYPE_PCM: GUID = GUID::from_u128(0x00000001_0000_0010_8000_00aa00389b71);
const KSDATAFORMAT_SUBTYPE_IEEE_FLOAT: GUID =
    GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);

const BUFFERFLAGS_DATA_DISCONTINUITY: u32 = 0x1;
const BUFFERFLAGS_SILENT: u32 = 0x2;

/// Shared-mode buffer requested from the engine, 1s in 100ns units.
const BUFFER_DURATION: i64 = 10_000_000;
/// Seconds of audio a queue holds before dropping the oldest frames.
const QUEUE_SECONDS: usize = 10;
const START_TIMEOUT: Duration = Duration::from_secs(5);
const VT_LPWSTR: u16 = 31;

fn platform(context: &'static str) -> impl Fn(windows::core::Error) -> AudioCaptureError {
    move |e| AudioCaptureError::from_hresult(e.code().0, format!("{context} failed: {e}"))
}

fn com_error(e: screen_capture::CaptureError) -> AudioCaptureError {
    match e {
        screen_capture::CaptureError::Platform { code, message } => {
            AudioCaptureError::Platform { code, message }
        }
        e => AudioCaptureError::Platform {
            code: 0,
            message: e.to_string(),
        },
    }
}

fn data_flow(direction: AudioDirection) -> EDataFlow {
    match direction {
        AudioDirection::Output => eRender,
        AudioDirection::Input => eCapture,
    }
}

/// An owned Win32 event or timer handle.
struct OwnedHandle(HANDLE);

// SAFETY: kernel object handles may be waited on and signaled from any thread.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CloseHandle(self.0) } {
            log::debug!("CloseHandle failed: {e}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    Float32,
    Int16,
}

#[derive(Debug, Clone, Copy)]
struct DeviceFormat {
    kind: SampleKind,
    pcm: PcmFormat,
    block_align: usize,
}

/// Map a mix format onto the sample layouts the engine hands out in shared mode.
fn sample_kind(tag: u16, bits: u16, subformat: Option<GUID>) -> Option<SampleKind> {
    let tag = match (tag, subformat) {
        (WAVE_FORMAT_EXTENSIBLE, Some(sub)) if sub == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT => {
            WAVE_FORMAT_IEEE_FLOAT
        }
        (WAVE_FORMAT_EXTENSIBLE, Some(sub)) if sub == KSDATAFORMAT_SUBTYPE_PCM => WAVE_FORMAT_PCM,
        (tag, _) => tag,
    };

    match (tag, bits) {
        (WAVE_FORMAT_IEEE_FLOAT, 32) => Some(SampleKind::Float32),
        (WAVE_FORMAT_PCM, 16) => Some(SampleKind::Int16),
        _ => None,
    }
}

unsafe fn describe_format(format: *const WAVEFORMATEX) -> Result<DeviceFormat, AudioCaptureError> {
    let wave = unsafe { ptr::read_unaligned(format) };
    let subformat = if wave.wFormatTag == WAVE_FORMAT_EXTENSIBLE && wave.cbSize >= 22 {
        let extensible = format as *const WAVEFORMATEXTENSIBLE;
        Some(unsafe { ptr::read_unaligned(ptr::addr_of!((*extensible).SubFormat)) })
    } else {
        None
    };

    let kind = sample_kind(wave.wFormatTag, wave.wBitsPerSample, subformat).ok_or_else(|| {
        AudioCaptureError::Format(format!(
            "mix format tag 0x{:04X} with {} bits per sample",
            wave.wFormatTag, wave.wBitsPerSample
        ))
    })?;

    Ok(DeviceFormat {
        kind,
        pcm: PcmFormat::i16(wave.nSamplesPerSec, wave.nChannels),
        block_align: wave.nBlockAlign as usize,
    })
}

unsafe fn open_device(
    direction: AudioDirection,
    device_id: &str,
) -> Result<IMMDevice, AudioCaptureError> {
    let enumerator: IMMDeviceEnumerator =
        unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
            .map_err(platform("CoCreateInstance(MMDeviceEnumerator)"))?;

    if device_id.is_empty() {
        unsafe { enumerator.GetDefaultAudioEndpoint(data_flow(direction), eConsole) }.map_err(
            |e| AudioCaptureError::DeviceNotFound(format!("default {direction:?} endpoint: {e}")),
        )
    } else {
        unsafe { enumerator.GetDevice(&HSTRING::from(device_id)) }
            .map_err(|e| AudioCaptureError::DeviceNotFound(format!("{device_id}: {e}")))
    }
}

/// An initialized, started audio client.
struct CaptureStream {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    format: DeviceFormat,
    /// Default engine period in 100ns units.
    period: i64,
    resampler: Option<Box<dyn Resampler>>,
    next_position: Option<u64>,
}

impl CaptureStream {
    fn open(
        direction: AudioDirection,
        device_id: &str,
        target: PcmFormat,
    ) -> Result<Self, AudioCaptureError> {
        unsafe {
            let device = open_device(direction, device_id)?;
            let client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(platform("IMMDevice::Activate(IAudioClient)"))?;

            let mix = client
                .GetMixFormat()
                .map_err(platform("IAudioClient::GetMixFormat"))?;
            let format = describe_format(mix);

            let mut period = 0i64;
            let initialized = client
                .GetDevicePeriod(Some(&mut period), None)
                .map_err(platform("IAudioClient::GetDevicePeriod"))
                .and_then(|_| {
                    let flags = match direction {
                        AudioDirection::Output => AUDCLNT_STREAMFLAGS_LOOPBACK,
                        AudioDirection::Input => 0,
                    };
                    client
                        .Initialize(AUDCLNT_SHAREMODE_SHARED, flags, BUFFER_DURATION, 0, mix, None)
                        .map_err(platform("IAudioClient::Initialize"))
                });
            CoTaskMemFree(Some(mix as *const c_void));

            let format = format?;
            initialized?;

            let capture: IAudioCaptureClient = client
                .GetService()
                .map_err(platform("IAudioClient::GetService(IAudioCaptureClient)"))?;

            let resampler = create_resampler(format.pcm, target)?;
            client.Start().map_err(platform("IAudioClient::Start"))?;

            log::info!(
                "{direction:?} audio capture started: {:?} {}Hz/{}ch, period {}us",
                format.kind,
                format.pcm.sample_rate,
                format.pcm.channels,
                period / 10
            );

            Ok(Self {
                client,
                capture,
                format,
                period: period.max(10_000),
                resampler,
                next_position: None,
            })
        }
    }

    /// Drain every packet the engine has queued.
    fn drain(&mut self, queue: &AudioByteQueue) -> Result<(), AudioCaptureError> {
        loop {
            let packet = unsafe { self.capture.GetNextPacketSize() }
                .map_err(platform("IAudioCaptureClient::GetNextPacketSize"))?;
            if packet == 0 {
                return Ok(());
            }

            let mut data: *mut u8 = ptr::null_mut();
            let mut frames = 0u32;
            let mut flags = 0u32;
            let mut position = 0u64;
            unsafe {
                self.capture.GetBuffer(
                    &mut data,
                    &mut frames,
                    &mut flags,
                    Some(&mut position),
                    None,
                )
            }
            .map_err(platform("IAudioCaptureClient::GetBuffer"))?;

            let result = self.process_packet(data, frames, flags, position, queue);

            unsafe { self.capture.ReleaseBuffer(frames) }
                .map_err(platform("IAudioCaptureClient::ReleaseBuffer"))?;
            result?;
        }
    }

    fn process_packet(
        &mut self,
        data: *const u8,
        frames: u32,
        flags: u32,
        position: u64,
        queue: &AudioByteQueue,
    ) -> Result<(), AudioCaptureError> {
        let channels = self.format.pcm.channels as usize;
        let mut samples = Vec::with_capacity(frames as usize * channels);

        // Backfill what the engine dropped so audio stays aligned with video.
        if flags & BUFFERFLAGS_DATA_DISCONTINUITY != 0
            && let Some(expected) = self.next_position
            && position > expected
        {
            let gap = (position - expected) as usize;
            log::debug!("audio discontinuity, padding {gap} frames");
            samples.resize(gap * channels, 0i16);
        }
        self.next_position = Some(position + frames as u64);

        if flags & BUFFERFLAGS_SILENT != 0 || data.is_null() {
            samples.resize(samples.len() + frames as usize * channels, 0);
        } else {
            let len = frames as usize * self.format.block_align;
            let bytes = unsafe { std::slice::from_raw_parts(data, len) };
            match self.format.kind {
                SampleKind::Int16 => samples.extend(pcm::bytes_to_i16(bytes)),
                SampleKind::Float32 => {
                    let mut converted = bytes.to_vec();
                    let len = pcm::f32_to_i16_in_place(&mut converted);
                    samples.extend(pcm::bytes_to_i16(&converted[..len]));
                }
            }
        }

        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&samples)?,
            None => samples,
        };
        queue.push(&pcm::i16_to_bytes(&samples));
        Ok(())
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.client.Stop() } {
            log::debug!("IAudioClient::Stop failed: {e}");
        }
    }
}

fn create_tick_timer(period: i64) -> Option<OwnedHandle> {
    let timer = unsafe {
        CreateWaitableTimerExW(
            None,
            PCWSTR::null(),
            CREATE_WAITABLE_TIMER_HIGH_RESOLUTION,
            TIMER_ALL_ACCESS.0,
        )
    };

    let timer = match timer {
        Ok(timer) => OwnedHandle(timer),
        Err(e) => {
            log::warn!("create audio timer failed, sleeping instead: {e}");
            return None;
        }
    };

    let half = period / 2;
    let due = -half;
    let period_ms = (half / 10_000).max(1) as i32;
    if let Err(e) = unsafe { SetWaitableTimer(timer.0, &due, period_ms, None, None, false) } {
        log::warn!("set audio timer failed, sleeping instead: {e}");
        return None;
    }
    Some(timer)
}

struct CaptureShared {
    queue: Arc<AudioByteQueue>,
    stop: Arc<AtomicBool>,
    stop_event: Arc<OwnedHandle>,
    failure: Arc<Mutex<Option<AudioCaptureError>>>,
}

fn run_capture(stream: &mut CaptureStream, shared: &CaptureShared) -> Result<(), AudioCaptureError> {
    let timer = create_tick_timer(stream.period);
    let half_period = Duration::from_nanos(stream.period as u64 * 50);
    let sleeper = SpinSleeper::default();

    while !shared.stop.load(Ordering::Relaxed) {
        match &timer {
            Some(timer) => {
                let handles = [shared.stop_event.0, timer.0];
                let wait_ms = (stream.period / 10_000 * 2).max(2) as u32;
                let result = unsafe { WaitForMultipleObjects(&handles, false, wait_ms) };
                if result == WAIT_OBJECT_0 {
                    break;
                }
                if result != WAIT_TIMEOUT && result.0 != WAIT_OBJECT_0.0 + 1 {
                    return Err(AudioCaptureError::Platform {
                        code: result.0 as i32,
                        message: "WaitForMultipleObjects failed".to_string(),
                    });
                }
            }
            None => sleeper.sleep(half_period),
        }

        stream.drain(&shared.queue)?;
    }

    Ok(())
}

/// One endpoint captured on a dedicated thread.
pub struct WasapiDevice {
    direction: AudioDirection,
    device_id: String,
    queue: Option<Arc<AudioByteQueue>>,
    stop: Arc<AtomicBool>,
    stop_event: Option<Arc<OwnedHandle>>,
    failure: Arc<Mutex<Option<AudioCaptureError>>>,
    thread: Option<JoinHandle<()>>,
}

impl WasapiDevice {
    /// An empty `device_id` selects the default endpoint.
    pub fn new(direction: AudioDirection, device_id: impl Into<String>) -> Self {
        Self {
            direction,
            device_id: device_id.into(),
            queue: None,
            stop: Arc::new(AtomicBool::new(false)),
            stop_event: None,
            failure: Arc::new(Mutex::new(None)),
            thread: None,
        }
    }
}

impl AudioCaptureDevice for WasapiDevice {
    fn start_capture(&mut self, format: PcmFormat) -> Result<(), AudioCaptureError> {
        format.validate()?;
        self.stop_capture();

        let stop_event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }
            .map_err(platform("CreateEventW"))?;
        let shared = CaptureShared {
            queue: Arc::new(
                AudioByteQueue::new(format.block_align())
                    .with_max_len(format.bytes_per_second() * QUEUE_SECONDS),
            ),
            stop: Arc::new(AtomicBool::new(false)),
            stop_event: Arc::new(OwnedHandle(stop_event)),
            failure: Arc::new(Mutex::new(None)),
        };

        self.queue = Some(shared.queue.clone());
        self.stop = shared.stop.clone();
        self.stop_event = Some(shared.stop_event.clone());
        self.failure = shared.failure.clone();

        let (ready_sender, ready_receiver) = bounded(1);
        let direction = self.direction;
        let device_id = self.device_id.clone();

        self.thread = Some(thread::spawn(move || {
            let opened = CoInitGuard::init_multithreaded()
                .map_err(com_error)
                .and_then(|com| Ok((com, CaptureStream::open(direction, &device_id, format)?)));

            let (_com, mut stream) = match opened {
                Ok(opened) => {
                    let _ = ready_sender.send(Ok(()));
                    opened
                }
                Err(e) => {
                    let _ = ready_sender.send(Err(e));
                    return;
                }
            };

            if let Err(e) = run_capture(&mut stream, &shared) {
                log::warn!("{direction:?} audio capture failed: {e}");
                if let Ok(mut failure) = shared.failure.lock() {
                    *failure = Some(e);
                }
            }

            drop(stream);
            log::info!("{direction:?} audio capture thread exit");
        }));

        match ready_receiver.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop_capture();
                Err(e)
            }
            Err(e) => {
                self.stop_capture();
                Err(AudioCaptureError::Platform {
                    code: 0,
                    message: format!("{:?} audio capture did not start: {e}", self.direction),
                })
            }
        }
    }

    fn recorded_bytes(&self) -> Result<Vec<u8>, AudioCaptureError> {
        if let Ok(failure) = self.failure.lock()
            && let Some(e) = failure.as_ref()
        {
            return Err(e.clone());
        }

        match &self.queue {
            Some(queue) => Ok(queue.drain_all()),
            None => Err(AudioCaptureError::NotRunning),
        }
    }

    fn return_bytes(&self, bytes: &[u8]) {
        if let Some(queue) = &self.queue {
            queue.return_to_front(bytes);
        }
    }

    fn clear(&self) {
        if let Some(queue) = &self.queue {
            queue.clear();
        }
    }

    fn stop_capture(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(event) = &self.stop_event
            && let Err(e) = unsafe { SetEvent(event.0) }
        {
            log::warn!("signal audio stop event failed: {e}");
        }

        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            log::warn!("join {:?} audio capture thread failed", self.direction);
        }

        self.stop_event = None;
        self.queue = None;
    }
}

impl Drop for WasapiDevice {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

unsafe fn device_id(device: &IMMDevice) -> Option<String> {
    let id = unsafe { device.GetId() }.ok()?;
    let text = unsafe { id.to_string() }.ok();
    unsafe { CoTaskMemFree(Some(id.0 as *const c_void)) };
    text
}

unsafe fn friendly_name(device: &IMMDevice) -> Option<String> {
    let store = unsafe { device.OpenPropertyStore(STGM_READ) }.ok()?;
    let value: PROPVARIANT = unsafe { store.GetValue(&PKEY_Device_FriendlyName) }.ok()?;

    let raw = unsafe { &value.as_raw().Anonymous.Anonymous };
    if raw.vt != VT_LPWSTR {
        return None;
    }
    let text = unsafe { raw.Anonymous.pwszVal };
    if text.is_null() {
        return None;
    }
    unsafe { PCWSTR(text).to_string() }.ok()
}

/// Active endpoints of one direction, id -> friendly name.
pub fn list_audio_devices(
    direction: AudioDirection,
) -> Result<BTreeMap<String, String>, AudioCaptureError> {
    let _com = CoInitGuard::init_multithreaded().map_err(com_error)?;
    let mut devices = BTreeMap::new();

    unsafe {
        let enumerator: IMMDeviceEnumerator =
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(platform("CoCreateInstance(MMDeviceEnumerator)"))?;
        let collection = enumerator
            .EnumAudioEndpoints(data_flow(direction), DEVICE_STATE_ACTIVE)
            .map_err(platform("IMMDeviceEnumerator::EnumAudioEndpoints"))?;
        let count = collection
            .GetCount()
            .map_err(platform("IMMDeviceCollection::GetCount"))?;

        for i in 0..count {
            let Ok(device) = collection.Item(i) else {
                continue;
            };
            let Some(id) = device_id(&device) else {
                continue;
            };
            let name = friendly_name(&device).unwrap_or_else(|| "Unknown Device".to_string());
            devices.insert(id, name);
        }
    }

    log::debug!("{direction:?} audio endpoints: {devices:?}");
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_kind() {
        assert_eq!(
            sample_kind(WAVE_FORMAT_IEEE_FLOAT, 32, None),
            Some(SampleKind::Float32)
        );
        assert_eq!(sample_kind(WAVE_FORMAT_PCM, 16, None), Some(SampleKind::Int16));
        assert_eq!(
            sample_kind(WAVE_FORMAT_EXTENSIBLE, 32, Some(KSDATAFORMAT_SUBTYPE_IEEE_FLOAT)),
            Some(SampleKind::Float32)
        );
        assert_eq!(sample_kind(WAVE_FORMAT_PCM, 24, None), None);
        assert_eq!(sample_kind(WAVE_FORMAT_EXTENSIBLE, 32, None), None);
    }
}
