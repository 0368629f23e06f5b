//! # Microphone Access
//!
//! Opens the input device and turns its data callbacks into a stream of raw
//! chunks. The device is held exclusively for one recording and released as
//! soon as the stream's guard is dropped.
//!
//! ## Implementations:
//! - **CpalMicrophone** (feature `microphone`): system input device through cpal
//! - **UnavailableMicrophone**: always reports `DeviceUnavailable`; used when the
//!   binary is built without microphone support

use crate::audio::buffer::CaptureFormat;
use crate::error::{ClientError, ClientResult};
use std::sync::mpsc::Receiver;
use tracing::warn;

/// Which input device to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// The system default input device
    #[default]
    Default,
    /// A device whose name matches exactly
    Named(String),
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("Device name cannot be empty".to_string());
        }
        match trimmed.to_lowercase().as_str() {
            "default" | "auto" => Ok(DevicePreference::Default),
            _ => Ok(DevicePreference::Named(trimmed.to_string())),
        }
    }
}

/// Parse a device preference from configuration, falling back to the default device.
pub fn preference_from_config(device: &str) -> DevicePreference {
    match device.parse::<DevicePreference>() {
        Ok(preference) => preference,
        Err(e) => {
            warn!("Invalid device preference '{}' ({}), using default", device, e);
            DevicePreference::Default
        }
    }
}

/// Releases the underlying device when dropped.
///
/// ## Rust Concepts:
/// - **Trait object**: each implementation keeps whatever handle it needs alive
/// - **Drop**: releasing in `Drop` means the device is freed on every exit path,
///   including early returns and panics
pub trait DeviceGuard: Send {}

/// An open microphone: its format, the chunk feed, and the guard keeping it open.
pub struct MicrophoneStream {
    /// Shape of every chunk on `chunks`
    pub format: CaptureFormat,

    /// Interleaved little-endian f32 chunks, in capture order
    pub chunks: Receiver<Vec<u8>>,

    guard: Box<dyn DeviceGuard>,
}

impl MicrophoneStream {
    pub fn new(format: CaptureFormat, chunks: Receiver<Vec<u8>>, guard: Box<dyn DeviceGuard>) -> Self {
        Self { format, chunks, guard }
    }

    /// Stop the device and return everything it delivered.
    ///
    /// The guard is dropped first, so the device is released before the caller
    /// spends any time decoding.
    pub fn finish(self) -> (CaptureFormat, Vec<Vec<u8>>) {
        let MicrophoneStream { format, chunks, guard } = self;
        // Releasing can join a device thread
        run_blocking(move || drop(guard));
        let collected = chunks.try_iter().collect();
        (format, collected)
    }
}

/// Something that can be opened for exclusive recording.
pub trait Microphone: Send {
    /// Request the device. Fails with `DeviceUnavailable` when permission is
    /// denied or there is no device; callers report this and do not retry.
    fn open(&mut self) -> ClientResult<MicrophoneStream>;
}

/// Microphone used when the binary was built without the `microphone` feature.
#[derive(Debug, Default)]
pub struct UnavailableMicrophone;

impl Microphone for UnavailableMicrophone {
    fn open(&mut self) -> ClientResult<MicrophoneStream> {
        Err(ClientError::DeviceUnavailable(
            "built without microphone support (enable the `microphone` feature)".to_string(),
        ))
    }
}

/// Run a blocking device call from code that may be on the async runtime.
///
/// On a multi-threaded runtime the current worker hands its other tasks off
/// first (`block_in_place`), so streaming frames keep moving while the device
/// opens or closes. On a current-thread runtime or outside tokio `f` runs inline.
pub fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Build the microphone for this binary.
pub fn system_microphone(preference: DevicePreference) -> Box<dyn Microphone> {
    #[cfg(feature = "microphone")]
    {
        Box::new(cpal_input::CpalMicrophone::new(preference))
    }
    #[cfg(not(feature = "microphone"))]
    {
        tracing::debug!(?preference, "Microphone support not compiled in");
        Box::new(UnavailableMicrophone)
    }
}

#[cfg(feature = "microphone")]
pub mod cpal_input {
    //! cpal-backed microphone.
    //!
    //! `cpal::Stream` is not `Send`, so each recording gets a dedicated thread
    //! that builds the stream, reports the format back, and parks until the
    //! guard asks it to stop. Dropping the stream on that thread releases the device.

    use super::{run_blocking, DeviceGuard, DevicePreference, Microphone, MicrophoneStream};
    use crate::audio::buffer::CaptureFormat;
    use crate::error::{ClientError, ClientResult};
    use byteorder::{LittleEndian, WriteBytesExt};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::mpsc;
    use std::thread::JoinHandle;
    use tracing::{debug, error, info};

    pub struct CpalMicrophone {
        preference: DevicePreference,
    }

    impl CpalMicrophone {
        pub fn new(preference: DevicePreference) -> Self {
            Self { preference }
        }
    }

    struct CpalGuard {
        stop_tx: Option<mpsc::Sender<()>>,
        thread: Option<JoinHandle<()>>,
    }

    impl DeviceGuard for CpalGuard {}

    impl Drop for CpalGuard {
        fn drop(&mut self) {
            if let Some(tx) = self.stop_tx.take() {
                let _ = tx.send(());
            }
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
            debug!("Microphone released");
        }
    }

    fn find_device(preference: &DevicePreference) -> ClientResult<cpal::Device> {
        let host = cpal::default_host();
        match preference {
            DevicePreference::Default => host
                .default_input_device()
                .ok_or_else(|| ClientError::DeviceUnavailable("no default input device".into())),
            DevicePreference::Named(name) => {
                let devices = host
                    .input_devices()
                    .map_err(|e| ClientError::DeviceUnavailable(e.to_string()))?;
                for device in devices {
                    if device.name().map(|n| &n == name).unwrap_or(false) {
                        return Ok(device);
                    }
                }
                Err(ClientError::DeviceUnavailable(format!("no input device named '{}'", name)))
            }
        }
    }

    fn encode_chunk<I: Iterator<Item = f32>>(samples: I, len: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(len * 4);
        for s in samples {
            let _ = bytes.write_f32::<LittleEndian>(s);
        }
        bytes
    }

    fn build_stream(
        device: &cpal::Device,
        chunk_tx: mpsc::Sender<Vec<u8>>,
    ) -> ClientResult<(cpal::Stream, CaptureFormat)> {
        let supported = device
            .default_input_config()
            .map_err(|e| ClientError::DeviceUnavailable(e.to_string()))?;
        let format = CaptureFormat {
            sample_rate: supported.sample_rate().0,
            channels: supported.channels(),
        };
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let err_fn = |err: cpal::StreamError| error!("Microphone stream error: {}", err);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = chunk_tx.send(encode_chunk(data.iter().copied(), data.len()));
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats = data.iter().map(|&s| s as f32 / 32768.0);
                    let _ = chunk_tx.send(encode_chunk(floats, data.len()));
                },
                err_fn,
                None,
            ),
            other => {
                return Err(ClientError::DeviceUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| ClientError::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ClientError::DeviceUnavailable(e.to_string()))?;
        Ok((stream, format))
    }

    impl Microphone for CpalMicrophone {
        fn open(&mut self) -> ClientResult<MicrophoneStream> {
            let (chunk_tx, chunk_rx) = mpsc::channel();
            let (ready_tx, ready_rx) = mpsc::channel::<ClientResult<CaptureFormat>>();
            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            let preference = self.preference.clone();

            let thread = std::thread::spawn(move || {
                let built = find_device(&preference).and_then(|d| build_stream(&d, chunk_tx));
                match built {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        // Blocks until the guard sends stop or is dropped
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            });

            let format = run_blocking(|| ready_rx.recv())
                .map_err(|_| ClientError::DeviceUnavailable("microphone thread exited".into()))??;
            info!(sample_rate = format.sample_rate, channels = format.channels, "Microphone opened");

            let guard = CpalGuard { stop_tx: Some(stop_tx), thread: Some(thread) };
            Ok(MicrophoneStream::new(format, chunk_rx, Box::new(guard)))
        }
    }
}
