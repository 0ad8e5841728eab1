//! Native audio sources.
//!
//! The supervisor only sees the [`AudioDevice`] trait. On Windows the
//! implementation is [`CpalLoopbackDevice`]: an input stream opened on the
//! default *output* device, which WASAPI serves as loopback capture of
//! whatever the machine is playing.

use crate::audio::format::AudioFormatDescriptor;
use crate::audio::normalizer::RawAudioBlock;
use crate::error::GhostError;

/// Result of a non-blocking pull.
#[derive(Debug)]
pub enum PullResult {
    /// A block of native samples.
    Block(RawAudioBlock),
    /// Nothing buffered right now; not an error.
    WouldBlock,
    /// The source finished and will produce nothing more.
    Ended,
}

/// A source of native-format audio blocks.
pub trait AudioDevice: Send {
    /// Start the device and report its native format.
    fn open(&mut self) -> Result<AudioFormatDescriptor, GhostError>;

    /// Take the next buffered block without waiting.
    fn pull_next_block(&mut self) -> Result<PullResult, GhostError>;

    /// Release the device. Called on every exit from a streaming session.
    fn close(&mut self) {}
}

// ── CpalLoopbackDevice ───────────────────────────────────────────

#[cfg(target_os = "windows")]
pub use platform::CpalLoopbackDevice;

#[cfg(target_os = "windows")]
mod platform {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam::channel::{Receiver, TryRecvError, bounded};
    use tracing::{debug, error, warn};

    use super::*;

    /// Blocks buffered between the stream callback and the supervisor.
    const BLOCK_BUFFER: usize = 64;

    /// WASAPI loopback capture of the default output device.
    ///
    /// `cpal::Stream` is not `Send`, so the stream lives on a dedicated
    /// thread; callback data reaches [`pull_next_block`](AudioDevice::pull_next_block)
    /// through a bounded channel.
    pub struct CpalLoopbackDevice {
        running: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
        blocks: Option<Receiver<Vec<u8>>>,
        errors: Option<Receiver<String>>,
        format: Option<AudioFormatDescriptor>,
    }

    impl CpalLoopbackDevice {
        pub fn new() -> Self {
            Self {
                running: Arc::new(AtomicBool::new(false)),
                thread: None,
                blocks: None,
                errors: None,
                format: None,
            }
        }

        fn describe(config: &cpal::SupportedStreamConfig) -> Result<AudioFormatDescriptor, GhostError> {
            let (bits, is_float) = match config.sample_format() {
                cpal::SampleFormat::F32 => (32, true),
                cpal::SampleFormat::I32 => (32, false),
                cpal::SampleFormat::I16 => (16, false),
                other => {
                    return Err(GhostError::Device(format!("unsupported sample format {other:?}")));
                }
            };
            AudioFormatDescriptor::new(config.sample_rate().0, config.channels(), bits, is_float)
        }
    }

    impl Default for CpalLoopbackDevice {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AudioDevice for CpalLoopbackDevice {
        fn open(&mut self) -> Result<AudioFormatDescriptor, GhostError> {
            self.close();

            let (block_tx, block_rx) = bounded::<Vec<u8>>(BLOCK_BUFFER);
            let (error_tx, error_rx) = bounded::<String>(16);
            let (ready_tx, ready_rx) = bounded::<Result<AudioFormatDescriptor, GhostError>>(1);

            let running = Arc::clone(&self.running);
            running.store(true, Ordering::SeqCst);

            let handle = thread::Builder::new()
                .name("audio-loopback".into())
                .spawn(move || {
                    let host = cpal::default_host();
                    let Some(device) = host.default_output_device() else {
                        let _ = ready_tx.send(Err(GhostError::Device("no default output device".into())));
                        return;
                    };
                    let supported = match device.default_output_config() {
                        Ok(c) => c,
                        Err(e) => {
                            let _ = ready_tx.send(Err(GhostError::Device(e.to_string())));
                            return;
                        }
                    };
                    let format = match Self::describe(&supported) {
                        Ok(f) => f,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    let config: cpal::StreamConfig = supported.config();
                    let stream = device.build_input_stream_raw(
                        &config,
                        supported.sample_format(),
                        move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                            // Drop on overflow; the supervisor is behind.
                            let _ = block_tx.try_send(data.bytes().to_vec());
                        },
                        move |err| {
                            let _ = error_tx.try_send(err.to_string());
                        },
                        None,
                    );
                    let stream = match stream {
                        Ok(s) => s,
                        Err(e) => {
                            let _ = ready_tx.send(Err(GhostError::Device(e.to_string())));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(GhostError::Device(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(format));

                    while running.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }
                    debug!("loopback stream stopped");
                })
                .map_err(|e| GhostError::Device(e.to_string()))?;
            self.thread = Some(handle);

            let format = match ready_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(Ok(format)) => format,
                Ok(Err(e)) => {
                    self.close();
                    return Err(e);
                }
                Err(_) => {
                    self.close();
                    return Err(GhostError::Device("loopback stream did not start".into()));
                }
            };

            self.blocks = Some(block_rx);
            self.errors = Some(error_rx);
            self.format = Some(format);
            Ok(format)
        }

        fn pull_next_block(&mut self) -> Result<PullResult, GhostError> {
            let (Some(blocks), Some(format)) = (self.blocks.as_ref(), self.format) else {
                return Err(GhostError::Device("device is not open".into()));
            };

            if let Some(errors) = self.errors.as_ref() {
                if let Ok(e) = errors.try_recv() {
                    error!("loopback stream error: {e}");
                    return Err(GhostError::Device(e));
                }
            }

            match blocks.try_recv() {
                Ok(bytes) => Ok(PullResult::Block(RawAudioBlock { bytes, format })),
                Err(TryRecvError::Empty) => Ok(PullResult::WouldBlock),
                Err(TryRecvError::Disconnected) => {
                    warn!("loopback stream ended");
                    Ok(PullResult::Ended)
                }
            }
        }

        fn close(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
            self.blocks = None;
            self.errors = None;
            self.format = None;
        }
    }

    impl Drop for CpalLoopbackDevice {
        fn drop(&mut self) {
            self.close();
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

/// Loopback capture is only implemented for WASAPI.
#[cfg(not(target_os = "windows"))]
#[derive(Debug, Default)]
pub struct CpalLoopbackDevice;

#[cfg(not(target_os = "windows"))]
impl CpalLoopbackDevice {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(target_os = "windows"))]
impl AudioDevice for CpalLoopbackDevice {
    fn open(&mut self) -> Result<AudioFormatDescriptor, GhostError> {
        Err(GhostError::Unsupported("loopback audio capture"))
    }

    fn pull_next_block(&mut self) -> Result<PullResult, GhostError> {
        Err(GhostError::Unsupported("loopback audio capture"))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn loopback_open_fails_off_windows() {
        let mut dev = CpalLoopbackDevice::new();
        assert!(matches!(dev.open(), Err(GhostError::Unsupported(_))));
        assert!(dev.pull_next_block().is_err());
        dev.close();
    }

    #[test]
    fn trait_objects_are_boxable() {
        struct Silent;
        impl AudioDevice for Silent {
            fn open(&mut self) -> Result<AudioFormatDescriptor, GhostError> {
                AudioFormatDescriptor::new(48_000, 2, 16, false)
            }
            fn pull_next_block(&mut self) -> Result<PullResult, GhostError> {
                Ok(PullResult::WouldBlock)
            }
        }

        let mut dev: Box<dyn AudioDevice> = Box::new(Silent);
        assert_eq!(dev.open().unwrap().sample_rate_hz, 48_000);
        assert!(matches!(dev.pull_next_block(), Ok(PullResult::WouldBlock)));
    }
}
