//! Loopback audio capture, normalization and fan-out.

pub mod device;
pub mod format;
pub mod hub;
pub mod normalizer;
pub mod supervisor;

pub use device::{AudioDevice, CpalLoopbackDevice, PullResult};
pub use format::AudioFormatDescriptor;
pub use hub::{BroadcastHub, SubscriberId};
pub use normalizer::{AudioNormalizer, CanonicalAudioPacket, RawAudioBlock};
pub use supervisor::{AudioCaptureSupervisor, SupervisorConfig, SupervisorState, SupervisorStateHandle};
