//! Screen capture, deduplication and per-viewer adaptive streaming.

pub mod capture;
pub mod encoder;
pub mod quality;
pub mod session;
pub mod similarity;
pub mod types;

pub use capture::{DesktopLocator, DxgiCapturer, ScreenGrabber, SharedGrabber, WindowLocator};
pub use encoder::{FrameEncoder, JpegEncoder};
pub use quality::{SessionQualityState, TrafficMeter};
pub use session::{AdaptiveVideoSession, CycleOutcome, SessionConfig, SessionHandle, SessionState};
pub use similarity::FrameComparator;
pub use types::{Point, Rect, VideoFrame};
