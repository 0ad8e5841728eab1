//! Screen capture collaborators.
//!
//! A session asks a [`WindowLocator`] where to look and a [`ScreenGrabber`]
//! for the pixels there. On Windows the grabber is [`DxgiCapturer`], built on
//! the Direct3D 11 Desktop Duplication API; several sessions share one
//! duplication through [`SharedGrabber`].

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::GhostError;
use crate::video::types::{Rect, VideoFrame};

// ── Traits ───────────────────────────────────────────────────────

/// Produces frames for a requested desktop region.
pub trait ScreenGrabber: Send {
    /// Grab the pixels inside `bounds`.
    ///
    /// Returns `None` for a zero-area request or a failed acquisition;
    /// the caller simply tries again next cycle.
    fn capture(&mut self, bounds: Rect) -> Option<VideoFrame>;

    /// Desktop area the grabber currently covers, when it knows one.
    fn desktop_area(&self) -> Option<Rect> {
        None
    }
}

/// Supplies the region a session should mirror.
pub trait WindowLocator: Send + Sync {
    fn target_bounds(&self) -> Option<Rect>;
}

// ── DesktopLocator ───────────────────────────────────────────────

/// Locator that always targets a fixed rectangle (normally the monitor).
///
/// The rectangle is behind a lock so the agent can retarget it while
/// sessions are running.
#[derive(Debug, Clone)]
pub struct DesktopLocator {
    bounds: Arc<Mutex<Rect>>,
}

impl DesktopLocator {
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds: Arc::new(Mutex::new(bounds)),
        }
    }

    /// Replace the target rectangle for every session using this locator.
    pub fn retarget(&self, bounds: Rect) {
        *self.bounds.lock() = bounds;
    }
}

impl WindowLocator for DesktopLocator {
    fn target_bounds(&self) -> Option<Rect> {
        let bounds = *self.bounds.lock();
        if bounds.is_empty() { None } else { Some(bounds) }
    }
}

// ── Cropping ─────────────────────────────────────────────────────

/// Cut `bounds` out of a BGRA desktop image and convert it to RGBA.
///
/// `desktop` holds `desktop_bounds.height()` rows of `stride` bytes. The
/// request is clipped to the desktop first; `None` when nothing remains.
pub fn crop_to_rgba(
    desktop: &[u8],
    stride: usize,
    desktop_bounds: Rect,
    bounds: Rect,
) -> Option<VideoFrame> {
    let clip = desktop_bounds.intersect(&bounds)?;
    let width = clip.width() as usize;
    let height = clip.height() as usize;
    let x0 = (clip.left - desktop_bounds.left) as usize;
    let y0 = (clip.top - desktop_bounds.top) as usize;

    if stride < (x0 + width) * 4 || desktop.len() < (y0 + height) * stride {
        return None;
    }

    let mut pixels = Vec::with_capacity(width * height * 4);
    for row in y0..y0 + height {
        let start = row * stride + x0 * 4;
        for bgra in desktop[start..start + width * 4].chunks_exact(4) {
            pixels.extend_from_slice(&[bgra[2], bgra[1], bgra[0], 255]);
        }
    }

    Some(VideoFrame::new(clip, pixels))
}

// ── SharedGrabber ────────────────────────────────────────────────

/// One grabber shared by many sessions.
///
/// The lock is held only for the duration of a single capture.
pub struct SharedGrabber<G> {
    inner: Arc<Mutex<G>>,
}

impl<G: ScreenGrabber> SharedGrabber<G> {
    pub fn new(grabber: G) -> Self {
        Self {
            inner: Arc::new(Mutex::new(grabber)),
        }
    }
}

impl<G> Clone for SharedGrabber<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: ScreenGrabber> ScreenGrabber for SharedGrabber<G> {
    fn capture(&mut self, bounds: Rect) -> Option<VideoFrame> {
        self.inner.lock().capture(bounds)
    }

    fn desktop_area(&self) -> Option<Rect> {
        self.inner.lock().desktop_area()
    }
}

/// A shared grabber doubles as a locator for its whole desktop, so sessions
/// follow a mode change the grabber picks up.
impl<G: ScreenGrabber> WindowLocator for SharedGrabber<G> {
    fn target_bounds(&self) -> Option<Rect> {
        self.desktop_area().filter(|r| !r.is_empty())
    }
}

// ── DxgiCapturer ─────────────────────────────────────────────────

/// DXGI desktop duplication grabber.
///
/// 1. Create a D3D11 device and duplicate the target monitor.
/// 2. Create a CPU-readable staging texture.
/// 3. On each capture: `AcquireNextFrame`, copy into the staging texture,
///    map it and keep the BGRA rows as the cached desktop.
/// 4. Crop the cached desktop to the requested bounds.
///
/// When the compositor reports no new frame before the timeout the cached
/// desktop is served again, so a still screen produces byte-identical
/// frames. When the duplication is lost (mode change, secure desktop,
/// fullscreen switch) it is re-created on the next capture and
/// `desktop_bounds` follows the new mode.
pub struct DxgiCapturer {
    desktop_bounds: Rect,
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    monitor_index: u32,
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    timeout_ms: u32,
    /// Last desktop image (BGRA) and its row pitch.
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    cached: Option<(Vec<u8>, usize)>,

    /// `None` after access was lost and before a rebuild succeeded.
    #[cfg(target_os = "windows")]
    duplication: Option<platform::Duplication>,
}

// SAFETY: the COM interfaces are only touched through `&mut self`, and
// every access goes through the `SharedGrabber` mutex, so no two threads
// use them at once.
#[cfg(target_os = "windows")]
unsafe impl Send for DxgiCapturer {}

impl DxgiCapturer {
    /// Desktop rectangle of the duplicated monitor.
    pub fn desktop_bounds(&self) -> Rect {
        self.desktop_bounds
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use tracing::{debug, info, warn};
    use windows::{
        Win32::Graphics::{
            Direct3D::D3D_DRIVER_TYPE_HARDWARE,
            Direct3D11::*,
            Dxgi::{Common::*, *},
        },
        core::Interface,
    };

    enum Acquire {
        Fresh,
        Unchanged,
        Lost,
    }

    /// Device objects for one duplicated output.
    pub(super) struct Duplication {
        context: ID3D11DeviceContext,
        output: IDXGIOutputDuplication,
        staging_texture: ID3D11Texture2D,
        bounds: Rect,
    }

    impl Duplication {
        unsafe fn open(monitor_index: u32) -> Result<Self, GhostError> {
            let mut device = None;
            let mut context = None;
            unsafe {
                D3D11CreateDevice(
                    None,
                    D3D_DRIVER_TYPE_HARDWARE,
                    None,
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    None,
                    D3D11_SDK_VERSION,
                    Some(&mut device),
                    None,
                    Some(&mut context),
                )
                .map_err(|e| GhostError::Capture(format!("D3D11CreateDevice failed: {e}")))?;
            }

            let device: ID3D11Device =
                device.ok_or_else(|| GhostError::Capture("D3D11 device is None".into()))?;
            let context =
                context.ok_or_else(|| GhostError::Capture("D3D11 context is None".into()))?;

            let dxgi_device: IDXGIDevice = device
                .cast()
                .map_err(|e| GhostError::Capture(format!("cast to IDXGIDevice failed: {e}")))?;
            let adapter = unsafe {
                dxgi_device
                    .GetAdapter()
                    .map_err(|e| GhostError::Capture(format!("GetAdapter failed: {e}")))?
            };
            let output: IDXGIOutput = unsafe {
                adapter.EnumOutputs(monitor_index).map_err(|e| {
                    GhostError::Capture(format!("EnumOutputs({monitor_index}) failed: {e}"))
                })?
            };
            let out_desc = unsafe {
                output
                    .GetDesc()
                    .map_err(|e| GhostError::Capture(format!("GetDesc failed: {e}")))?
            };
            let coords = out_desc.DesktopCoordinates;

            let output1: IDXGIOutput1 = output
                .cast()
                .map_err(|e| GhostError::Capture(format!("cast to IDXGIOutput1 failed: {e}")))?;
            let duplication = unsafe {
                output1
                    .DuplicateOutput(&device)
                    .map_err(|e| GhostError::Capture(format!("DuplicateOutput failed: {e}")))?
            };

            let dup_desc = unsafe { duplication.GetDesc() };
            let width = dup_desc.ModeDesc.Width;
            let height = dup_desc.ModeDesc.Height;

            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };

            let mut staging_texture = None;
            unsafe {
                device
                    .CreateTexture2D(&staging_desc, None, Some(&mut staging_texture))
                    .map_err(|e| GhostError::Capture(format!("CreateTexture2D failed: {e}")))?;
            }
            let staging_texture = staging_texture
                .ok_or_else(|| GhostError::Capture("staging texture is None".into()))?;

            let bounds = Rect::new(
                coords.left,
                coords.top,
                coords.left + width as i32,
                coords.top + height as i32,
            );
            debug!(?bounds, "DXGI duplication ready");

            Ok(Self {
                context,
                output: duplication,
                staging_texture,
                bounds,
            })
        }
    }

    impl DxgiCapturer {
        /// Duplicate monitor `monitor_index` (0 = primary).
        pub fn new(monitor_index: u32, timeout_ms: u32) -> Result<Self, GhostError> {
            let dup = unsafe { Duplication::open(monitor_index)? };
            Ok(Self {
                desktop_bounds: dup.bounds,
                monitor_index,
                timeout_ms,
                cached: None,
                duplication: Some(dup),
            })
        }

        /// Whether a live duplication is held right now.
        pub fn is_duplicating(&self) -> bool {
            self.duplication.is_some()
        }

        /// Re-create the duplication. Stays detached on failure so the
        /// next capture tries again.
        fn reopen(&mut self) -> bool {
            match unsafe { Duplication::open(self.monitor_index) } {
                Ok(dup) => {
                    if dup.bounds != self.desktop_bounds {
                        info!(old = ?self.desktop_bounds, new = ?dup.bounds, "desktop mode changed");
                    }
                    self.desktop_bounds = dup.bounds;
                    self.cached = None;
                    self.duplication = Some(dup);
                    info!("DXGI duplication re-created");
                    true
                }
                Err(e) => {
                    debug!("DXGI duplication unavailable: {e}");
                    false
                }
            }
        }

        unsafe fn acquire(&mut self) -> Result<Acquire, GhostError> {
            let Some(dup) = self.duplication.as_ref() else {
                return Ok(Acquire::Lost);
            };
            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;

            match unsafe {
                dup.output
                    .AcquireNextFrame(self.timeout_ms, &mut frame_info, &mut resource)
            } {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(Acquire::Unchanged),
                Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => return Ok(Acquire::Lost),
                Err(e) => {
                    return Err(GhostError::Capture(format!("AcquireNextFrame failed: {e}")));
                }
            }

            let resource =
                resource.ok_or_else(|| GhostError::Capture("acquired resource is None".into()))?;
            let texture: ID3D11Texture2D = resource.cast().map_err(|e| {
                let _ = unsafe { dup.output.ReleaseFrame() };
                GhostError::Capture(format!("cast to ID3D11Texture2D failed: {e}"))
            })?;

            unsafe { dup.context.CopyResource(&dup.staging_texture, &texture) };
            let _ = unsafe { dup.output.ReleaseFrame() };

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                dup.context
                    .Map(&dup.staging_texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                    .map_err(|e| GhostError::Capture(format!("Map failed: {e}")))?;
            }

            let stride = mapped.RowPitch as usize;
            let total = stride * dup.bounds.height() as usize;
            let src = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, total) };
            match self.cached.as_mut() {
                Some((buf, pitch)) if buf.len() == total => {
                    buf.copy_from_slice(src);
                    *pitch = stride;
                }
                _ => self.cached = Some((src.to_vec(), stride)),
            }

            unsafe { dup.context.Unmap(&dup.staging_texture, 0) };
            Ok(Acquire::Fresh)
        }
    }

    impl ScreenGrabber for DxgiCapturer {
        fn capture(&mut self, bounds: Rect) -> Option<VideoFrame> {
            if bounds.is_empty() {
                return None;
            }
            let mut outcome = unsafe { self.acquire() };
            if let Ok(Acquire::Lost) = outcome {
                if self.duplication.take().is_some() {
                    warn!("DXGI access lost; re-creating duplication");
                }
                if !self.reopen() {
                    return None;
                }
                outcome = unsafe { self.acquire() };
            }
            match outcome {
                Ok(Acquire::Fresh) => {}
                Ok(Acquire::Unchanged) => {
                    if self.cached.is_none() {
                        return None;
                    }
                }
                Ok(Acquire::Lost) => return None,
                Err(e) => {
                    warn!("desktop capture failed: {e}");
                    return None;
                }
            }
            let (desktop, stride) = self.cached.as_ref()?;
            crop_to_rgba(desktop, *stride, self.desktop_bounds, bounds)
        }

        fn desktop_area(&self) -> Option<Rect> {
            Some(self.desktop_bounds)
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl DxgiCapturer {
    /// DXGI is only available on Windows.
    pub fn new(_monitor_index: u32, _timeout_ms: u32) -> Result<Self, GhostError> {
        Err(GhostError::Unsupported("DXGI desktop duplication"))
    }
}

#[cfg(not(target_os = "windows"))]
impl ScreenGrabber for DxgiCapturer {
    fn capture(&mut self, _bounds: Rect) -> Option<VideoFrame> {
        None
    }

    fn desktop_area(&self) -> Option<Rect> {
        Some(self.desktop_bounds)
    }
}

// ── Tests ────────────────────────────────────────────────────────
