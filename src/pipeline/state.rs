//! The data the pipeline worker reconciles against, and the types shared
//! across component boundaries (video config, HID commands, display
//! geometry). See spec §3 for the invariants these types encode.

use std::sync::{Condvar, Mutex};

/// Pixel formats the capture device can be asked to negotiate.
///
/// `Mjpeg` is enumerable and capturable but not encodable — the encoder
/// only accepts the three raw packed formats (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Yuyv422,
    Uyvy422,
    Rgb565Le,
    Mjpeg,
}

impl PixelFormat {
    /// The fourcc this format negotiates with the kernel.
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Yuyv422 => *b"YUYV",
            PixelFormat::Uyvy422 => *b"UYVY",
            PixelFormat::Rgb565Le => *b"RGBP",
            PixelFormat::Mjpeg => *b"MJPG",
        }
    }

    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"YUYV" => Some(PixelFormat::Yuyv422),
            b"UYVY" => Some(PixelFormat::Uyvy422),
            b"RGBP" => Some(PixelFormat::Rgb565Le),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }

    /// Whether [`crate::encoder::VideoEncoder`] can be constructed for this format.
    pub fn is_encodable(self) -> bool {
        !matches!(self, PixelFormat::Mjpeg)
    }
}

/// Immutable description of what the capture device should be configured
/// to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub fps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            pixel_format: PixelFormat::Yuyv422,
            fps: 30,
        }
    }
}

/// Desired broadcast-server configuration; `None` means "server off".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
}

/// The record external actors write and the pipeline worker reconciles
/// against each tick. See spec §3 "Desired state".
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub video_cfg: VideoConfig,
    pub capturing: bool,
    pub server: Option<ServerConfig>,
    pub dirty_capture: bool,
    pub dirty_server: bool,
    pub abort: bool,
}

impl DesiredState {
    pub fn new(video_cfg: VideoConfig, capturing: bool, server: Option<ServerConfig>) -> Self {
        Self {
            video_cfg,
            capturing,
            server,
            // Both flags start dirty so the first reconcile tick brings
            // capture and server up from nothing.
            dirty_capture: true,
            dirty_server: true,
            abort: false,
        }
    }
}

/// Shared handle external actors (CLI bootstrap, a future control surface)
/// use to mutate [`DesiredState`] and wake the pipeline worker.
///
/// One mutex, one condvar, exactly as spec §5 requires: every read by the
/// worker copies the state out under the lock before acting on it.
pub struct SharedDesiredState {
    inner: Mutex<DesiredState>,
    condvar: Condvar,
}

impl SharedDesiredState {
    pub fn new(initial: DesiredState) -> Self {
        Self {
            inner: Mutex::new(initial),
            condvar: Condvar::new(),
        }
    }

    /// Mutate the desired state under the lock and wake the worker.
    pub fn update<F: FnOnce(&mut DesiredState)>(&self, f: F) {
        let mut guard = self.inner.lock().unwrap();
        f(&mut guard);
        self.condvar.notify_one();
    }

    pub fn set_abort(&self) {
        self.update(|s| s.abort = true);
    }

    /// Block until woken, returning a clone of the current state. Used by
    /// the worker's phase-1 wait when not capturing and nothing is dirty.
    pub fn wait(&self) -> DesiredState {
        let guard = self.inner.lock().unwrap();
        let guard = self
            .condvar
            .wait_while(guard, |s| !s.abort && !s.capturing && !s.dirty_capture && !s.dirty_server)
            .unwrap();
        guard.clone()
    }

    /// Read the current state without blocking.
    pub fn snapshot(&self) -> DesiredState {
        self.inner.lock().unwrap().clone()
    }

    /// Clear both dirty flags under the lock, returning the state as it
    /// was just before clearing (the copy the worker reconciles against).
    pub fn take_dirty(&self) -> DesiredState {
        let mut guard = self.inner.lock().unwrap();
        let snapshot = guard.clone();
        guard.dirty_capture = false;
        guard.dirty_server = false;
        snapshot
    }
}

/// The letterboxed sub-rectangle of a display widget where source pixels
/// are actually drawn. See spec §3 "Display geometry cache".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayGeometry {
    pub source_size: Size,
    pub widget_size: Size,
    pub display_rect: Rect,
}

impl DisplayGeometry {
    pub fn new(source_size: Size, widget_size: Size) -> Self {
        let display_rect = Self::letterbox(source_size, widget_size);
        Self {
            source_size,
            widget_size,
            display_rect,
        }
    }

    /// Recompute `display_rect` as the largest centered sub-rectangle of
    /// `widget_size` whose aspect ratio equals `source_size`'s.
    pub fn resize(&mut self, widget_size: Size) {
        self.widget_size = widget_size;
        self.display_rect = Self::letterbox(self.source_size, widget_size);
    }

    pub fn set_source_size(&mut self, source_size: Size) {
        self.source_size = source_size;
        self.display_rect = Self::letterbox(source_size, self.widget_size);
    }

    fn letterbox(source: Size, widget: Size) -> Rect {
        if source.w <= 0.0 || source.h <= 0.0 || widget.w <= 0.0 || widget.h <= 0.0 {
            return Rect { x: 0.0, y: 0.0, w: widget.w, h: widget.h };
        }
        let source_ratio = source.w / source.h;
        let widget_ratio = widget.w / widget.h;
        if source_ratio > widget_ratio {
            // Source is relatively wider: full width, letterboxed top/bottom.
            let h = widget.w / source_ratio;
            Rect { x: 0.0, y: (widget.h - h) / 2.0, w: widget.w, h }
        } else {
            let w = widget.h * source_ratio;
            Rect { x: (widget.w - w) / 2.0, y: 0.0, w, h: widget.h }
        }
    }
}
