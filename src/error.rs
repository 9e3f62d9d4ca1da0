//! Error taxonomy shared across the capture, encoder, server, pipeline and
//! HID components. Kinds mirror the failure classes the pipeline worker
//! reconciles against, not raw OS error codes.

use thiserror::Error;

/// Errors raised by [`crate::capture::CaptureDevice`].
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open capture device: {0}")]
    Open(#[from] std::io::Error),

    #[error("device busy (stale buffers or another process owns it)")]
    Busy,

    #[error("format/resolution combination not accepted by device: {0}")]
    Format(String),

    #[error("capture I/O failed: {0}")]
    Io(String),
}

/// Errors raised while constructing or driving [`crate::encoder::VideoEncoder`].
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("pixel format {0:?} has no encodable mapping")]
    UnsupportedInputFormat(crate::pipeline::state::PixelFormat),

    #[error("codec construction failed: {0}")]
    Construction(String),

    #[error("single-frame encode failed: {0}")]
    Encode(String),
}

/// Errors raised by [`crate::server::BroadcastServer`].
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind listening socket: {0}")]
    Bind(#[from] std::io::Error),

    #[error("malformed WebSocket handshake")]
    BadHandshake,

    #[error("malformed WebSocket frame")]
    BadFrame,
}

/// Errors raised by [`crate::hid::HidController`] and the serial frame codec.
#[derive(Error, Debug)]
pub enum HidError {
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("handshake with HID emulator failed (no 0x57 ack)")]
    HandshakeFailed,
}

/// Top-level error used where several of the above kinds can surface
/// through a single call path (reconcile, CLI bootstrap).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Hid(#[from] HidError),
}
