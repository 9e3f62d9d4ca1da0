//! CLI configuration surface (SPEC_FULL.md §4.6). The capture/server
//! startup parameters are read once at launch; later reconfiguration goes
//! through [`crate::pipeline::state::SharedDesiredState`] rather than
//! the CLI.

use crate::pipeline::state::PixelFormat;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "ipkvm-bridge", about = "Captures a local video-capture device and bridges it to browsers and a HID serial emulator")]
pub struct Config {
    /// Path to the V4L2 capture device node.
    #[arg(long, default_value = "/dev/video0")]
    pub device: PathBuf,

    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 720)]
    pub height: u32,

    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    #[arg(long, value_enum, default_value_t = PixelFormatArg::Yuyv422)]
    pub pixel_format: PixelFormatArg,

    /// Port the broadcast server listens on; 0 picks an ephemeral port.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Start with the broadcast server enabled.
    #[arg(long, default_value_t = true)]
    pub server: bool,

    /// H.264 target bitrate in bits/second.
    #[arg(long, default_value_t = 2_000_000)]
    pub bitrate: u32,

    /// Path to the HID serial emulator's device node. Omit to run with
    /// local/remote input translation disabled.
    #[arg(long)]
    pub hid_port: Option<String>,

    #[arg(long, default_value_t = 115200)]
    pub hid_baud: u32,

    /// Start capturing immediately rather than waiting for a control
    /// surface to request it.
    #[arg(long, default_value_t = true)]
    pub autostart: bool,

    /// Default log verbosity, used when `RUST_LOG` isn't set in the
    /// environment. Accepts any `tracing_subscriber::EnvFilter` directive
    /// (e.g. `info`, `debug`, `ipkvm_bridge=trace`).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Drive local pointer/keyboard input from simple text commands on
    /// stdin instead of a real windowing toolkit (which is out of scope
    /// for this crate). Exists so `hid::input`'s translator has a real,
    /// runtime caller without pulling in a GUI stack.
    #[arg(long, default_value_t = false)]
    pub stdin_input: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormatArg {
    Yuyv422,
    Uyvy422,
    Rgb565Le,
    Mjpeg,
}

impl From<PixelFormatArg> for PixelFormat {
    fn from(value: PixelFormatArg) -> Self {
        match value {
            PixelFormatArg::Yuyv422 => PixelFormat::Yuyv422,
            PixelFormatArg::Uyvy422 => PixelFormat::Uyvy422,
            PixelFormatArg::Rgb565Le => PixelFormat::Rgb565Le,
            PixelFormatArg::Mjpeg => PixelFormat::Mjpeg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_arg_converts_to_domain_enum() {
        assert_eq!(PixelFormat::from(PixelFormatArg::Yuyv422), PixelFormat::Yuyv422);
        assert_eq!(PixelFormat::from(PixelFormatArg::Mjpeg), PixelFormat::Mjpeg);
    }
}
