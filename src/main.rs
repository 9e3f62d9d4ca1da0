mod capture;
mod config;
mod encoder;
mod error;
mod hid;
mod local_input;
mod pipeline;
mod server;

use anyhow::Context;
use clap::Parser;
use config::Config;
use hid::input::QueuedInputSink;
use pipeline::state::{DesiredState, PixelFormat, ServerConfig, SharedDesiredState, VideoConfig};
use pipeline::PipelineController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    install_tracing(&config.log_level);

    let video_cfg = VideoConfig {
        width: config.width,
        height: config.height,
        pixel_format: PixelFormat::from(config.pixel_format),
        fps: config.fps,
    };
    let server_cfg = config.server.then_some(ServerConfig { port: config.port });
    let desired = Arc::new(SharedDesiredState::new(DesiredState::new(
        video_cfg,
        config.autostart,
        server_cfg,
    )));

    let hid_queue = Arc::new(hid::queue::HidQueue::new());
    let hid_stop = Arc::new(AtomicBool::new(false));
    let hid_thread = config.hid_port.as_ref().and_then(|path| match hid::connect(path, config.hid_baud) {
        Ok(port) => {
            tracing::info!(target: "main", %path, "HID emulator connected");
            Some(hid::spawn_consumer(hid_queue.clone(), port, hid_stop.clone()))
        }
        Err(e) => {
            tracing::warn!(target: "main", %path, error = %e, "HID emulator unavailable, input disabled");
            None
        }
    });

    let mut controller = PipelineController::new(
        config.device.clone(),
        config.bitrate,
        desired.clone(),
        hid_queue.clone(),
        None,
    );
    let pipeline_thread = std::thread::spawn(move || controller.run());

    // T1 (spec §5): the local-event-sink side of the HID controller. No
    // windowing toolkit is in scope for this crate (spec §1), so the real
    // caller here is an opt-in text-command driver over stdin rather than
    // a GUI event loop; the sink itself is the same `LocalInputSink` a
    // windowing layer would drive.
    if config.stdin_input {
        let sink: Arc<Mutex<dyn hid::input::LocalInputSink>> = Arc::new(Mutex::new(QueuedInputSink::new(
            pipeline::state::Size { w: video_cfg.width as f64, h: video_cfg.height as f64 },
            pipeline::state::Size { w: video_cfg.width as f64, h: video_cfg.height as f64 },
            hid_queue.clone(),
        )));
        let _ = local_input::spawn(sink);
        tracing::info!(target: "main", "reading local input commands from stdin");
    }

    // Cancellation per spec §5: set abort, wake the worker, join it. T2
    // exits within one dequeue timeout plus reconcile time.
    let ctrlc_desired = desired.clone();
    let ctrlc_hid_stop = hid_stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!(target: "main", "shutdown requested");
        ctrlc_desired.set_abort();
        ctrlc_hid_stop.store(true, Ordering::Relaxed);
    })
    .context("failed to install signal handler")?;

    if pipeline_thread.join().is_err() {
        tracing::error!(target: "main", "pipeline worker panicked");
    }
    if let Some(handle) = hid_thread {
        let _ = handle.join();
    }
    Ok(())
}

fn install_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}
