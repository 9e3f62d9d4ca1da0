//! The pipeline worker: the single thread that owns capture, encoder and
//! broadcast server, and reconciles them against the desired state
//! written by external actors.

pub mod state;

use crate::capture::CaptureDevice;
use crate::encoder::{EncoderConfigParams, VideoEncoder};
use crate::error::PipelineError;
use crate::hid::queue::{HidCommand, HidQueue};
use crate::server::BroadcastServer;
use state::{DesiredState, PixelFormat, SharedDesiredState, VideoConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);
const SIGNAL_LOSS_THRESHOLD: u32 = 10;
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// A consumer of converted RGB24 frames for local display. The display
/// surface implements this; the pipeline has no other opinion on it.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, rgb: &[u8], width: u32, height: u32);
}

pub struct PipelineController {
    device_path: PathBuf,
    bitrate: u32,
    desired: Arc<SharedDesiredState>,
    hid_queue: Arc<HidQueue>,
    frame_sink: Option<Arc<dyn FrameSink>>,

    capture: Option<CaptureDevice>,
    encoder: Option<VideoEncoder>,
    server: Option<BroadcastServer>,
    rgb_scratch: Vec<u8>,
}

impl PipelineController {
    pub fn new(
        device_path: PathBuf,
        bitrate: u32,
        desired: Arc<SharedDesiredState>,
        hid_queue: Arc<HidQueue>,
        frame_sink: Option<Arc<dyn FrameSink>>,
    ) -> Self {
        Self {
            device_path,
            bitrate,
            desired,
            hid_queue,
            frame_sink,
            capture: None,
            encoder: None,
            server: None,
            rgb_scratch: Vec::new(),
        }
    }

    /// The worker's run loop. Returns once `abort` is observed.
    pub fn run(&mut self) {
        loop {
            let snapshot = self.desired.snapshot();
            if snapshot.abort {
                break;
            }
            if !snapshot.capturing && !snapshot.dirty_capture && !snapshot.dirty_server {
                let woke = self.desired.wait();
                if woke.abort {
                    break;
                }
            }

            self.reconcile();
            self.drain_server_io();
            self.pump_frame();
        }

        self.teardown();
    }

    /// Phase 2: reconcile hardware/server state against the desired
    /// record.
    fn reconcile(&mut self) {
        let desired = self.desired.take_dirty();
        let mut capture_restarted = false;

        if desired.dirty_capture {
            if let Err(e) = self.reconcile_capture(&desired) {
                warn!(target: "pipeline", error = %e, "capture reconcile failed");
                self.desired.update(|s| s.capturing = false);
                return;
            }
            capture_restarted = true;
        }

        if desired.dirty_server || capture_restarted {
            self.encoder = None;
            self.reconcile_server(&desired);
        }
    }

    fn reconcile_capture(&mut self, desired: &DesiredState) -> Result<(), PipelineError> {
        if !desired.capturing {
            if let Some(mut capture) = self.capture.take() {
                capture.stop()?;
            }
            return Ok(());
        }

        let capture = match self.capture.as_mut() {
            Some(c) => c,
            None => {
                let opened = CaptureDevice::open(&self.device_path)?;
                self.capture = Some(opened);
                self.capture.as_mut().unwrap()
            }
        };
        capture.start(desired.video_cfg)?;
        Ok(())
    }

    fn reconcile_server(&mut self, desired: &DesiredState) {
        match desired.server {
            None => {
                self.server = None;
            }
            Some(cfg) => {
                if self.server.is_none() {
                    match BroadcastServer::bind(cfg.port) {
                        Ok(server) => {
                            info!(target: "pipeline", port = server.port(), "broadcast server listening");
                            self.server = Some(server);
                        }
                        Err(e) => {
                            warn!(target: "pipeline", error = %e, "failed to bind broadcast server");
                            return;
                        }
                    }
                }

                let format = self.capture.as_ref().and_then(CaptureDevice::current_format);
                match format {
                    Some(format) if format.is_encodable() => {
                        self.build_encoder(desired.video_cfg, format);
                    }
                    _ => {
                        // MJPEG (or no capture yet): server stays listening,
                        // but there is nothing to broadcast (spec §8 scenario 6).
                        self.encoder = None;
                    }
                }
            }
        }
    }

    fn build_encoder(&mut self, cfg: VideoConfig, format: PixelFormat) {
        let params = EncoderConfigParams {
            width: cfg.width,
            height: cfg.height,
            bitrate: self.bitrate,
            input_pixel_format: format,
        };
        match VideoEncoder::new(params) {
            Ok(encoder) => self.encoder = Some(encoder),
            Err(e) => {
                warn!(target: "pipeline", error = %e, "encoder construction failed");
                self.encoder = None;
            }
        }
    }

    /// Phase 3: accept new peers, then drain and route every inbound
    /// message (spec §4.4 step 3, §6 "Browser transport (inbound)").
    fn drain_server_io(&mut self) {
        let Some(server) = self.server.as_mut() else { return };
        server.poll_accept();
        let messages = server.poll_inbound();
        for msg in messages {
            if let Some(cmd) = decode_inbound(&msg.payload) {
                self.hid_queue.push(cmd);
            }
        }
    }

    /// Phase 4: pump exactly one capture frame through the local and
    /// remote paths, or perform signal-loss recovery (spec §4.4 step 4).
    fn pump_frame(&mut self) {
        let Some(capture) = self.capture.as_mut() else {
            std::thread::sleep(IDLE_SLEEP);
            return;
        };

        let cfg = self.desired.snapshot().video_cfg;
        match capture.dequeue(DEQUEUE_TIMEOUT) {
            Ok(Some(index)) => {
                let raw = capture.frame_data(index);

                if let Some(sink) = &self.frame_sink {
                    self.rgb_scratch.resize((cfg.width * cfg.height * 3) as usize, 0);
                    if crate::capture::convert::convert_to_rgb24(cfg.pixel_format, raw, cfg.width, cfg.height, &mut self.rgb_scratch).is_ok() {
                        sink.on_frame(&self.rgb_scratch, cfg.width, cfg.height);
                    }
                }

                let has_peers = self.server.as_ref().map(|s| s.peer_count() > 0).unwrap_or(false);
                if has_peers {
                    if let (Some(encoder), Some(server)) = (self.encoder.as_mut(), self.server.as_mut()) {
                        encoder.encode(raw, |packet| server.broadcast(packet));
                    }
                }

                if let Err(e) = capture.enqueue(index) {
                    warn!(target: "pipeline", error = %e, "enqueue failed");
                }
            }
            Ok(None) => {
                if capture.consecutive_timeouts() > SIGNAL_LOSS_THRESHOLD {
                    debug!(target: "pipeline", "signal loss detected, restarting capture");
                    if let Err(e) = capture.start(cfg) {
                        warn!(target: "pipeline", error = %e, "signal-loss restart failed");
                    }
                }
            }
            Err(e) => {
                warn!(target: "pipeline", error = %e, "dequeue failed");
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            let _ = capture.stop();
        }
        self.server = None;
        self.encoder = None;
    }
}

/// Routes one inbound browser message by its leading byte (spec §6).
fn decode_inbound(payload: &[u8]) -> Option<HidCommand> {
    match payload.first() {
        Some(0x02) if payload.len() == 7 => {
            let buttons = payload[1];
            let x_web = u16::from_le_bytes([payload[2], payload[3]]);
            let y_web = u16::from_le_bytes([payload[4], payload[5]]);
            let wheel = payload[6] as i8;
            Some(HidCommand::MouseAbs {
                x: rescale_browser_coord(x_web),
                y: rescale_browser_coord(y_web),
                buttons,
                wheel,
            })
        }
        Some(0x01) if payload.len() == 3 => {
            Some(HidCommand::Keyboard { modifiers: payload[1], keycode: payload[2] })
        }
        _ => None,
    }
}

/// `x_web ∈ [0, 32767] → x_hid ∈ [0, 4095]` via integer division (spec §6,
/// §9 open question: specified as-is, no saturation at the right edge).
fn rescale_browser_coord(web: u16) -> u16 {
    ((web as u32 * 4095) / 32767) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_maps_endpoints_to_hid_range_bounds() {
        assert_eq!(rescale_browser_coord(32767), 4095);
        assert_eq!(rescale_browser_coord(0), 0);
    }

    #[test]
    fn rescale_right_edge_rounding_matches_spec_open_question() {
        // Spec §9: 32766 rounds down to 4094 under plain integer division.
        assert_eq!(rescale_browser_coord(32766), 4094);
    }

    #[test]
    fn decode_inbound_mouse_abs_matches_scenario_3() {
        let payload = [0x02, 0x01, 0xFF, 0x7F, 0xFF, 0x7F, 0x00];
        let cmd = decode_inbound(&payload).unwrap();
        assert_eq!(cmd, HidCommand::MouseAbs { x: 4095, y: 4095, buttons: 0x01, wheel: 0 });
    }

    #[test]
    fn decode_inbound_keyboard_shape() {
        let payload = [0x01, 0x02, 0x04];
        let cmd = decode_inbound(&payload).unwrap();
        assert_eq!(cmd, HidCommand::Keyboard { modifiers: 0x02, keycode: 0x04 });
    }

    #[test]
    fn decode_inbound_unknown_leading_byte_is_dropped() {
        assert!(decode_inbound(&[0xFF, 0x00]).is_none());
    }
}
