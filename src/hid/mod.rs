//! HID controller (spec §4.5): the 100 Hz serial-queue consumer (T3) and
//! the local-event translator that feeds the same queue from T1.

pub mod input;
pub mod keymap;
pub mod queue;
pub mod serial;

use crate::error::HidError;
use queue::HidQueue;
use serial::SerialPort;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Runs the 100 Hz consumer on a dedicated thread until `stop_flag` is
/// set. T3 never blocks beyond its own sleep (spec §5): each tick drains
/// the queue fully and writes one framed packet per command.
pub fn spawn_consumer(
    queue: Arc<HidQueue>,
    mut port: SerialPort,
    stop_flag: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop_flag.load(Ordering::Relaxed) {
            for cmd in queue.drain() {
                if let Err(e) = port.write_command(cmd) {
                    tracing::warn!(target: "hid", path = %port.path(), error = %e, "serial write failed");
                }
            }
            thread::sleep(TICK_INTERVAL);
        }
    })
}

/// Opens the serial port and performs the synchronous get-info handshake
/// (spec §5: "one synchronous handshake at init from T1").
pub fn connect(path: &str, baud: u32) -> Result<SerialPort, HidError> {
    let mut port = SerialPort::open(path, baud)?;
    port.handshake()?;
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_interval_yields_100hz_cadence() {
        assert_eq!(TICK_INTERVAL, Duration::from_millis(10));
    }
}
