//! The shared HID command queue (spec §3 "HID command queue", §9 "Global
//! singleton HID queue"). Multi-producer/single-consumer, unbounded:
//! producers (the pipeline worker draining browser input, the local event
//! translator) never block, and the 100 Hz consumer drains it fully each
//! tick.

use std::collections::VecDeque;
use std::sync::Mutex;

/// One command bound for the serial emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidCommand {
    MouseAbs { x: u16, y: u16, buttons: u8, wheel: i8 },
    MouseRel { dx: i8, dy: i8, buttons: u8, wheel: i8 },
    /// `keycode == 0` means "release".
    Keyboard { modifiers: u8, keycode: u8 },
}

#[derive(Default)]
pub struct HidQueue {
    inner: Mutex<VecDeque<HidCommand>>,
}

impl HidQueue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::new()) }
    }

    pub fn push(&self, cmd: HidCommand) {
        self.inner.lock().unwrap().push_back(cmd);
    }

    /// Drains every command currently queued, in FIFO order.
    pub fn drain(&self) -> Vec<HidCommand> {
        let mut guard = self.inner.lock().unwrap();
        guard.drain(..).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_fifo_order_and_empties_queue() {
        let queue = HidQueue::new();
        queue.push(HidCommand::Keyboard { modifiers: 0, keycode: 0x04 });
        queue.push(HidCommand::Keyboard { modifiers: 0, keycode: 0x00 });
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], HidCommand::Keyboard { modifiers: 0, keycode: 0x04 });
        assert_eq!(queue.len(), 0);
    }
}
