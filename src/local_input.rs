//! Minimal text-command driver for the local input sink (SPEC_FULL.md
//! §2.1 step 5): stands in for a real windowing toolkit, which stays out
//! of scope for this crate (spec §1), so [`crate::hid::input`]'s
//! translator and gesture state machine have a genuine runtime caller
//! instead of being exercised only by their own unit tests. Enabled with
//! `--stdin-input`; off by default.
//!
//! One command per stdin line:
//!
//! ```text
//! mode none|absolute|relative
//! resize <w> <h>
//! source <w> <h>
//! move <x> <y>
//! button left|right|middle down|up <x> <y>
//! wheel <delta>
//! key <toolkit_code> <modifiers> down|up
//! ```
//!
//! Numbers are decimal; malformed lines are logged and skipped rather
//! than treated as fatal.

use crate::hid::input::{LocalInputSink, PointerButton, PointerMode};
use crate::pipeline::state::Size;
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::thread;

/// Spawns a thread that reads commands from stdin until EOF, applying
/// each to `sink`. Not joined at shutdown: there is no graceful way to
/// interrupt a blocking stdin read without a toolkit-level cancellation
/// mechanism, and this driver exists only for local testing/demo use.
pub fn spawn(sink: Arc<Mutex<dyn LocalInputSink>>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let mut guard = sink.lock().unwrap();
            apply_line(&mut *guard, &line);
        }
    })
}

fn apply_line(sink: &mut dyn LocalInputSink, line: &str) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["mode", mode] => match parse_mode(mode) {
            Some(m) => sink.set_mode(m),
            None => tracing::warn!(target: "local_input", %mode, "unknown pointer mode"),
        },
        ["resize", w, h] => match (w.parse(), h.parse()) {
            (Ok(w), Ok(h)) => sink.on_resize(Size { w, h }),
            _ => tracing::warn!(target: "local_input", line, "malformed resize"),
        },
        ["source", w, h] => match (w.parse(), h.parse()) {
            (Ok(w), Ok(h)) => sink.on_source_size(Size { w, h }),
            _ => tracing::warn!(target: "local_input", line, "malformed source"),
        },
        ["move", x, y] => match (x.parse(), y.parse()) {
            (Ok(x), Ok(y)) => sink.on_pointer_move(x, y),
            _ => tracing::warn!(target: "local_input", line, "malformed move"),
        },
        ["button", button, state, x, y] => {
            match (parse_button(button), parse_pressed(state), x.parse(), y.parse()) {
                (Some(b), Some(pressed), Ok(x), Ok(y)) => sink.on_pointer_button(b, pressed, x, y),
                _ => tracing::warn!(target: "local_input", line, "malformed button"),
            }
        }
        ["wheel", delta] => match delta.parse() {
            Ok(delta) => sink.on_wheel(delta),
            Err(_) => tracing::warn!(target: "local_input", line, "malformed wheel"),
        },
        ["key", code, mods, state] => {
            match (code.parse(), mods.parse(), parse_pressed(state)) {
                (Ok(code), Ok(mods), Some(pressed)) => sink.on_key(code, mods, pressed),
                _ => tracing::warn!(target: "local_input", line, "malformed key"),
            }
        }
        [] => {}
        _ => tracing::warn!(target: "local_input", line, "unrecognized command"),
    }
}

fn parse_mode(s: &str) -> Option<PointerMode> {
    match s {
        "none" => Some(PointerMode::None),
        "absolute" => Some(PointerMode::Absolute),
        "relative" => Some(PointerMode::Relative),
        _ => None,
    }
}

fn parse_button(s: &str) -> Option<PointerButton> {
    match s {
        "left" => Some(PointerButton::Left),
        "right" => Some(PointerButton::Right),
        "middle" => Some(PointerButton::Middle),
        _ => None,
    }
}

fn parse_pressed(s: &str) -> Option<bool> {
    match s {
        "down" => Some(true),
        "up" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::input::QueuedInputSink;
    use crate::hid::queue::HidQueue;

    fn sink_with_queue() -> (QueuedInputSink, Arc<HidQueue>) {
        let queue = Arc::new(HidQueue::new());
        let sink = QueuedInputSink::new(
            Size { w: 1920.0, h: 1080.0 },
            Size { w: 1000.0, h: 600.0 },
            queue.clone(),
        );
        (sink, queue)
    }

    #[test]
    fn relative_tap_via_stdin_commands_reaches_queue() {
        let (mut sink, queue) = sink_with_queue();
        apply_line(&mut sink, "mode relative");
        apply_line(&mut sink, "button left down 10 10");
        apply_line(&mut sink, "button left up 10 10");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn absolute_move_via_stdin_command_reaches_queue() {
        let (mut sink, queue) = sink_with_queue();
        apply_line(&mut sink, "mode absolute");
        apply_line(&mut sink, "move 500 309");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn malformed_lines_are_skipped_without_panicking() {
        let (mut sink, queue) = sink_with_queue();
        apply_line(&mut sink, "move not_a_number 5");
        apply_line(&mut sink, "bogus command entirely");
        apply_line(&mut sink, "");
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn key_command_reaches_queue() {
        let (mut sink, queue) = sink_with_queue();
        apply_line(&mut sink, "key 0 0 down");
        apply_line(&mut sink, "key 0 0 up");
        assert_eq!(queue.len(), 2);
    }
}
