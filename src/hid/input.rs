//! Local pointer/keyboard event translation (spec §4.5). Three pointer
//! modes (`None`, `Absolute`, `Relative`) plus the deterministic
//! relative-mode gesture state machine for touch-style input.

use crate::hid::queue::{HidCommand, HidQueue};
use crate::pipeline::state::{DisplayGeometry, Size};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MOVE_RATE_LIMIT: Duration = Duration::from_millis(20);
const CLICK_THRESHOLD_PX: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerMode {
    None,
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Left,
    Right,
    Middle,
}

impl PointerButton {
    fn bit(self) -> u8 {
        match self {
            PointerButton::Left => 0x01,
            PointerButton::Right => 0x02,
            PointerButton::Middle => 0x04,
        }
    }
}

#[derive(Default)]
struct RelativeGesture {
    is_down: bool,
    is_click: bool,
    start: (f64, f64),
    last_reported: (f64, f64),
}

/// Owns the display geometry, current pointer mode, held-button mask and
/// relative-mode gesture state; turns raw local events into [`HidCommand`]s.
pub struct LocalInputTranslator {
    mode: PointerMode,
    geometry: DisplayGeometry,
    held_buttons: u8,
    last_move_emit: Option<Instant>,
    gesture: RelativeGesture,
}

impl LocalInputTranslator {
    pub fn new(source_size: Size, widget_size: Size) -> Self {
        Self {
            mode: PointerMode::None,
            geometry: DisplayGeometry::new(source_size, widget_size),
            held_buttons: 0,
            last_move_emit: None,
            gesture: RelativeGesture::default(),
        }
    }

    pub fn set_mode(&mut self, mode: PointerMode) {
        self.mode = mode;
    }

    pub fn resize(&mut self, widget_size: Size) {
        self.geometry.resize(widget_size);
    }

    pub fn set_source_size(&mut self, source_size: Size) {
        self.geometry.set_source_size(source_size);
    }

    /// Pointer moved to `(px, py)` in widget coordinates. Absolute mode is
    /// rate-limited to one emission per 20 ms; relative mode emits only
    /// while a primary-button drag is in progress.
    pub fn on_pointer_move(&mut self, px: f64, py: f64) -> Option<HidCommand> {
        match self.mode {
            PointerMode::None => None,
            PointerMode::Absolute => {
                let now = Instant::now();
                if let Some(last) = self.last_move_emit {
                    if now.duration_since(last) < MOVE_RATE_LIMIT {
                        return None;
                    }
                }
                self.last_move_emit = Some(now);
                Some(self.absolute_command(px, py))
            }
            PointerMode::Relative => {
                if !self.gesture.is_down {
                    return None;
                }
                let (lx, ly) = self.gesture.last_reported;
                let dx = px - lx;
                let dy = py - ly;
                if dx.abs() + dy.abs() <= CLICK_THRESHOLD_PX {
                    return None;
                }
                self.gesture.last_reported = (px, py);
                self.gesture.is_click = false;
                Some(HidCommand::MouseRel {
                    dx: clamp_i8(dx),
                    dy: clamp_i8(dy),
                    buttons: 0,
                    wheel: 0,
                })
            }
        }
    }

    /// Button press/release. May produce zero, one, or two commands (the
    /// relative-mode secondary-click and tap sequences each emit a pair).
    pub fn on_pointer_button(&mut self, button: PointerButton, pressed: bool, px: f64, py: f64) -> Vec<HidCommand> {
        match self.mode {
            PointerMode::None => Vec::new(),
            PointerMode::Absolute => {
                if pressed {
                    self.held_buttons |= button.bit();
                } else {
                    self.held_buttons &= !button.bit();
                }
                vec![self.absolute_command(px, py)]
            }
            PointerMode::Relative => self.relative_button(button, pressed, px, py),
        }
    }

    fn relative_button(&mut self, button: PointerButton, pressed: bool, px: f64, py: f64) -> Vec<HidCommand> {
        match (button, pressed) {
            (PointerButton::Left, true) => {
                self.gesture.is_down = true;
                self.gesture.is_click = true;
                self.gesture.start = (px, py);
                self.gesture.last_reported = (px, py);
                Vec::new()
            }
            (PointerButton::Left, false) => {
                let was_click = self.gesture.is_down
                    && self.gesture.is_click
                    && manhattan(self.gesture.start, (px, py)) < CLICK_THRESHOLD_PX;
                self.gesture.is_down = false;
                if was_click {
                    vec![
                        HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0x01, wheel: 0 },
                        HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0x00, wheel: 0 },
                    ]
                } else {
                    Vec::new()
                }
            }
            (PointerButton::Right, true) => vec![
                HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0x02, wheel: 0 },
                HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0x00, wheel: 0 },
            ],
            (_, _) => Vec::new(),
        }
    }

    /// A wheel tick, converted regardless of pointer mode (spec §4.5: "the
    /// absolute protocol has no wheel").
    pub fn on_wheel(&mut self, delta: i32) -> Option<HidCommand> {
        if delta == 0 {
            return None;
        }
        let sign: i8 = if delta > 0 { 1 } else { -1 };
        Some(HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0, wheel: sign })
    }

    fn absolute_command(&self, px: f64, py: f64) -> HidCommand {
        let rect = self.geometry.display_rect;
        let hid_x = if rect.w > 0.0 {
            (((px - rect.x) * 4095.0 / rect.w) as i64).clamp(0, 4095) as u16
        } else {
            0
        };
        let hid_y = if rect.h > 0.0 {
            (((py - rect.y) * 4095.0 / rect.h) as i64).clamp(0, 4095) as u16
        } else {
            0
        };
        HidCommand::MouseAbs { x: hid_x, y: hid_y, buttons: self.held_buttons, wheel: 0 }
    }
}

/// The local event sink boundary (spec §6 "Local event sink"): a
/// windowing layer drives this trait, never [`LocalInputTranslator`] or
/// the HID queue directly. This is the crate's half of the integration
/// surface; the concrete windowing toolkit stays out of scope (spec §1).
pub trait LocalInputSink: Send {
    fn on_resize(&mut self, widget_size: Size);
    fn on_source_size(&mut self, source_size: Size);
    fn on_pointer_move(&mut self, px: f64, py: f64);
    fn on_pointer_button(&mut self, button: PointerButton, pressed: bool, px: f64, py: f64);
    fn on_wheel(&mut self, delta: i32);
    fn on_key(&mut self, toolkit_code: u16, modifiers: u8, pressed: bool);
    fn set_mode(&mut self, mode: PointerMode);
}

/// The concrete [`LocalInputSink`] `main` constructs: owns a
/// [`LocalInputTranslator`] and pushes every command it produces onto the
/// shared HID queue immediately, same as the pipeline worker does for
/// remote input (spec §4.4 step 3).
pub struct QueuedInputSink {
    translator: LocalInputTranslator,
    queue: Arc<HidQueue>,
}

impl QueuedInputSink {
    pub fn new(source_size: Size, widget_size: Size, queue: Arc<HidQueue>) -> Self {
        Self { translator: LocalInputTranslator::new(source_size, widget_size), queue }
    }
}

impl LocalInputSink for QueuedInputSink {
    fn on_resize(&mut self, widget_size: Size) {
        self.translator.resize(widget_size);
    }

    fn on_source_size(&mut self, source_size: Size) {
        self.translator.set_source_size(source_size);
    }

    fn on_pointer_move(&mut self, px: f64, py: f64) {
        if let Some(cmd) = self.translator.on_pointer_move(px, py) {
            self.queue.push(cmd);
        }
    }

    fn on_pointer_button(&mut self, button: PointerButton, pressed: bool, px: f64, py: f64) {
        for cmd in self.translator.on_pointer_button(button, pressed, px, py) {
            self.queue.push(cmd);
        }
    }

    fn on_wheel(&mut self, delta: i32) {
        if let Some(cmd) = self.translator.on_wheel(delta) {
            self.queue.push(cmd);
        }
    }

    fn on_key(&mut self, toolkit_code: u16, modifiers: u8, pressed: bool) {
        if let Some(cmd) = translate_key(toolkit_code, modifiers, pressed) {
            self.queue.push(cmd);
        }
    }

    fn set_mode(&mut self, mode: PointerMode) {
        self.translator.set_mode(mode);
    }
}

fn manhattan(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).abs() + (a.1 - b.1).abs()
}

fn clamp_i8(v: f64) -> i8 {
    v.round().clamp(-128.0, 127.0) as i8
}

/// Translates one toolkit keyboard event. Auto-repeat is discarded by the
/// caller before this is invoked (spec §4.5); `keycode == 0` on release.
/// Looks `toolkit_code` up via [`crate::hid::keymap`] itself: a bare press
/// of a modifier key (Ctrl/Shift/Alt/Meta) has no HID code to find and
/// still produces `Keyboard { mods, 0 }`, not a dropped event — only a
/// genuinely unmapped toolkit keycode is dropped.
pub fn translate_key(toolkit_code: u16, modifiers: u8, pressed: bool) -> Option<HidCommand> {
    if !pressed {
        return Some(HidCommand::Keyboard { modifiers, keycode: 0 });
    }
    if crate::hid::keymap::is_modifier_keycode(toolkit_code) {
        return Some(HidCommand::Keyboard { modifiers, keycode: 0 });
    }
    let code = crate::hid::keymap::to_hid_keycode(toolkit_code)?;
    Some(HidCommand::Keyboard { modifiers, keycode: code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::Size;

    fn translator() -> LocalInputTranslator {
        let mut t = LocalInputTranslator::new(
            Size { w: 1920.0, h: 1080.0 },
            Size { w: 1000.0, h: 600.0 },
        );
        t.set_mode(PointerMode::Absolute);
        t
    }

    #[test]
    fn absolute_center_point_maps_near_center_of_hid_range() {
        let t = translator();
        let rect = t.geometry.display_rect;
        let cmd = t.absolute_command(rect.x + rect.w / 2.0, rect.y + rect.h / 2.0);
        match cmd {
            HidCommand::MouseAbs { x, y, .. } => {
                assert!((2040..=2055).contains(&x));
                assert!((2040..=2055).contains(&y));
            }
            _ => panic!("expected MouseAbs"),
        }
    }

    #[test]
    fn absolute_origin_maps_to_hid_zero() {
        let t = translator();
        let rect = t.geometry.display_rect;
        let cmd = t.absolute_command(rect.x, rect.y);
        assert_eq!(cmd, HidCommand::MouseAbs { x: 0, y: 0, buttons: 0, wheel: 0 });
    }

    #[test]
    fn absolute_outside_rect_clamps_to_boundary() {
        let t = translator();
        let rect = t.geometry.display_rect;
        let cmd = t.absolute_command(rect.x - 500.0, rect.y - 500.0);
        assert_eq!(cmd, HidCommand::MouseAbs { x: 0, y: 0, buttons: 0, wheel: 0 });
    }

    #[test]
    fn relative_tap_emits_click_then_release() {
        let mut t = LocalInputTranslator::new(Size { w: 1920.0, h: 1080.0 }, Size { w: 1000.0, h: 600.0 });
        t.set_mode(PointerMode::Relative);
        let press = t.on_pointer_button(PointerButton::Left, true, 100.0, 100.0);
        assert!(press.is_empty());
        let release = t.on_pointer_button(PointerButton::Left, false, 101.0, 101.0);
        assert_eq!(
            release,
            vec![
                HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0x01, wheel: 0 },
                HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0x00, wheel: 0 },
            ]
        );
    }

    #[test]
    fn relative_drag_emits_deltas_and_suppresses_tap() {
        let mut t = LocalInputTranslator::new(Size { w: 1920.0, h: 1080.0 }, Size { w: 1000.0, h: 600.0 });
        t.set_mode(PointerMode::Relative);
        t.on_pointer_button(PointerButton::Left, true, 100.0, 100.0);
        let mv = t.on_pointer_move(200.0, 100.0);
        assert_eq!(mv, Some(HidCommand::MouseRel { dx: 100, dy: 0, buttons: 0, wheel: 0 }));
        let release = t.on_pointer_button(PointerButton::Left, false, 200.0, 100.0);
        assert!(release.is_empty(), "a real drag must not also emit a tap");
    }

    #[test]
    fn relative_secondary_click_emits_immediately() {
        let mut t = LocalInputTranslator::new(Size { w: 1920.0, h: 1080.0 }, Size { w: 1000.0, h: 600.0 });
        t.set_mode(PointerMode::Relative);
        let cmds = t.on_pointer_button(PointerButton::Right, true, 50.0, 50.0);
        assert_eq!(
            cmds,
            vec![
                HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0x02, wheel: 0 },
                HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0x00, wheel: 0 },
            ]
        );
    }

    #[test]
    fn wheel_converts_to_signed_relative_tick() {
        let mut t = translator();
        assert_eq!(t.on_wheel(5), Some(HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0, wheel: 1 }));
        assert_eq!(t.on_wheel(-5), Some(HidCommand::MouseRel { dx: 0, dy: 0, buttons: 0, wheel: -1 }));
        assert_eq!(t.on_wheel(0), None);
    }

    #[test]
    fn keyboard_release_always_carries_zero_keycode() {
        assert_eq!(
            translate_key(0x00, 0x02, false),
            Some(HidCommand::Keyboard { modifiers: 0x02, keycode: 0 })
        );
    }

    #[test]
    fn keyboard_press_maps_through_keymap() {
        assert_eq!(
            translate_key(0x00, 0, true),
            Some(HidCommand::Keyboard { modifiers: 0, keycode: 0x04 })
        );
    }

    #[test]
    fn modifier_only_press_carries_zero_keycode() {
        // A bare modifier press has no base key at all (spec §4.5:
        // "Pressing only a modifier... produces Keyboard { mods, 0 }"), and
        // a real caller reaches this through a toolkit keycode in the
        // modifier range, not a hand-picked sentinel.
        assert_eq!(
            translate_key(0x4C, MOD_CTRL, true),
            Some(HidCommand::Keyboard { modifiers: MOD_CTRL, keycode: 0 })
        );
    }

    #[test]
    fn unmapped_key_press_is_dropped() {
        assert_eq!(translate_key(0xFFFF, 0, true), None);
    }

    use crate::hid::keymap::MOD_CTRL;
}
