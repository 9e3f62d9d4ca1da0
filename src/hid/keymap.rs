//! Toolkit keycode → USB-HID keycode table and modifier-bit mapping
//! (spec §4.5 "Keyboard translation").
//!
//! The toolkit keycode space modeled here is the one the original local
//! event sink hands the translator: letters, digit row, function keys,
//! an editing/navigation cluster, arrows, and lock keys, each occupying
//! a contiguous toolkit range that maps onto the matching USB-HID range.

/// Ctrl, Shift, Alt, Meta — the only modifier bits this bridge forwards.
pub const MOD_CTRL: u8 = 0x01;
pub const MOD_SHIFT: u8 = 0x02;
pub const MOD_ALT: u8 = 0x04;
pub const MOD_META: u8 = 0x08;

/// Toolkit modifier identifiers, translated independently of keycodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolkitModifier {
    Ctrl,
    Shift,
    Alt,
    Meta,
}

pub fn modifier_bit(m: ToolkitModifier) -> u8 {
    match m {
        ToolkitModifier::Ctrl => MOD_CTRL,
        ToolkitModifier::Shift => MOD_SHIFT,
        ToolkitModifier::Alt => MOD_ALT,
        ToolkitModifier::Meta => MOD_META,
    }
}

/// Maps one toolkit keycode to a USB-HID usage ID. Shifted and unshifted
/// symbol variants collapse to the same HID code; modifier state, not the
/// keycode, carries the shift (spec §4.5).
///
/// Toolkit keycode ranges modeled:
/// - `0x00..=0x19`: letters A-Z → HID `0x04..=0x1D`
/// - `0x1A..=0x23`: digit row 1-9,0 → HID `0x1E..=0x27`
/// - `0x24..=0x2F`: punctuation/symbol row → HID `0x28..=0x33` (return,
///   escape, backspace, tab, space, minus, equal, bracket-left,
///   bracket-right, backslash, semicolon, apostrophe)
/// - `0x30..=0x3B`: F1-F12 → HID `0x3A..=0x45`
/// - `0x3C..=0x44`: editing/navigation cluster → HID `0x46..=0x4E`
/// - `0x45..=0x48`: arrows (right,left,down,up) → HID `0x4F..=0x52`
/// - `0x49..=0x4B`: lock keys (caps, num, scroll) → HID `0x39`,`0x53`,`0x47`
/// - `0x4C..=0x4F`: the modifier keys themselves (Ctrl, Shift, Alt, Meta)
///   have no base HID usage ID at all — see [`is_modifier_keycode`].
pub fn to_hid_keycode(toolkit_code: u16) -> Option<u8> {
    match toolkit_code {
        0x00..=0x19 => Some(0x04 + (toolkit_code - 0x00) as u8),
        0x1A..=0x23 => Some(0x1E + (toolkit_code - 0x1A) as u8),
        0x24..=0x2F => Some(0x28 + (toolkit_code - 0x24) as u8),
        0x30..=0x3B => Some(0x3A + (toolkit_code - 0x30) as u8),
        0x3C..=0x44 => Some(0x46 + (toolkit_code - 0x3C) as u8),
        0x45..=0x48 => Some(0x4F + (toolkit_code - 0x45) as u8),
        0x49 => Some(0x39),
        0x4A => Some(0x53),
        0x4B => Some(0x47),
        _ => None,
    }
}

/// True when `toolkit_code` names one of the modifier keys themselves
/// (Ctrl, Shift, Alt, Meta) rather than a base key. A standard USB-HID
/// boot keyboard report has no usage ID for these at all — they are
/// carried purely in the modifier bitmap — so a bare press of one of
/// these keys is not "no HID code was found", it is "there is
/// structurally no HID code to find"; the caller must tell the two
/// apart rather than treating both as an unmapped key to drop (spec
/// §4.5: "Pressing only a modifier ... produces `Keyboard { mods, 0 }`").
pub fn is_modifier_keycode(toolkit_code: u16) -> bool {
    matches!(toolkit_code, 0x4C..=0x4F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_a_maps_to_hid_0x04() {
        assert_eq!(to_hid_keycode(0x00), Some(0x04));
    }

    #[test]
    fn letter_z_maps_to_hid_0x1d() {
        assert_eq!(to_hid_keycode(0x19), Some(0x1D));
    }

    #[test]
    fn function_key_range_lands_in_f1_f12_block() {
        assert_eq!(to_hid_keycode(0x30), Some(0x3A));
        assert_eq!(to_hid_keycode(0x3B), Some(0x45));
    }

    #[test]
    fn unmapped_toolkit_code_returns_none() {
        assert_eq!(to_hid_keycode(0xFFFF), None);
    }

    #[test]
    fn modifier_keycodes_have_no_base_hid_code() {
        for code in 0x4C..=0x4F {
            assert_eq!(to_hid_keycode(code), None);
            assert!(is_modifier_keycode(code));
        }
    }

    #[test]
    fn non_modifier_keycodes_are_not_modifier_keycodes() {
        assert!(!is_modifier_keycode(0x00));
        assert!(!is_modifier_keycode(0xFFFF));
    }

    #[test]
    fn modifier_bits_match_wire_convention() {
        assert_eq!(modifier_bit(ToolkitModifier::Ctrl), 0x01);
        assert_eq!(modifier_bit(ToolkitModifier::Shift), 0x02);
        assert_eq!(modifier_bit(ToolkitModifier::Alt), 0x04);
        assert_eq!(modifier_bit(ToolkitModifier::Meta), 0x08);
    }
}
