//! Serial wire framing for the HID emulator (spec §6 "HID serial wire
//! format") and the port it's written to.

use crate::error::HidError;
use crate::hid::queue::HidCommand;
use std::time::Duration;

const FRAME_MAGIC: [u8; 2] = [0x57, 0xAB];
const ADDR: u8 = 0x00;

const CMD_GET_INFO: u8 = 0x01;
const CMD_SEND_KEYBOARD: u8 = 0x02;
const CMD_SEND_MOUSE_ABS: u8 = 0x04;
const CMD_SEND_MOUSE_REL: u8 = 0x05;

/// Builds one complete frame: `[0x57][0xAB][0x00][cmd][len][payload...][sum]`,
/// `sum` the truncated 8-bit sum of every preceding byte.
fn build_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len() + 1);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.push(ADDR);
    frame.push(cmd);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    let sum = frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    frame.push(sum);
    frame
}

fn handshake_frame() -> Vec<u8> {
    build_frame(CMD_GET_INFO, &[])
}

fn command_frame(cmd: HidCommand) -> Vec<u8> {
    match cmd {
        HidCommand::Keyboard { modifiers, keycode } => {
            let payload = [modifiers, 0x00, keycode, 0, 0, 0, 0, 0];
            build_frame(CMD_SEND_KEYBOARD, &payload)
        }
        HidCommand::MouseAbs { x, y, buttons, wheel } => {
            // Wire protocol clamps to 1..=4095; 0 is reserved by the
            // emulator as "no movement" in its absolute-report header byte.
            let x = x.clamp(1, 4095);
            let y = y.clamp(1, 4095);
            let payload = [
                0x02,
                buttons,
                (x & 0xFF) as u8,
                (x >> 8) as u8,
                (y & 0xFF) as u8,
                (y >> 8) as u8,
                wheel as u8,
            ];
            build_frame(CMD_SEND_MOUSE_ABS, &payload)
        }
        HidCommand::MouseRel { dx, dy, buttons, wheel } => {
            let payload = [0x01, buttons, dx as u8, dy as u8, wheel as u8];
            build_frame(CMD_SEND_MOUSE_REL, &payload)
        }
    }
}

/// Owns the serial connection to the emulator. Write is non-blocking in
/// the sense that it only queues into the driver's own output buffer
/// (spec §4.5); flushing is the driver's concern, not ours.
pub struct SerialPort {
    port: Box<dyn serialport::SerialPort>,
    path: String,
}

impl SerialPort {
    pub fn open(path: &str, baud: u32) -> Result<Self, HidError> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|source| HidError::Open { path: path.to_string(), source })?;
        Ok(Self { port, path: path.to_string() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Performs the get-info handshake synchronously; the emulator's ack
    /// begins with `0x57` on success (spec §6).
    pub fn handshake(&mut self) -> Result<(), HidError> {
        use std::io::{Read, Write};
        self.port.write_all(&handshake_frame())?;
        let mut ack = [0u8; 1];
        match self.port.read_exact(&mut ack) {
            Ok(()) if ack[0] == 0x57 => Ok(()),
            _ => Err(HidError::HandshakeFailed),
        }
    }

    pub fn write_command(&mut self, cmd: HidCommand) -> Result<(), HidError> {
        use std::io::Write;
        let frame = command_frame(cmd);
        self.port.write_all(&frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_frame_matches_wire_layout() {
        let frame = command_frame(HidCommand::Keyboard { modifiers: 0x02, keycode: 0x04 });
        assert_eq!(&frame[..5], &[0x57, 0xAB, 0x00, CMD_SEND_KEYBOARD, 8]);
        assert_eq!(&frame[5..13], &[0x02, 0x00, 0x04, 0, 0, 0, 0, 0]);
        let sum = frame[..frame.len() - 1].iter().fold(0u8, |a, &b| a.wrapping_add(b));
        assert_eq!(*frame.last().unwrap(), sum);
    }

    #[test]
    fn mouse_abs_frame_rescales_and_clamps() {
        let frame = command_frame(HidCommand::MouseAbs { x: 4095, y: 4095, buttons: 0x01, wheel: 0 });
        assert_eq!(&frame[..5], &[0x57, 0xAB, 0x00, CMD_SEND_MOUSE_ABS, 7]);
        assert_eq!(&frame[5..12], &[0x02, 0x01, 0xFF, 0x0F, 0xFF, 0x0F, 0x00]);
    }

    #[test]
    fn checksum_is_truncated_sum_of_preceding_bytes() {
        let frame = build_frame(CMD_GET_INFO, &[]);
        assert_eq!(frame, vec![0x57, 0xAB, 0x00, 0x01, 0x00, 0x57 + 0xAB + 0x00 + 0x01 + 0x00]);
    }

    #[test]
    fn mouse_rel_frame_carries_signed_deltas() {
        let frame = command_frame(HidCommand::MouseRel { dx: -5, dy: 10, buttons: 0, wheel: 1 });
        assert_eq!(&frame[..5], &[0x57, 0xAB, 0x00, CMD_SEND_MOUSE_REL, 5]);
        assert_eq!(frame[7], (-5i8) as u8);
        assert_eq!(frame[8], 10u8);
    }
}
