//! Framing of the serial (5-pin DIN) MIDI byte stream.
//!
//! Unlike USB-MIDI, which arrives in ready-made four-byte packets, the serial port delivers bare bytes and
//! senders are free to omit repeated status bytes (running status). Real-time bytes can appear anywhere, even
//! between the data bytes of another message.

use wmidi::MidiMessage;

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;
const REAL_TIME: u8 = 0xF8;
const PROGRAM_CHANGE: u8 = 0xC0;
const CHANNEL_PRESSURE: u8 = 0xD0;

/// Reassembles channel messages from serial MIDI bytes.
///
/// System exclusive and system common messages are skipped; nothing in the device consumes them. Real-time bytes
/// are dropped without disturbing the message being assembled.
#[derive(Debug, Default)]
pub struct DinFramer {
    status: Option<u8>,
    data: [u8; 2],
    received: usize,
    in_sysex: bool,
}

impl DinFramer {
    /// Creates a framer waiting for a status byte.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte, returning a message once one is complete.
    pub fn push(&mut self, byte: u8) -> Option<MidiMessage<'static>> {
        match byte {
            REAL_TIME..=0xFF => None,
            SYSEX_START => {
                self.in_sysex = true;
                self.status = None;
                None
            }
            SYSEX_END => {
                self.in_sysex = false;
                None
            }
            // system common cancels running status
            0xF1..=0xF6 => {
                self.in_sysex = false;
                self.status = None;
                None
            }
            0x80..=0xEF => {
                self.in_sysex = false;
                self.status = Some(byte);
                self.received = 0;
                None
            }
            _ => self.data_byte(byte),
        }
    }

    fn data_byte(&mut self, byte: u8) -> Option<MidiMessage<'static>> {
        if self.in_sysex {
            return None;
        }
        let status = self.status?;

        self.data[self.received] = byte;
        self.received += 1;
        let expected = match status & 0xF0 {
            PROGRAM_CHANGE | CHANNEL_PRESSURE => 1,
            _ => 2,
        };
        if self.received < expected {
            return None;
        }
        // the status stays for running status
        self.received = 0;

        let mut bytes = [status, 0, 0];
        bytes[1..=expected].copy_from_slice(&self.data[..expected]);
        match MidiMessage::from_bytes(&bytes[..=expected]) {
            Ok(message) => message.drop_unowned_sysex(),
            Err(_) => {
                warn!("Dropped malformed serial MIDI message with status {}", status);
                None
            }
        }
    }
}
