use super::escape;

/// Builds one outgoing `$<payload>#<checksum>` packet.
///
/// The payload is buffered so a reply can be assembled before anything
/// touches the connection, and resent verbatim on a nack.
#[derive(Debug, Default)]
pub struct ResponseWritter {
    check_sum: u8,
    msg: Vec<u8>,
}

impl ResponseWritter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames the payload, ready for the wire.
    pub fn finish(self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(self.msg.len() + 4);
        packet.push(b'$');
        packet.extend_from_slice(&self.msg);
        packet.push(b'#');
        packet.extend_from_slice(format!("{:02x}", self.check_sum).as_bytes());
        packet
    }

    pub fn is_empty(&self) -> bool {
        self.msg.is_empty()
    }

    pub fn write(&mut self, byte: u8) {
        self.msg.push(byte);
        self.check_sum = self.check_sum.wrapping_add(byte);
    }

    pub fn write_hex(&mut self, byte: u8) {
        for digit in [(byte & 0xf0) >> 4, byte & 0x0f] {
            let c = match digit {
                0..=9 => b'0' + digit,
                _ => b'a' + digit - 10,
            };
            self.write(c);
        }
    }

    pub fn write_str(&mut self, str: &str) {
        for &b in str.as_bytes() {
            self.write(b)
        }
    }

    pub fn write_hex_buff(&mut self, data: &[u8]) {
        for &b in data {
            self.write_hex(b);
        }
    }

    /// A 16 bit value in target byte order.
    pub fn write_word_le(&mut self, word: u16) {
        self.write_hex_buff(&word.to_le_bytes());
    }

    /// Raw bytes with the protocol's special characters escaped.
    pub fn write_binary(&mut self, data: &[u8]) {
        for b in escape(data) {
            self.write(b);
        }
    }

    /// One window of a paginated object: `m` while more remains, `l` on the
    /// last slice or when `offset` is already past the end.
    pub fn write_paginated(&mut self, data: &[u8], offset: usize, length: usize) {
        let start = offset.min(data.len());
        let end = offset.saturating_add(length).min(data.len());
        self.write(if end < data.len() { b'm' } else { b'l' });
        self.write_binary(&data[start..end]);
    }
}
