pub mod incoming;
pub mod psm;
pub mod response;

/// Bytes that must never appear raw inside a packet body.
const ESCAPED: [u8; 4] = [b'#', b'$', b'}', b'*'];
const ESCAPE: u8 = b'}';

/// Modulo 256 sum of the packet body.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Compares against the two hex digits sent after `#`, either case.
pub fn verify_checksum(data: &[u8], digits: [u8; 2]) -> bool {
    match (hex_value(digits[0]), hex_value(digits[1])) {
        (Some(hi), Some(lo)) => checksum(data) == hi << 4 | lo,
        _ => false,
    }
}

pub fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if ESCAPED.contains(&b) {
            out.push(ESCAPE);
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    out
}

pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            if let Some(&next) = iter.next() {
                out.push(next ^ 0x20);
            }
        } else {
            out.push(b);
        }
    }
    out
}
