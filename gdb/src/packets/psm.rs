use super::{unescape, verify_checksum};

/// What a run of incoming bytes amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nack,
    /// The out of band break byte (`0x03`).
    Interrupt,
    /// Body of a packet whose checksum matched. Binary payloads come
    /// already unescaped.
    Packet(Vec<u8>),
}

pub struct PacketStateMachine {
    buf: Vec<u8>,
    digits: [u8; 2],
    state: PacketStateMachineStates,
}

impl Default for PacketStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketStateMachine {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            digits: [0; 2],
            state: PacketStateMachineStates::Ready,
        }
    }

    /// Feeds one byte, returning a frame once one is complete.
    ///
    /// Packets with a bad checksum are dropped here; the client is expected
    /// to retransmit.
    pub fn incomming_data(&mut self, data: u8) -> Option<Frame> {
        use PacketStateMachineStates as State;
        match self.state {
            State::Ready => match data {
                b'$' => {
                    self.buf.clear();
                    self.state = State::CommandBody;
                }
                b'+' => return Some(Frame::Ack),
                b'-' => return Some(Frame::Nack),
                0x03 => return Some(Frame::Interrupt),
                other => log::trace!("<-- ignoring stray byte {:#04x}", other),
            },
            State::CommandBody if data == b'#' => self.state = State::CheckSum1,
            State::CommandBody if data == b'$' => {
                log::debug!("<-- packet restarted before its end, dropping {} bytes", self.buf.len());
                self.buf.clear();
            }
            State::CommandBody => self.buf.push(data),
            State::CheckSum1 => {
                self.digits[0] = data;
                self.state = State::CheckSum2;
            }
            State::CheckSum2 => {
                self.digits[1] = data;
                self.state = State::Ready;
                return self.finish();
            }
        }
        None
    }

    fn finish(&mut self) -> Option<Frame> {
        log::trace!(
            "<-- ${}#{}",
            String::from_utf8_lossy(&self.buf),
            String::from_utf8_lossy(&self.digits)
        );
        if verify_checksum(&self.buf, self.digits) {
            let body = if carries_binary(&self.buf) {
                unescape(&self.buf)
            } else {
                std::mem::take(&mut self.buf)
            };
            Some(Frame::Packet(body))
        } else {
            log::warn!(
                "packet checksum mismatch, got {} expected {:02x}",
                String::from_utf8_lossy(&self.digits),
                super::checksum(&self.buf)
            );
            None
        }
    }
}

/// Only binary writes escape their payload; `}` anywhere else is literal.
fn carries_binary(body: &[u8]) -> bool {
    body.starts_with(b"X") || body.starts_with(b"vFile:pwrite:")
}

enum PacketStateMachineStates {
    Ready,
    CommandBody,
    CheckSum1,
    CheckSum2,
}
