use std::collections::VecDeque;
use std::io::Write;

use crate::word::Word;

/// Lines starting with this byte are debug commands and never reach the
/// machine.
pub const DEBUG_MARKER: u8 = b'!';

/// Character channel used by `in` and `out`.
pub trait MachineIo {
    /// Next pending character code, `None` when the machine has to wait.
    fn read_char(&mut self) -> Option<Word>;
    fn write_char(&mut self, char_code: Word);
}

/// Character codes waiting to be consumed by `in`.
///
/// Taking from the queue is the only side effect of a wait, so abandoning a
/// wait leaves buffered input intact.
#[derive(Debug, Default)]
pub struct InputQueue {
    pending: VecDeque<u8>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.pending.pop_front()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes);
    }

    /// Queues `bytes` for the machine, pulling out whole debug command lines
    /// on the way.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<DebugCommand, String>> {
        let mut commands = Vec::new();
        for line in bytes.split_inclusive(|b| *b == b'\n') {
            if let Some(command) = line.strip_prefix(&[DEBUG_MARKER]) {
                commands.push(DebugCommand::parse(&String::from_utf8_lossy(command)));
            } else {
                self.push_bytes(line);
            }
        }
        commands
    }
}

/// Fixed set of introspection commands accepted on the input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCommand {
    Register(u8),
    Memory { address: Word, count: Word },
    State,
}

pub const DEBUG_USAGE: &str = "debug commands: !reg <n> | !mem <addr> [count] | !state";

impl DebugCommand {
    /// Parses the text after the marker, e.g. `reg 3` or `mem 0x10 4`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut parts = text.split_whitespace();
        let command = match (parts.next(), parts.next(), parts.next()) {
            (Some("reg"), Some(index), None) => match parse_number(index) {
                Some(index) if index < 8 => DebugCommand::Register(index as u8),
                _ => return Err(format!("invalid register: {index}")),
            },
            (Some("mem"), Some(address), count) => {
                let address =
                    parse_number(address).ok_or_else(|| format!("invalid address: {address}"))?;
                let count = match count {
                    Some(count) => {
                        parse_number(count).ok_or_else(|| format!("invalid count: {count}"))?
                    }
                    None => 1,
                };
                DebugCommand::Memory { address, count }
            }
            (Some("state"), None, None) => DebugCommand::State,
            _ => return Err(DEBUG_USAGE.into()),
        };
        if parts.next().is_some() {
            return Err(DEBUG_USAGE.into());
        }
        Ok(command)
    }
}

fn parse_number(text: &str) -> Option<Word> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => Word::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Input queue plus an output sink, the usual `MachineIo`.
pub struct Console<W: Write> {
    pub input: InputQueue,
    output: W,
}

impl<W: Write> Console<W> {
    pub fn new(output: W) -> Self {
        Self {
            input: InputQueue::new(),
            output,
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }
}

impl<W: Write> MachineIo for Console<W> {
    fn read_char(&mut self) -> Option<Word> {
        self.input.pop().map(Word::from)
    }

    fn write_char(&mut self, char_code: Word) {
        // `out` only ever carries byte sized codes, anything wider is truncated
        let result = self
            .output
            .write_all(&[char_code as u8])
            .and_then(|_| self.output.flush());
        if let Err(err) = result {
            log::error!("failed to write program output: {}", err);
        }
    }
}
