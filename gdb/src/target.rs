use synacor_emulator::Halt;
use thiserror::Error;

use crate::{packets::response::ResponseWritter, signal::Signal};

/// Registers as the debugger sees them: r0-r7, then the synthesized pc and sp.
pub const REGISTER_COUNT: usize = 10;
pub const PC_REGISTER: u32 = 8;
pub const SP_REGISTER: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("no register {0}")]
    InvalidRegister(u32),
    #[error("address {0:#x} is outside of memory")]
    AddressOutOfRange(u32),
    #[error("no such file")]
    FileNotFound,
}

impl TargetError {
    /// errno value sent back in `E<nn>` replies.
    pub fn errno(&self) -> u8 {
        match self {
            TargetError::InvalidRegister(_) | TargetError::FileNotFound => 2,
            TargetError::AddressOutOfRange(_) => 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DoneStep,
    Signal(Signal),
    SwBreak,
    Exited(u8),
    Terminated(Signal),
}

impl StopReason {
    pub fn from_halt(halt: &Halt) -> Self {
        match Signal::from_halt(halt) {
            Some(signal) => StopReason::Terminated(signal),
            None => StopReason::Exited(0),
        }
    }

    /// Whether the program is gone after this stop.
    pub fn is_final(&self) -> bool {
        matches!(self, StopReason::Exited(_) | StopReason::Terminated(_))
    }

    pub fn write_stop_packet(&self, res: &mut ResponseWritter) {
        match self {
            StopReason::DoneStep => {
                res.write(b'T');
                res.write_hex(Signal::SIGTRAP as u8);
                res.write_str("thread:01;");
            }
            StopReason::Signal(sig) => {
                res.write(b'T');
                res.write_hex(*sig as u8);
                res.write_str("thread:01;");
            }
            StopReason::SwBreak => {
                res.write(b'T');
                res.write_hex(Signal::SIGTRAP as u8);
                res.write_str("thread:01;swbreak:;");
            }
            StopReason::Exited(code) => {
                res.write(b'W');
                res.write_hex(*code);
            }
            StopReason::Terminated(sig) => {
                res.write(b'X');
                res.write_hex(*sig as u8);
            }
        }
    }
}

/// What the stub needs from the thing being debugged.
///
/// Addresses are byte addresses into the little endian memory image. Resume
/// calls return a stop reason when the target stops before they return, and
/// `None` when the stop will be reported later through `run_for` or
/// `push_input`.
pub trait Target {
    fn interrupt(&mut self) -> StopReason;
    fn step_at(&mut self, addr: Option<u32>) -> Option<StopReason>;
    fn continue_at(&mut self, addr: Option<u32>) -> Option<StopReason>;
    /// Running or blocked on input, as far as the client is concerned.
    fn is_running(&self) -> bool;
    /// Whether `run_for` has work to do right now.
    fn is_executing(&self) -> bool;
    /// Why the target is currently stopped, as reported by `?`.
    fn stop_reason(&self) -> StopReason;

    /// Executes for at most `budget` wall clock time while running.
    fn run_for(&mut self, budget: std::time::Duration) -> Option<StopReason>;
    /// Hands program input to the target, possibly unblocking it.
    fn push_input(&mut self, bytes: &[u8]) -> Option<StopReason>;

    fn read_registers(&self) -> [u16; REGISTER_COUNT];
    fn read_register(&self, reg: u32) -> Result<u16, TargetError>;
    fn read_memory(&self, addr: u32, len: u32) -> Result<Vec<u8>, TargetError>;

    fn insert_software_breakpoint(&mut self, addr: u32);
    fn remove_software_breakpoint(&mut self, addr: u32);

    /// Restarts the program from a fresh image.
    fn reload(&mut self);
    /// Resolved path of the loaded executable.
    fn exec_file(&self) -> Vec<u8>;
    /// Contents of a file the target exposes to the debugger.
    fn open_file(&self, filename: &[u8]) -> Result<Vec<u8>, TargetError>;
}
