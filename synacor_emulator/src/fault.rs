use thiserror::Error;

use crate::word::Word;

/// Coarse grouping used when reporting a fault to a debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    /// The instruction stream could not be decoded.
    Decode,
    /// The instruction decoded fine but could not be carried out.
    Runtime,
}

/// Fatal conditions raised by the machine. Each one halts execution.
///
/// Addresses are word addresses of the faulting instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Fault {
    #[error("unknown opcode {opcode} at {address:#06x}")]
    UnknownOpcode { address: usize, opcode: Word },
    #[error("invalid operand {raw} at {address:#06x}")]
    InvalidOperand { address: usize, raw: Word },
    #[error("instruction at {address:#06x} runs past the end of memory")]
    TruncatedInstruction { address: usize },
    #[error("stack underflow at {address:#06x}")]
    StackUnderflow { address: usize },
    #[error("division by zero at {address:#06x}")]
    DivisionByZero { address: usize },
    #[error("memory access to {target:#06x} out of bounds at {address:#06x}")]
    MemoryOutOfBounds { address: usize, target: Word },
}

impl Fault {
    pub fn class(&self) -> FaultClass {
        match self {
            Fault::UnknownOpcode { .. }
            | Fault::InvalidOperand { .. }
            | Fault::TruncatedInstruction { .. } => FaultClass::Decode,
            Fault::StackUnderflow { .. }
            | Fault::DivisionByZero { .. }
            | Fault::MemoryOutOfBounds { .. } => FaultClass::Runtime,
        }
    }
}
