use synacor_emulator::{Fault, Halt};

/// The handful of POSIX signal numbers the stub ever reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)]
pub enum Signal {
    SIGILL = 4,
    SIGTRAP = 5,
    SIGFPE = 8,
    SIGSEGV = 11,
}

impl Signal {
    /// The signal a fatal fault is reported as.
    pub fn from_fault(fault: &Fault) -> Self {
        match fault {
            Fault::UnknownOpcode { .. }
            | Fault::InvalidOperand { .. }
            | Fault::TruncatedInstruction { .. } => Signal::SIGILL,
            Fault::DivisionByZero { .. } => Signal::SIGFPE,
            Fault::StackUnderflow { .. } | Fault::MemoryOutOfBounds { .. } => Signal::SIGSEGV,
        }
    }

    /// `None` for a clean halt.
    pub fn from_halt(halt: &Halt) -> Option<Self> {
        match halt {
            Halt::Fault(fault) => Some(Self::from_fault(fault)),
            Halt::Instruction | Halt::EmptyReturn | Halt::EndOfMemory => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Fault::UnknownOpcode { address: 0, opcode: 22 }, Signal::SIGILL)]
    #[case(Fault::InvalidOperand { address: 0, raw: 32776 }, Signal::SIGILL)]
    #[case(Fault::TruncatedInstruction { address: 0 }, Signal::SIGILL)]
    #[case(Fault::DivisionByZero { address: 0 }, Signal::SIGFPE)]
    #[case(Fault::StackUnderflow { address: 0 }, Signal::SIGSEGV)]
    #[case(Fault::MemoryOutOfBounds { address: 0, target: 9 }, Signal::SIGSEGV)]
    fn faults_map_to_signals(#[case] fault: Fault, #[case] signal: Signal) {
        assert_eq!(Signal::from_fault(&fault), signal);
        assert_eq!(Signal::from_halt(&Halt::Fault(fault)), Some(signal));
    }

    #[test]
    fn clean_halts_have_no_signal() {
        assert_eq!(Signal::from_halt(&Halt::Instruction), None);
        assert_eq!(Signal::from_halt(&Halt::EmptyReturn), None);
        assert_eq!(Signal::from_halt(&Halt::EndOfMemory), None);
    }
}
