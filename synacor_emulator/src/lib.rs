pub mod cpu;
pub mod fault;
pub mod instruction;
pub mod io;
pub mod program;
pub mod word;

pub use cpu::{DecodedInstruction, ExecState, Halt, Machine, StepOutcome};
pub use fault::{Fault, FaultClass};
pub use instruction::{Instruction, Opcode, Operand, OperandKind, INSTRUCTIONS};
pub use io::{Console, DebugCommand, InputQueue, MachineIo, DEBUG_MARKER};
pub use program::Program;
pub use word::Word;
