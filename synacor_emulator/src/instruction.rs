use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::word::{self, Word, LITERAL_MODULO, REGISTER_COUNT, REGISTER_MIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u16)]
pub enum Opcode {
    Halt = 0,
    Set = 1,
    Push = 2,
    Pop = 3,
    Eq = 4,
    Gt = 5,
    Jmp = 6,
    Jt = 7,
    Jf = 8,
    Add = 9,
    Mult = 10,
    Mod = 11,
    And = 12,
    Or = 13,
    Not = 14,
    Rmem = 15,
    Wmem = 16,
    Call = 17,
    Ret = 18,
    Out = 19,
    In = 20,
    Noop = 21,
}

impl Opcode {
    pub fn from_word(word: Word) -> Option<Self> {
        Self::from_u16(word)
    }
}

/// How an operand word is interpreted.
///
/// `Register` operands name a write target, every other kind is read as a
/// value (literal or the contents of a register). `Address` and `Char` only
/// differ from `Value` in how tools present them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Value,
    Address,
    Char,
    Register,
}

/// A decoded operand before any register contents are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Literal(Word),
    Register(u8),
}

impl Operand {
    /// Resolves a raw operand word for the given kind, `None` when the word
    /// has no meaning for it.
    pub fn resolve(kind: OperandKind, raw: Word) -> Option<Self> {
        match kind {
            OperandKind::Register => {
                let index = (raw as u32 % LITERAL_MODULO) as usize;
                (index < REGISTER_COUNT).then_some(Operand::Register(index as u8))
            }
            OperandKind::Value | OperandKind::Address | OperandKind::Char => {
                if word::is_literal(raw) {
                    Some(Operand::Literal(raw))
                } else if word::is_register(raw) {
                    Some(Operand::Register((raw - REGISTER_MIN) as u8))
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub name: &'static str,
    pub operands: &'static [OperandKind],
}

impl Instruction {
    pub fn lookup(word: Word) -> Option<&'static Instruction> {
        INSTRUCTIONS.get(Opcode::from_word(word)? as usize)
    }

    /// Width in words, opcode included.
    pub fn size(&self) -> usize {
        1 + self.operands.len()
    }
}

use OperandKind::{Address as A, Char as C, Register as R, Value as V};

macro_rules! instructions {
    ($($op:ident $name:literal [$($kind:ident),*];)*) => {
        /// Indexed by opcode.
        pub static INSTRUCTIONS: [Instruction; 22] = [
            $(Instruction { opcode: Opcode::$op, name: $name, operands: &[$($kind),*] },)*
        ];
    };
}

instructions! {
    Halt "halt" [];
    Set  "set"  [R, V];
    Push "push" [V];
    Pop  "pop"  [R];
    Eq   "eq"   [R, V, V];
    Gt   "gt"   [R, V, V];
    Jmp  "jmp"  [A];
    Jt   "jt"   [V, A];
    Jf   "jf"   [V, A];
    Add  "add"  [R, V, V];
    Mult "mult" [R, V, V];
    Mod  "mod"  [R, V, V];
    And  "and"  [R, V, V];
    Or   "or"   [R, V, V];
    Not  "not"  [R, V];
    Rmem "rmem" [R, A];
    Wmem "wmem" [A, V];
    Call "call" [A];
    Ret  "ret"  [];
    Out  "out"  [C];
    In   "in"   [R];
    Noop "noop" [];
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn table_is_indexed_by_opcode() {
        for (index, instruction) in INSTRUCTIONS.iter().enumerate() {
            assert_eq!(instruction.opcode as usize, index);
            assert_eq!(Instruction::lookup(index as Word), Some(instruction));
        }
        assert_eq!(Instruction::lookup(22), None);
        assert_eq!(Instruction::lookup(0xFFFF), None);
    }

    #[rstest]
    #[case(Opcode::Halt, 1)]
    #[case(Opcode::Set, 3)]
    #[case(Opcode::Eq, 4)]
    #[case(Opcode::Jt, 3)]
    #[case(Opcode::Out, 2)]
    #[case(Opcode::Noop, 1)]
    fn instruction_size(#[case] opcode: Opcode, #[case] size: usize) {
        assert_eq!(INSTRUCTIONS[opcode as usize].size(), size);
    }

    #[rstest]
    #[case(OperandKind::Value, 0, Some(Operand::Literal(0)))]
    #[case(OperandKind::Value, 32767, Some(Operand::Literal(32767)))]
    #[case(OperandKind::Address, 32768, Some(Operand::Register(0)))]
    #[case(OperandKind::Char, 32775, Some(Operand::Register(7)))]
    #[case(OperandKind::Value, 32776, None)]
    #[case(OperandKind::Register, 32770, Some(Operand::Register(2)))]
    #[case(OperandKind::Register, 5, Some(Operand::Register(5)))]
    #[case(OperandKind::Register, 32776, None)]
    fn operand_resolution(
        #[case] kind: OperandKind,
        #[case] raw: Word,
        #[case] expected: Option<Operand>,
    ) {
        assert_eq!(Operand::resolve(kind, raw), expected);
    }
}
