use std::fmt::Write as _;

use crate::{
    fault::Fault,
    instruction::{Instruction, Opcode, Operand},
    io::{DebugCommand, MachineIo},
    word::{self, Word, REGISTER_COUNT},
};

/// Why the machine stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// A `halt` instruction.
    Instruction,
    /// `ret` with nothing on the stack.
    EmptyReturn,
    /// The program counter walked off the end of memory.
    EndOfMemory,
    Fault(Fault),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecState {
    /// Only true while `run` is stepping.
    pub running: bool,
    /// Terminal, cleared by `load` alone.
    pub halted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Executed,
    Halted(Halt),
    /// An `in` found no input. Nothing was executed and the program counter
    /// still points at the `in`.
    AwaitingInput,
}

/// An instruction read out of memory, operands not yet evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub address: usize,
    pub instruction: &'static Instruction,
    operands: [Operand; 3],
}

impl DecodedInstruction {
    pub fn operands(&self) -> &[Operand] {
        &self.operands[..self.instruction.operands.len()]
    }

    pub fn next_address(&self) -> usize {
        self.address + self.instruction.size()
    }
}

enum Flow {
    Next,
    Jump(Word),
    Halt(Halt),
    AwaitInput,
}

#[derive(Debug, Default, Clone)]
pub struct Machine {
    memory: Vec<Word>,
    registers: [Word; REGISTER_COUNT],
    stack: Vec<Word>,
    address: usize,
    state: ExecState,
    halt: Option<Halt>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all state and materializes memory from a little endian image.
    pub fn load(&mut self, data: &[u8]) {
        if data.len() % word::ADDRESS_SIZE != 0 {
            log::warn!("program image has an odd length, ignoring the last byte");
        }
        *self = Self {
            memory: word::words_from_le_bytes(data),
            ..Self::default()
        };
        log::debug!("loaded {} words", self.memory.len());
    }

    pub fn memory(&self) -> &[Word] {
        &self.memory
    }

    pub fn registers(&self) -> &[Word; REGISTER_COUNT] {
        &self.registers
    }

    pub fn register(&self, index: usize) -> Option<Word> {
        self.registers.get(index).copied()
    }

    pub fn stack(&self) -> &[Word] {
        &self.stack
    }

    /// Word address of the next instruction.
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn set_address(&mut self, address: usize) {
        self.address = address;
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted
    }

    pub fn halt_reason(&self) -> Option<Halt> {
        self.halt
    }

    /// Memory image as little endian bytes, the view a debugger reads.
    pub fn memory_bytes(&self) -> Vec<u8> {
        self.memory.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn fetch(&self, address: usize, start: usize) -> Result<Word, Fault> {
        self.memory
            .get(address)
            .copied()
            .ok_or(Fault::TruncatedInstruction { address: start })
    }

    /// Decodes the instruction at `address` without executing it.
    pub fn decode(&self, address: usize) -> Result<DecodedInstruction, Fault> {
        let opcode = self.fetch(address, address)?;
        let instruction =
            Instruction::lookup(opcode).ok_or(Fault::UnknownOpcode { address, opcode })?;

        let mut operands = [Operand::Literal(0); 3];
        for (index, kind) in instruction.operands.iter().enumerate() {
            let raw = self.fetch(address + 1 + index, address)?;
            operands[index] =
                Operand::resolve(*kind, raw).ok_or(Fault::InvalidOperand { address, raw })?;
        }
        Ok(DecodedInstruction {
            address,
            instruction,
            operands,
        })
    }

    fn value(&self, operand: Operand) -> Word {
        match operand {
            Operand::Literal(value) => value,
            Operand::Register(index) => self.registers[index as usize],
        }
    }

    fn target(operand: Operand) -> usize {
        match operand {
            Operand::Register(index) => index as usize,
            // decode never hands out a literal for a register operand
            Operand::Literal(_) => unreachable!("register operand decoded as literal"),
        }
    }

    /// Runs one fetch, decode, execute cycle.
    ///
    /// Faults halt the machine before they are returned.
    pub fn step<IO: MachineIo>(&mut self, io: &mut IO) -> Result<StepOutcome, Fault> {
        if let Some(halt) = self.halt {
            return Ok(StepOutcome::Halted(halt));
        }
        if self.address >= self.memory.len() {
            return Ok(StepOutcome::Halted(self.finish(Halt::EndOfMemory)));
        }

        let flow = self
            .decode(self.address)
            .and_then(|decoded| self.execute(&decoded, io).map(|flow| (decoded, flow)));
        let (decoded, flow) = match flow {
            Ok(ok) => ok,
            Err(fault) => {
                log::warn!("machine fault: {}", fault);
                self.finish(Halt::Fault(fault));
                return Err(fault);
            }
        };

        match flow {
            Flow::Next => self.address = decoded.next_address(),
            Flow::Jump(address) => self.address = address as usize,
            Flow::Halt(halt) => return Ok(StepOutcome::Halted(self.finish(halt))),
            Flow::AwaitInput => {
                self.state.running = false;
                return Ok(StepOutcome::AwaitingInput);
            }
        }
        Ok(StepOutcome::Executed)
    }

    fn finish(&mut self, halt: Halt) -> Halt {
        self.state.running = false;
        self.state.halted = true;
        self.halt = Some(halt);
        halt
    }

    fn execute<IO: MachineIo>(
        &mut self,
        decoded: &DecodedInstruction,
        io: &mut IO,
    ) -> Result<Flow, Fault> {
        let address = decoded.address;
        let ops = decoded.operands();
        let a = || ops[0];
        let b = || self.value(ops[1]);
        let c = || self.value(ops[2]);

        let (register, value) = match decoded.instruction.opcode {
            Opcode::Halt => return Ok(Flow::Halt(Halt::Instruction)),
            Opcode::Set => (a(), b()),
            Opcode::Push => {
                let value = self.value(a());
                self.stack.push(value);
                return Ok(Flow::Next);
            }
            Opcode::Pop => {
                let value = self.stack.pop().ok_or(Fault::StackUnderflow { address })?;
                (a(), value)
            }
            Opcode::Eq => (a(), (b() == c()) as Word),
            Opcode::Gt => (a(), (b() > c()) as Word),
            Opcode::Jmp => return Ok(Flow::Jump(self.value(a()))),
            Opcode::Jt => {
                return Ok(if self.value(a()) != 0 {
                    Flow::Jump(b())
                } else {
                    Flow::Next
                })
            }
            Opcode::Jf => {
                return Ok(if self.value(a()) == 0 {
                    Flow::Jump(b())
                } else {
                    Flow::Next
                })
            }
            Opcode::Add => (a(), word::wrap(b() as u32 + c() as u32)),
            Opcode::Mult => (a(), word::wrap(b() as u32 * c() as u32)),
            Opcode::Mod => {
                let divisor = c();
                if divisor == 0 {
                    return Err(Fault::DivisionByZero { address });
                }
                (a(), b() % divisor)
            }
            Opcode::And => (a(), b() & c()),
            Opcode::Or => (a(), b() | c()),
            Opcode::Not => (a(), !b() & word::LITERAL_MAX),
            Opcode::Rmem => {
                let target = b();
                let value = self
                    .memory
                    .get(target as usize)
                    .copied()
                    .ok_or(Fault::MemoryOutOfBounds { address, target })?;
                (a(), value)
            }
            Opcode::Wmem => {
                let target = self.value(a());
                let value = b();
                let cell = self
                    .memory
                    .get_mut(target as usize)
                    .ok_or(Fault::MemoryOutOfBounds { address, target })?;
                *cell = value;
                return Ok(Flow::Next);
            }
            Opcode::Call => {
                let target = self.value(a());
                self.stack.push(decoded.next_address() as Word);
                return Ok(Flow::Jump(target));
            }
            Opcode::Ret => {
                return Ok(match self.stack.pop() {
                    Some(target) => Flow::Jump(target),
                    None => Flow::Halt(Halt::EmptyReturn),
                })
            }
            Opcode::Out => {
                io.write_char(self.value(a()));
                return Ok(Flow::Next);
            }
            Opcode::In => match io.read_char() {
                Some(char_code) => (a(), char_code),
                None => return Ok(Flow::AwaitInput),
            },
            Opcode::Noop => return Ok(Flow::Next),
        };

        self.registers[Self::target(register)] = value;
        Ok(Flow::Next)
    }

    /// Steps until the machine halts or waits for input.
    pub fn run<IO: MachineIo>(&mut self, io: &mut IO) -> Result<StepOutcome, Fault> {
        self.state.running = !self.state.halted;
        while self.state.running {
            match self.step(io)? {
                StepOutcome::Executed => {}
                other => return Ok(other),
            }
        }
        Ok(StepOutcome::Executed)
    }

    /// Answers a debug input command with a one line report.
    pub fn inspect(&self, command: &DebugCommand) -> String {
        let mut report = String::new();
        match *command {
            DebugCommand::Register(index) => match self.register(index as usize) {
                Some(value) => _ = write!(report, "r{} = {}", index, value),
                None => _ = write!(report, "no register r{}", index),
            },
            DebugCommand::Memory { address, count } => {
                _ = write!(report, "{:#06x}:", address);
                let start = address as usize;
                let end = start.saturating_add(count as usize).min(self.memory.len());
                for value in self.memory.get(start..end).unwrap_or_default() {
                    _ = write!(report, " {}", value);
                }
            }
            DebugCommand::State => {
                _ = write!(
                    report,
                    "address {:#06x} registers {:?} stack {:?} {}",
                    self.address,
                    self.registers,
                    self.stack,
                    match self.halt {
                        Some(halt) => format!("halted ({:?})", halt),
                        None => "live".to_owned(),
                    }
                );
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Console;
    use rstest::rstest;

    const R0: Word = 32768;
    const R1: Word = 32769;

    fn machine(words: &[Word]) -> Machine {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let mut machine = Machine::new();
        machine.load(&bytes);
        machine
    }

    fn console() -> Console<Vec<u8>> {
        Console::new(Vec::new())
    }

    #[test]
    fn set_then_read() {
        let mut m = machine(&[1, R1, 1234, 0]);
        let mut io = console();
        assert_eq!(m.step(&mut io), Ok(StepOutcome::Executed));
        assert_eq!(m.register(1), Some(1234));
        assert_eq!(m.address(), 3);
    }

    #[rstest]
    #[case(9, 32758, 15, 5)]
    #[case(9, 1, 2, 3)]
    #[case(10, 32767, 2, 32766)]
    #[case(11, 17, 5, 2)]
    #[case(12, 0b1100, 0b1010, 0b1000)]
    #[case(13, 0b1100, 0b1010, 0b1110)]
    #[case(4, 7, 7, 1)]
    #[case(4, 7, 8, 0)]
    #[case(5, 8, 7, 1)]
    #[case(5, 7, 7, 0)]
    fn binary_ops(#[case] opcode: Word, #[case] b: Word, #[case] c: Word, #[case] expected: Word) {
        let mut m = machine(&[opcode, R0, b, c, 0]);
        m.step(&mut console()).unwrap();
        assert_eq!(m.register(0), Some(expected));
    }

    #[test]
    fn not_masks_to_15_bits() {
        let mut m = machine(&[14, R0, 0, 14, R1, 0x7FFF, 0]);
        let mut io = console();
        m.step(&mut io).unwrap();
        m.step(&mut io).unwrap();
        assert_eq!(m.registers()[..2], [0x7FFF, 0]);
    }

    #[test]
    fn register_operands_read_current_values() {
        // set r0 5; add r1 r0 r0
        let mut m = machine(&[1, R0, 5, 9, R1, R0, R0, 0]);
        let mut io = console();
        m.step(&mut io).unwrap();
        m.step(&mut io).unwrap();
        assert_eq!(m.register(1), Some(10));
    }

    #[test]
    fn push_pop_round_trip() {
        let mut m = machine(&[2, 42, 3, R0, 0]);
        let mut io = console();
        m.step(&mut io).unwrap();
        assert_eq!(m.stack(), &[42]);
        m.step(&mut io).unwrap();
        assert_eq!(m.register(0), Some(42));
        assert!(m.stack().is_empty());
    }

    #[test]
    fn pop_on_empty_stack_faults() {
        let mut m = machine(&[3, R0, 0]);
        let fault = m.step(&mut console()).unwrap_err();
        assert_eq!(fault, Fault::StackUnderflow { address: 0 });
        assert!(m.is_halted());
        assert_eq!(m.halt_reason(), Some(Halt::Fault(fault)));
        assert_eq!(m.step(&mut console()), Ok(StepOutcome::Halted(Halt::Fault(fault))));
    }

    #[test]
    fn mod_by_zero_faults() {
        let mut m = machine(&[11, R0, 4, 0]);
        assert_eq!(
            m.step(&mut console()),
            Err(Fault::DivisionByZero { address: 0 })
        );
        assert!(m.is_halted());
    }

    #[rstest]
    #[case(&[22], Fault::UnknownOpcode { address: 0, opcode: 22 })]
    #[case(&[1, R0, 32776], Fault::InvalidOperand { address: 0, raw: 32776 })]
    #[case(&[1, 9, 1], Fault::InvalidOperand { address: 0, raw: 9 })]
    #[case(&[9, R0, 1], Fault::TruncatedInstruction { address: 0 })]
    fn decode_faults(#[case] words: &[Word], #[case] expected: Fault) {
        let mut m = machine(words);
        assert_eq!(m.step(&mut console()), Err(expected));
        assert_eq!(expected.class(), crate::fault::FaultClass::Decode);
    }

    #[test]
    fn jumps_do_not_auto_advance() {
        // 0: jmp 3; 2: halt; 3: jt 1 6; 6: jf 1 0 (not taken); 9: halt
        let mut m = machine(&[6, 3, 0, 7, 1, 6, 8, 1, 0, 0]);
        let mut io = console();
        m.step(&mut io).unwrap();
        assert_eq!(m.address(), 3);
        m.step(&mut io).unwrap();
        assert_eq!(m.address(), 6);
        m.step(&mut io).unwrap();
        assert_eq!(m.address(), 9);
    }

    #[test]
    fn jump_to_own_address_stays_put() {
        let mut m = machine(&[21, 6, 1]);
        let mut io = console();
        m.step(&mut io).unwrap();
        m.step(&mut io).unwrap();
        assert_eq!(m.address(), 1);
    }

    #[test]
    fn call_then_ret() {
        // 0: call 4; 2: halt; 3: noop; 4: ret
        let mut m = machine(&[17, 4, 0, 21, 18]);
        let mut io = console();
        m.step(&mut io).unwrap();
        assert_eq!(m.address(), 4);
        assert_eq!(m.stack(), &[2]);
        m.step(&mut io).unwrap();
        assert_eq!(m.address(), 2);
        assert_eq!(m.step(&mut io), Ok(StepOutcome::Halted(Halt::Instruction)));
    }

    #[test]
    fn ret_on_empty_stack_halts() {
        let mut m = machine(&[18]);
        assert_eq!(
            m.step(&mut console()),
            Ok(StepOutcome::Halted(Halt::EmptyReturn))
        );
        assert!(m.state().halted);
    }

    #[test]
    fn memory_access() {
        // wmem 6 77; rmem r0 6; halt; <data>
        let mut m = machine(&[16, 6, 77, 15, R0, 6, 0]);
        let mut io = console();
        m.step(&mut io).unwrap();
        m.step(&mut io).unwrap();
        assert_eq!(m.register(0), Some(77));
        assert_eq!(m.memory()[6], 77);
    }

    #[test]
    fn memory_access_out_of_bounds() {
        let mut m = machine(&[15, R0, 100]);
        assert_eq!(
            m.step(&mut console()),
            Err(Fault::MemoryOutOfBounds { address: 0, target: 100 })
        );
    }

    #[test]
    fn input_waits_without_side_effects() {
        let mut m = machine(&[20, R0, 0]);
        let mut io = console();
        assert_eq!(m.step(&mut io), Ok(StepOutcome::AwaitingInput));
        assert_eq!(m.address(), 0);
        assert!(!m.is_halted());

        io.input.push_bytes(b"x");
        assert_eq!(m.step(&mut io), Ok(StepOutcome::Executed));
        assert_eq!(m.register(0), Some(b'x' as Word));
        assert_eq!(m.address(), 2);
    }

    #[test]
    fn run_until_halt() {
        let mut m = machine(&[19, 65, 19, 32768, 0]);
        let mut io = console();
        assert_eq!(m.run(&mut io), Ok(StepOutcome::Halted(Halt::Instruction)));
        assert_eq!(io.output(), &[65, 0]);
        assert!(!m.state().running);
    }

    #[test]
    fn running_off_the_end_halts() {
        let mut m = machine(&[21]);
        assert_eq!(
            m.run(&mut console()),
            Ok(StepOutcome::Halted(Halt::EndOfMemory))
        );
    }

    #[test]
    fn load_resets_everything() {
        let mut m = machine(&[2, 5, 0]);
        m.run(&mut console()).unwrap();
        assert!(m.is_halted());
        m.load(&[0x15, 0x00]);
        assert!(!m.is_halted());
        assert!(m.stack().is_empty());
        assert_eq!(m.address(), 0);
        assert_eq!(m.memory(), &[21]);
    }

    #[test]
    fn decode_for_tools() {
        let m = machine(&[9, R0, R1, 7]);
        let decoded = m.decode(0).unwrap();
        assert_eq!(decoded.instruction.name, "add");
        assert_eq!(
            decoded.operands(),
            &[Operand::Register(0), Operand::Register(1), Operand::Literal(7)]
        );
        assert_eq!(decoded.next_address(), 4);
    }

    #[test]
    fn inspect_reports() {
        let mut m = machine(&[1, R0, 9, 0]);
        m.step(&mut console()).unwrap();
        assert_eq!(m.inspect(&DebugCommand::Register(0)), "r0 = 9");
        assert_eq!(
            m.inspect(&DebugCommand::Memory { address: 0, count: 2 }),
            "0x0000: 1 32768"
        );
        assert!(m.inspect(&DebugCommand::State).starts_with("address 0x0003"));
    }
}
