use std::{
    collections::HashSet,
    io::Write,
    path::PathBuf,
    time::{Duration, Instant},
};

use synacor_emulator::{
    word::{byte_offset, ADDRESS_SIZE},
    Console, Halt, Machine, Program, StepOutcome,
};

use crate::{
    signal::Signal,
    target::{StopReason, Target, TargetError, PC_REGISTER, REGISTER_COUNT, SP_REGISTER},
};

/// The only file the debugger can open remotely.
pub const PROCMAP_FILE: &[u8] = b"/proc/1/maps";

/// How many instructions run between two looks at the clock.
const CLOCK_CHECK_INTERVAL: u32 = 1024;

pub type Output = Box<dyn Write + Send>;

/// What to do once input shows up for a blocked `in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    Continue,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerState {
    Idle,
    Running,
    AwaitingInput(Resume),
    Break(StopReason),
    /// Left only through a reload.
    Halted(StopReason),
}

/// Debug controller wrapped around one machine.
pub struct Debugger {
    machine: Machine,
    console: Console<Output>,
    program: Program,
    breakpoints: HashSet<u32>,
    state: DebuggerState,
    procmap_path: PathBuf,
}

impl Debugger {
    /// Loads `program` right away, writing its process map to `procmap_path`.
    pub fn new(program: Program, output: Output, procmap_path: impl Into<PathBuf>) -> Self {
        let mut debugger = Self {
            machine: Machine::new(),
            console: Console::new(output),
            program,
            breakpoints: HashSet::new(),
            state: DebuggerState::Idle,
            procmap_path: procmap_path.into(),
        };
        debugger.reload();
        debugger
    }

    pub fn load(&mut self, program: Program) {
        self.program = program;
        self.reload();
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn state(&self) -> DebuggerState {
        self.state
    }

    pub fn breakpoints(&self) -> &HashSet<u32> {
        &self.breakpoints
    }

    /// Single line `/proc/<pid>/maps` style description of the image.
    pub fn procmap(&self) -> String {
        format!(
            "00000000-{:08x} rwxp 00000000 00:00 0 {}",
            self.program.len(),
            self.program.path.display()
        )
    }

    fn write_procmap(&self) {
        match std::fs::write(&self.procmap_path, self.procmap()) {
            Ok(()) => log::info!("wrote procmap file {}", self.procmap_path.display()),
            Err(err) => log::error!(
                "failed to write procmap file {}: {}",
                self.procmap_path.display(),
                err
            ),
        }
    }

    fn on_breakpoint(&self) -> bool {
        self.breakpoints
            .contains(&(byte_offset(self.machine.address()) as u32))
    }

    fn jump(&mut self, addr: Option<u32>) {
        if let Some(addr) = addr {
            self.machine.set_address(addr as usize / ADDRESS_SIZE);
        }
    }

    /// Executes one instruction. `None` means an `in` is waiting for input.
    fn execute_one(&mut self) -> Option<StopReason> {
        match self.machine.step(&mut self.console) {
            Ok(StepOutcome::Executed) if self.on_breakpoint() => Some(StopReason::SwBreak),
            Ok(StepOutcome::Executed) => Some(StopReason::DoneStep),
            Ok(StepOutcome::Halted(halt)) => Some(StopReason::from_halt(&halt)),
            Ok(StepOutcome::AwaitingInput) => None,
            Err(fault) => Some(StopReason::from_halt(&Halt::Fault(fault))),
        }
    }

    fn stopped(&mut self, reason: StopReason) -> StopReason {
        self.state = if reason.is_final() {
            log::info!("program finished: {:?}", self.machine.halt_reason());
            DebuggerState::Halted(reason)
        } else {
            log::debug!("stopped at {:#06x}: {:?}", self.machine.address(), reason);
            DebuggerState::Break(reason)
        };
        reason
    }
}

impl Target for Debugger {
    fn interrupt(&mut self) -> StopReason {
        match self.state {
            DebuggerState::Halted(reason) => reason,
            _ => self.stopped(StopReason::Signal(Signal::SIGTRAP)),
        }
    }

    fn step_at(&mut self, addr: Option<u32>) -> Option<StopReason> {
        if let DebuggerState::Halted(reason) = self.state {
            return Some(reason);
        }
        self.jump(addr);
        match self.execute_one() {
            Some(reason) => Some(self.stopped(reason)),
            None => {
                self.state = DebuggerState::AwaitingInput(Resume::Step);
                None
            }
        }
    }

    fn continue_at(&mut self, addr: Option<u32>) -> Option<StopReason> {
        if let DebuggerState::Halted(reason) = self.state {
            return Some(reason);
        }
        self.jump(addr);
        self.state = DebuggerState::Running;
        None
    }

    fn is_running(&self) -> bool {
        matches!(
            self.state,
            DebuggerState::Running | DebuggerState::AwaitingInput(_)
        )
    }

    fn is_executing(&self) -> bool {
        self.state == DebuggerState::Running
    }

    /// A live program sitting on a breakpoint always reports `swbreak`,
    /// however it got there.
    fn stop_reason(&self) -> StopReason {
        match self.state {
            DebuggerState::Halted(reason) => reason,
            _ if self.on_breakpoint() => StopReason::SwBreak,
            DebuggerState::Break(StopReason::SwBreak) => StopReason::Signal(Signal::SIGTRAP),
            DebuggerState::Break(reason) => reason,
            _ => StopReason::Signal(Signal::SIGTRAP),
        }
    }

    fn run_for(&mut self, budget: Duration) -> Option<StopReason> {
        if self.state != DebuggerState::Running {
            return None;
        }
        let started = Instant::now();
        let mut executed: u32 = 0;
        loop {
            match self.execute_one() {
                Some(StopReason::DoneStep) => {}
                Some(reason) => return Some(self.stopped(reason)),
                None => {
                    self.state = DebuggerState::AwaitingInput(Resume::Continue);
                    return None;
                }
            }
            executed = executed.wrapping_add(1);
            if executed % CLOCK_CHECK_INTERVAL == 0 && started.elapsed() >= budget {
                return None;
            }
        }
    }

    fn push_input(&mut self, bytes: &[u8]) -> Option<StopReason> {
        for command in self.console.input.feed(bytes) {
            match command {
                Ok(command) => eprintln!("{}", self.machine.inspect(&command)),
                Err(usage) => eprintln!("{}", usage),
            }
        }
        match self.state {
            DebuggerState::AwaitingInput(_) if self.console.input.is_empty() => None,
            DebuggerState::AwaitingInput(Resume::Continue) => {
                self.state = DebuggerState::Running;
                None
            }
            DebuggerState::AwaitingInput(Resume::Step) => self.step_at(None),
            _ => None,
        }
    }

    fn read_registers(&self) -> [u16; REGISTER_COUNT] {
        let mut registers = [0; REGISTER_COUNT];
        registers[..8].copy_from_slice(self.machine.registers());
        registers[PC_REGISTER as usize] = byte_offset(self.machine.address()) as u16;
        registers[SP_REGISTER as usize] = byte_offset(self.machine.stack().len()) as u16;
        registers
    }

    fn read_register(&self, reg: u32) -> Result<u16, TargetError> {
        self.read_registers()
            .get(reg as usize)
            .copied()
            .ok_or(TargetError::InvalidRegister(reg))
    }

    fn read_memory(&self, addr: u32, len: u32) -> Result<Vec<u8>, TargetError> {
        let start = addr as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        if start >= byte_offset(self.machine.memory().len()) {
            return Err(TargetError::AddressOutOfRange(addr));
        }
        let bytes = self.machine.memory_bytes();
        let end = start.saturating_add(len as usize).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    fn insert_software_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr);
    }

    fn remove_software_breakpoint(&mut self, addr: u32) {
        self.breakpoints.remove(&addr);
    }

    fn reload(&mut self) {
        self.machine.load(&self.program.data);
        self.state = DebuggerState::Idle;
        log::info!("loaded program {}", self.program.path.display());
        self.write_procmap();
    }

    fn exec_file(&self) -> Vec<u8> {
        self.program.path.to_string_lossy().into_owned().into_bytes()
    }

    fn open_file(&self, filename: &[u8]) -> Result<Vec<u8>, TargetError> {
        if filename != PROCMAP_FILE {
            return Err(TargetError::FileNotFound);
        }
        std::fs::read(&self.procmap_path).map_err(|err| {
            log::warn!("failed to read {}: {}", self.procmap_path.display(), err);
            TargetError::FileNotFound
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use synacor_emulator::Word;

    const R0: Word = 32768;

    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        debugger: Debugger,
        output: SharedOutput,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn printed(&self) -> String {
            String::from_utf8(self.output.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn debugger(words: &[Word]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let output = SharedOutput::default();
        let debugger = Debugger::new(
            Program::new(data, "/tmp/prog.bin"),
            Box::new(output.clone()),
            dir.path().join("procmap.txt"),
        );
        Fixture {
            debugger,
            output,
            _dir: dir,
        }
    }

    // 0: noop  1: noop  2: out 'A'  4: jmp 0
    const LOOP: [Word; 6] = [21, 21, 19, 65, 6, 0];

    #[test]
    fn writes_procmap_on_load() {
        let fixture = debugger(&[19, 65, 0]);
        let map = fixture.debugger.open_file(PROCMAP_FILE).unwrap();
        assert_eq!(
            String::from_utf8(map).unwrap(),
            "00000000-00000006 rwxp 00000000 00:00 0 /tmp/prog.bin"
        );
        assert_eq!(
            fixture.debugger.open_file(b"/etc/passwd"),
            Err(TargetError::FileNotFound)
        );
    }

    #[test]
    fn continue_stops_before_breakpoint() {
        let mut fixture = debugger(&LOOP);
        let debugger = &mut fixture.debugger;
        debugger.insert_software_breakpoint(4);
        assert_eq!(debugger.continue_at(None), None);
        assert!(debugger.is_running());
        assert_eq!(
            debugger.run_for(Duration::from_secs(1)),
            Some(StopReason::SwBreak)
        );
        assert_eq!(debugger.machine().address(), 2);
        assert_eq!(debugger.state(), DebuggerState::Break(StopReason::SwBreak));
        assert_eq!(debugger.stop_reason(), StopReason::SwBreak);
        assert_eq!(fixture.printed(), "");
    }

    #[test]
    fn continue_from_breakpoint_runs_a_full_loop() {
        let mut fixture = debugger(&LOOP);
        fixture.debugger.insert_software_breakpoint(4);
        fixture.debugger.continue_at(None);
        fixture.debugger.run_for(Duration::from_secs(1));
        fixture.debugger.continue_at(None);
        assert_eq!(
            fixture.debugger.run_for(Duration::from_secs(1)),
            Some(StopReason::SwBreak)
        );
        assert_eq!(fixture.debugger.machine().address(), 2);
        assert_eq!(fixture.printed(), "A");
    }

    #[test]
    fn run_for_yields_when_budget_expires() {
        let mut fixture = debugger(&LOOP);
        fixture.debugger.continue_at(None);
        assert_eq!(fixture.debugger.run_for(Duration::ZERO), None);
        assert_eq!(fixture.debugger.state(), DebuggerState::Running);
        assert!(!fixture.printed().is_empty());
    }

    #[test]
    fn interrupt_breaks_a_running_machine() {
        let mut fixture = debugger(&LOOP);
        fixture.debugger.continue_at(None);
        fixture.debugger.run_for(Duration::ZERO);
        assert_eq!(
            fixture.debugger.interrupt(),
            StopReason::Signal(Signal::SIGTRAP)
        );
        assert!(!fixture.debugger.is_running());
        assert_eq!(fixture.debugger.run_for(Duration::from_secs(1)), None);
    }

    #[test]
    fn step_reports_done_step_and_breakpoints() {
        let mut fixture = debugger(&LOOP);
        fixture.debugger.insert_software_breakpoint(4);
        assert_eq!(fixture.debugger.step_at(None), Some(StopReason::DoneStep));
        assert_eq!(fixture.debugger.step_at(None), Some(StopReason::SwBreak));
        assert_eq!(fixture.debugger.machine().address(), 2);
    }

    #[test]
    fn step_at_address_jumps_first() {
        let mut fixture = debugger(&LOOP);
        assert_eq!(fixture.debugger.step_at(Some(4)), Some(StopReason::DoneStep));
        assert_eq!(fixture.debugger.machine().address(), 4);
        assert_eq!(fixture.printed(), "A");
    }

    #[test]
    fn halt_is_final_until_reload() {
        let mut fixture = debugger(&[19, 65, 0]);
        fixture.debugger.continue_at(None);
        assert_eq!(
            fixture.debugger.run_for(Duration::from_secs(1)),
            Some(StopReason::Exited(0))
        );
        assert_eq!(fixture.debugger.step_at(None), Some(StopReason::Exited(0)));
        assert_eq!(fixture.debugger.continue_at(None), Some(StopReason::Exited(0)));
        assert_eq!(fixture.debugger.interrupt(), StopReason::Exited(0));
        fixture.debugger.reload();
        assert_eq!(fixture.debugger.state(), DebuggerState::Idle);
        assert_eq!(fixture.debugger.machine().address(), 0);
    }

    #[test]
    fn faults_terminate_with_a_signal() {
        // pop r0 on an empty stack
        let mut fixture = debugger(&[3, R0]);
        assert_eq!(
            fixture.debugger.step_at(None),
            Some(StopReason::Terminated(Signal::SIGSEGV))
        );
        assert!(matches!(fixture.debugger.state(), DebuggerState::Halted(_)));
    }

    #[test]
    fn blocked_input_resumes_when_fed() {
        // in r0, out r0, halt
        let mut fixture = debugger(&[20, R0, 19, R0, 0]);
        fixture.debugger.continue_at(None);
        assert_eq!(fixture.debugger.run_for(Duration::from_secs(1)), None);
        assert_eq!(
            fixture.debugger.state(),
            DebuggerState::AwaitingInput(Resume::Continue)
        );
        assert!(fixture.debugger.is_running());
        assert!(!fixture.debugger.is_executing());

        // debug lines never reach the machine
        assert_eq!(fixture.debugger.push_input(b"!state\n"), None);
        assert_eq!(
            fixture.debugger.state(),
            DebuggerState::AwaitingInput(Resume::Continue)
        );

        assert_eq!(fixture.debugger.push_input(b"z"), None);
        assert_eq!(fixture.debugger.state(), DebuggerState::Running);
        assert_eq!(
            fixture.debugger.run_for(Duration::from_secs(1)),
            Some(StopReason::Exited(0))
        );
        assert_eq!(fixture.printed(), "z");
    }

    #[test]
    fn blocked_step_completes_when_fed() {
        let mut fixture = debugger(&[20, R0, 0]);
        assert_eq!(fixture.debugger.step_at(None), None);
        assert_eq!(fixture.debugger.push_input(b"q"), Some(StopReason::DoneStep));
        assert_eq!(fixture.debugger.read_register(0), Ok(b'q' as u16));
    }

    #[test]
    fn interrupt_cancels_input_wait_and_keeps_buffer() {
        let mut fixture = debugger(&[20, R0, 20, R0, 0]);
        fixture.debugger.continue_at(None);
        fixture.debugger.run_for(Duration::from_secs(1));
        fixture.debugger.interrupt();
        assert_eq!(fixture.debugger.push_input(b"ab"), None);
        assert!(!fixture.debugger.is_running());
        fixture.debugger.continue_at(None);
        fixture.debugger.run_for(Duration::from_secs(1));
        assert_eq!(fixture.debugger.read_register(0), Ok(b'b' as u16));
    }

    #[test]
    fn registers_include_synthesized_pc_and_sp() {
        // push 7, push 9, noop
        let mut fixture = debugger(&[2, 7, 2, 9, 21]);
        fixture.debugger.step_at(None);
        fixture.debugger.step_at(None);
        let registers = fixture.debugger.read_registers();
        assert_eq!(registers[8], 8);
        assert_eq!(registers[9], 4);
        assert_eq!(fixture.debugger.read_register(8), Ok(8));
        assert_eq!(
            fixture.debugger.read_register(10),
            Err(TargetError::InvalidRegister(10))
        );
    }

    #[test]
    fn memory_reads_are_clipped() {
        let fixture = debugger(&[0x1234, 0x5678]);
        assert_eq!(
            fixture.debugger.read_memory(0, 4),
            Ok(vec![0x34, 0x12, 0x78, 0x56])
        );
        assert_eq!(fixture.debugger.read_memory(3, 10), Ok(vec![0x56]));
        assert_eq!(
            fixture.debugger.read_memory(4, 1),
            Err(TargetError::AddressOutOfRange(4))
        );
    }

    #[test]
    fn load_replaces_a_halted_program() {
        let mut fixture = debugger(&[19, 65, 0]);
        fixture.debugger.insert_software_breakpoint(4);
        fixture.debugger.continue_at(None);
        assert_eq!(
            fixture.debugger.run_for(Duration::from_secs(1)),
            Some(StopReason::Exited(0))
        );

        let data = LOOP.iter().flat_map(|w| w.to_le_bytes()).collect();
        fixture.debugger.load(Program::new(data, "/tmp/other.bin"));
        assert_eq!(fixture.debugger.state(), DebuggerState::Idle);
        assert_eq!(fixture.debugger.machine().memory(), &LOOP[..]);
        assert_eq!(
            String::from_utf8(fixture.debugger.open_file(PROCMAP_FILE).unwrap()).unwrap(),
            "00000000-0000000c rwxp 00000000 00:00 0 /tmp/other.bin"
        );
        assert_eq!(fixture.debugger.exec_file(), b"/tmp/other.bin");

        fixture.debugger.continue_at(None);
        assert_eq!(
            fixture.debugger.run_for(Duration::from_secs(1)),
            Some(StopReason::SwBreak)
        );
        assert_eq!(fixture.debugger.machine().address(), 2);
    }

    #[test]
    fn stop_reason_reports_breakpoint_under_pc() {
        let mut fixture = debugger(&LOOP);
        assert_eq!(
            fixture.debugger.stop_reason(),
            StopReason::Signal(Signal::SIGTRAP)
        );
        fixture.debugger.insert_software_breakpoint(0);
        assert_eq!(fixture.debugger.stop_reason(), StopReason::SwBreak);

        fixture.debugger.reload();
        assert_eq!(fixture.debugger.stop_reason(), StopReason::SwBreak);

        // stopped on a breakpoint that has since been removed
        fixture.debugger.continue_at(None);
        fixture.debugger.run_for(Duration::from_secs(1));
        fixture.debugger.remove_software_breakpoint(0);
        assert_eq!(
            fixture.debugger.stop_reason(),
            StopReason::Signal(Signal::SIGTRAP)
        );
    }

    #[test]
    fn breakpoints_survive_reload() {
        let mut fixture = debugger(&LOOP);
        fixture.debugger.insert_software_breakpoint(4);
        fixture.debugger.reload();
        assert!(fixture.debugger.breakpoints().contains(&4));
        fixture.debugger.remove_software_breakpoint(4);
        assert!(fixture.debugger.breakpoints().is_empty());
    }
}
