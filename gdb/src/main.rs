use std::{
    io::BufRead,
    net::TcpStream,
    path::PathBuf,
    process::ExitCode,
    sync::mpsc::Sender,
    time::Duration,
};

use clap::{ArgAction, Parser};
use gdb::{
    config::ServerConfig,
    debugger::Debugger,
    server::{DebugServer, Event},
};
use synacor_emulator::{Console, Machine, Program, StepOutcome};

#[derive(Parser, Debug)]
#[command(name = "synacor-dbg")]
#[command(about = "Synacor virtual machine with a GDB remote protocol server", long_about = None)]
struct Args {
    /// Program image to load
    program: PathBuf,

    /// Address the debug server listens on
    #[arg(long, env = "GDB_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "GDB_PORT", default_value_t = 31337)]
    port: u16,

    /// Milliseconds the machine runs before pending packets are handled
    #[arg(long, env = "GDB_POLL_MS", default_value_t = 1000)]
    poll_ms: u64,

    /// off, error, warn, info, debug or trace (trace shows every packet)
    #[arg(long, env = "GDB_LOG", default_value = "info")]
    log_level: log::LevelFilter,

    /// Where to write the synthesized process map
    #[arg(long, env = "GDB_PROCMAP", value_name = "PATH")]
    procmap: Option<PathBuf>,

    /// Run the program on this terminal without a debug server
    #[arg(long, action = ArgAction::SetTrue)]
    run: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    gdb::logger::init(args.log_level);

    let program = match Program::from_path(&args.program) {
        Ok(program) => program,
        Err(err) => {
            log::error!("failed to read {}: {}", args.program.display(), err);
            return ExitCode::FAILURE;
        }
    };

    if args.run {
        return run_standalone(program);
    }

    let mut config = ServerConfig {
        poll_interval: Duration::from_millis(args.poll_ms),
        ..Default::default()
    };
    if let Some(procmap) = args.procmap {
        config.procmap_path = procmap;
    }

    let debugger = Debugger::new(program, Box::new(std::io::stdout()), &config.procmap_path);
    let server = match DebugServer::bind((args.host.as_str(), args.port), config) {
        Ok(server) => server,
        Err(err) => {
            log::error!("failed to listen on {}:{}: {}", args.host, args.port, err);
            return ExitCode::FAILURE;
        }
    };

    let events = server.event_sender();
    std::thread::spawn(move || forward_stdin(events));

    server.run(debugger);
    ExitCode::SUCCESS
}

/// Feeds terminal lines to the program's input queue.
fn forward_stdin(events: Sender<Event<TcpStream>>) {
    let mut stdin = std::io::stdin().lock();
    loop {
        let mut line = Vec::new();
        match stdin.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if events.send(Event::Input(line)).is_err() {
                    break;
                }
            }
            Err(err) => {
                log::error!("failed to read stdin: {}", err);
                break;
            }
        }
    }
    log::debug!("stdin closed");
}

fn run_standalone(program: Program) -> ExitCode {
    let mut machine = Machine::new();
    machine.load(&program.data);
    let mut console = Console::new(std::io::stdout());
    let mut stdin = std::io::stdin().lock();

    loop {
        match machine.run(&mut console) {
            Ok(StepOutcome::AwaitingInput) => {
                let mut line = Vec::new();
                match stdin.read_until(b'\n', &mut line) {
                    Ok(0) => {
                        log::info!("input closed while the program waits for it");
                        return ExitCode::SUCCESS;
                    }
                    Ok(_) => {
                        for command in console.input.feed(&line) {
                            match command {
                                Ok(command) => eprintln!("{}", machine.inspect(&command)),
                                Err(usage) => eprintln!("{}", usage),
                            }
                        }
                    }
                    Err(err) => {
                        log::error!("failed to read stdin: {}", err);
                        return ExitCode::FAILURE;
                    }
                }
            }
            Ok(StepOutcome::Halted(halt)) => {
                log::info!("program halted: {:?}", halt);
                return ExitCode::SUCCESS;
            }
            Ok(StepOutcome::Executed) => return ExitCode::SUCCESS,
            Err(fault) => {
                log::error!("program faulted: {}", fault);
                return ExitCode::FAILURE;
            }
        }
    }
}
