use std::str::Utf8Error;

use num_traits::Num;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Software,
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VContAction {
    Continue,
    Step,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum Command {
    ExceptionReason,

    ReadRegisters,
    ReadRegister(u32),
    ReadMemory(u32, u32),

    InsertBreakpoint(BreakpointKind, u32),
    RemoveBreakpoint(BreakpointKind, u32),

    ContinueAt(Option<u32>),
    StepAt(Option<u32>),
    vContQuery,
    vCont(VContAction),

    SelectThread,
    ThreadAlive,
    Detach,
    Kill,

    qSupported(Vec<(String, bool, Option<String>)>),
    qC,
    qfThreadInfo,
    qsThreadInfo,
    qAttached,
    qXferFeaturesRead {
        annex: String,
        offset: usize,
        length: usize,
    },
    qXferExecFileRead {
        annex: String,
        offset: usize,
        length: usize,
    },

    vFileSetfs(u32),
    vFileOpen {
        filename: Vec<u8>,
        flags: u32,
        mode: u32,
    },
    vFilePread {
        fd: u32,
        count: usize,
        offset: usize,
    },
    /// Raw descriptor text; read as hex first, decimal second.
    vFileClose(String),

    QStartNoAckMode,

    /// Anything without a handler, answered with an empty packet.
    Unrecognized,
}

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("packet is not valid utf-8: {0}")]
    InvalidUTF8(#[from] Utf8Error),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("malformed command")]
    MalformedCommand,
}

fn hex<N: Num>(text: &str) -> Result<N, CommandParseError> {
    N::from_str_radix(text, 16).map_err(|_| CommandParseError::InvalidNumber(text.to_owned()))
}

fn hex_bytes(text: &str) -> Result<Vec<u8>, CommandParseError> {
    if text.len() % 2 != 0 {
        return Err(CommandParseError::MalformedCommand);
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).ok_or(CommandParseError::MalformedCommand).and_then(hex))
        .collect()
}

/// Splits `a,b,c` style argument lists into exactly `N` pieces.
fn args<'a, const N: usize>(
    text: &'a str,
    separators: &[char],
) -> Result<[&'a str; N], CommandParseError> {
    let mut parts = text.split(separators);
    let mut out = [""; N];
    for slot in out.iter_mut() {
        *slot = parts.next().ok_or(CommandParseError::MalformedCommand)?;
    }
    if parts.next().is_some() {
        return Err(CommandParseError::MalformedCommand);
    }
    Ok(out)
}

/// `<annex>:<offset>,<length>` as used by the qXfer family.
fn xfer_args(text: &str) -> Result<(String, usize, usize), CommandParseError> {
    let (annex, range) = text
        .rsplit_once(':')
        .ok_or(CommandParseError::MalformedCommand)?;
    let [offset, length] = args(range, &[','])?;
    Ok((annex.to_owned(), hex(offset)?, hex(length)?))
}

fn optional_address(arg: &str) -> Result<Option<u32>, CommandParseError> {
    if arg.is_empty() {
        Ok(None)
    } else {
        hex(arg).map(Some)
    }
}

fn breakpoint(args_text: &str) -> Result<Option<(BreakpointKind, u32)>, CommandParseError> {
    let [kind, addr, _size] = args(args_text, &[','])?;
    let kind = match kind {
        "0" => BreakpointKind::Software,
        "1" => BreakpointKind::Hardware,
        _ => return Ok(None),
    };
    Ok(Some((kind, hex(addr)?)))
}

impl Command {
    /// Parses a packet body. Patterns are tried top to bottom and the first
    /// one that matches wins, so the catch-alls sit at the end.
    pub fn from_buf(buf: &[u8]) -> Result<Self, CommandParseError> {
        macro_rules! create_command {
            ($command:ident) => {{
                log::debug!("unrecognized command: {:?}", $command);
                Command::Unrecognized
            }};
            ($command:ident $s:literal => $b:expr $(, $($tt:tt)*)?) => {
                if $command == $s {
                    $b
                } else {
                    create_command!($command $($($tt)*)?)
                }
            };
            ($command:ident $s:literal = $a:ident => $b:expr $(, $($tt:tt)*)?) => {
                if let Some($a) = $command.strip_prefix($s) {
                    $b
                } else {
                    create_command!($command $($($tt)*)?)
                }
            };
        }

        let command = std::str::from_utf8(buf)?;

        Ok(create_command!(command
            "?" => Command::ExceptionReason,

            "g" => Command::ReadRegisters,
            'p' = args => Command::ReadRegister(hex(args)?),
            'm' = args => {
                let [addr, len] = self::args(args, &[','])?;
                Command::ReadMemory(hex(addr)?, hex(len)?)
            },

            'Z' = args => breakpoint(args)?.map_or(Command::Unrecognized, |(kind, addr)| Command::InsertBreakpoint(kind, addr)),
            'z' = args => breakpoint(args)?.map_or(Command::Unrecognized, |(kind, addr)| Command::RemoveBreakpoint(kind, addr)),

            'c' = arg => Command::ContinueAt(optional_address(arg)?),
            's' = arg => Command::StepAt(optional_address(arg)?),

            "vCont?" => Command::vContQuery,
            "vCont;" = action => match action.split([';', ':']).next() {
                Some("c") => Command::vCont(VContAction::Continue),
                Some("s") => Command::vCont(VContAction::Step),
                _ => Command::Unrecognized,
            },
            "vFile:setfs:" = pid => Command::vFileSetfs(hex(pid)?),
            "vFile:open:" = args => {
                let [filename, flags, mode] = self::args(args, &[','])?;
                Command::vFileOpen { filename: hex_bytes(filename)?, flags: hex(flags)?, mode: hex(mode)? }
            },
            "vFile:pread:" = args => {
                let [fd, count, offset] = self::args(args, &[','])?;
                Command::vFilePread { fd: hex(fd)?, count: hex(count)?, offset: hex(offset)? }
            },
            "vFile:close:" = fd => {
                hex::<u32>(fd)?;
                Command::vFileClose(fd.to_owned())
            },
            'v' = _rest => Command::Unrecognized,

            "qSupported" = raw_args => {
                let mut args: Vec<(String, bool, Option<String>)> = Vec::new();
                for arg in raw_args.trim_start_matches(':').split(';').filter(|arg| !arg.is_empty()) {
                    if let Some(arg) = arg.strip_suffix('+') {
                        args.push((arg.into(), true, None));
                    } else if let Some(arg) = arg.strip_suffix('-') {
                        args.push((arg.into(), false, None));
                    } else if let Some((key, val)) = arg.split_once('=') {
                        args.push((key.into(), true, Some(val.into())))
                    }
                }
                Command::qSupported(args)
            },
            "qXfer:features:read:" = args => {
                let (annex, offset, length) = xfer_args(args)?;
                Command::qXferFeaturesRead { annex, offset, length }
            },
            "qXfer:exec-file:read:" = args => {
                let (annex, offset, length) = xfer_args(args)?;
                Command::qXferExecFileRead { annex, offset, length }
            },
            "qC" => Command::qC,
            "qfThreadInfo" => Command::qfThreadInfo,
            "qsThreadInfo" => Command::qsThreadInfo,
            "qAttached" = _pid => Command::qAttached,
            "qT" = _rest => Command::Unrecognized,

            'H' = _thread => Command::SelectThread,
            'T' = _thread => Command::ThreadAlive,
            'D' = _pid => Command::Detach,
            "k" => Command::Kill,

            "QStartNoAckMode" => Command::QStartNoAckMode
        ))
    }
}
