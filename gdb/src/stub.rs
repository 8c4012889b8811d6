use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::{
    connection::Connection,
    packets::{
        incoming::{Command, VContAction},
        psm::Frame,
        response::ResponseWritter,
    },
    target::{StopReason, Target, TargetError},
};

pub type ClientId = usize;

const TARGET_XML: &str = include_str!("target.xml");

const SUPPORTED_FEATURES: &str =
    "PacketSize=4000;QStartNoAckMode+;qXfer:features:read+;qXfer:exec-file:read+;vCont+;swbreak+";

/// Only thread the target ever has.
const THREAD_ID: u8 = 1;

/// Descriptors handed out by `vFile:open` start after the standard streams.
const FIRST_FD: u32 = 3;

const EBADF: u8 = 9;

#[derive(Debug, Error)]
pub enum GDBError<E: std::fmt::Debug> {
    #[error("failed to write to connection: {0:?}")]
    ConnectionWrite(E),
    #[error("failed to flush connection: {0:?}")]
    ConnectionFlush(E),
}

struct GDBStubCfg {
    no_ack_mode: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for GDBStubCfg {
    fn default() -> Self {
        Self { no_ack_mode: false }
    }
}

/// Per connection session state.
struct Client<C: Connection> {
    connection: C,
    cfg: GDBStubCfg,
    /// Resent when the client nacks.
    last_sent: Option<Vec<u8>>,
    files: HashMap<u32, Vec<u8>>,
    next_fd: u32,
}

impl<C: Connection> Client<C> {
    fn new(connection: C) -> Self {
        Self {
            connection,
            cfg: Default::default(),
            last_sent: None,
            files: HashMap::new(),
            next_fd: FIRST_FD,
        }
    }

    fn send_raw(&mut self, data: &[u8]) -> Result<(), GDBError<C::Error>> {
        log::trace!("--> {}", String::from_utf8_lossy(data));
        self.connection
            .write_all(data)
            .map_err(GDBError::ConnectionWrite)?;
        self.connection.flush().map_err(GDBError::ConnectionFlush)
    }

    fn send_packet(&mut self, packet: Vec<u8>) -> Result<(), GDBError<C::Error>> {
        self.send_raw(&packet)?;
        self.last_sent = Some(packet);
        Ok(())
    }
}

/// Protocol front end shared by every connected client.
///
/// All clients drive the same target; stops that happen while the target
/// runs on its own are broadcast to every one of them.
pub struct GDBStub<C: Connection, T: Target> {
    target: T,
    clients: BTreeMap<ClientId, Client<C>>,
    target_xml: Vec<u8>,
}

impl<C: Connection, T: Target> GDBStub<C, T> {
    pub fn new(target: T) -> Self {
        Self {
            target,
            clients: BTreeMap::new(),
            target_xml: TARGET_XML.replace('\n', "").replace("  ", "").into_bytes(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_target_running(&self) -> bool {
        self.target.is_running()
    }

    pub fn is_target_executing(&self) -> bool {
        self.target.is_executing()
    }

    pub fn connect(&mut self, id: ClientId, mut connection: C) {
        if let Err(err) = connection.on_session_start() {
            log::error!("failed to start session for client {}: {:?}", id, err);
            return;
        }
        log::info!(
            "client {} connected {}",
            id,
            connection.string_repr().unwrap_or_default()
        );
        self.clients.insert(id, Client::new(connection));
    }

    pub fn disconnect(&mut self, id: ClientId) {
        if let Some(mut client) = self.clients.remove(&id) {
            if let Err(err) = client.connection.on_session_end() {
                log::debug!("error closing client {}: {:?}", id, err);
            }
            log::info!("client {} disconnected", id);
        }
    }

    /// Lets a running target execute for up to `budget`, broadcasting the
    /// stop if it stops.
    pub fn poll(&mut self, budget: std::time::Duration) {
        if let Some(reason) = self.target.run_for(budget) {
            self.broadcast(reason);
        }
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        if let Some(reason) = self.target.push_input(bytes) {
            self.broadcast(reason);
        }
    }

    pub fn broadcast(&mut self, reason: StopReason) {
        log::debug!("broadcasting stop {:?}", reason);
        let mut res = ResponseWritter::new();
        reason.write_stop_packet(&mut res);
        let packet = res.finish();
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.send(id, packet.clone());
        }
    }

    pub fn incomming_frame(&mut self, id: ClientId, frame: Frame) {
        match frame {
            Frame::Ack => {}
            Frame::Nack => {
                let last = self.clients.get(&id).and_then(|c| c.last_sent.clone());
                match last {
                    Some(packet) => {
                        log::debug!("client {} sent nack, resending", id);
                        self.send(id, packet);
                    }
                    None => log::debug!("client {} sent nack with nothing to resend", id),
                }
            }
            Frame::Interrupt => {
                log::debug!("client {} interrupted the target", id);
                let reason = self.target.interrupt();
                self.broadcast(reason);
            }
            Frame::Packet(buf) => self.incomming_packet(id, &buf),
        }
    }

    fn incomming_packet(&mut self, id: ClientId, buf: &[u8]) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if !client.cfg.no_ack_mode {
            if let Err(err) = client.send_raw(b"+") {
                self.drop_client(id, err);
                return;
            }
        }

        let command = match Command::from_buf(buf) {
            Ok(command) => command,
            Err(err) => {
                log::warn!(
                    "dropping packet {:?}: {}",
                    String::from_utf8_lossy(buf),
                    err
                );
                return;
            }
        };
        log::debug!("<-- {:?}", command);

        if let Some(response) = self.handle_command(id, command) {
            self.send(id, response.finish());
        }
    }

    fn send(&mut self, id: ClientId, packet: Vec<u8>) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if let Err(err) = client.send_packet(packet) {
            self.drop_client(id, err);
        }
    }

    fn drop_client(&mut self, id: ClientId, err: GDBError<C::Error>) {
        log::error!("client {}: {}", id, err);
        self.disconnect(id);
    }

    /// Builds the reply to `command`, `None` when nothing is sent back right
    /// away.
    fn handle_command(&mut self, id: ClientId, command: Command) -> Option<ResponseWritter> {
        let mut response = ResponseWritter::new();

        match command {
            Command::ExceptionReason => self.target.stop_reason().write_stop_packet(&mut response),

            Command::ReadRegisters => {
                for value in self.target.read_registers() {
                    response.write_word_le(value);
                }
            }
            Command::ReadRegister(reg) => match self.target.read_register(reg) {
                Ok(value) => response.write_word_le(value),
                Err(err) => write_error(&mut response, &err),
            },
            Command::ReadMemory(addr, len) => match self.target.read_memory(addr, len) {
                Ok(data) => response.write_hex_buff(&data),
                Err(err) => write_error(&mut response, &err),
            },

            Command::InsertBreakpoint(_, addr) => {
                self.target.insert_software_breakpoint(addr);
                response.write_str("OK");
            }
            Command::RemoveBreakpoint(_, addr) => {
                self.target.remove_software_breakpoint(addr);
                response.write_str("OK");
            }

            Command::ContinueAt(addr) => {
                let reason = self.target.continue_at(addr)?;
                reason.write_stop_packet(&mut response);
            }
            Command::StepAt(addr) => {
                let reason = self.target.step_at(addr)?;
                reason.write_stop_packet(&mut response);
            }
            Command::vContQuery => response.write_str("vCont;c;s"),
            Command::vCont(VContAction::Continue) if self.target.is_running() => {}
            Command::vCont(VContAction::Continue) => {
                let reason = self.target.continue_at(None)?;
                reason.write_stop_packet(&mut response);
            }
            Command::vCont(VContAction::Step) => {
                let reason = self.target.step_at(None)?;
                reason.write_stop_packet(&mut response);
            }

            Command::SelectThread | Command::ThreadAlive | Command::Detach => {
                response.write_str("OK")
            }
            Command::Kill => {
                self.target.reload();
                return None;
            }

            Command::qSupported(features) => {
                log::debug!("client {} supports {:?}", id, features);
                response.write_str(SUPPORTED_FEATURES);
            }
            Command::qC => {
                response.write_str("QC");
                response.write_hex(THREAD_ID);
            }
            Command::qfThreadInfo => {
                response.write(b'm');
                response.write_hex(THREAD_ID);
            }
            Command::qsThreadInfo => response.write(b'l'),
            Command::qAttached => response.write(b'1'),
            Command::qXferFeaturesRead {
                annex,
                offset,
                length,
            } => {
                if annex == "target.xml" {
                    response.write_paginated(&self.target_xml, offset, length);
                } else {
                    response.write_str("E00");
                }
            }
            Command::qXferExecFileRead {
                annex,
                offset,
                length,
            } => {
                if annex.is_empty() || annex.parse::<u8>().ok() == Some(THREAD_ID) {
                    response.write_paginated(&self.target.exec_file(), offset, length);
                } else {
                    response.write_str("E00");
                }
            }

            Command::vFileSetfs(pid) => {
                if pid == 0 {
                    response.write_str("F0");
                }
            }
            Command::vFileOpen { filename, .. } => {
                let client = self.clients.get_mut(&id)?;
                match self.target.open_file(&filename) {
                    Ok(data) => {
                        let fd = client.next_fd;
                        client.next_fd += 1;
                        client.files.insert(fd, data);
                        response.write_str(&format!("F{:x}", fd));
                    }
                    Err(err) => write_file_error(&mut response, err.errno()),
                }
            }
            Command::vFilePread { fd, count, offset } => {
                let client = self.clients.get(&id)?;
                match client.files.get(&fd) {
                    Some(data) => {
                        let start = offset.min(data.len());
                        let end = offset.saturating_add(count).min(data.len());
                        response.write_str(&format!("F{:x};", end - start));
                        response.write_binary(&data[start..end]);
                    }
                    None => write_file_error(&mut response, EBADF),
                }
            }
            Command::vFileClose(fd) => {
                let client = self.clients.get_mut(&id)?;
                // some clients send the descriptor in decimal
                let closed = [16, 10]
                    .into_iter()
                    .filter_map(|radix| u32::from_str_radix(&fd, radix).ok())
                    .any(|fd| client.files.remove(&fd).is_some());
                if closed {
                    response.write_str("F0");
                } else {
                    write_file_error(&mut response, EBADF);
                }
            }

            Command::QStartNoAckMode => {
                self.clients.get_mut(&id)?.cfg.no_ack_mode = true;
                response.write_str("OK");
            }

            Command::Unrecognized => {}
        }
        Some(response)
    }
}

fn write_error(response: &mut ResponseWritter, err: &TargetError) {
    log::debug!("replying with error: {}", err);
    response.write(b'E');
    response.write_hex(err.errno());
}

fn write_file_error(response: &mut ResponseWritter, errno: u8) {
    response.write_str(&format!("F-1,{:x}", errno));
}
