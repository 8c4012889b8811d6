use std::{
    io::Read,
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread,
};

use crate::{
    config::ServerConfig,
    packets::psm::{Frame, PacketStateMachine},
    stub::{ClientId, GDBStub},
    target::Target,
};

/// Everything the event loop reacts to. Reader threads, the accept thread
/// and whoever feeds program input all talk to it through one channel.
#[derive(Debug)]
pub enum Event<C> {
    Connected(ClientId, C),
    Frame(ClientId, Frame),
    Disconnected(ClientId),
    /// Bytes for the program's input queue.
    Input(Vec<u8>),
    Shutdown,
}

pub struct DebugServer {
    listener: TcpListener,
    sender: Sender<Event<TcpStream>>,
    receiver: Receiver<Event<TcpStream>>,
    config: ServerConfig,
}

impl DebugServer {
    pub fn bind(addr: impl ToSocketAddrs, config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let (sender, receiver) = mpsc::channel();
        Ok(Self {
            listener,
            sender,
            receiver,
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for injecting input or shutting the server down.
    pub fn event_sender(&self) -> Sender<Event<TcpStream>> {
        self.sender.clone()
    }

    /// Serves clients until a `Shutdown` event arrives. The target is only
    /// ever touched from the calling thread.
    pub fn run<T: Target>(self, target: T) {
        let Self {
            listener,
            sender,
            receiver,
            config,
        } = self;

        match listener.local_addr() {
            Ok(addr) => log::info!("waiting for gdb connections on {}", addr),
            Err(err) => log::warn!("listening on an unknown address: {}", err),
        }
        thread::spawn(move || accept_clients(listener, sender));

        let mut stub = GDBStub::new(target);
        event_loop(&mut stub, &receiver, &config);
        log::info!("debug server shutting down");
    }
}

fn event_loop<T: Target>(
    stub: &mut GDBStub<TcpStream, T>,
    events: &Receiver<Event<TcpStream>>,
    config: &ServerConfig,
) {
    loop {
        let event = if stub.is_target_executing() {
            match events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => {
                    stub.poll(config.poll_interval);
                    continue;
                }
                Err(TryRecvError::Disconnected) => return,
            }
        } else {
            match events.recv() {
                Ok(event) => event,
                Err(_) => return,
            }
        };

        match event {
            Event::Connected(id, connection) => stub.connect(id, connection),
            Event::Frame(id, frame) => stub.incomming_frame(id, frame),
            Event::Disconnected(id) => stub.disconnect(id),
            Event::Input(bytes) => stub.push_input(&bytes),
            Event::Shutdown => return,
        }
    }
}

fn accept_clients(listener: TcpListener, events: Sender<Event<TcpStream>>) {
    for (id, stream) in listener.incoming().enumerate() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("failed to accept connection: {}", err);
                continue;
            }
        };
        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(err) => {
                log::error!("failed to clone client stream: {}", err);
                continue;
            }
        };
        // registered before the reader can produce frames for it
        if events.send(Event::Connected(id, stream)).is_err() {
            return;
        }
        let events = events.clone();
        thread::spawn(move || read_client(id, reader, events));
    }
}

fn read_client(id: ClientId, mut stream: TcpStream, events: Sender<Event<TcpStream>>) {
    let mut psm = PacketStateMachine::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => {
                for &byte in &buf[..read] {
                    if let Some(frame) = psm.incomming_data(byte) {
                        if events.send(Event::Frame(id, frame)).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                log::error!("failed to read from client {}: {}", id, err);
                break;
            }
        }
    }
    _ = events.send(Event::Disconnected(id));
}
