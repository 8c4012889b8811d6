use std::net::TcpStream;

/// Write side of a client session. Reading happens on a dedicated thread
/// that owns its own handle to the stream.
pub trait Connection {
    type Error: std::fmt::Debug;

    fn write(&mut self, byte: u8) -> Result<(), Self::Error>;
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        for b in buf {
            self.write(*b)?;
        }
        Ok(())
    }
    fn flush(&mut self) -> Result<(), Self::Error>;
    fn on_session_start(&mut self) -> Result<(), Self::Error>;
    fn on_session_end(&mut self) -> Result<(), Self::Error>;

    fn string_repr(&self) -> Option<String> {
        None
    }
}

impl Connection for TcpStream {
    type Error = std::io::Error;

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        std::io::Write::write_all(self, &[byte])
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        std::io::Write::write_all(self, buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(self)
    }

    fn on_session_start(&mut self) -> Result<(), Self::Error> {
        self.set_nodelay(true)
    }

    fn on_session_end(&mut self) -> Result<(), Self::Error> {
        match self.shutdown(std::net::Shutdown::Both) {
            // the peer may already be gone
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn string_repr(&self) -> Option<String> {
        let local = self.local_addr().ok()?;
        let peer = self.peer_addr().ok()?;
        Some(format!("{} <-> {}", local, peer))
    }
}
