use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use super::command::Command;
use super::error::TransportError;

/// How long a blocking read waits before it re-checks the stop flag
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const READ_CHUNK_SIZE: usize = 4096;

/// A bidirectional command link to the ground station.
///
/// `read_command` blocks for at most one poll interval and returns `Ok(None)` if nothing
/// arrived, so that callers can check their own running flag. `write_command` sends a whole
/// frame or nothing, even when called from several threads.
pub trait CommandLink: Send + Sync {
    fn read_command(&self) -> Result<Option<Command>, TransportError>;
    fn write_command(&self, cmd: &Command) -> Result<(), TransportError>;
    /// While set, reads return immediately without touching the connection
    fn set_stop(&self, stop: bool);
}

#[derive(Debug)]
struct FrameReader {
    stream: TcpStream,
    buffer: Vec<u8>,
}

/// A [`CommandLink`] over a blocking TCP stream
#[derive(Debug)]
pub struct TcpLink {
    reader: Mutex<FrameReader>,
    writer: Mutex<TcpStream>,
    stop: AtomicBool,
}

impl TcpLink {
    /// Connect to a listening peer
    pub fn connect<A: ToSocketAddrs>(address: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(address)?;
        Self::from_stream(stream)
    }

    /// Listen on the address and wait for a single peer to connect
    pub fn accept<A: ToSocketAddrs>(address: A) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)?;
        spdlog::info!("Waiting for connection on {}", listener.local_addr()?);
        let (stream, peer) = listener.accept()?;
        spdlog::info!("Accepted connection from {peer}");
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(FrameReader {
                stream,
                buffer: Vec::new(),
            }),
            writer: Mutex::new(writer),
            stop: AtomicBool::new(false),
        })
    }
}

impl CommandLink for TcpLink {
    fn read_command(&self) -> Result<Option<Command>, TransportError> {
        if self.stop.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some((cmd, used)) = Command::decode(&reader.buffer) {
                reader.buffer.drain(..used);
                return Ok(Some(cmd));
            }
            match reader.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => reader.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_command(&self, cmd: &Command) -> Result<(), TransportError> {
        let frame = cmd.encode()?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?;
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    fn set_stop(&self, stop: bool) {
        self.stop.store(stop, Ordering::Relaxed);
    }
}

/// An in-process [`CommandLink`]. Inbound commands are queued with `push_command`; everything
/// written is kept and can be collected with `take_sent`.
#[derive(Debug)]
pub struct MemoryLink {
    inbound: Sender<Command>,
    queue: Mutex<Receiver<Command>>,
    sent: Mutex<Vec<Command>>,
    stop: AtomicBool,
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLink {
    pub fn new() -> Self {
        let (inbound, queue) = channel();
        Self {
            inbound,
            queue: Mutex::new(queue),
            sent: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
        }
    }

    pub fn push_command(&self, cmd: Command) -> Result<(), TransportError> {
        self.inbound
            .send(cmd)
            .map_err(|_| TransportError::Closed)
    }

    /// Remove and return every command written so far
    pub fn take_sent(&self) -> Result<Vec<Command>, TransportError> {
        let mut sent = self.sent.lock().map_err(|_| TransportError::LockPoisoned)?;
        Ok(std::mem::take(&mut *sent))
    }
}

impl CommandLink for MemoryLink {
    fn read_command(&self) -> Result<Option<Command>, TransportError> {
        if self.stop.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let queue = self.queue.lock().map_err(|_| TransportError::LockPoisoned)?;
        match queue.recv_timeout(POLL_INTERVAL) {
            Ok(cmd) => Ok(Some(cmd)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn write_command(&self, cmd: &Command) -> Result<(), TransportError> {
        // Same limits as a real frame
        cmd.encode()?;
        self.sent
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?
            .push(cmd.clone());
        Ok(())
    }

    fn set_stop(&self, stop: bool) {
        self.stop.store(stop, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn tcp_pair() -> (TcpLink, TcpLink) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpLink::connect(address).unwrap());
        let (stream, _) = listener.accept().unwrap();
        let server = TcpLink::from_stream(stream).unwrap();
        (server, client.join().unwrap())
    }

    #[test]
    fn test_tcp_round_trip() {
        let (server, client) = tcp_pair();
        let first = Command::new(0x1, vec![1, 0, 10, 2]);
        let second = Command::new(0x2, vec![]);
        client.write_command(&first).unwrap();
        client.write_command(&second).unwrap();

        let mut received = Vec::new();
        while received.len() < 2 {
            if let Some(cmd) = server.read_command().unwrap() {
                received.push(cmd);
            }
        }
        assert_eq!(received, vec![first, second]);
    }

    #[test]
    fn test_tcp_timeout_and_close() {
        let (server, client) = tcp_pair();
        assert!(server.read_command().unwrap().is_none());
        drop(client);
        let mut result = server.read_command();
        while let Ok(None) = result {
            result = server.read_command();
        }
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn test_stop_flag() {
        let link = MemoryLink::new();
        link.push_command(Command::new(0x1, vec![])).unwrap();
        link.set_stop(true);
        assert!(link.read_command().unwrap().is_none());
        link.set_stop(false);
        assert_eq!(
            link.read_command().unwrap(),
            Some(Command::new(0x1, vec![]))
        );
        assert!(link.read_command().unwrap().is_none());
    }

    #[test]
    fn test_memory_sent() {
        let link = MemoryLink::new();
        link.write_command(&Command::new(0x24, vec![1, 2, 3])).unwrap();
        let too_big = Command::new(0x25, vec![0; u16::MAX as usize + 1]);
        assert!(matches!(
            link.write_command(&too_big),
            Err(TransportError::Protocol(_))
        ));
        let sent = link.take_sent().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(link.take_sent().unwrap().is_empty());
    }
}
