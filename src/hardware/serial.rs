//! Serial-port transport with a background reader thread
//!
//! The reader owns a cloned port handle, drains it with a short read timeout,
//! frames the bytes into lines and pushes events onto an unbounded channel.
//! Writes go through the original handle behind a mutex. The reader drops
//! its handle before the thread exits, so once `close` has joined it only the
//! writer still holds the port.

use crate::hardware::framer::{FramedLine, LineFramer};
use crate::hardware::{encode_line, CommError, CommResult, Event, LineTransport, SerialConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const READ_CHUNK_BYTES: usize = 512;

struct Connection {
    writer: Mutex<Box<dyn Write + Send>>,
    events: Receiver<Event>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// Serial transceiver implementation
pub struct SerialTransceiver {
    config: SerialConfig,
    connection: Option<Connection>,
}

impl SerialTransceiver {
    /// Create a transceiver; the port is not opened until [`open`](Self::open)
    pub fn new(config: SerialConfig) -> CommResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connection: None,
        })
    }

    /// Create and open in one step
    pub fn connect(config: SerialConfig) -> CommResult<Self> {
        let mut transceiver = Self::new(config)?;
        transceiver.open()?;
        Ok(transceiver)
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Open the port and start the background reader.
    /// Calling this while connected keeps the existing connection; a
    /// connection whose reader has stopped is closed and opened again.
    pub fn open(&mut self) -> CommResult<()> {
        if let Some(alive) = self.connection.as_ref().map(|c| c.running.load(Ordering::Acquire)) {
            if alive {
                info!(port = %self.config.port, "already connected");
                return Ok(());
            }
            warn!(port = %self.config.port, "serial reader has stopped, reopening");
            self.close();
        }

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(self.config.read_timeout())
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|e| CommError::ConnectionError {
                port: self.config.port.clone(),
                reason: e.to_string(),
            })?;
        let reader_port = port.try_clone().map_err(|e| CommError::ConnectionError {
            port: self.config.port.clone(),
            reason: e.to_string(),
        })?;

        self.attach(Box::new(port), reader_port)?;
        info!(port = %self.config.port, baud = self.config.baud_rate, "connected");
        Ok(())
    }

    /// Start the reader thread on `reader` and send through `writer`
    fn attach<R>(&mut self, writer: Box<dyn Write + Send>, reader: R) -> CommResult<()>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = Arc::clone(&running);
            let log_diagnostics = self.config.log_diagnostics;
            let high_water_mark = self.config.queue_high_water_mark;
            thread::Builder::new()
                .name("uwb-serial-reader".to_string())
                .spawn(move || reader_loop(reader, tx, running, log_diagnostics, high_water_mark))?
        };

        self.connection = Some(Connection {
            writer: Mutex::new(writer),
            events: rx,
            running,
            reader: Some(handle),
        });
        Ok(())
    }

    /// Stop the reader, wait for it to exit, then release the port.
    /// Safe to call when already closed.
    pub fn close(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            debug!(port = %self.config.port, "close requested but port is not open");
            return;
        };

        connection.running.store(false, Ordering::Release);
        // The reader wakes at least once per read timeout, so this join is bounded
        if let Some(reader) = connection.reader.take() {
            if reader.join().is_err() {
                error!(port = %self.config.port, "serial reader thread panicked");
            }
        }
        drop(connection);
        info!(port = %self.config.port, "disconnected");
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }
}

impl Drop for SerialTransceiver {
    fn drop(&mut self) {
        self.close();
    }
}

impl LineTransport for SerialTransceiver {
    fn send_line(&self, text: &str) -> CommResult<()> {
        let connection = self.connection.as_ref().ok_or(CommError::NotConnected)?;
        let bytes = encode_line(text);
        let mut port = connection
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        port.write_all(&bytes)?;
        port.flush()?;
        Ok(())
    }

    fn try_take_event(&self, timeout: Duration) -> CommResult<Option<Event>> {
        let connection = self.connection.as_ref().ok_or(CommError::NotConnected)?;
        match connection.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CommError::NotConnected),
        }
    }

    fn pending_events(&self) -> usize {
        self.connection.as_ref().map_or(0, |c| c.events.len())
    }

    fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.running.load(Ordering::Acquire))
    }
}

fn reader_loop<R: Read>(
    mut port: R,
    events: Sender<Event>,
    running: Arc<AtomicBool>,
    log_diagnostics: bool,
    high_water_mark: usize,
) {
    let mut framer = LineFramer::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];

    while running.load(Ordering::Acquire) {
        let n = match port.read(&mut chunk) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                error!(error = %e, "serial read failed, stopping reader");
                break;
            }
        };

        for line in framer.push(&chunk[..n]) {
            match line {
                FramedLine::Event(event) => {
                    trace!(payload = %event.payload, "event received");
                    if events.send(event).is_err() {
                        // Receiver gone: the transceiver was dropped
                        running.store(false, Ordering::Release);
                        return;
                    }
                    if high_water_mark > 0 && events.len() == high_water_mark {
                        warn!(queued = high_water_mark, "event queue is not being drained");
                    }
                }
                FramedLine::Diagnostic(text) => {
                    if log_diagnostics {
                        debug!(line = %text, "device output");
                    }
                }
            }
        }
    }

    running.store(false, Ordering::Release);
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Instant;

    #[test]
    fn test_serial_transceiver_creation() {
        let transceiver = SerialTransceiver::new(SerialConfig::new("/dev/ttyUSB0", 115_200)).unwrap();
        assert!(!transceiver.is_open());
        assert!(!transceiver.is_connected());
        assert_eq!(transceiver.pending_events(), 0);
    }

    #[test]
    fn test_operations_require_connection() {
        let transceiver = SerialTransceiver::new(SerialConfig::default()).unwrap();
        assert!(matches!(transceiver.send_line("ping 0"), Err(CommError::NotConnected)));
        assert!(matches!(
            transceiver.try_take_event(Duration::from_millis(1)),
            Err(CommError::NotConnected)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut transceiver = SerialTransceiver::new(SerialConfig::default()).unwrap();
        transceiver.close();
        transceiver.close();
        assert!(!transceiver.is_open());
    }

    #[test]
    fn test_open_missing_device_fails() {
        let config = SerialConfig::new("/dev/this-port-does-not-exist", 115_200);
        let result = SerialTransceiver::connect(config);
        assert!(matches!(result, Err(CommError::ConnectionError { .. })));
    }

    #[test]
    fn test_invalid_config() {
        let result = SerialTransceiver::new(SerialConfig::new("/dev/ttyUSB0", 0));
        assert!(result.is_err());
    }

    /// Replays read results in order, then reports read timeouts forever
    struct ScriptedReader {
        steps: VecDeque<io::Result<Vec<u8>>>,
        released: Arc<AtomicBool>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => {
                    thread::sleep(Duration::from_millis(1));
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }
    }

    impl Drop for ScriptedReader {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn scripted(steps: Vec<io::Result<Vec<u8>>>) -> (ScriptedReader, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let reader = ScriptedReader {
            steps: steps.into(),
            released: Arc::clone(&released),
        };
        (reader, released)
    }

    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn spawn_reader(
        reader: ScriptedReader,
        tx: Sender<Event>,
    ) -> (Arc<AtomicBool>, JoinHandle<()>) {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || reader_loop(reader, tx, flag, false, 0));
        (running, handle)
    }

    fn kind_of(event: &Event) -> String {
        event.kind().unwrap_or_default().to_string()
    }

    #[test]
    fn test_reader_forwards_lines_in_order_across_timeouts() {
        let (reader, released) = scripted(vec![
            Ok(b"{\"event\":\"a\"}\n{\"ev".to_vec()),
            Err(io::ErrorKind::TimedOut.into()),
            Ok(b"ent\":\"b\"}\nboot ok\n".to_vec()),
            Err(io::ErrorKind::WouldBlock.into()),
            Err(io::ErrorKind::Interrupted.into()),
            Ok(b"{\"event\":\"c\"}\n".to_vec()),
        ]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let (running, handle) = spawn_reader(reader, tx);

        let mut kinds = Vec::new();
        for _ in 0..3 {
            kinds.push(kind_of(&rx.recv_timeout(Duration::from_secs(2)).unwrap()));
        }
        assert_eq!(kinds, vec!["a", "b", "c"]);
        assert!(running.load(Ordering::SeqCst));

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(released.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reader_stops_on_read_error() {
        let (reader, released) = scripted(vec![
            Ok(b"{\"event\":\"a\"}\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::Other, "device unplugged")),
            Ok(b"{\"event\":\"never\"}\n".to_vec()),
        ]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let (running, handle) = spawn_reader(reader, tx);

        handle.join().unwrap();
        assert!(!running.load(Ordering::SeqCst));
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(kind_of(&rx.recv_timeout(Duration::from_secs(1)).unwrap()), "a");
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_reader_stops_when_receiver_is_gone() {
        let (reader, released) = scripted(vec![Ok(b"{\"event\":\"a\"}\n".to_vec())]);
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let (running, handle) = spawn_reader(reader, tx);

        handle.join().unwrap();
        assert!(!running.load(Ordering::SeqCst));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_attached_link_round_trip_and_close() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let (reader, released) = scripted(vec![Ok(b"{\"event\":\"ping_resp\",\"node_id\":1}\n".to_vec())]);
        let mut transceiver = SerialTransceiver::new(SerialConfig::default()).unwrap();
        transceiver
            .attach(Box::new(SharedWriter(Arc::clone(&written))), reader)
            .unwrap();
        assert!(transceiver.is_connected());

        transceiver.send_line("ping 1").unwrap();
        assert_eq!(*written.lock().unwrap(), b"ping 1\n".to_vec());
        let event = transceiver.try_take_event(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(event.kind(), Some("ping_resp"));

        transceiver.close();
        assert!(released.load(Ordering::SeqCst));
        assert!(!transceiver.is_open());
        assert!(matches!(transceiver.send_line("ping 1"), Err(CommError::NotConnected)));
    }

    #[test]
    fn test_open_replaces_stopped_reader() {
        let config = SerialConfig::new("/dev/this-port-does-not-exist", 115_200);
        let mut transceiver = SerialTransceiver::new(config).unwrap();
        let (reader, released) = scripted(vec![Err(io::Error::new(io::ErrorKind::Other, "device unplugged"))]);
        transceiver.attach(Box::new(io::sink()), reader).unwrap();

        let started = Instant::now();
        while transceiver.is_connected() && started.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!transceiver.is_connected());
        assert!(transceiver.is_open());

        // The dead connection is torn down and a fresh open is attempted
        assert!(matches!(transceiver.open(), Err(CommError::ConnectionError { .. })));
        assert!(!transceiver.is_open());
        assert!(released.load(Ordering::SeqCst));
    }
}
