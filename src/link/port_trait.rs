//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{Result, RoverBridgeError};

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read one line without its terminator. `None` means the stream ended.
    async fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Drive the DTR control line
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    /// Drop any received bytes that have not been read yet
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Control-line access for the byte stream under a [`LinePort`]
pub trait ControlLines {
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    fn clear_input(&mut self) -> io::Result<()>;
}

impl ControlLines for tokio_serial::SerialStream {
    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        tokio_serial::SerialPort::write_data_terminal_ready(self, level).map_err(io::Error::from)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        tokio_serial::SerialPort::clear(self, tokio_serial::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

/// Line-buffered port over any async byte stream
///
/// Acknowledgements are read as raw bytes up to `\n` and decoded lossily, since
/// the firmware's debug output is not guaranteed to be UTF-8.
pub struct LinePort<S> {
    reader: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> LinePort<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }
}

#[async_trait]
impl<S> SerialPortIO for LinePort<S>
where
    S: AsyncRead + AsyncWrite + ControlLines + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.reader.get_mut().write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.reader.get_mut().flush().await
    }

    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut raw = Vec::new();
        let read = self.reader.read_until(b'\n', &mut raw).await?;
        if read == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&raw);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.reader.get_mut().set_dtr(level)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        let buffered = self.reader.buffer().len();
        self.reader.consume(buffered);
        self.reader.get_mut().clear_input()
    }
}

/// Opens a fresh transport each time the link (re)connects
#[async_trait]
pub trait PortOpener: Send + Sync {
    async fn open(&self) -> Result<Box<dyn SerialPortIO>>;
}

/// Opens the first reachable serial device from an ordered path list
#[derive(Debug, Clone)]
pub struct SerialOpener {
    paths: Vec<String>,
    baud_rate: u32,
}

impl SerialOpener {
    pub fn new(paths: Vec<String>, baud_rate: u32) -> Self {
        Self { paths, baud_rate }
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(&self, path: &str) -> Result<tokio_serial::SerialStream> {
        tokio_serial::new(path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| RoverBridgeError::LinkUnavailable(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl PortOpener for SerialOpener {
    async fn open(&self) -> Result<Box<dyn SerialPortIO>> {
        for path in &self.paths {
            debug!("Trying to open serial port: {}", path);

            match self.open_port(path) {
                Ok(port) => {
                    info!("Opened motor controller at {} ({} baud)", path, self.baud_rate);
                    return Ok(Box::new(LinePort::new(port)));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                }
            }
        }

        Err(RoverBridgeError::LinkUnavailable(self.paths.join(", ")))
    }
}
