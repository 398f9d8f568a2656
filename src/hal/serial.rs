//! Serial transport on tokio-serial.
//!
//! The stream is split into a reader task, which turns bytes into
//! [`PortEvent::Line`]s, and a writer task fed through an unbounded queue so
//! [`LinePort::write_line`] stays synchronous. Either task reports a failure
//! as [`PortEvent::Error`] and stops.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error};

use crate::config::SerialConfig;
use crate::traits::{Connection, Connector, LinePort, PortError, PortEvent, PORT_EVENT_CAPACITY};

/// Writer half of an open serial port.
pub struct SerialLinePort {
    name: String,
    outgoing: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SerialLinePort {
    /// Open the port named in `config` (8N1, no flow control).
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(config: &SerialConfig) -> Result<Connection, PortError> {
        let name = config.port.as_str().to_string();
        let stream = tokio_serial::new(&name, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| PortError::Open {
                port: name.clone(),
                reason: e.to_string(),
            })?;
        debug!(port = %name, baud = config.baud_rate, "serial port opened");

        let (rx, mut tx) = tokio::io::split(stream);
        let (events, events_rx) = mpsc::channel(PORT_EVENT_CAPACITY);
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(rx).lines();
            let reason = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim_end_matches('\r').to_string();
                        if reader_events.send(PortEvent::Line(line)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break "port closed".to_string(),
                    Err(e) => break e.to_string(),
                }
            };
            error!(%reason, "serial read failed");
            let _ = reader_events.send(PortEvent::Error(reason)).await;
        });

        let writer = tokio::spawn(async move {
            while let Some(mut line) = outgoing_rx.recv().await {
                line.push('\n');
                let result = match tx.write_all(line.as_bytes()).await {
                    Ok(()) => tx.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    error!(error = %e, "serial write failed");
                    let _ = events.send(PortEvent::Error(e.to_string())).await;
                    return;
                }
            }
        });

        Ok(Connection::new(
            SerialLinePort {
                name,
                outgoing,
                reader,
                writer,
            },
            events_rx,
        ))
    }
}

impl LinePort for SerialLinePort {
    fn write_line(&mut self, line: &str) -> Result<(), PortError> {
        self.outgoing
            .send(line.to_string())
            .map_err(|_| PortError::Closed)
    }

    fn close(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialLinePort {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens the configured serial port on every connect.
#[derive(Clone, Debug)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    /// Connector for `config`.
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

impl Connector for SerialConnector {
    fn open(&self) -> Result<Connection, PortError> {
        SerialLinePort::open(&self.config)
    }
}
