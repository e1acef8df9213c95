//! Serial connection to the board controller.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialPortType, SerialStream, StopBits,
};

/// Byte-level link to the board.
///
/// Implemented by [`SerialPort`] for real hardware and by in-memory fakes in tests.
#[async_trait]
pub trait SerialLink: Send {
    /// Read whatever is available into `buf`. `Ok(0)` means nothing arrived.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `line` verbatim and flush.
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Release the underlying handle.
    async fn close(&mut self) -> io::Result<()>;
}

/// A serial device opened 8N1 without flow control.
pub struct SerialPort {
    name: String,
    stream: Option<SerialStream>,
}

impl SerialPort {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, tokio_serial::Error> {
        let stream = tokio_serial::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        Ok(Self {
            name: path.to_string(),
            stream: Some(stream),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn stream(&mut self) -> io::Result<&mut SerialStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

#[async_trait]
impl SerialLink for SerialPort {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf).await
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stream = self.stream()?;
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(mut stream) => {
                tracing::debug!("Closing serial port {}", self.name);
                stream.shutdown().await
            }
            None => Ok(()),
        }
    }
}

/// A serial device found on this machine.
#[derive(Debug, Clone)]
pub struct PortDescription {
    pub name: String,
    pub kind: String,
}

/// Enumerate serial devices.
pub fn list_ports() -> Result<Vec<PortDescription>, tokio_serial::Error> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| PortDescription {
            kind: describe_port_type(&port.port_type),
            name: port.port_name,
        })
        .collect())
}

fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let label = usb
                .product
                .as_deref()
                .or(usb.manufacturer.as_deref())
                .unwrap_or("USB device");
            format!("usb {:04x}:{:04x} {}", usb.vid, usb.pid, label)
        }
        SerialPortType::PciPort => "pci".to_string(),
        SerialPortType::BluetoothPort => "bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}
