// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Opening the programmer's serial device.
//!
//! The link threads only see a [`Connector`], so the same reopen logic
//! drives a real USB CDC port and the in-memory wire used by the tests.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::{debug, info};
use serialport::SerialPortType;

use mxprog_common::protocol::{USB_PID, USB_VID};

/// Read timeout on the serial handle. Bounds how long the reader thread
/// takes to notice shutdown or a reopen request.
pub const READ_TIMEOUT_MS: u64 = 100;

/// Both directions of one open handle.
pub struct Connection {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Something that can (re)open the programmer.
///
/// `open` is called again after every I/O error, so it must cope with
/// the device being absent for a while.
pub trait Connector: Sync {
    /// Device name for messages.
    fn name(&self) -> &str;

    fn open(&self) -> io::Result<Connection>;
}

/// A serial device path, configured 115200 8-N-1.
pub struct SerialConnector {
    path: String,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Connector for SerialConnector {
    fn name(&self) -> &str {
        &self.path
    }

    fn open(&self) -> io::Result<Connection> {
        let port = serialport::new(&self.path, 115_200)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .open()?;
        let writer = port.try_clone()?;
        debug!("opened {}", self.path);
        Ok(Connection {
            reader: Box::new(port),
            writer: Box::new(writer),
        })
    }
}

/// Look for an attached programmer among the system's serial ports.
pub fn find_programmer() -> Option<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("port enumeration failed: {}", e);
            return None;
        }
    };

    ports.into_iter().find_map(|port| match &port.port_type {
        SerialPortType::UsbPort(usb) => {
            let by_id = usb.vid == USB_VID && usb.pid == USB_PID;
            let by_name = usb
                .product
                .as_deref()
                .is_some_and(|p| p.contains("MX29F1615"));
            if by_id || by_name {
                info!("found programmer at {}", port.port_name);
                Some(port.port_name.clone())
            } else {
                None
            }
        }
        _ => None,
    })
}
