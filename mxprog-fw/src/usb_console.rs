// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! USB CDC console.
//!
//! The USB interrupt owns the device and class, and moves bytes between
//! the endpoints and two rings: received data into the console input
//! ring, queued output from the TX stage ring. The main loop holds the
//! other end of each ring. Every look at the input also services the
//! USB stack, so a caller spinning on [`Console::getchar`] keeps its own
//! output moving.

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use heapless::Vec;
use rp2040_hal::pac::{self, interrupt};
use rp2040_hal::usb::UsbBus;
use usb_device::class_prelude::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

use mxprog_common::device::{Console, Stalled};
use mxprog_common::protocol::{BREAK, USB_PID, USB_PRODUCT, USB_VID};
use mxprog_common::ring::{Consumer, Producer, RingBuffer};

use crate::peripherals::uptime_us;

pub const RX_RING_SIZE: usize = 8192;
pub const TX_RING_SIZE: usize = 1024;

/// Full-speed bulk endpoint size.
const PACKET_SIZE: usize = 64;

/// Longest wait for room in the TX ring.
const STALL_US: u64 = 500_000;

static mut RX_RING: RingBuffer<RX_RING_SIZE> = RingBuffer::new();
static mut TX_RING: RingBuffer<TX_RING_SIZE> = RingBuffer::new();

static USB: Mutex<RefCell<Option<UsbState>>> = Mutex::new(RefCell::new(None));

struct UsbState {
    device: UsbDevice<'static, UsbBus>,
    serial: SerialPort<'static, UsbBus>,
    rx: Producer<'static, RX_RING_SIZE>,
    tx: Consumer<'static, TX_RING_SIZE>,
    /// Taken from the TX ring but not yet accepted by the endpoint.
    pending: Vec<u8, PACKET_SIZE>,
    /// Interrupt masked until the input ring has room for a packet.
    rx_held: bool,
    configured: bool,
}

impl UsbState {
    fn service(&mut self) {
        self.device.poll(&mut [&mut self.serial]);
        self.receive();
        self.transmit();

        let configured = self.device.state() == UsbDeviceState::Configured;
        if configured != self.configured {
            self.configured = configured;
            defmt::info!("USB {}", if configured { "configured" } else { "detached" });
        }
    }

    fn receive(&mut self) {
        // Leave data in the endpoint (NAKing the host) while the ring is full
        let room = self.rx.space_remaining().min(PACKET_SIZE);
        if room > 0 {
            let mut buf = [0u8; PACKET_SIZE];
            if let Ok(count) = self.serial.read(&mut buf[..room]) {
                self.rx.put_slice(&buf[..count]);
            }
        }

        // An unread OUT packet keeps the interrupt pending. While the ring
        // is short of room the main loop services USB from getchar().
        let held = self.rx.space_remaining() < PACKET_SIZE;
        if held != self.rx_held {
            self.rx_held = held;
            if held {
                pac::NVIC::mask(pac::Interrupt::USBCTRL_IRQ);
            } else {
                unsafe { pac::NVIC::unmask(pac::Interrupt::USBCTRL_IRQ) };
            }
        }
    }

    fn transmit(&mut self) {
        while !self.pending.is_full() {
            match self.tx.get() {
                Some(byte) => {
                    let _ = self.pending.push(byte);
                }
                None => break,
            }
        }
        if self.pending.is_empty() {
            return;
        }
        if let Ok(count) = self.serial.write(&self.pending) {
            let left = self.pending.len() - count;
            self.pending.copy_within(count.., 0);
            self.pending.truncate(left);
        }
    }
}

fn service() {
    critical_section::with(|cs| {
        if let Some(usb) = USB.borrow_ref_mut(cs).as_mut() {
            usb.service();
        }
    });
}

#[interrupt]
fn USBCTRL_IRQ() {
    service();
}

/// Main-loop side of the console.
pub struct UsbConsole {
    rx: Consumer<'static, RX_RING_SIZE>,
    tx: Producer<'static, TX_RING_SIZE>,
}

impl UsbConsole {
    /// Build the CDC device, hand it to the interrupt and enable it.
    /// Must be called only once.
    pub fn new(bus: &'static UsbBusAllocator<UsbBus>) -> Self {
        let serial = SerialPort::new(bus);
        let device = UsbDeviceBuilder::new(bus, UsbVidPid(USB_VID, USB_PID))
            .strings(&[StringDescriptors::default()
                .manufacturer("ADNT")
                .product(USB_PRODUCT)
                .serial_number("MX0001")])
            .unwrap()
            .device_class(usbd_serial::USB_CLASS_CDC)
            .build();

        // Only this function touches the rings directly, and only once.
        let (rx_prod, rx_cons) = unsafe { (*core::ptr::addr_of_mut!(RX_RING)).split() };
        let (tx_prod, tx_cons) = unsafe { (*core::ptr::addr_of_mut!(TX_RING)).split() };

        critical_section::with(|cs| {
            USB.borrow(cs).replace(Some(UsbState {
                device,
                serial,
                rx: rx_prod,
                tx: tx_cons,
                pending: Vec::new(),
                rx_held: false,
                configured: false,
            }));
        });
        unsafe { pac::NVIC::unmask(pac::Interrupt::USBCTRL_IRQ) };

        Self {
            rx: rx_cons,
            tx: tx_prod,
        }
    }

    fn put(&mut self, byte: u8) -> Result<(), Stalled> {
        let mut deadline = None;
        while !self.tx.put(byte) {
            service();
            let now = uptime_us();
            if now >= *deadline.get_or_insert(now + STALL_US) {
                return Err(Stalled);
            }
        }
        Ok(())
    }

    /// Push queued output to the host, waiting at most `timeout_us`.
    pub fn drain(&mut self, timeout_us: u64) {
        let deadline = uptime_us() + timeout_us;
        while !self.tx.is_flushed() && uptime_us() < deadline {
            service();
        }
    }
}

impl fmt::Write for UsbConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.put(b'\r').map_err(|_| fmt::Error)?;
            }
            self.put(byte).map_err(|_| fmt::Error)?;
        }
        Ok(())
    }
}

impl Console for UsbConsole {
    fn getchar(&mut self) -> Option<u8> {
        service();
        self.rx.get()
    }

    fn puts_binary(&mut self, data: &[u8]) -> Result<(), Stalled> {
        data.iter().try_for_each(|&byte| self.put(byte))
    }

    fn break_pending(&mut self) -> bool {
        service();
        self.rx.take_through(BREAK)
    }
}
