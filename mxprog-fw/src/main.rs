// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! MX29F1615 programmer firmware for RP2040.
//!
//! A single polling loop runs the command shell; the USB interrupt keeps
//! the CDC console rings filled and drained underneath it.

#![no_std]
#![no_main]

mod bus;
mod peripherals;
mod usb_console;

use defmt_rtt as _;
use embedded_hal::digital::StatefulOutputPin;
use panic_probe as _;
use rp2040_hal as hal;
use usb_device::class_prelude::UsbBusAllocator;

use mxprog_common::device::mx29f1615::Mx29f1615;
use mxprog_common::device::{Programmer, Request, Shell};

use crate::bus::ParallelBus;
use crate::peripherals::{uptime_us, TimerClock};
use crate::usb_console::UsbConsole;

defmt::timestamp!("{=u64:us}", { uptime_us() });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

const VERSION: &str = concat!("mxprog-fw ", env!("CARGO_PKG_VERSION"));

const HEARTBEAT_US: u64 = 500_000;

#[entry]
fn main() -> ! {
    defmt::println!("{} starting", VERSION);

    let mut p = peripherals::init();

    let usb_bus = peripherals::store_usb_bus(UsbBusAllocator::new(hal::usb::UsbBus::new(
        p.usb.regs,
        p.usb.dpram,
        p.usb.clock,
        true,
        &mut p.usb.resets,
    )));
    let console = UsbConsole::new(usb_bus);
    let prom = Mx29f1615::new(ParallelBus::new(p.bus_pins, p.abort_pin));
    let mut dev = Programmer::new(console, TimerClock, prom);
    let mut shell = Shell::new(VERSION);

    defmt::println!("USB CDC initialized, entering main loop");

    let mut next_blink = uptime_us();
    loop {
        if let Some(Request::Reset) = shell.poll(&mut dev) {
            defmt::println!("reset requested");
            dev.prom.power_off();
            dev.console.drain(100_000);
            cortex_m::peripheral::SCB::sys_reset();
        }
        dev.poll();

        // Slow blink LED to show activity
        let now = uptime_us();
        if now >= next_blink {
            next_blink = now + HEARTBEAT_US;
            p.led_pin.toggle().ok();
        }
    }
}
