// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Peripheral initialization and board pin assignment.
//!
//! | GPIO   | Use                                  |
//! |--------|--------------------------------------|
//! | 0-15   | D0-D15, also address bytes to latches |
//! | 16-18  | Address latch enables A0-7, A8-15, A16-19 |
//! | 19     | CE#                                  |
//! | 20     | OE#                                  |
//! | 21     | VPP enable (10V)                     |
//! | 22     | VCC enable, active low               |
//! | 25     | LED                                  |
//! | 26     | Abort button, active low             |

use rp2040_hal as hal;
use rp2040_hal::usb::UsbBus;
use usb_device::class_prelude::UsbBusAllocator;

use mxprog_common::device::Clock;

pub type LedPin =
    hal::gpio::Pin<hal::gpio::bank0::Gpio25, hal::gpio::FunctionSioOutput, hal::gpio::PullDown>;
pub type AbortPin =
    hal::gpio::Pin<hal::gpio::bank0::Gpio26, hal::gpio::FunctionSioInput, hal::gpio::PullUp>;
pub type BusPin =
    hal::gpio::Pin<hal::gpio::DynPinId, hal::gpio::FunctionSioOutput, hal::gpio::PullDown>;

/// Pins driven through raw SIO registers by [`crate::bus::ParallelBus`].
pub const BUS_PIN_COUNT: usize = 23;

/// Static storage for UsbBusAllocator (required by usb-device for 'static lifetime).
static mut USB_BUS: Option<UsbBusAllocator<UsbBus>> = None;

pub fn store_usb_bus(bus: UsbBusAllocator<UsbBus>) -> &'static UsbBusAllocator<UsbBus> {
    unsafe {
        USB_BUS = Some(bus);
        (*core::ptr::addr_of!(USB_BUS)).as_ref().unwrap()
    }
}

pub struct Peripherals {
    pub led_pin: LedPin,
    pub abort_pin: AbortPin,
    pub bus_pins: [BusPin; BUS_PIN_COUNT],
    pub usb: UsbPeripherals,
}

pub struct UsbPeripherals {
    pub regs: hal::pac::USBCTRL_REGS,
    pub dpram: hal::pac::USBCTRL_DPRAM,
    pub clock: hal::clocks::UsbClock,
    pub resets: hal::pac::RESETS,
}

pub fn init() -> Peripherals {
    let mut pac = unsafe { hal::pac::Peripherals::steal() };

    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    let clocks = hal::clocks::init_clocks_and_plls(
        12_000_000u32,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .unwrap();

    // Takes TIMER out of reset; uptime_us() reads it directly.
    let _timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let sio = hal::Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    macro_rules! bus_pins {
        ($($pin:ident),+ $(,)?) => {
            [$(pins.$pin.into_push_pull_output().into_dyn_pin()),+]
        };
    }
    let bus_pins = bus_pins![
        gpio0, gpio1, gpio2, gpio3, gpio4, gpio5, gpio6, gpio7, gpio8, gpio9, gpio10, gpio11,
        gpio12, gpio13, gpio14, gpio15, gpio16, gpio17, gpio18, gpio19, gpio20, gpio21, gpio22,
    ];

    Peripherals {
        led_pin: pins.gpio25.into_push_pull_output(),
        abort_pin: pins.gpio26.into_pull_up_input(),
        bus_pins,
        usb: UsbPeripherals {
            regs: pac.USBCTRL_REGS,
            dpram: pac.USBCTRL_DPRAM,
            clock: clocks.usb_clock,
            resets: pac.RESETS,
        },
    }
}

/// Microseconds since boot from the free-running timer.
pub fn uptime_us() -> u64 {
    let timer = unsafe { &*hal::pac::TIMER::ptr() };
    loop {
        let hi = timer.timerawh().read().bits();
        let lo = timer.timerawl().read().bits();
        if timer.timerawh().read().bits() == hi {
            return (u64::from(hi) << 32) | u64::from(lo);
        }
    }
}

/// [`Clock`] on the system timer.
pub struct TimerClock;

impl Clock for TimerClock {
    fn now_us(&self) -> u64 {
        uptime_us()
    }
}
