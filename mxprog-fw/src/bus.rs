// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bit-banged MX29F1615 bus.
//!
//! The address is loaded a byte at a time into three latches over the
//! low half of the data bus, then the word is moved with CE#/OE#. All
//! bus pins are switched through the SIO set/clear registers so a cycle
//! is a handful of stores.

use embedded_hal::digital::InputPin;
use rp2040_hal as hal;

use mxprog_common::device::mx29f1615::PromBus;

use crate::peripherals::{uptime_us, AbortPin, BusPin, BUS_PIN_COUNT};

const DATA_MASK: u32 = 0xffff;
const ADDR_BYTE_MASK: u32 = 0x00ff;
const LATCH_ENABLE: [u32; 3] = [1 << 16, 1 << 17, 1 << 18];
const CE_N: u32 = 1 << 19;
const OE_N: u32 = 1 << 20;
const VPP_EN: u32 = 1 << 21;
const VCC_EN_N: u32 = 1 << 22;

/// About 130 ns at 125 MHz: covers latch setup and tWP.
const SETTLE_CYCLES: u32 = 16;
/// About 200 ns: tACC of the 120 ns part plus margin.
const ACCESS_CYCLES: u32 = 25;

fn sio() -> &'static hal::pac::sio::RegisterBlock {
    unsafe { &*hal::pac::SIO::ptr() }
}

fn out_set(mask: u32) {
    sio().gpio_out_set().write(|w| unsafe { w.bits(mask) });
}

fn out_clr(mask: u32) {
    sio().gpio_out_clr().write(|w| unsafe { w.bits(mask) });
}

fn drive(mask: u32, value: u32) {
    out_clr(mask & !value);
    out_set(mask & value);
    sio().gpio_oe_set().write(|w| unsafe { w.bits(mask) });
}

fn release(mask: u32) {
    sio().gpio_oe_clr().write(|w| unsafe { w.bits(mask) });
}

pub struct ParallelBus {
    _pins: [BusPin; BUS_PIN_COUNT],
    abort: AbortPin,
    abort_was_down: bool,
}

impl ParallelBus {
    pub fn new(pins: [BusPin; BUS_PIN_COUNT], abort: AbortPin) -> Self {
        // Part unpowered, strobes idle, data bus floating
        out_set(VCC_EN_N | CE_N | OE_N);
        out_clr(VPP_EN | LATCH_ENABLE[0] | LATCH_ENABLE[1] | LATCH_ENABLE[2]);
        release(DATA_MASK);
        Self {
            _pins: pins,
            abort,
            abort_was_down: false,
        }
    }

    fn latch_address(&mut self, addr: u32) {
        for (index, &enable) in LATCH_ENABLE.iter().enumerate() {
            drive(ADDR_BYTE_MASK, (addr >> (8 * index)) & ADDR_BYTE_MASK);
            out_set(enable);
            cortex_m::asm::delay(SETTLE_CYCLES);
            out_clr(enable);
        }
        release(DATA_MASK);
    }
}

impl PromBus for ParallelBus {
    fn set_power(&mut self, on: bool) {
        out_set(CE_N | OE_N);
        if on {
            out_clr(VCC_EN_N);
        } else {
            out_clr(VPP_EN);
            release(DATA_MASK);
            out_set(VCC_EN_N);
        }
    }

    fn set_vpp(&mut self, high: bool) {
        if high {
            out_set(VPP_EN);
        } else {
            out_clr(VPP_EN);
        }
    }

    fn read_word(&mut self, addr: u32) -> u16 {
        self.latch_address(addr);
        out_clr(CE_N | OE_N);
        cortex_m::asm::delay(ACCESS_CYCLES);
        let word = sio().gpio_in().read().bits() & DATA_MASK;
        out_set(CE_N | OE_N);
        word as u16
    }

    fn write_word(&mut self, addr: u32, data: u16) {
        self.latch_address(addr);
        out_set(OE_N);
        drive(DATA_MASK, u32::from(data));
        out_clr(CE_N);
        cortex_m::asm::delay(SETTLE_CYCLES);
        out_set(CE_N);
        release(DATA_MASK);
    }

    fn delay_us(&mut self, us: u32) {
        let start = uptime_us();
        while uptime_us() - start < u64::from(us) {}
    }

    fn now_us(&mut self) -> u64 {
        uptime_us()
    }

    fn abort_pressed(&mut self) -> bool {
        let down = self.abort.is_low().unwrap_or(false);
        let pressed = down && !self.abort_was_down;
        self.abort_was_down = down;
        if pressed {
            defmt::println!("abort button");
        }
        pressed
    }

    fn with_irqs_masked<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        critical_section::with(|_| f(self))
    }
}
