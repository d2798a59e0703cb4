//! Shared bus of the reference machine

use crate::serializer::Serializer;
use crate::thread::{ClockDomain, Link};
use parking_lot::Mutex;
use std::sync::Arc;

/// Power-of-two RAM block with mirrored addressing
#[derive(Clone)]
pub struct Ram {
    data: Vec<u8>,
    mask: usize,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "RAM size must be a power of two");
        Self {
            data: vec![0; size],
            mask: size - 1,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        self.data[addr as usize & self.mask]
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        self.data[addr as usize & self.mask] = val;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Controller state latched by the host between frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
}

impl ButtonState {
    pub fn to_byte(&self) -> u8 {
        let mut val = 0u8;
        if self.a { val |= 0x01; }
        if self.b { val |= 0x02; }
        if self.select { val |= 0x04; }
        if self.start { val |= 0x08; }
        if self.up { val |= 0x10; }
        if self.down { val |= 0x20; }
        if self.left { val |= 0x40; }
        if self.right { val |= 0x80; }
        val
    }

    pub fn from_byte(val: u8) -> Self {
        Self {
            a: val & 0x01 != 0,
            b: val & 0x02 != 0,
            select: val & 0x04 != 0,
            start: val & 0x08 != 0,
            up: val & 0x10 != 0,
            down: val & 0x20 != 0,
            left: val & 0x40 != 0,
            right: val & 0x80 != 0,
        }
    }
}

/// Everything on the bus: work RAM and the chip registers the CPU writes
pub struct BusState {
    pub ram: Ram,
    /// Video scroll register
    pub scroll: u8,
    /// Audio control latch: bits 0-5 tone period, bit 6 white noise, bit 7 mute
    pub audio_latch: u8,
    /// Host input; not part of machine state
    pub input: ButtonState,
}

impl BusState {
    pub fn serialize(&mut self, s: &mut Serializer) {
        s.bytes(self.ram.as_mut_slice());
        s.integer(&mut self.scroll);
        s.integer(&mut self.audio_latch);
    }
}

/// Timing wiring between the chips, rebuilt on every power-on
#[derive(Default)]
pub struct Wiring {
    pub cpu: Option<Arc<ClockDomain>>,
    pub cpu_to_video: Option<Link>,
    pub cpu_to_audio: Option<Link>,
}

/// State shared by every chip of one machine
pub struct Board {
    pub bus: Mutex<BusState>,
    pub wiring: Mutex<Wiring>,
}

impl Board {
    pub fn new(ram_size: usize) -> Self {
        Self {
            bus: Mutex::new(BusState {
                ram: Ram::new(ram_size),
                scroll: 0,
                audio_latch: 0x80,
                input: ButtonState::default(),
            }),
            wiring: Mutex::new(Wiring::default()),
        }
    }

    /// The CPU domain, if the CPU has been powered on
    pub fn cpu(&self) -> Option<Arc<ClockDomain>> {
        self.wiring.lock().cpu.clone()
    }

    /// Declare `domain` as a bus peer of the CPU in both directions.
    ///
    /// Returns the link `domain` uses to catch the CPU up before reading the
    /// bus; the CPU's link back is returned second.
    pub fn connect(&self, domain: &ClockDomain) -> Option<(Link, Link)> {
        let cpu = self.cpu()?;
        Some((domain.depends_on(&cpu), cpu.depends_on(domain)))
    }
}
