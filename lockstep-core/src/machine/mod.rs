//! # Reference Machine
//!
//! A small three-chip machine used to exercise the scheduler end to end:
//!
//! - `cpu`: primary domain, 12 master ticks per step, owns the bus
//! - `video`: one line per step, presents a frame after the last line
//! - `audio`: a block of 16 samples per step
//!
//! Video and audio catch the CPU up before reading the bus; the CPU catches
//! them up before writing their registers.

pub mod audio;
pub mod bus;
pub mod cpu;
pub mod video;

use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::presentation::{Screen, Stream};
use crate::system::System;
use crate::thread::Frequency;
use bus::{Board, ButtonState};
use std::sync::Arc;

/// Master clock of the machine
pub const MASTER_HZ: u64 = 21_477_270;

/// Master ticks per CPU step
pub const CPU_TICKS: u64 = 12;

/// Master ticks per video line
pub const LINE_TICKS: u64 = 1364;

/// Master ticks per audio sample
pub const SAMPLE_TICKS: u64 = 480;

/// Samples generated per audio step
pub const AUDIO_BLOCK: u64 = 16;

/// Audio domain clock; the output stream samples it `AUDIO_BLOCK` times per step
pub const AUDIO_CLOCK: Frequency = Frequency::ticks(SAMPLE_TICKS * AUDIO_BLOCK);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub width: u32,
    pub lines_per_frame: u32,
    pub ram_size: usize,
    pub sample_rate: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            width: 32,
            lines_per_frame: 262,
            ram_size: 0x800,
            sample_rate: 44_100,
        }
    }
}

/// Host handle to a machine attached to a [`System`]
#[derive(Clone)]
pub struct Machine {
    board: Arc<Board>,
    screen: Arc<Screen>,
    stream: Arc<Stream>,
}

impl Machine {
    /// Attach the CPU, video and audio chips to `system`.
    pub fn install(system: &mut System, config: MachineConfig) -> Self {
        let board = Arc::new(Board::new(config.ram_size));
        let screen = Arc::new(Screen::new(
            system.scheduler().clone(),
            config.width,
            config.lines_per_frame,
        ));
        let stream = Arc::new(Stream::new(
            system.scheduler().clone(),
            AUDIO_CLOCK.subdivide(AUDIO_BLOCK),
            MASTER_HZ,
            config.sample_rate,
        ));

        system.attach(cpu::Cpu::new(Arc::clone(&board)));
        system.attach(video::Video::new(Arc::clone(&board), Arc::clone(&screen), &config));
        system.attach(audio::Audio::new(Arc::clone(&board), Arc::clone(&stream)));

        Self {
            board,
            screen,
            stream,
        }
    }

    /// Build a system with the machine attached and powered on
    pub fn boot(core: CoreConfig, config: MachineConfig) -> CoreResult<(System, Self)> {
        let mut system = System::new(core);
        let machine = Self::install(&mut system, config);
        system.power(false)?;
        Ok((system, machine))
    }

    pub fn set_input(&self, buttons: ButtonState) {
        self.board.bus.lock().input = buttons;
    }

    pub fn input(&self) -> ButtonState {
        self.board.bus.lock().input
    }

    pub fn screen(&self) -> &Arc<Screen> {
        &self.screen
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    /// Copy of work RAM
    pub fn ram(&self) -> Vec<u8> {
        self.board.bus.lock().ram.as_slice().to_vec()
    }
}
