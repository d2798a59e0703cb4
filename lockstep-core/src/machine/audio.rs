//! Square wave plus noise generator
//!
//! Reads the audio latch once per block and clocks one tone channel and one
//! LFSR noise channel per sample.

use super::bus::Board;
use super::{AUDIO_BLOCK, AUDIO_CLOCK};
use crate::component::{Component, PowerContext};
use crate::error::{CoreError, CoreResult};
use crate::node::{Node, Setting};
use crate::presentation::Stream;
use crate::serializer::Serializer;
use crate::thread::{ClockDomain, Link, Thread};
use parking_lot::Mutex;
use std::sync::Arc;

const NOISE_PERIOD: u16 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Generator {
    tone_counter: u16,
    tone_output: bool,
    noise_shift: u16,
    noise_counter: u16,
}

impl Generator {
    fn new() -> Self {
        Self {
            tone_counter: 0,
            tone_output: false,
            noise_shift: 0x8000,
            noise_counter: 0,
        }
    }

    /// Clock both channels once and mix
    fn clock(&mut self, latch: u8) -> f32 {
        let period = (latch & 0x3F) as u16 + 1;
        if self.tone_counter > 0 {
            self.tone_counter -= 1;
        } else {
            self.tone_counter = period;
            self.tone_output = !self.tone_output;
        }

        if self.noise_counter > 0 {
            self.noise_counter -= 1;
        } else {
            self.noise_counter = NOISE_PERIOD;
            let feedback = if latch & 0x40 != 0 {
                // White noise
                (self.noise_shift & 1) ^ ((self.noise_shift >> 3) & 1)
            } else {
                // Periodic noise
                self.noise_shift & 1
            };
            self.noise_shift = (self.noise_shift >> 1) | (feedback << 15);
        }

        if latch & 0x80 != 0 {
            return 0.0;
        }
        let tone = if self.tone_output { 0.5 } else { -0.5 };
        let noise = if self.noise_shift & 1 != 0 { 0.25 } else { -0.25 };
        tone + noise
    }

    fn serialize(&mut self, s: &mut Serializer) {
        s.integer(&mut self.tone_counter);
        s.boolean(&mut self.tone_output);
        s.integer(&mut self.noise_shift);
        s.integer(&mut self.noise_counter);
    }
}

pub struct Audio {
    board: Arc<Board>,
    stream: Arc<Stream>,
    generator: Arc<Mutex<Generator>>,
    domain: Option<ClockDomain>,
}

impl Audio {
    pub fn new(board: Arc<Board>, stream: Arc<Stream>) -> Self {
        Self {
            board,
            stream,
            generator: Arc::new(Mutex::new(Generator::new())),
            domain: None,
        }
    }
}

fn block(thread: &Thread, to_cpu: &Link, board: &Board, generator: &Mutex<Generator>, stream: &Stream) {
    thread.synchronize(to_cpu);
    let latch = board.bus.lock().audio_latch;
    {
        let mut generator = generator.lock();
        for _ in 0..AUDIO_BLOCK {
            stream.sample(generator.clock(latch));
        }
    }
    thread.step(1);
}

impl Component for Audio {
    fn name(&self) -> &str {
        "audio"
    }

    fn load(&mut self, root: &mut Node) {
        root.append("audio")
            .setting("sample rate", Setting::Natural(u64::from(self.stream.output_rate())));
    }

    fn unload(&mut self, root: &mut Node) {
        root.remove("audio");
        self.domain = None;
    }

    fn power(&mut self, context: &mut PowerContext<'_>, _reset: bool) -> CoreResult<()> {
        *self.generator.lock() = Generator::new();

        let domain = context
            .scheduler()
            .domain("audio", AUDIO_CLOCK);
        let (to_cpu, from_cpu) = self
            .board
            .connect(&domain)
            .ok_or_else(|| CoreError::Wiring("audio powered before the cpu".into()))?;
        self.board.wiring.lock().cpu_to_audio = Some(from_cpu);

        let board = Arc::clone(&self.board);
        let generator = Arc::clone(&self.generator);
        let stream = Arc::clone(&self.stream);
        domain.create(move |thread| block(thread, &to_cpu, &board, &generator, &stream))?;
        self.domain = Some(domain);
        Ok(())
    }

    fn serialize(&mut self, s: &mut Serializer) {
        self.generator.lock().serialize(s);
        self.stream.serialize(s);
    }
}
