//! Line-based video generator
//!
//! Renders one line per step straight out of work RAM, offset by the scroll
//! register, and presents the frame after the last line.

use super::bus::Board;
use super::{MachineConfig, LINE_TICKS};
use crate::component::{Component, PowerContext};
use crate::error::{CoreError, CoreResult};
use crate::node::{Node, Setting};
use crate::presentation::Screen;
use crate::scheduler::Event;
use crate::serializer::Serializer;
use crate::thread::{ClockDomain, Frequency, Link, Thread};
use parking_lot::Mutex;
use std::sync::Arc;

struct VideoState {
    line: u32,
    frame: u64,
    indices: Vec<u8>,
}

/// Grey ramp, 0x00RRGGBB
pub fn palette(index: u8) -> u32 {
    u32::from(index) * 0x0001_0101
}

pub struct Video {
    board: Arc<Board>,
    screen: Arc<Screen>,
    width: u32,
    lines: u32,
    state: Arc<Mutex<VideoState>>,
    domain: Option<ClockDomain>,
}

impl Video {
    pub fn new(board: Arc<Board>, screen: Arc<Screen>, config: &MachineConfig) -> Self {
        Self {
            board,
            screen,
            width: config.width,
            lines: config.lines_per_frame,
            state: Arc::new(Mutex::new(VideoState {
                line: 0,
                frame: 0,
                indices: vec![0; (config.width * config.lines_per_frame) as usize],
            })),
            domain: None,
        }
    }
}

struct Scanline {
    board: Arc<Board>,
    screen: Arc<Screen>,
    state: Arc<Mutex<VideoState>>,
    to_cpu: Link,
    width: usize,
    lines: u32,
}

impl Scanline {
    fn run(&self, thread: &Thread) {
        thread.synchronize(&self.to_cpu);

        let finished = {
            let mut state = self.state.lock();
            let bus = self.board.bus.lock();
            let line = state.line as usize;
            let base = (line * self.width) as u16;
            let offset = (bus.scroll as u16) << 3;
            for x in 0..self.width {
                state.indices[line * self.width + x] =
                    bus.ram.read(base.wrapping_add(x as u16).wrapping_add(offset));
            }

            state.line += 1;
            if state.line == self.lines {
                state.line = 0;
                state.frame += 1;
                let pixels: Vec<u32> = state.indices.iter().map(|&index| palette(index)).collect();
                Some((state.frame, pixels))
            } else {
                None
            }
        };

        thread.step(1);

        if let Some((number, pixels)) = finished {
            self.screen.frame(number, &pixels);
            thread.exit(Event::Frame);
        }
    }
}

impl Component for Video {
    fn name(&self) -> &str {
        "video"
    }

    fn load(&mut self, root: &mut Node) {
        let node = root.append("video");
        node.setting("width", Setting::Natural(u64::from(self.width)));
        node.setting("lines per frame", Setting::Natural(u64::from(self.lines)));
    }

    fn unload(&mut self, root: &mut Node) {
        root.remove("video");
        self.domain = None;
    }

    fn power(&mut self, context: &mut PowerContext<'_>, reset: bool) -> CoreResult<()> {
        {
            let mut state = self.state.lock();
            state.line = 0;
            if !reset {
                state.frame = 0;
                state.indices.fill(0);
            }
        }

        let domain = context.scheduler().domain("video", Frequency::ticks(LINE_TICKS));
        let (to_cpu, from_cpu) = self
            .board
            .connect(&domain)
            .ok_or_else(|| CoreError::Wiring("video powered before the cpu".into()))?;
        self.board.wiring.lock().cpu_to_video = Some(from_cpu);

        let scanline = Scanline {
            board: Arc::clone(&self.board),
            screen: Arc::clone(&self.screen),
            state: Arc::clone(&self.state),
            to_cpu,
            width: self.width as usize,
            lines: self.lines,
        };
        domain.create(move |thread| scanline.run(thread))?;
        self.domain = Some(domain);
        Ok(())
    }

    fn serialize(&mut self, s: &mut Serializer) {
        let mut state = self.state.lock();
        s.integer(&mut state.line);
        s.integer(&mut state.frame);
        s.bytes(&mut state.indices);
    }
}
