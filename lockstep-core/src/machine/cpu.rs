//! Toy processor
//!
//! Executes whatever power-on noise sits in RAM. Every step fetches one
//! opcode and does one of four things: accumulate from RAM, store the
//! accumulator mixed with input, write the video scroll register or write
//! the audio latch. The last two catch the target chip up first.

use super::bus::{Board, Wiring};
use super::CPU_TICKS;
use crate::component::{Component, PowerContext};
use crate::error::CoreResult;
use crate::node::{Node, Setting};
use crate::serializer::Serializer;
use crate::thread::{Frequency, Thread};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub pc: u16,
    pub steps: u64,
}

pub struct Cpu {
    board: Arc<Board>,
    regs: Arc<Mutex<Registers>>,
}

impl Cpu {
    pub fn new(board: Arc<Board>) -> Self {
        Self {
            board,
            regs: Arc::new(Mutex::new(Registers::default())),
        }
    }

    pub fn registers(&self) -> Registers {
        self.regs.lock().clone()
    }
}

fn execute(thread: &Thread, board: &Board, regs: &Mutex<Registers>) {
    let (op, a) = {
        let mut regs = regs.lock();
        let bus = board.bus.lock();
        let op = bus.ram.read(regs.pc);
        regs.pc = regs.pc.wrapping_add(1);
        regs.steps += 1;
        (op, regs.a)
    };

    match op & 0x03 {
        0 => {
            let mut regs = regs.lock();
            let bus = board.bus.lock();
            let x = regs.x;
            regs.a = regs.a.wrapping_add(bus.ram.read(0x100 | x as u16)).rotate_left(1);
            regs.x = x.wrapping_add(1);
        }
        1 => {
            let mut regs = regs.lock();
            let mut bus = board.bus.lock();
            let value = a ^ bus.input.to_byte();
            bus.ram.write(0x100 | regs.x as u16, value);
            regs.x = regs.x.wrapping_add(op >> 2);
        }
        2 => {
            let link = board.wiring.lock().cpu_to_video;
            if let Some(link) = link {
                thread.synchronize(&link);
            }
            board.bus.lock().scroll = a;
        }
        _ => {
            let link = board.wiring.lock().cpu_to_audio;
            if let Some(link) = link {
                thread.synchronize(&link);
            }
            board.bus.lock().audio_latch = a;
        }
    }

    thread.step(1);
}

impl Component for Cpu {
    fn name(&self) -> &str {
        "cpu"
    }

    fn load(&mut self, root: &mut Node) {
        root.append("cpu")
            .setting("ticks per step", Setting::Natural(CPU_TICKS));
    }

    fn unload(&mut self, root: &mut Node) {
        root.remove("cpu");
    }

    fn power(&mut self, context: &mut PowerContext<'_>, reset: bool) -> CoreResult<()> {
        {
            let mut regs = self.regs.lock();
            *regs = Registers::default();
            if !reset {
                let mut bus = self.board.bus.lock();
                let mut random = context.random().lock();
                random.array(bus.ram.as_mut_slice());
                bus.scroll = 0;
                bus.audio_latch = 0x80;
                regs.a = random.bias(0) as u8;
            }
        }

        let domain = context.scheduler().domain("cpu", Frequency::ticks(CPU_TICKS));
        let board = Arc::clone(&self.board);
        let regs = Arc::clone(&self.regs);
        domain.create(move |thread| execute(thread, &board, &regs))?;
        context.set_primary(&domain);

        let previous = std::mem::replace(
            &mut *self.board.wiring.lock(),
            Wiring {
                cpu: Some(Arc::new(domain)),
                cpu_to_video: None,
                cpu_to_audio: None,
            },
        );
        drop(previous);
        Ok(())
    }

    fn serialize(&mut self, s: &mut Serializer) {
        {
            let mut regs = self.regs.lock();
            s.integer(&mut regs.a);
            s.integer(&mut regs.x);
            s.integer(&mut regs.pc);
            s.integer(&mut regs.steps);
        }
        self.board.bus.lock().serialize(s);
    }
}

impl Drop for Cpu {
    fn drop(&mut self) {
        // The board outlives the CPU in every domain entry; release the
        // domain so its context is torn down with the component
        let domain = self.board.wiring.lock().cpu.take();
        drop(domain);
    }
}
