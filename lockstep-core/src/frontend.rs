//! Frontend session
//!
//! Wraps a powered [`System`] with the controls a player exposes: pause,
//! fast forward, run-ahead, save slots and rewind.

use crate::error::{CoreError, CoreResult};
use crate::run_ahead::RunAhead;
use crate::scheduler::Event;
use crate::system::System;
use std::collections::VecDeque;

pub const SAVE_SLOTS: usize = 10;

/// Extra frames run per call while fast forwarding
const FAST_FORWARD_FRAMES: usize = 3;

pub struct Session {
    system: System,
    run_ahead: RunAhead,
    paused: bool,
    fast_forward: bool,
    rewind_enabled: bool,
    rewind_capacity: usize,
    rewind_interval: u64,
    rewind_buffer: VecDeque<Vec<u8>>,
    save_slots: [Option<Vec<u8>>; SAVE_SLOTS],
}

impl Session {
    pub fn new(system: System) -> Self {
        let config = system.config().clone();
        Self {
            system,
            run_ahead: RunAhead::new(config.run_ahead),
            paused: false,
            fast_forward: false,
            rewind_enabled: config.rewind_enabled,
            rewind_capacity: config.rewind_frames,
            rewind_interval: config.rewind_interval.max(1),
            rewind_buffer: VecDeque::new(),
            save_slots: Default::default(),
        }
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut System {
        &mut self.system
    }

    pub fn into_system(self) -> System {
        self.system
    }

    /// Run one frame. Returns `None` while paused.
    pub fn run_frame(&mut self) -> CoreResult<Option<Event>> {
        if self.paused {
            return Ok(None);
        }

        if self.rewind_enabled && self.system.frame_count() % self.rewind_interval == 0 {
            let state = self.system.serialize(true)?;
            if self.rewind_buffer.len() >= self.rewind_capacity {
                self.rewind_buffer.pop_front();
            }
            if self.rewind_capacity > 0 {
                self.rewind_buffer.push_back(state);
            }
        }

        let event = self.run_ahead.run_frame(&mut self.system)?;

        if self.fast_forward {
            for _ in 0..FAST_FORWARD_FRAMES {
                self.system.run_frame()?;
            }
        }

        Ok(Some(event))
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn set_fast_forward(&mut self, enabled: bool) {
        self.fast_forward = enabled;
    }

    pub fn is_fast_forward(&self) -> bool {
        self.fast_forward
    }

    pub fn set_run_ahead(&mut self, enabled: bool) {
        self.run_ahead.set_enabled(enabled);
    }

    pub fn run_ahead(&self) -> &RunAhead {
        &self.run_ahead
    }

    /// Soft reset; the rewind history no longer applies
    pub fn reset(&mut self) -> CoreResult<()> {
        self.system.reset()?;
        self.rewind_buffer.clear();
        Ok(())
    }

    /// Step back to the most recent rewind point
    pub fn rewind_frame(&mut self) -> CoreResult<bool> {
        match self.rewind_buffer.pop_back() {
            Some(state) => {
                self.system.unserialize(&state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn rewind_depth(&self) -> usize {
        self.rewind_buffer.len()
    }

    pub fn save_state_slot(&mut self, slot: usize) -> CoreResult<()> {
        if slot >= SAVE_SLOTS {
            return Err(CoreError::InvalidSlot(slot));
        }
        let state = self.system.serialize(true)?;
        self.save_slots[slot] = Some(state);
        tracing::info!("Saved state to slot {}", slot);
        Ok(())
    }

    /// Returns false when the slot is empty
    pub fn load_state_slot(&mut self, slot: usize) -> CoreResult<bool> {
        if slot >= SAVE_SLOTS {
            return Err(CoreError::InvalidSlot(slot));
        }
        let Some(state) = &self.save_slots[slot] else {
            return Ok(false);
        };
        self.system.unserialize(state)?;
        tracing::info!("Loaded state from slot {}", slot);
        Ok(true)
    }

    pub fn slot_occupied(&self, slot: usize) -> bool {
        self.save_slots.get(slot).map(Option::is_some).unwrap_or(false)
    }

    pub fn frame_count(&self) -> u64 {
        self.system.frame_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::machine::{Machine, MachineConfig};

    fn session(rewind_interval: u64) -> (Session, Machine) {
        let core = CoreConfig {
            seed: Some(0xF00D),
            rewind_frames: 4,
            rewind_interval,
            ..Default::default()
        };
        let machine = MachineConfig {
            lines_per_frame: 8,
            ..Default::default()
        };
        let (system, handle) = Machine::boot(core, machine).unwrap();
        (Session::new(system), handle)
    }

    #[test]
    fn test_paused_session_does_not_run() {
        let (mut session, _) = session(1);
        session.set_paused(true);
        assert_eq!(session.run_frame().unwrap(), None);
        assert_eq!(session.frame_count(), 0);

        session.toggle_pause();
        assert_eq!(session.run_frame().unwrap(), Some(Event::Frame));
        assert_eq!(session.frame_count(), 1);
    }

    #[test]
    fn test_fast_forward_runs_extra_frames() {
        let (mut session, _) = session(1);
        session.set_fast_forward(true);
        session.run_frame().unwrap();
        assert_eq!(session.frame_count(), 1 + FAST_FORWARD_FRAMES as u64);
    }

    #[test]
    fn test_save_slots() {
        let (mut session, _) = session(1);
        session.run_frame().unwrap();
        session.save_state_slot(3).unwrap();
        let saved = session.system_mut().serialize(true).unwrap();
        assert!(session.slot_occupied(3));
        assert!(!session.slot_occupied(4));

        session.run_frame().unwrap();
        session.run_frame().unwrap();
        assert!(session.load_state_slot(3).unwrap());
        assert_eq!(session.frame_count(), 1);
        assert_eq!(session.system_mut().serialize(true).unwrap(), saved);

        assert!(!session.load_state_slot(4).unwrap());
        assert!(matches!(
            session.save_state_slot(SAVE_SLOTS),
            Err(CoreError::InvalidSlot(10))
        ));
        assert!(matches!(
            session.load_state_slot(42),
            Err(CoreError::InvalidSlot(42))
        ));
    }

    #[test]
    fn test_rewind_ring_is_bounded() {
        let (mut session, _) = session(1);
        for _ in 0..10 {
            session.run_frame().unwrap();
        }
        assert_eq!(session.rewind_depth(), 4);

        // Newest rewind point was captured before frame 10
        assert!(session.rewind_frame().unwrap());
        assert_eq!(session.frame_count(), 9);
        assert_eq!(session.rewind_depth(), 3);
    }

    #[test]
    fn test_rewind_interval() {
        let (mut session, _) = session(3);
        for _ in 0..9 {
            session.run_frame().unwrap();
        }
        // Captured before frames 1, 4 and 7
        assert_eq!(session.rewind_depth(), 3);
        assert!(session.rewind_frame().unwrap());
        assert_eq!(session.frame_count(), 6);
    }

    #[test]
    fn test_reset_clears_rewind() {
        let (mut session, _) = session(1);
        session.run_frame().unwrap();
        session.reset().unwrap();
        assert_eq!(session.rewind_depth(), 0);
        assert!(!session.rewind_frame().unwrap());
    }

    #[test]
    fn test_run_ahead_presents_next_frame() {
        let (mut session, machine) = session(1);
        session.set_run_ahead(true);
        for _ in 0..3 {
            session.run_frame().unwrap();
        }
        assert_eq!(session.frame_count(), 3);
        assert_eq!(machine.screen().latest().unwrap().number, 4);
        assert_eq!(session.run_ahead().speculative_frames(), 3);
    }
}
