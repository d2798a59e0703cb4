//! Speculative run-ahead
//!
//! Hides one frame of input latency: the real frame is run with output
//! suppressed, the machine is snapshotted, one more frame is run and shown,
//! and the snapshot is restored so only the real frame's state survives.

use crate::error::CoreResult;
use crate::scheduler::Event;
use crate::system::System;

#[derive(Debug, Default)]
pub struct RunAhead {
    enabled: bool,
    speculative_frames: u64,
}

impl RunAhead {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            speculative_frames: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            tracing::info!(enabled, "run-ahead toggled");
        }
        self.enabled = enabled;
    }

    /// Frames run and then rolled back
    pub fn speculative_frames(&self) -> u64 {
        self.speculative_frames
    }

    /// Advance the committed timeline by one frame.
    pub fn run_frame(&mut self, system: &mut System) -> CoreResult<Event> {
        if !self.enabled {
            return system.run_frame();
        }

        system.set_run_ahead(true);
        let committed = system.run_frame().and_then(|event| {
            if event == Event::Power {
                return Ok((event, None));
            }
            system.serialize(true).map(|snapshot| (event, Some(snapshot)))
        });
        system.set_run_ahead(false);

        let (event, snapshot) = committed?;
        let Some(snapshot) = snapshot else {
            return Ok(event);
        };

        let speculative = speculate(system);
        system.unserialize(&snapshot)?;
        speculative?;
        self.speculative_frames += 1;
        Ok(event)
    }
}

/// Run until a frame is actually emulated. Events queued by the committed
/// pass come back first without running anything.
fn speculate(system: &mut System) -> CoreResult<()> {
    for _ in 0..=system.scheduler().pending_events() {
        if system.run_frame()? == Event::Power {
            break;
        }
    }
    Ok(())
}
