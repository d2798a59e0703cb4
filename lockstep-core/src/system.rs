//! Host-facing emulated system
//!
//! Owns the scheduler, the shared random source, the node tree and every
//! attached component. Snapshots walk the scheduler, the random source, the
//! frame counter and then each component in attach order.

use crate::component::{Component, PowerContext, SharedRandom};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::node::Node;
use crate::random::Random;
use crate::scheduler::{Event, Mode, Scheduler};
use crate::serializer::{Header, Serializer, SnapshotError, HEADER_LEN};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct System {
    config: CoreConfig,
    seed: u64,
    scheduler: Scheduler,
    random: SharedRandom,
    root: Node,
    components: Vec<Box<dyn Component>>,
    powered: bool,
    frame: u64,
}

impl System {
    pub fn new(config: CoreConfig) -> Self {
        let seed = config.resolve_seed();
        let scheduler = Scheduler::new(config.scheduler_settings());
        let random = Arc::new(Mutex::new(Random::new(seed, config.entropy)));

        Self {
            config,
            seed,
            scheduler,
            random,
            root: Node::object("system"),
            components: Vec::new(),
            powered: false,
            frame: 0,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn random(&self) -> &SharedRandom {
        &self.random
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Frames completed since the last hard power-on
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Attach a component and let it hang its nodes off the root.
    pub fn attach<C: Component + 'static>(&mut self, mut component: C) {
        component.load(&mut self.root);
        tracing::debug!(component = component.name(), "component attached");
        self.components.push(Box::new(component));
    }

    /// Detach every component, destroying their clock domains.
    pub fn unload(&mut self) {
        for mut component in self.components.drain(..) {
            component.unload(&mut self.root);
        }
        self.powered = false;
        tracing::info!("system unloaded");
    }

    /// Power on (`reset == false`) or soft reset (`reset == true`).
    pub fn power(&mut self, reset: bool) -> CoreResult<()> {
        self.scheduler.reset();
        if !reset {
            self.random.lock().seed(self.seed);
            self.frame = 0;
        }

        let mut context = PowerContext::new(&self.scheduler, &self.random);
        for component in &mut self.components {
            component.power(&mut context, reset)?;
        }
        let primary = context.primary().ok_or(CoreError::NoPrimary)?;
        self.scheduler.power_domain(primary);
        self.powered = true;

        tracing::info!(
            reset,
            seed = self.seed,
            components = self.components.len(),
            "system powered"
        );
        Ok(())
    }

    pub fn reset(&mut self) -> CoreResult<()> {
        self.power(true)
    }

    /// Run until some domain exits.
    ///
    /// Every completed frame ends at a rendezvous, so a synchronized
    /// snapshot taken between frames never moves the timeline. Events raised
    /// while getting there are reported by later calls.
    pub fn run(&mut self) -> CoreResult<Event> {
        if !self.powered {
            return Err(CoreError::NotPowered);
        }
        let event = self.scheduler.enter(Mode::Run);
        if event == Event::Frame {
            self.frame += 1;
            self.scheduler.enter(Mode::Synchronize);
        }
        Ok(event)
    }

    /// Run until a frame completes or the machine asks for a reset
    pub fn run_frame(&mut self) -> CoreResult<Event> {
        loop {
            match self.run()? {
                Event::Frame => return Ok(Event::Frame),
                Event::Power => {
                    tracing::info!(frame = self.frame, "emulated system requested a reset");
                    self.power(true)?;
                    return Ok(Event::Power);
                }
                Event::Step | Event::Synchronize => continue,
            }
        }
    }

    pub fn synchronizing(&self) -> bool {
        self.scheduler.synchronizing()
    }

    pub fn run_ahead(&self) -> bool {
        self.scheduler.run_ahead()
    }

    pub fn set_run_ahead(&self, enabled: bool) {
        self.scheduler.set_run_ahead(enabled);
    }

    fn walk(&mut self, s: &mut Serializer) {
        s.object(&mut self.scheduler);
        s.object(&mut *self.random.lock());
        s.integer(&mut self.frame);
        for component in &mut self.components {
            component.serialize(s);
        }
    }

    fn measure(&mut self) -> usize {
        let mut s = Serializer::saving();
        self.walk(&mut s);
        s.size()
    }

    /// Capture the whole system.
    ///
    /// With `synchronize` every domain is first brought to its loop boundary
    /// so the snapshot resumes exactly.
    pub fn serialize(&mut self, synchronize: bool) -> CoreResult<Vec<u8>> {
        if !self.powered {
            return Err(CoreError::NotPowered);
        }
        if synchronize {
            self.scheduler.enter(Mode::Synchronize);
        }

        let mut s = Serializer::saving();
        self.walk(&mut s);
        let body = s.into_bytes();

        let mut blob = BytesMut::with_capacity(HEADER_LEN + body.len());
        Header::new(body.len(), synchronize, &self.config.description).write(&mut blob);
        blob.extend_from_slice(&body);

        tracing::debug!(bytes = blob.len(), synchronize, frame = self.frame, "snapshot taken");
        Ok(blob.to_vec())
    }

    /// Restore a snapshot taken by [`System::serialize`].
    ///
    /// Nothing is modified unless the header and the state layout match this
    /// system.
    pub fn unserialize(&mut self, blob: &[u8]) -> CoreResult<()> {
        if !self.powered {
            return Err(CoreError::NotPowered);
        }

        let header = Header::read(blob).map_err(|error| {
            tracing::warn!(%error, "snapshot rejected");
            error
        })?;

        let expected = self.measure();
        let found = blob.len() - HEADER_LEN;
        if found != expected {
            tracing::warn!(found, expected, "snapshot layout does not match this system");
            return Err(SnapshotError::Layout { found, expected }.into());
        }

        let mut s = Serializer::loading(Bytes::copy_from_slice(&blob[HEADER_LEN..]));
        self.walk(&mut s);
        if s.overrun() {
            return Err(SnapshotError::Truncated.into());
        }

        self.scheduler.restore_contexts()?;
        if !header.synchronized {
            tracing::info!("unsynchronized snapshot loaded, execution resumes approximately");
        }
        tracing::info!(frame = self.frame, description = %header.description, "snapshot loaded");
        Ok(())
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("components", &self.components.len())
            .field("powered", &self.powered)
            .field("frame", &self.frame)
            .finish()
    }
}
