//! Contract between the core and emulated hardware components

use crate::error::CoreResult;
use crate::node::Node;
use crate::random::Random;
use crate::scheduler::{DomainId, Scheduler};
use crate::serializer::Serializer;
use crate::thread::ClockDomain;
use parking_lot::Mutex;
use std::sync::Arc;

/// Random source shared by every component of one system
pub type SharedRandom = Arc<Mutex<Random>>;

/// What a component receives while powering on
pub struct PowerContext<'a> {
    scheduler: &'a Scheduler,
    random: &'a SharedRandom,
    primary: Option<DomainId>,
}

impl<'a> PowerContext<'a> {
    pub(crate) fn new(scheduler: &'a Scheduler, random: &'a SharedRandom) -> Self {
        Self {
            scheduler,
            random,
            primary: None,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.scheduler
    }

    pub fn random(&self) -> &SharedRandom {
        self.random
    }

    /// Nominate the domain that runs first. The last nomination wins.
    pub fn set_primary(&mut self, domain: &ClockDomain) {
        self.primary = Some(domain.id());
    }

    pub(crate) fn primary(&self) -> Option<DomainId> {
        self.primary
    }
}

/// Emulated hardware unit attached to a system
pub trait Component: Send {
    fn name(&self) -> &str;

    /// Attach settings and debug objects
    fn load(&mut self, _root: &mut Node) {}

    /// Detach whatever `load` attached
    fn unload(&mut self, _root: &mut Node) {}

    /// (Re)create clock domains and reset registers.
    ///
    /// A hard power-on (`reset == false`) also reinitializes memory from the
    /// shared random source.
    fn power(&mut self, context: &mut PowerContext<'_>, reset: bool) -> CoreResult<()>;

    /// Walk persistent fields in a fixed order
    fn serialize(&mut self, s: &mut Serializer);
}
