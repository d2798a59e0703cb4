//! Clock domains
//!
//! A clock domain is one emulated hardware unit running at its own rate: an
//! execution context plus a signed clock counted in master ticks.
//!
//! - [`ClockDomain`] is the owning handle kept by the component. Dropping it
//!   destroys the domain and its context.
//! - [`Thread`] is the handle a domain's entry point receives; it is how the
//!   running domain accounts cycles, yields and drives its upstreams.
//! - [`Link`] is a declared timing dependency. Driving another domain forward
//!   requires one, so every cross-domain dependency is visible at power-on.

use crate::fiber::ContextError;
use crate::scheduler::{DomainId, Event, Scheduler};
use std::fmt;

/// Master ticks per local step, as a reduced fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frequency {
    numerator: u64,
    denominator: u64,
}

impl Frequency {
    /// Whole number of master ticks per step
    pub const fn ticks(per_step: u64) -> Self {
        assert!(per_step > 0, "a clock domain must advance");
        Self {
            numerator: per_step,
            denominator: 1,
        }
    }

    /// `numerator / denominator` master ticks per step
    pub fn ratio(numerator: u64, denominator: u64) -> Self {
        assert!(numerator > 0 && denominator > 0, "frequency ratio must be positive");
        let divisor = gcd(numerator, denominator);
        Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        }
    }

    /// Domain clocked at `domain_hz` against a master clock of `master_hz`
    pub fn from_hz(domain_hz: u64, master_hz: u64) -> Self {
        Self::ratio(master_hz, domain_hz)
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// Duration of one of `parts` equal slices of a step
    pub fn subdivide(&self, parts: u64) -> Self {
        Self::ratio(self.numerator, self.denominator * parts)
    }

    /// Local steps per second given the master clock rate
    pub fn rate_hz(&self, master_hz: u64) -> f64 {
        master_hz as f64 * self.denominator as f64 / self.numerator as f64
    }

    /// Convert `steps` into master ticks, carrying the fractional part in
    /// `remainder` so repeated conversions never drift.
    pub fn scale(&self, steps: u64, remainder: &mut u64) -> i64 {
        let total = steps as u128 * self.numerator as u128 + *remainder as u128;
        *remainder = (total % self.denominator as u128) as u64;
        (total / self.denominator as u128) as i64
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{} ticks/step", self.numerator)
        } else {
            write!(f, "{}/{} ticks/step", self.numerator, self.denominator)
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Declared dependency of one domain on another's state.
///
/// Only [`ClockDomain::depends_on`] creates links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    from: DomainId,
    to: DomainId,
}

impl Link {
    /// Domain that performs the access
    pub fn from(&self) -> DomainId {
        self.from
    }

    /// Domain whose state is accessed
    pub fn to(&self) -> DomainId {
        self.to
    }
}

/// Owning handle to a clock domain
pub struct ClockDomain {
    scheduler: Scheduler,
    id: DomainId,
    name: String,
    frequency: Frequency,
}

impl ClockDomain {
    pub(crate) fn new(scheduler: Scheduler, id: DomainId, name: &str, frequency: Frequency) -> Self {
        Self {
            scheduler,
            id,
            name: name.to_string(),
            frequency,
        }
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Current clock in master ticks
    pub fn clock(&self) -> i64 {
        self.scheduler.clock(self.id)
    }

    /// Declare that this domain reads or writes state owned by `upstream`.
    pub fn depends_on(&self, upstream: &ClockDomain) -> Link {
        assert!(
            self.scheduler.same(&upstream.scheduler),
            "domains '{}' and '{}' belong to different schedulers",
            self.name,
            upstream.name
        );
        self.scheduler.declare(self.id, upstream.id);
        Link {
            from: self.id,
            to: upstream.id,
        }
    }

    /// Install the simulation loop and create the execution context.
    ///
    /// `entry` performs one unit of work per call; the domain calls it
    /// forever. Creating an already created domain replaces its context and
    /// restarts it at the entry point.
    pub fn create<F>(&self, entry: F) -> Result<(), ContextError>
    where
        F: Fn(&Thread) + Send + Sync + 'static,
    {
        self.scheduler.create(self.id, std::sync::Arc::new(entry))
    }

    pub fn is_created(&self) -> bool {
        self.scheduler.is_created(self.id)
    }
}

impl Drop for ClockDomain {
    fn drop(&mut self) {
        self.scheduler.destroy(self.id);
    }
}

impl fmt::Debug for ClockDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockDomain")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("frequency", &self.frequency)
            .finish()
    }
}

/// Handle passed to a running domain's entry point
#[derive(Clone)]
pub struct Thread {
    scheduler: Scheduler,
    id: DomainId,
}

impl Thread {
    pub(crate) fn new(scheduler: Scheduler, id: DomainId) -> Self {
        Self { scheduler, id }
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn clock(&self) -> i64 {
        self.scheduler.clock(self.id)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Account `steps` local cycles. Never suspends.
    pub fn advance_by(&self, steps: u64) {
        self.scheduler.advance(self.id, steps);
    }

    /// Hand control to the domain furthest behind if this one is ahead of it.
    pub fn yield_if_ahead(&self) {
        self.scheduler.yield_if_ahead(self.id);
    }

    /// `advance_by` followed by `yield_if_ahead`
    pub fn step(&self, steps: u64) {
        self.advance_by(steps);
        self.yield_if_ahead();
    }

    /// Drive the upstream of `link` until it is no longer behind this domain.
    pub fn synchronize(&self, link: &Link) {
        assert_eq!(
            link.from, self.id,
            "link {link:?} was declared by another domain"
        );
        self.scheduler.drive(self.id, link.to);
    }

    /// Return control to the host
    pub fn exit(&self, event: Event) {
        self.scheduler.exit(event);
    }

    pub fn synchronizing(&self) -> bool {
        self.scheduler.synchronizing()
    }

    pub fn run_ahead(&self) -> bool {
        self.scheduler.run_ahead()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread").field("id", &self.id).finish()
    }
}
