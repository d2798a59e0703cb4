//! Coordinator for clock domains
//!
//! Owns every [`ClockDomain`] of one emulated system, tracks which context
//! holds control and implements the enter/exit protocol the host uses to run
//! one frame and get control back.
//!
//! ## Ordering
//!
//! ```text
//!   A.synchronize(link → B)            B.yield_if_ahead()
//!   ┌──────────────────────────┐       ┌───────────────────────────┐
//!   │ while B.clock < A.clock  │       │ if B.clock > min + slack  │
//!   │     switch_to(B)         │       │     switch_to(min domain) │
//!   └──────────────────────────┘       └───────────────────────────┘
//! ```
//!
//! The domain table, ordered by clock and then by registration, decides who
//! runs next. Switches are flat transfers between contexts, so a chain of
//! dependencies never grows a native stack.
//!
//! ## Synchronization
//!
//! `enter(Mode::Synchronize)` brings every domain to its loop boundary: first
//! the primary domain with everything else running normally, then each
//! auxiliary domain alone. Snapshots taken at that point resume exactly.
//! Events raised on the way there are queued and handed back by the next
//! `enter(Mode::Run)` before any domain runs again.

use crate::fiber::{self, Context, ContextError, Handle};
use crate::serializer::{Serializable, Serializer};
use crate::thread::{ClockDomain, Frequency, Thread};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identifies a clock domain within one scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(u32);

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run until a domain exits
    Run,
    /// Bring every domain to a rendezvous (host request)
    Synchronize,
    /// Rendezvous phase 1: waiting for the primary domain
    SynchronizePrimary,
    /// Rendezvous phase 2: one auxiliary domain runs alone
    SynchronizeAuxiliary,
}

/// Why control returned to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// A debugger step completed
    Step,
    /// A video frame completed
    Frame,
    /// The emulated system requested power off or reset
    Power,
    /// A domain reached its rendezvous point
    Synchronize,
}

impl Event {
    fn code(self) -> u8 {
        match self {
            Event::Step => 1,
            Event::Frame => 2,
            Event::Power => 3,
            Event::Synchronize => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Event::Step),
            2 => Some(Event::Frame),
            3 => Some(Event::Power),
            4 => Some(Event::Synchronize),
            _ => None,
        }
    }
}

/// Events one synchronization may queue. Fixed so the snapshot layout never
/// depends on how many are outstanding.
pub const PENDING_EVENTS: usize = 8;

/// Scheduler tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Stack size for every domain context
    pub stack_size: usize,
    /// Master ticks a domain may run ahead of the slowest peer before yielding
    pub slack_ticks: i64,
    /// Abort when a domain gets this far ahead of its peers without yielding
    pub drift_limit: Option<i64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            stack_size: fiber::DEFAULT_STACK_SIZE,
            slack_ticks: 0,
            drift_limit: None,
        }
    }
}

pub(crate) type Entry = Arc<dyn Fn(&Thread) + Send + Sync>;

struct Slot {
    id: DomainId,
    name: String,
    frequency: Frequency,
    clock: i64,
    remainder: u64,
    upstream: Vec<DomainId>,
    entry: Option<Entry>,
    context: Option<Context>,
    handle: Option<Handle>,
}

struct State {
    slots: Vec<Slot>,
    next_id: u32,
    primary: Option<DomainId>,
    resume: Option<DomainId>,
    active: Option<DomainId>,
    sync_target: Option<DomainId>,
    host: Option<Handle>,
    mode: Mode,
    event: Option<Event>,
    entered: bool,
    /// Every domain sits at its loop boundary
    at_rendezvous: bool,
    /// Raised while synchronizing, not yet reported to the host
    pending: VecDeque<Event>,
    deferred_events: u64,
}

impl State {
    fn index(&self, id: DomainId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    fn slot(&self, id: DomainId) -> &Slot {
        match self.index(id) {
            Some(index) => &self.slots[index],
            None => panic!("clock domain {id} does not exist"),
        }
    }

    fn slot_mut(&mut self, id: DomainId) -> &mut Slot {
        match self.index(id) {
            Some(index) => &mut self.slots[index],
            None => panic!("clock domain {id} does not exist"),
        }
    }

    /// The caller must be the active domain, running on its own context.
    fn assert_active(&self, id: DomainId) {
        let slot = self.slot(id);
        assert_eq!(
            self.active,
            Some(id),
            "domain '{}' used its thread while {} holds the execution context",
            slot.name,
            self.active_name()
        );
        let on_context = slot.handle.as_ref().map(Handle::is_current).unwrap_or(false);
        assert!(
            on_context,
            "domain '{}' claims to be active from outside its own context",
            slot.name
        );
    }

    fn active_name(&self) -> String {
        match self.active {
            Some(id) => match self.index(id) {
                Some(index) => format!("domain '{}'", self.slots[index].name),
                None => format!("domain {id}"),
            },
            None => "the host".to_string(),
        }
    }

    /// Created domain with the lowest clock, excluding `except`
    fn furthest_behind(&self, except: DomainId) -> Option<&Slot> {
        self.slots
            .iter()
            .filter(|slot| slot.id != except && slot.handle.is_some())
            .min_by_key(|slot| slot.clock)
    }

    fn minimum(&self) -> Option<i64> {
        self.slots
            .iter()
            .filter(|slot| slot.handle.is_some())
            .map(|slot| slot.clock)
            .min()
    }

    /// Subtract the minimum clock from every domain to keep clocks small.
    fn rebase(&mut self) {
        if let Some(minimum) = self.minimum() {
            for slot in &mut self.slots {
                slot.clock -= minimum;
            }
        }
    }
}

struct Shared {
    state: Mutex<State>,
    run_ahead: AtomicBool,
    settings: SchedulerSettings,
}

/// Cheaply clonable handle to the coordinator of one emulated system
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    slots: Vec::new(),
                    next_id: 0,
                    primary: None,
                    resume: None,
                    active: None,
                    sync_target: None,
                    host: None,
                    mode: Mode::Run,
                    event: None,
                    entered: false,
                    at_rendezvous: false,
                    pending: VecDeque::with_capacity(PENDING_EVENTS),
                    deferred_events: 0,
                }),
                run_ahead: AtomicBool::new(false),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.shared.settings
    }

    pub(crate) fn same(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock()
    }

    // ------------------------------------------------------------------
    // Domain lifecycle
    // ------------------------------------------------------------------

    /// Register a new clock domain. It has no context until
    /// [`ClockDomain::create`] is called.
    pub fn domain(&self, name: &str, frequency: Frequency) -> ClockDomain {
        let id = {
            let mut state = self.lock();
            let id = DomainId(state.next_id);
            state.next_id += 1;
            state.slots.push(Slot {
                id,
                name: name.to_string(),
                frequency,
                clock: 0,
                remainder: 0,
                upstream: Vec::new(),
                entry: None,
                context: None,
                handle: None,
            });
            id
        };
        tracing::debug!(domain = name, %id, %frequency, "clock domain registered");
        ClockDomain::new(self.clone(), id, name, frequency)
    }

    pub(crate) fn declare(&self, from: DomainId, to: DomainId) {
        let mut state = self.lock();
        state.slot(to);
        let slot = state.slot_mut(from);
        if !slot.upstream.contains(&to) {
            slot.upstream.push(to);
        }
    }

    pub(crate) fn create(&self, id: DomainId, entry: Entry) -> Result<(), ContextError> {
        let name = {
            let mut state = self.lock();
            let slot = state.slot_mut(id);
            slot.entry = Some(Arc::clone(&entry));
            slot.name.clone()
        };
        let context = self.spawn(id, &name, entry)?;
        self.install(id, context);
        Ok(())
    }

    fn spawn(&self, id: DomainId, name: &str, entry: Entry) -> Result<Context, ContextError> {
        let thread = Thread::new(self.clone(), id);
        Context::new(name, self.shared.settings.stack_size, move || loop {
            thread.scheduler().synchronization_point(id);
            entry(&thread);
        })
    }

    fn install(&self, id: DomainId, context: Context) {
        let previous = {
            let mut state = self.lock();
            let slot = state.slot_mut(id);
            slot.handle = Some(context.handle());
            slot.context.replace(context)
        };
        // Tear down outside the lock; the old context unwinds on its own stack
        drop(previous);
    }

    pub(crate) fn is_created(&self, id: DomainId) -> bool {
        let state = self.lock();
        state.index(id).map(|index| state.slots[index].handle.is_some()).unwrap_or(false)
    }

    pub(crate) fn destroy(&self, id: DomainId) {
        let removed = {
            let mut state = self.lock();
            let Some(index) = state.index(id) else {
                return;
            };
            let slot = state.slots.remove(index);
            for other in &mut state.slots {
                other.upstream.retain(|&upstream| upstream != id);
            }
            if state.primary == Some(id) {
                state.primary = None;
            }
            if state.resume == Some(id) {
                state.resume = state.primary;
            }
            slot
        };
        tracing::debug!(domain = %removed.name, %id, "clock domain destroyed");
        drop(removed);
    }

    /// Recreate every context at its entry point.
    ///
    /// Used after loading a snapshot: a synchronized snapshot has every
    /// domain at its loop boundary, which is exactly where a fresh context
    /// starts.
    pub fn restore_contexts(&self) -> Result<(), ContextError> {
        let entries: Vec<(DomainId, String, Entry)> = {
            let state = self.lock();
            assert!(!state.entered, "contexts cannot be restored during a dispatch");
            state
                .slots
                .iter()
                .filter_map(|slot| {
                    slot.entry
                        .as_ref()
                        .map(|entry| (slot.id, slot.name.clone(), Arc::clone(entry)))
                })
                .collect()
        };

        for (id, name, entry) in entries {
            let context = self.spawn(id, &name, entry)?;
            self.install(id, context);
        }
        self.lock().at_rendezvous = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Host surface
    // ------------------------------------------------------------------

    /// Clear bookkeeping without destroying domains.
    pub fn reset(&self) {
        let mut state = self.lock();
        assert!(!state.entered, "Scheduler::reset called during a dispatch");
        for slot in &mut state.slots {
            slot.clock = 0;
            slot.remainder = 0;
        }
        state.resume = state.primary;
        state.active = None;
        state.sync_target = None;
        state.mode = Mode::Run;
        state.event = None;
        state.at_rendezvous = false;
        state.pending.clear();
        state.deferred_events = 0;
    }

    /// Designate the domain that runs first after power-on.
    pub fn power(&self, primary: &ClockDomain) {
        self.power_domain(primary.id());
    }

    pub(crate) fn power_domain(&self, primary: DomainId) {
        let mut state = self.lock();
        let name = state.slot(primary).name.clone();
        state.primary = Some(primary);
        state.resume = Some(primary);
        tracing::debug!(primary = %name, "scheduler powered");
    }

    pub fn primary(&self) -> Option<DomainId> {
        self.lock().primary
    }

    /// Run the emulated system until some domain exits.
    ///
    /// An event queued by an earlier synchronization is returned first,
    /// without running anything.
    ///
    /// # Panics
    ///
    /// When called while a dispatch is already in progress, before
    /// [`Scheduler::power`], or when a domain panics.
    pub fn enter(&self, mode: Mode) -> Event {
        match mode {
            Mode::Run => match self.take_pending() {
                Some(event) => event,
                None => self.dispatch(Mode::Run),
            },
            Mode::Synchronize => self.synchronize_all(),
            other => panic!("Scheduler::enter accepts Run or Synchronize, not {other:?}"),
        }
    }

    fn take_pending(&self) -> Option<Event> {
        let mut state = self.lock();
        assert!(
            !state.entered,
            "Scheduler::enter called while a dispatch is already in progress"
        );
        let event = state.pending.pop_front()?;
        tracing::trace!(?event, "queued event reported");
        Some(event)
    }

    fn dispatch(&self, mode: Mode) -> Event {
        let target = {
            let mut state = self.lock();
            assert!(
                !state.entered,
                "Scheduler::enter called while a dispatch is already in progress"
            );
            let id = state
                .resume
                .or(state.primary)
                .expect("Scheduler::enter called before power");
            let handle = match &state.slot(id).handle {
                Some(handle) => handle.clone(),
                None => panic!("domain '{}' was never created", state.slot(id).name),
            };
            state.entered = true;
            state.mode = mode;
            if mode == Mode::Run {
                state.at_rendezvous = false;
            }
            state.host = Some(fiber::current());
            state.active = Some(id);
            state.event = None;
            handle
        };

        let _dispatch = DispatchGuard(self);
        fiber::switch_to(&target);

        let mut state = self.lock();
        state
            .event
            .take()
            .expect("control returned to the host without an exit event")
    }

    fn synchronize_all(&self) -> Event {
        let auxiliaries: Vec<DomainId> = {
            let state = self.lock();
            assert!(
                !state.entered,
                "Scheduler::enter called while a dispatch is already in progress"
            );
            let primary = state.primary.expect("Scheduler::enter called before power");
            if state.at_rendezvous {
                return Event::Synchronize;
            }
            state
                .slots
                .iter()
                .filter(|slot| slot.id != primary && slot.handle.is_some())
                .map(|slot| slot.id)
                .collect()
        };

        self.rendezvous(Mode::SynchronizePrimary);
        for id in auxiliaries {
            {
                let mut state = self.lock();
                state.sync_target = Some(id);
                state.resume = Some(id);
            }
            self.rendezvous(Mode::SynchronizeAuxiliary);
        }

        let mut state = self.lock();
        state.mode = Mode::Run;
        state.sync_target = None;
        state.resume = state.primary;
        state.at_rendezvous = true;
        tracing::trace!(pending = state.pending.len(), "all domains synchronized");
        Event::Synchronize
    }

    fn rendezvous(&self, mode: Mode) {
        loop {
            let event = self.dispatch(mode);
            if event == Event::Synchronize {
                return;
            }
            tracing::trace!(?event, "event deferred during synchronization");
            let mut state = self.lock();
            assert!(
                state.pending.len() < PENDING_EVENTS,
                "more than {PENDING_EVENTS} events raised during one synchronization"
            );
            state.pending.push_back(event);
            state.deferred_events += 1;
        }
    }

    /// Whether an auxiliary domain is being brought to its rendezvous alone.
    ///
    /// Bus code may use a cheaper catch-up strategy while this is true.
    pub fn synchronizing(&self) -> bool {
        self.lock().mode == Mode::SynchronizeAuxiliary
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    /// Domain currently holding the execution context (`None` = host)
    pub fn active(&self) -> Option<DomainId> {
        self.lock().active
    }

    pub fn clock(&self, id: DomainId) -> i64 {
        self.lock().slot(id).clock
    }

    /// Registered domains in registration order
    pub fn domains(&self) -> Vec<(DomainId, String)> {
        self.lock()
            .slots
            .iter()
            .map(|slot| (slot.id, slot.name.clone()))
            .collect()
    }

    /// Declared upstream dependencies of `id`
    pub fn upstream(&self, id: DomainId) -> Vec<DomainId> {
        self.lock().slot(id).upstream.clone()
    }

    /// Events raised while synchronizing since the last reset
    pub fn deferred_events(&self) -> u64 {
        self.lock().deferred_events
    }

    /// Queued events the host has not been handed yet
    pub fn pending_events(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn run_ahead(&self) -> bool {
        self.shared.run_ahead.load(Ordering::SeqCst)
    }

    pub fn set_run_ahead(&self, enabled: bool) {
        self.shared.run_ahead.store(enabled, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Domain surface (called from inside contexts)
    // ------------------------------------------------------------------

    /// Return control to the host. Must be called by the active domain.
    pub fn exit(&self, event: Event) {
        let host = {
            let mut state = self.lock();
            let id = state
                .active
                .expect("Scheduler::exit called while the host holds the execution context");
            state.assert_active(id);
            state.rebase();
            state.event = Some(event);
            state.resume = Some(id);
            state.active = None;
            state
                .host
                .clone()
                .expect("no host context to return to")
        };
        fiber::switch_to(&host);
    }

    pub(crate) fn advance(&self, id: DomainId, steps: u64) {
        let mut state = self.lock();
        state.assert_active(id);
        let slot = state.slot_mut(id);
        let ticks = slot.frequency.scale(steps, &mut slot.remainder);
        slot.clock += ticks;
        let clock = slot.clock;

        let Some(limit) = self.shared.settings.drift_limit else {
            return;
        };
        if state.mode == Mode::SynchronizeAuxiliary {
            return;
        }
        if let Some(behind) = state.furthest_behind(id) {
            let drift = clock - behind.clock;
            assert!(
                drift <= limit,
                "domain '{}' ran {} ticks ahead of '{}' without yielding (limit {})",
                state.slot(id).name,
                drift,
                behind.name,
                limit
            );
        }
    }

    pub(crate) fn yield_if_ahead(&self, id: DomainId) {
        let target = {
            let mut state = self.lock();
            state.assert_active(id);
            if state.mode == Mode::SynchronizeAuxiliary {
                return;
            }
            let clock = state.slot(id).clock;
            let slack = self.shared.settings.slack_ticks;
            let (target, handle) = match state.furthest_behind(id) {
                Some(behind) if clock > behind.clock + slack => match &behind.handle {
                    Some(handle) => (behind.id, handle.clone()),
                    None => return,
                },
                _ => return,
            };
            state.active = Some(target);
            handle
        };
        fiber::switch_to(&target);
    }

    pub(crate) fn drive(&self, id: DomainId, upstream: DomainId) {
        loop {
            let target = {
                let mut state = self.lock();
                state.assert_active(id);
                if state.mode == Mode::SynchronizeAuxiliary {
                    return;
                }
                let clock = state.slot(id).clock;
                let up = state.slot(upstream);
                // Ties keep the initiator running
                if up.clock >= clock {
                    return;
                }
                let handle = match &up.handle {
                    Some(handle) => handle.clone(),
                    None => return,
                };
                state.active = Some(upstream);
                handle
            };
            fiber::switch_to(&target);
        }
    }

    pub(crate) fn synchronization_point(&self, id: DomainId) {
        let arrived = {
            let state = self.lock();
            match state.mode {
                Mode::SynchronizePrimary => state.primary == Some(id),
                Mode::SynchronizeAuxiliary => state.sync_target == Some(id),
                _ => false,
            }
        };
        if arrived {
            self.exit(Event::Synchronize);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerSettings::default())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Scheduler")
            .field("domains", &state.slots.len())
            .field("mode", &state.mode)
            .field("active", &state.active)
            .finish()
    }
}

/// Clears the dispatch flag on the way out of `enter`, including unwinding.
struct DispatchGuard<'a>(&'a Scheduler);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.entered = false;
        state.active = None;
        state.host = None;
    }
}

impl Serializable for Scheduler {
    /// Clocks in registration order, the resume position, then the queued
    /// events.
    fn serialize(&mut self, s: &mut Serializer) {
        let mut state = self.lock();
        for slot in &mut state.slots {
            s.integer(&mut slot.clock);
            s.integer(&mut slot.remainder);
        }

        let mut resume = state
            .resume
            .and_then(|id| state.index(id))
            .map(|index| index as u32)
            .unwrap_or(u32::MAX);
        s.integer(&mut resume);
        if s.is_loading() {
            state.resume = state.slots.get(resume as usize).map(|slot| slot.id).or(state.primary);
        }

        let mut count = state.pending.len() as u8;
        let mut codes = [0u8; PENDING_EVENTS];
        for (code, event) in codes.iter_mut().zip(&state.pending) {
            *code = event.code();
        }
        s.integer(&mut count);
        s.array(&mut codes);
        if s.is_loading() {
            state.pending = codes
                .iter()
                .take(count as usize)
                .filter_map(|&code| Event::from_code(code))
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn counting_domain(scheduler: &Scheduler, name: &str, ticks: u64, frame_every: u64) -> (ClockDomain, Arc<AtomicU64>) {
        let domain = scheduler.domain(name, Frequency::ticks(ticks));
        let steps = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&steps);
        domain
            .create(move |thread| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                thread.step(1);
                if frame_every > 0 && n % frame_every == 0 {
                    thread.exit(Event::Frame);
                }
            })
            .unwrap();
        (domain, steps)
    }

    #[test]
    fn test_enter_returns_exit_event() {
        let scheduler = Scheduler::default();
        let (cpu, steps) = counting_domain(&scheduler, "cpu", 1, 10);
        scheduler.power(&cpu);

        assert_eq!(scheduler.enter(Mode::Run), Event::Frame);
        assert_eq!(steps.load(Ordering::SeqCst), 10);
        assert_eq!(scheduler.active(), None);

        assert_eq!(scheduler.enter(Mode::Run), Event::Frame);
        assert_eq!(steps.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_domains_advance_proportionally() {
        let scheduler = Scheduler::default();
        let (fast, fast_steps) = counting_domain(&scheduler, "fast", 2, 300);
        let (_slow, slow_steps) = counting_domain(&scheduler, "slow", 3, 0);
        scheduler.power(&fast);

        scheduler.enter(Mode::Run);
        // 300 steps at 2 ticks = 600 ticks; the slow domain kept pace at 3 ticks
        let slow = slow_steps.load(Ordering::SeqCst);
        assert_eq!(fast_steps.load(Ordering::SeqCst), 300);
        assert!((199..=201).contains(&slow), "slow domain ran {slow} steps");
    }

    #[test]
    fn test_exit_rebases_clocks() {
        let scheduler = Scheduler::default();
        let (a, _) = counting_domain(&scheduler, "a", 5, 7);
        let (b, _) = counting_domain(&scheduler, "b", 7, 0);
        scheduler.power(&a);
        scheduler.enter(Mode::Run);
        assert_eq!(a.clock().min(b.clock()), 0);
    }

    #[test]
    #[should_panic(expected = "already in progress")]
    fn test_reentrant_enter_fails_fast() {
        let scheduler = Scheduler::default();
        let domain = scheduler.domain("rogue", Frequency::ticks(1));
        domain
            .create(|thread| {
                thread.scheduler().enter(Mode::Run);
            })
            .unwrap();
        scheduler.power(&domain);
        scheduler.enter(Mode::Run);
    }

    #[test]
    #[should_panic(expected = "before power")]
    fn test_enter_requires_power() {
        let scheduler = Scheduler::default();
        scheduler.enter(Mode::Run);
    }

    #[test]
    #[should_panic(expected = "without yielding")]
    fn test_drift_limit_catches_runaway_domain() {
        let scheduler = Scheduler::new(SchedulerSettings {
            drift_limit: Some(1_000),
            ..Default::default()
        });
        let runaway = scheduler.domain("runaway", Frequency::ticks(10));
        runaway.create(|thread| thread.advance_by(1)).unwrap();
        let (_peer, _) = counting_domain(&scheduler, "peer", 10, 0);
        scheduler.power(&runaway);
        scheduler.enter(Mode::Run);
    }

    #[test]
    fn test_synchronize_returns_primary_to_front() {
        let scheduler = Scheduler::default();
        let (a, _) = counting_domain(&scheduler, "a", 2, 50);
        let (_b, _) = counting_domain(&scheduler, "b", 3, 0);
        scheduler.power(&a);

        scheduler.enter(Mode::Run);
        assert_eq!(scheduler.enter(Mode::Synchronize), Event::Synchronize);
        assert_eq!(scheduler.mode(), Mode::Run);
        assert!(!scheduler.synchronizing());
        assert_eq!(scheduler.primary(), Some(a.id()));
    }

    #[test]
    fn test_repeated_synchronize_is_idempotent() {
        let scheduler = Scheduler::default();
        let (a, steps) = counting_domain(&scheduler, "a", 2, 50);
        let (_b, _) = counting_domain(&scheduler, "b", 3, 0);
        scheduler.power(&a);

        scheduler.enter(Mode::Run);
        scheduler.enter(Mode::Synchronize);
        let after_first = steps.load(Ordering::SeqCst);
        scheduler.enter(Mode::Synchronize);
        assert_eq!(steps.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_events_raised_while_synchronizing_are_queued() {
        let scheduler = Scheduler::default();
        let (cpu, _) = counting_domain(&scheduler, "cpu", 2, 0);
        let (_video, video_steps) = counting_domain(&scheduler, "video", 3, 1);
        scheduler.power(&cpu);

        assert_eq!(scheduler.enter(Mode::Run), Event::Frame);
        assert_eq!(scheduler.pending_events(), 0);

        // video is parked mid-step and frames as soon as it finishes it
        scheduler.enter(Mode::Synchronize);
        let queued = scheduler.pending_events();
        assert!(queued >= 1);
        assert_eq!(scheduler.deferred_events(), queued as u64);

        let mut saved = Serializer::saving();
        saved.object(&mut scheduler.clone());

        let steps = video_steps.load(Ordering::SeqCst);
        for _ in 0..queued {
            assert_eq!(scheduler.enter(Mode::Run), Event::Frame);
        }
        assert_eq!(video_steps.load(Ordering::SeqCst), steps);
        assert_eq!(scheduler.pending_events(), 0);
        assert_eq!(scheduler.deferred_events(), queued as u64);

        let mut loaded = Serializer::loading(saved.into_bytes());
        loaded.object(&mut scheduler.clone());
        assert_eq!(scheduler.pending_events(), queued);

        scheduler.reset();
        assert_eq!(scheduler.pending_events(), 0);
        assert_eq!(scheduler.deferred_events(), 0);
    }

    #[test]
    fn test_catch_up_is_suspended_for_a_lone_auxiliary() {
        let scheduler = Scheduler::default();
        let (cpu, _) = counting_domain(&scheduler, "cpu", 1, 40);
        let peer = scheduler.domain("peer", Frequency::ticks(10));
        let to_cpu = peer.depends_on(&cpu);
        let cpu_id = cpu.id();

        let checks: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&checks);
        peer.create(move |thread| {
            let check = || {
                if !thread.synchronizing() {
                    return;
                }
                let before = thread.scheduler().clock(cpu_id);
                thread.synchronize(&to_cpu);
                thread.yield_if_ahead();
                let still_alone = thread.scheduler().clock(cpu_id) == before
                    && thread.scheduler().active() == Some(thread.id())
                    && thread.scheduler().mode() == Mode::SynchronizeAuxiliary;
                log.lock().push(still_alone);
            };
            thread.synchronize(&to_cpu);
            check();
            thread.step(1);
            check();
        })
        .unwrap();
        scheduler.power(&cpu);

        scheduler.enter(Mode::Run);
        assert!(checks.lock().is_empty());
        scheduler.enter(Mode::Synchronize);

        let checks = checks.lock();
        assert!(!checks.is_empty());
        assert!(checks.iter().all(|&alone| alone));
        assert!(!scheduler.synchronizing());
    }

    #[test]
    #[should_panic(expected = "while the host holds the execution context")]
    fn test_thread_used_from_the_host_is_fatal() {
        let scheduler = Scheduler::default();
        let kept: Arc<Mutex<Option<Thread>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&kept);
        let domain = scheduler.domain("cpu", Frequency::ticks(1));
        domain
            .create(move |thread| {
                slot.lock().get_or_insert_with(|| thread.clone());
                thread.exit(Event::Frame);
            })
            .unwrap();
        scheduler.power(&domain);
        scheduler.enter(Mode::Run);

        let thread = kept.lock().clone().unwrap();
        thread.step(1);
    }

    #[test]
    #[should_panic(expected = "used its thread while domain 'b' holds the execution context")]
    fn test_thread_used_from_another_domain_is_fatal() {
        let scheduler = Scheduler::default();
        let kept: Arc<Mutex<Option<Thread>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&kept);
        let a = scheduler.domain("a", Frequency::ticks(1));
        let b = scheduler.domain("b", Frequency::ticks(1));
        a.create(move |thread| {
            slot.lock().get_or_insert_with(|| thread.clone());
            thread.step(1);
        })
        .unwrap();
        b.create(move |thread| {
            thread.step(1);
            let other = kept.lock().clone();
            if let Some(other) = other {
                other.advance_by(1);
            }
        })
        .unwrap();
        scheduler.power(&a);
        scheduler.enter(Mode::Run);
    }

    #[test]
    fn test_destroy_clears_primary() {
        let scheduler = Scheduler::default();
        let (a, _) = counting_domain(&scheduler, "a", 1, 1);
        scheduler.power(&a);
        drop(a);
        assert_eq!(scheduler.primary(), None);
        assert!(scheduler.domains().is_empty());
    }

    #[test]
    fn test_reset_keeps_domains() {
        let scheduler = Scheduler::default();
        let (a, _) = counting_domain(&scheduler, "a", 1, 3);
        let (b, _) = counting_domain(&scheduler, "b", 4, 0);
        scheduler.power(&a);
        scheduler.enter(Mode::Run);
        scheduler.reset();
        assert_eq!(a.clock(), 0);
        assert_eq!(b.clock(), 0);
        assert_eq!(scheduler.domains().len(), 2);
    }
}
