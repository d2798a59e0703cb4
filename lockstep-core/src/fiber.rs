//! Cooperative execution contexts
//!
//! A context is a call stack that only runs when another context explicitly
//! switches to it. The primitive exposes exactly two operations:
//!
//! - [`Context::new`]: allocate a stack and install an entry point
//! - [`switch_to`]: suspend the caller and resume the target
//!
//! ## Mechanism
//!
//! ```text
//!  host ──switch_to(A)──►  A  ──switch_to(B)──►  B  ──switch_to(host)──► host
//!   │ parks                │ parks               │ parks
//!   ▼                      ▼                     ▼
//!  baton                 baton                 baton
//! ```
//!
//! Every context is backed by a native thread whose stack is allocated with
//! [`std::thread::Builder::stack_size`]. Ownership of the CPU is handed over
//! with a per-context baton; a context passes the baton and parks in the same
//! call, so only one context ever executes client code.
//!
//! Nothing in here knows about clocks, the scheduler or components.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Smallest stack accepted for a context
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// Stack size used when the configuration does not override it
pub const DEFAULT_STACK_SIZE: usize = 512 * 1024;

type Payload = Box<dyn Any + Send + 'static>;

/// Context creation errors
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("stack of {requested} bytes is below the {minimum} byte minimum")]
    StackTooSmall { requested: usize, minimum: usize },

    #[error("failed to allocate a {size} byte stack for context '{name}': {source}")]
    StackAllocation {
        name: String,
        size: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Unwind payload used to tear down a cancelled context.
struct Cancelled;

#[derive(Default)]
struct Signal {
    /// A resume is pending
    runnable: bool,
    /// Owner dropped the context
    cancelled: bool,
    /// The backing thread has left its entry point
    finished: bool,
    /// Panic forwarded from a context we switched into
    panic: Option<Payload>,
    /// Last context that switched into this one
    resumer: Option<Weak<Baton>>,
    /// Host thread at the root of the current chain of switches
    origin: Option<Weak<Baton>>,
}

struct Baton {
    name: String,
    /// Implicit context of a thread not created by [`Context::new`]
    hosted: bool,
    signal: Mutex<Signal>,
    wake: Condvar,
}

impl Baton {
    fn new(name: &str, hosted: bool) -> Self {
        Self {
            name: name.to_string(),
            hosted,
            signal: Mutex::new(Signal::default()),
            wake: Condvar::new(),
        }
    }

    fn is_finished(&self) -> bool {
        self.signal.lock().finished
    }

    /// Host to report to if the chain of resumers is broken
    fn origin(self: &Arc<Self>) -> Option<Weak<Baton>> {
        if self.hosted {
            Some(Arc::downgrade(self))
        } else {
            self.signal.lock().origin.clone()
        }
    }

    /// Block until another context switches to us.
    fn park(&self) {
        let mut signal = self.signal.lock();
        while !signal.runnable && !signal.cancelled {
            self.wake.wait(&mut signal);
        }

        if signal.cancelled {
            drop(signal);
            panic::resume_unwind(Box::new(Cancelled));
        }

        signal.runnable = false;
        if let Some(payload) = signal.panic.take() {
            drop(signal);
            panic::resume_unwind(payload);
        }
    }

    fn resume(&self, from: Option<&Arc<Baton>>, panic: Option<Payload>) {
        let origin = from.and_then(Baton::origin);
        let mut signal = self.signal.lock();
        assert!(
            !signal.finished,
            "switch to context '{}' which is no longer running",
            self.name
        );
        if let Some(from) = from {
            signal.resumer = Some(Arc::downgrade(from));
            signal.origin = origin;
        }
        if panic.is_some() {
            signal.panic = panic;
        }
        signal.runnable = true;
        self.wake.notify_one();
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<Baton>>> = const { RefCell::new(None) };
}

fn current_baton() -> Arc<Baton> {
    CURRENT.with(|current| {
        current
            .borrow_mut()
            .get_or_insert_with(|| {
                let name = thread::current().name().unwrap_or("host").to_string();
                Arc::new(Baton::new(&name, true))
            })
            .clone()
    })
}

/// Non-owning reference to a context, used as a switch target
#[derive(Clone)]
pub struct Handle(Arc<Baton>);

impl Handle {
    /// Context name (for diagnostics)
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether this handle refers to the calling context
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .map(|baton| Arc::ptr_eq(baton, &self.0))
                .unwrap_or(false)
        })
    }

    pub fn same(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.0.name).finish()
    }
}

/// Handle to the calling context.
///
/// Threads that were not created by [`Context::new`] (the host) get an
/// implicit context on first use.
pub fn current() -> Handle {
    Handle(current_baton())
}

/// Suspend the calling context and resume `target`.
///
/// Returns only when some other context switches back to the caller.
/// Switching to yourself is a no-op.
pub fn switch_to(target: &Handle) {
    let current = current_baton();
    if Arc::ptr_eq(&current, &target.0) {
        return;
    }

    tracing::trace!(from = %current.name, to = %target.0.name, "context switch");
    target.0.resume(Some(&current), None);
    current.park();
}

/// An owned execution context with its own stack
pub struct Context {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
    stack_size: usize,
}

impl Context {
    /// Allocate a stack of `stack_size` bytes and install `entry`.
    ///
    /// The entry point does not run until the first [`switch_to`]. It must
    /// never return; returning is reported as a panic to whoever resumed the
    /// context last.
    pub fn new<F>(name: &str, stack_size: usize, entry: F) -> Result<Self, ContextError>
    where
        F: FnOnce() + Send + 'static,
    {
        if stack_size < MIN_STACK_SIZE {
            return Err(ContextError::StackTooSmall {
                requested: stack_size,
                minimum: MIN_STACK_SIZE,
            });
        }

        let baton = Arc::new(Baton::new(name, false));
        let inner = Arc::clone(&baton);

        let thread = thread::Builder::new()
            .name(format!("ctx:{name}"))
            .stack_size(stack_size)
            .spawn(move || run(inner, entry))
            .map_err(|source| ContextError::StackAllocation {
                name: name.to_string(),
                size: stack_size,
                source,
            })?;

        tracing::debug!(context = name, stack_size, "context created");

        Ok(Self {
            handle: Handle(baton),
            thread: Some(thread),
            stack_size,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        assert!(
            !self.handle.is_current(),
            "context '{}' destroyed while it is running",
            self.handle.name()
        );

        {
            let mut signal = self.handle.0.signal.lock();
            signal.cancelled = true;
            self.handle.0.wake.notify_one();
        }

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.handle.name())
            .field("stack_size", &self.stack_size)
            .finish()
    }
}

fn run<F: FnOnce()>(baton: Arc<Baton>, entry: F) {
    CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(&baton)));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        baton.park();
        entry();
    }));

    let payload: Payload = match outcome {
        Ok(()) => Box::new(format!(
            "context '{}' returned from its entry point",
            baton.name
        )),
        Err(payload) if payload.is::<Cancelled>() => {
            baton.signal.lock().finished = true;
            return;
        }
        Err(payload) => payload,
    };

    let (resumer, origin) = {
        let mut signal = baton.signal.lock();
        signal.finished = true;
        (
            signal.resumer.take().and_then(|weak| weak.upgrade()),
            signal.origin.take().and_then(|weak| weak.upgrade()),
        )
    };

    // A resumer that already failed cannot take the panic; fall back to the host
    let target = resumer
        .filter(|resumer| !resumer.is_finished())
        .or(origin)
        .filter(|target| !target.is_finished());
    match target {
        Some(target) => target.resume(None, Some(payload)),
        None => tracing::error!(context = %baton.name, "context failed with nobody to report to"),
    }
}
