//! Ctrl-C delivery to the innermost interruptible operation.
//!
//! The shell owns one [`InterruptRegistry`]. Long-running operations push an
//! [`Interruptible`] while they run and pop it afterwards; a signal reaches
//! only the top of that stack. With nothing pushed, the process terminates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Something that can be asked to stop from the signal handler thread.
///
/// Implementations must only flip flags or similar: the call happens on the
/// signal thread while the main thread is busy.
pub trait Interruptible: Send + Sync {
    fn interrupt(&self);
}

/// Shared "stop requested" flag, checked by commands between units of work.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns whether the flag was raised and lowers it.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Interruptible for InterruptFlag {
    fn interrupt(&self) {
        self.raise();
    }
}

/// What a delivered signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// The innermost operation was told to stop.
    Delivered,
    /// A signal was already delivered to the current operation, or the
    /// registry was shut down.
    Ignored,
    /// Nothing to interrupt; the caller should exit the process.
    Terminate,
}

#[derive(Default)]
struct Shared {
    stack: Mutex<Vec<Arc<dyn Interruptible>>>,
    once: AtomicBool,
}

/// Push/pop stack of interruptible operations.
#[derive(Clone, Default)]
pub struct InterruptRegistry {
    shared: Arc<Shared>,
}

impl InterruptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, target: Arc<dyn Interruptible>) {
        if let Ok(mut stack) = self.shared.stack.lock() {
            stack.push(target);
        }
    }

    /// Removes the innermost operation and re-arms signal delivery.
    pub fn pop(&self) {
        self.shared.once.store(false, Ordering::SeqCst);
        if let Ok(mut stack) = self.shared.stack.lock() {
            stack.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.shared.stack.lock().map(|stack| stack.len()).unwrap_or(0)
    }

    /// Clears the stack and ignores every further signal.
    pub fn shutdown(&self) {
        self.shared.once.store(true, Ordering::SeqCst);
        if let Ok(mut stack) = self.shared.stack.lock() {
            stack.clear();
        }
    }

    /// Delivers one signal.
    ///
    /// Repeated signals before the next [`pop`](Self::pop) are ignored. The
    /// stack is only ever `try_lock`ed here: the main thread may be holding
    /// it while the signal arrives.
    pub fn interrupt(&self) -> Interruption {
        if self.shared.once.swap(true, Ordering::SeqCst) {
            return Interruption::Ignored;
        }
        let Ok(stack) = self.shared.stack.try_lock() else {
            self.shared.once.store(false, Ordering::SeqCst);
            return Interruption::Ignored;
        };
        match stack.last() {
            Some(top) => {
                top.interrupt();
                Interruption::Delivered
            }
            None => Interruption::Terminate,
        }
    }

    /// Routes Ctrl-C to this registry for the rest of the process lifetime.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let registry = self.clone();
        ctrlc::set_handler(move || {
            if registry.interrupt() == Interruption::Terminate {
                std::process::exit(1);
            }
        })?;
        debug!("interrupt handler installed");
        Ok(())
    }
}
