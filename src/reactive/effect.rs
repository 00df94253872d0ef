//! Effect - Side-effecting subscriber with queued re-runs.
//!
//! Effects are the push edge of the graph. Invalidation never runs an
//! effect inline: it enqueues the effect on a FIFO queue, and a single
//! active drain loop runs queued effects to exhaustion. Writes performed
//! inside an effect therefore schedule follow-up runs instead of nesting,
//! and [`batch`] defers the drain so grouped writes are observed as one
//! update.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use super::graph::{with_observer, Observer, SourceSet};

struct EffectInner {
    run_fn: RefCell<Option<Box<dyn FnMut()>>>,
    queued: Cell<bool>,
    stopped: Cell<bool>,
    sources: Rc<SourceSet>,
    self_weak: Weak<EffectInner>,
}

impl Observer for EffectInner {
    fn invalidate(&self) {
        if self.stopped.get() || self.queued.get() {
            return;
        }
        self.queued.set(true);
        if let Some(this) = self.self_weak.upgrade() {
            schedule(this);
        }
    }
}

impl EffectInner {
    fn run(&self) {
        self.queued.set(false);
        if self.stopped.get() {
            return;
        }
        // Take the closure out so a re-entrant invalidation can never
        // alias the RefCell borrow.
        let taken = self.run_fn.borrow_mut().take();
        let Some(mut f) = taken else { return };
        let observer: Weak<dyn Observer> = self.self_weak.clone();
        with_observer(observer, &self.sources, || f());
        if !self.stopped.get() {
            *self.run_fn.borrow_mut() = Some(f);
        }
    }
}

thread_local! {
    static PENDING_EFFECTS: RefCell<VecDeque<Rc<EffectInner>>> = RefCell::new(VecDeque::new());
    static DRAINING: Cell<bool> = const { Cell::new(false) };
    static BATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
}

fn schedule(effect: Rc<EffectInner>) {
    PENDING_EFFECTS.with(|queue| queue.borrow_mut().push_back(effect));
    maybe_drain();
}

fn maybe_drain() {
    let deferred = DRAINING.with(|d| d.get()) || BATCH_DEPTH.with(|b| b.get()) > 0;
    if deferred {
        return;
    }
    DRAINING.with(|d| d.set(true));
    loop {
        let next = PENDING_EFFECTS.with(|queue| queue.borrow_mut().pop_front());
        match next {
            Some(effect) => effect.run(),
            None => break,
        }
    }
    DRAINING.with(|d| d.set(false));
}

/// Create an effect. Runs once immediately, then re-runs whenever a
/// dependency read during the previous run changes.
///
/// Returns the stop closure. The effect lives exactly as long as its stop
/// handle: call it to stop re-runs, or keep it alive for the effect's
/// lifetime (dropping it unhooks the effect as well).
pub fn effect(f: impl FnMut() + 'static) -> impl FnOnce() {
    let inner = Rc::new_cyclic(|weak| EffectInner {
        run_fn: RefCell::new(Some(Box::new(f))),
        queued: Cell::new(false),
        stopped: Cell::new(false),
        sources: SourceSet::new(),
        self_weak: weak.clone(),
    });

    // The initial run goes through the queue as well, so effects created
    // inside a batch or another effect keep sequential ordering.
    inner.queued.set(true);
    schedule(inner.clone());

    let handle = inner;
    move || {
        handle.stopped.set(true);
        handle.run_fn.borrow_mut().take();
    }
}

/// Run `f` with effect draining deferred until it returns.
///
/// Writes inside the batch invalidate as usual, but every affected effect
/// runs once, after the batch, seeing the complete update.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    BATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let result = f();
    BATCH_DEPTH.with(|depth| depth.set(depth.get() - 1));
    maybe_drain();
    result
}

// =============================================================================
// TESTS
// =============================================================================
