//! Dependency graph bookkeeping shared by signals, deriveds and effects.
//!
//! The graph is strictly thread-local: a stack of currently-computing
//! observers plus, per readable node, the set of observers that read it.
//! Reading registers an edge; writing walks the edges. Edges are
//! re-recorded on every tracked run: an observer drops all of its previous
//! edges before recomputing, so a dependency read only on a branch that is
//! no longer taken stops triggering it.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A node that reads reactive values and must learn when one changes.
///
/// Deriveds mark themselves dirty and forward the invalidation; effects
/// schedule a re-run on the effect queue.
pub(crate) trait Observer {
    fn invalidate(&self);
}

/// The subscriber sets an observer joined during its most recent tracked
/// run. Every tracked run starts by leaving all of them, then records a
/// fresh set as the computation reads its dependencies.
pub(crate) struct SourceSet {
    joined: RefCell<Vec<Weak<SubscriberInner>>>,
}

impl SourceSet {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            joined: RefCell::new(Vec::new()),
        })
    }

    fn leave_all(&self, observer: &Weak<dyn Observer>) {
        let joined = std::mem::take(&mut *self.joined.borrow_mut());
        for source in joined {
            if let Some(source) = source.upgrade() {
                source
                    .subscribers
                    .borrow_mut()
                    .retain(|existing| !existing.ptr_eq(observer));
            }
        }
    }
}

#[derive(Clone)]
struct ActiveObserver {
    observer: Weak<dyn Observer>,
    sources: Rc<SourceSet>,
}

thread_local! {
    /// Stack of observers currently executing a tracked computation.
    /// `None` frames mark untracked regions.
    static ACTIVE_OBSERVERS: RefCell<Vec<Option<ActiveObserver>>> =
        RefCell::new(Vec::new());
}

/// Run `f` with `observer` as the current dependency-collection target.
/// The observer's edges from its previous run are dropped first; the run
/// records a fresh set through `sources`.
pub(crate) fn with_observer<R>(
    observer: Weak<dyn Observer>,
    sources: &Rc<SourceSet>,
    f: impl FnOnce() -> R,
) -> R {
    sources.leave_all(&observer);
    ACTIVE_OBSERVERS.with(|stack| {
        stack.borrow_mut().push(Some(ActiveObserver {
            observer,
            sources: sources.clone(),
        }));
    });
    let result = f();
    ACTIVE_OBSERVERS.with(|stack| {
        stack.borrow_mut().pop();
    });
    result
}

/// Run `f` without recording any dependencies, even inside a tracked
/// computation.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    ACTIVE_OBSERVERS.with(|stack| stack.borrow_mut().push(None));
    let result = f();
    ACTIVE_OBSERVERS.with(|stack| {
        stack.borrow_mut().pop();
    });
    result
}

fn current_observer() -> Option<ActiveObserver> {
    ACTIVE_OBSERVERS.with(|stack| stack.borrow().last().cloned().flatten())
}

struct SubscriberInner {
    subscribers: RefCell<Vec<Weak<dyn Observer>>>,
}

/// The observers subscribed to one readable node.
pub(crate) struct SubscriberSet {
    inner: Rc<SubscriberInner>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SubscriberInner {
                subscribers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Record an edge from the currently-computing observer (if any) to
    /// this node, plus the reverse edge used to drop it on the observer's
    /// next run. Repeated reads by the same observer register once.
    pub fn track(&self) {
        let Some(active) = current_observer() else {
            return;
        };
        {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            subscribers.retain(|existing| existing.strong_count() > 0);
            if !subscribers
                .iter()
                .any(|existing| existing.ptr_eq(&active.observer))
            {
                subscribers.push(active.observer.clone());
            }
        }
        let mut joined = active.sources.joined.borrow_mut();
        if !joined
            .iter()
            .any(|source| source.as_ptr() == Rc::as_ptr(&self.inner))
        {
            joined.push(Rc::downgrade(&self.inner));
        }
    }

    /// Invalidate every live subscriber. The list is snapshotted first so
    /// observers may re-subscribe during their own invalidation.
    pub fn notify(&self) {
        let snapshot: Vec<Weak<dyn Observer>> = self.inner.subscribers.borrow().clone();
        for weak in snapshot {
            if let Some(observer) = weak.upgrade() {
                observer.invalidate();
            }
        }
    }
}
