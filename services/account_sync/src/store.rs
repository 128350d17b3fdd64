//! Reactive copy-on-write state container
//!
//! [`Store`] holds one `Arc<S>` snapshot. Every write clones the snapshot,
//! applies a closure to the clone, runs the registered [`Derivation`]s whose
//! inputs changed, then publishes the new `Arc` in a single step. Readers
//! either take the current snapshot synchronously with [`Store::get_state`]
//! or subscribe to changes, optionally through a selector with
//! [`Store::select`].
//!
//! Writes are serialized by the underlying `watch` channel lock. Closures
//! passed to `set`/`update` and derivations must not call back into the
//! same store.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// Value recomputed from other parts of the state whenever its inputs change
///
/// Evaluated synchronously inside the commit that changed its inputs, so
/// subscribers never observe inputs and outputs out of step.
pub trait Derivation<S>: Send + Sync {
    fn name(&self) -> &'static str;

    /// True when any input differs between the previous and the next state
    fn inputs_changed(&self, prev: &S, next: &S) -> bool;

    /// Recompute the derived fields in place
    fn derive(&self, state: &mut S);
}

/// Process-wide state container shared through `Arc`
pub struct Store<S> {
    sender: watch::Sender<Arc<S>>,
    derivations: RwLock<Vec<Arc<dyn Derivation<S>>>>,
}

impl<S> Store<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        let (sender, _) = watch::channel(Arc::new(initial));
        Self {
            sender,
            derivations: RwLock::new(Vec::new()),
        }
    }

    /// Current snapshot
    pub fn get_state(&self) -> Arc<S> {
        Arc::clone(&self.sender.borrow())
    }

    /// Apply a mutation and publish the result
    pub fn set(&self, mutator: impl FnOnce(&mut S)) {
        self.update(mutator)
    }

    /// Apply a mutation, publish the result and return the closure's value
    pub fn update<R>(&self, mutator: impl FnOnce(&mut S) -> R) -> R {
        let mut out = None;
        self.sender.send_modify(|current| {
            let (next, value) = self.commit(current, mutator);
            *current = next;
            out = Some(value);
        });
        // send_modify always runs the closure exactly once
        out.unwrap_or_else(|| unreachable!("send_modify skipped its closure"))
    }

    /// Apply a mutation that reports whether it changed anything
    ///
    /// When the closure returns `false` the draft is discarded and no
    /// subscriber is woken.
    pub fn update_if(&self, mutator: impl FnOnce(&mut S) -> bool) -> bool {
        self.sender.send_if_modified(|current| {
            let (next, changed) = self.commit(current, mutator);
            if changed {
                *current = next;
            }
            changed
        })
    }

    /// Raw change notifications for every commit
    pub fn subscribe(&self) -> watch::Receiver<Arc<S>> {
        self.sender.subscribe()
    }

    /// Subscription that wakes only when `selector`'s output changes
    pub fn select<T, F>(&self, selector: F) -> Selected<S, T, F>
    where
        T: PartialEq + Clone,
        F: Fn(&S) -> T,
    {
        let mut rx = self.sender.subscribe();
        let last = selector(&rx.borrow_and_update());
        Selected { rx, selector, last }
    }

    /// Register a derivation and evaluate it once against the current state
    pub fn register_derivation(&self, derivation: Arc<dyn Derivation<S>>) {
        self.derivations.write().push(Arc::clone(&derivation));
        self.set(|state| derivation.derive(state));
    }

    pub fn derivation_count(&self) -> usize {
        self.derivations.read().len()
    }

    fn commit<R>(&self, current: &Arc<S>, mutator: impl FnOnce(&mut S) -> R) -> (Arc<S>, R) {
        let mut draft = S::clone(current);
        let value = mutator(&mut draft);

        for derivation in self.derivations.read().iter() {
            if derivation.inputs_changed(current, &draft) {
                trace!("Recomputing derivation {}", derivation.name());
                derivation.derive(&mut draft);
            }
        }

        (Arc::new(draft), value)
    }
}

/// Selector-scoped subscription returned by [`Store::select`]
pub struct Selected<S, T, F> {
    rx: watch::Receiver<Arc<S>>,
    selector: F,
    last: T,
}

impl<S, T, F> Selected<S, T, F>
where
    T: PartialEq + Clone,
    F: Fn(&S) -> T,
{
    /// Last value seen by this subscription
    pub fn get(&self) -> &T {
        &self.last
    }

    /// Wait for the selected value to change
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<T> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            let next = (self.selector)(&self.rx.borrow_and_update());
            if next != self.last {
                self.last = next.clone();
                return Some(next);
            }
        }
    }
}
