//! A bounded pool of rendering contexts shared by several simulations.
//!
//! Contexts are expensive to create and can only be current on one thread at a
//! time, so the pool creates them lazily, hands each one out exclusively and keeps
//! it forever once created. At most `capacity` contexts exist and are held at once;
//! [`ContextPool::acquire`] blocks until a slot frees up.
//!
//! Every slot goes through `Uncreated -> Free -> InUse -> Free -> InUse -> ...`.
//! The pool lock only covers this bookkeeping, never the creation of a context.

use crate::log::*;
use arrayvec::ArrayString;
use robosim_traits::{SimError, SimResult};
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Number of contexts a pool allows when nothing else is asked.
pub const DEFAULT_CAPACITY: usize = 4;

pub type PoolId = ArrayString<64>;

/// Creates the contexts of a pool, the first time each slot is used.
pub trait ContextFactory: Send + Sync {
    type Context: Send;

    fn create(&self, slot: usize) -> SimResult<Self::Context>;
}

impl<C, F> ContextFactory for F
where
    C: Send,
    F: Fn(usize) -> SimResult<C> + Send + Sync,
{
    type Context = C;

    fn create(&self, slot: usize) -> SimResult<C> {
        self(slot)
    }
}

/// Read only view of a pool, for monitoring.
pub trait PoolMonitor: Send + Sync {
    /// A unique and descriptive identifier for the pool.
    fn id(&self) -> PoolId;

    /// Number of slots that can be acquired without blocking.
    fn space_left(&self) -> usize;

    /// Maximum number of contexts held at once.
    fn total_size(&self) -> usize;

    /// Number of contexts created so far.
    fn created(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub created: usize,
    pub in_use: usize,
}

enum Slot<C> {
    Uncreated,
    Free(C),
    // the context lives in the ContextHandle meanwhile.
    InUse,
}

struct PoolState<C> {
    slots: Vec<Slot<C>>,
    created: usize,
    in_use: usize,
}

impl<C> PoolState<C> {
    fn new(capacity: usize) -> Self {
        PoolState {
            slots: (0..capacity).map(|_| Slot::Uncreated).collect(),
            created: 0,
            in_use: 0,
        }
    }

    /// Reuses created contexts before creating new ones.
    fn pick_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Slot::Free(_)))
            .or_else(|| self.slots.iter().position(|s| matches!(s, Slot::Uncreated)))
    }

    /// Marks `index` as held and takes its context out, if it was created.
    fn take(&mut self, index: usize) -> Option<C> {
        self.in_use += 1;
        match std::mem::replace(&mut self.slots[index], Slot::InUse) {
            Slot::Free(context) => Some(context),
            _ => None,
        }
    }
}

struct PoolShared<F: ContextFactory> {
    id: PoolId,
    factory: F,
    state: Mutex<PoolState<F::Context>>,
    available: Condvar,
}

impl<F: ContextFactory> PoolShared<F> {
    // Bookkeeping never panics while the lock is held, so a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Context>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts a context back in its slot and wakes one waiter.
    fn give_back(&self, slot: usize, context: Option<F::Context>) -> SimResult<()> {
        let mut state = self.lock();
        match state.slots.get(slot) {
            Some(Slot::InUse) => {}
            _ => {
                drop(state);
                error!("pool {}: slot {} released while not held", self.id, slot);
                return Err(SimError::double_release(format!(
                    "slot {slot} of pool {} is not currently held",
                    self.id
                )));
            }
        }
        state.slots[slot] = match context {
            Some(context) => Slot::Free(context),
            None => Slot::Uncreated,
        };
        state.in_use -= 1;
        drop(state);
        self.available.notify_one();
        Ok(())
    }
}

/// A fixed capacity pool of lazily created, reusable contexts.
/// Clones are cheap and share the same slots.
pub struct ContextPool<F: ContextFactory> {
    shared: Arc<PoolShared<F>>,
}

impl<F: ContextFactory> Clone for ContextPool<F> {
    fn clone(&self) -> Self {
        ContextPool {
            shared: self.shared.clone(),
        }
    }
}

impl<F: ContextFactory> Debug for ContextPool<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("id", &self.shared.id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ContextFactory> ContextPool<F> {
    /// A pool of [`DEFAULT_CAPACITY`] slots.
    pub fn new(id: &str, factory: F) -> SimResult<Self> {
        Self::with_capacity(id, DEFAULT_CAPACITY, factory)
    }

    pub fn with_capacity(id: &str, capacity: usize, factory: F) -> SimResult<Self> {
        if capacity == 0 {
            return Err(SimError::invalid_configuration(
                "a context pool needs a capacity of at least 1",
            ));
        }
        let id = PoolId::from(id)
            .map_err(|_| SimError::invalid_configuration("pool id longer than 64 bytes"))?;
        Ok(ContextPool {
            shared: Arc::new(PoolShared {
                id,
                factory,
                state: Mutex::new(PoolState::new(capacity)),
                available: Condvar::new(),
            }),
        })
    }

    /// Changes the maximum number of contexts. Only possible before the first acquisition.
    pub fn set_capacity(&self, capacity: usize) -> SimResult<()> {
        if capacity == 0 {
            return Err(SimError::invalid_configuration(
                "a context pool needs a capacity of at least 1",
            ));
        }
        let mut state = self.shared.lock();
        if state.created > 0 || state.in_use > 0 {
            return Err(SimError::invalid_configuration(format!(
                "capacity of pool {} cannot change once a context was acquired",
                self.shared.id
            )));
        }
        *state = PoolState::new(capacity);
        info!("pool {}: capacity set to {}", self.shared.id, capacity);
        Ok(())
    }

    /// Waits for a free slot and hands its context out, creating it on first use.
    ///
    /// Waiters are woken in no particular order. If the context cannot be created the
    /// slot goes back to the free set and the error is returned.
    pub fn acquire(&self) -> SimResult<ContextHandle<F>> {
        let (slot, existing) = {
            let mut state = self.shared.lock();
            let slot = loop {
                if let Some(slot) = state.pick_slot() {
                    break slot;
                }
                state = self
                    .shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            };
            (slot, state.take(slot))
        };
        self.hand_out(slot, existing)
    }

    /// Like [`ContextPool::acquire`] but returns `None` instead of blocking.
    pub fn try_acquire(&self) -> SimResult<Option<ContextHandle<F>>> {
        let (slot, existing) = {
            let mut state = self.shared.lock();
            match state.pick_slot() {
                Some(slot) => (slot, state.take(slot)),
                None => return Ok(None),
            }
        };
        self.hand_out(slot, existing).map(Some)
    }

    fn hand_out(
        &self,
        slot: usize,
        existing: Option<F::Context>,
    ) -> SimResult<ContextHandle<F>> {
        let context = match existing {
            Some(context) => context,
            None => match self.create_guarded(slot) {
                Ok(context) => {
                    self.shared.lock().created += 1;
                    debug!("pool {}: created context for slot {}", self.shared.id, slot);
                    context
                }
                Err(e) => {
                    self.shared.give_back(slot, None)?;
                    warn!("pool {}: context creation failed: {}", self.shared.id, e);
                    return Err(SimError::context_creation_failed(format!(
                        "cannot create context for slot {slot} of pool {}",
                        self.shared.id
                    ))
                    .with_cause(e));
                }
            },
        };
        Ok(ContextHandle {
            slot,
            context: Some(context),
            pool: self.shared.clone(),
            released: false,
        })
    }

    /// Runs the factory for `slot`; the slot goes back to the pool if the factory panics.
    fn create_guarded(&self, slot: usize) -> SimResult<F::Context> {
        let mut guard = CreationGuard {
            shared: &self.shared,
            slot,
            armed: true,
        };
        let created = self.shared.factory.create(slot);
        guard.armed = false;
        created
    }

    /// Returns the slot of `handle` to the free set and wakes one blocked acquirer.
    ///
    /// Releasing a handle this pool does not hold is a [`SimErrorKind::DoubleRelease`];
    /// a handle coming from another pool still goes back to its own pool.
    ///
    /// [`SimErrorKind::DoubleRelease`]: robosim_traits::SimErrorKind::DoubleRelease
    pub fn release(&self, mut handle: ContextHandle<F>) -> SimResult<()> {
        if !Arc::ptr_eq(&self.shared, &handle.pool) {
            error!(
                "pool {}: release of a handle owned by pool {}",
                self.shared.id, handle.pool.id
            );
            return Err(SimError::double_release(format!(
                "handle of pool {} released into pool {}",
                handle.pool.id, self.shared.id
            )));
        }
        let context = handle.context.take();
        let slot = handle.slot;
        handle.released = true;
        self.shared.give_back(slot, context)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            capacity: state.slots.len(),
            created: state.created,
            in_use: state.in_use,
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().slots.len()
    }
}

impl<F: ContextFactory> PoolMonitor for ContextPool<F> {
    fn id(&self) -> PoolId {
        self.shared.id
    }

    fn space_left(&self) -> usize {
        let stats = self.stats();
        stats.capacity - stats.in_use
    }

    fn total_size(&self) -> usize {
        self.capacity()
    }

    fn created(&self) -> usize {
        self.stats().created
    }
}

struct CreationGuard<'a, F: ContextFactory> {
    shared: &'a PoolShared<F>,
    slot: usize,
    armed: bool,
}

impl<F: ContextFactory> Drop for CreationGuard<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "pool {}: context factory panicked for slot {}",
                self.shared.id, self.slot
            );
            // the slot is InUse here, giving it back cannot fail.
            let _ = self.shared.give_back(self.slot, None);
        }
    }
}

/// Exclusive lease on one context of a pool.
/// Dropping it releases the slot, like [`ContextPool::release`].
pub struct ContextHandle<F: ContextFactory> {
    slot: usize,
    context: Option<F::Context>,
    pool: Arc<PoolShared<F>>,
    released: bool,
}

impl<F: ContextFactory> ContextHandle<F> {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<F: ContextFactory> Debug for ContextHandle<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("pool", &self.pool.id)
            .field("slot", &self.slot)
            .finish()
    }
}

impl<F: ContextFactory> Deref for ContextHandle<F> {
    type Target = F::Context;

    fn deref(&self) -> &Self::Target {
        match &self.context {
            Some(context) => context,
            None => unreachable!("a live handle always holds its context"),
        }
    }
}

impl<F: ContextFactory> DerefMut for ContextHandle<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.context {
            Some(context) => context,
            None => unreachable!("a live handle always holds its context"),
        }
    }
}

impl<F: ContextFactory> Drop for ContextHandle<F> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let context = self.context.take();
        let result = self.pool.give_back(self.slot, context);
        debug_assert!(
            result.is_ok() || std::thread::panicking(),
            "context pool bookkeeping is inconsistent"
        );
    }
}
