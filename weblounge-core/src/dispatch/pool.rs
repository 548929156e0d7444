use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{DispatchError, Result};

/// Number of idle instances kept by default
pub const DEFAULT_KEEP: usize = 2;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// A mutex-guarded pool of reusable instances.
///
/// Instances are handed out as [`Lease`] guards and go back to the pool when
/// the guard is dropped, including during unwinding. Cloning a pool yields
/// another handle to the same instances.
pub struct Pool<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    id: String,
    factory: Factory<T>,
    reset: Option<Reset<T>>,
    keep: usize,
    max: usize,
    state: Mutex<State<T>>,
}

struct State<T> {
    idle: Vec<T>,
    leased: usize,
    peak: usize,
    closed: bool,
}

impl<T: Send + 'static> Pool<T> {
    /// Unbounded pool keeping [`DEFAULT_KEEP`] idle instances
    pub fn new(id: impl Into<String>, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::build(id.into(), Box::new(factory), None, DEFAULT_KEEP, usize::MAX)
    }

    fn build(
        id: String,
        factory: Factory<T>,
        reset: Option<Reset<T>>,
        keep: usize,
        max: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                factory,
                reset,
                keep,
                max,
                state: Mutex::new(State {
                    idle: Vec::new(),
                    leased: 0,
                    peak: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Keep at most `keep` idle instances and never lease more than `max`
    /// at a time. Only valid before the first lease.
    pub fn with_limits(self, keep: usize, max: usize) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => Self::build(inner.id, inner.factory, inner.reset, keep, max),
            Err(inner) => Self { inner },
        }
    }

    /// Run `reset` on every instance handed back to the pool
    pub fn with_reset(self, reset: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => Self::build(
                inner.id,
                inner.factory,
                Some(Box::new(reset)),
                inner.keep,
                inner.max,
            ),
            Err(inner) => Self { inner },
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Take an idle instance or create a new one.
    ///
    /// The slot is reserved under the lock; new instances are created after
    /// it is released. A panicking factory gives the slot back.
    pub fn lease(&self) -> Result<Lease<T>> {
        let (idle, peak) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(DispatchError::PoolClosed(self.inner.id.clone()));
            }
            if state.leased >= self.inner.max {
                warn!(
                    "Pool '{}' is exhausted with {} leased instances",
                    self.inner.id, state.leased
                );
                return Err(DispatchError::PoolExhausted {
                    pool: self.inner.id.clone(),
                    max: self.inner.max,
                });
            }
            state.leased += 1;
            let peak = if state.leased > state.peak {
                state.peak = state.leased;
                Some(state.peak)
            } else {
                None
            };
            (state.idle.pop(), peak)
        };

        if let Some(peak) = peak {
            info!(
                "New lease maximum of {} reached for pool '{}'",
                peak, self.inner.id
            );
        }

        let mut lease = Lease {
            item: idle,
            retired: false,
            pool: Arc::clone(&self.inner),
        };
        if lease.item.is_none() {
            debug!("Creating new instance for pool '{}'", self.inner.id);
            lease.item = Some((self.inner.factory)());
        }
        Ok(lease)
    }

    /// Instances currently leased out
    pub fn leased(&self) -> usize {
        self.inner.state.lock().leased
    }

    /// Instances waiting in the pool
    pub fn idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Highest number of simultaneous leases so far
    pub fn peak(&self) -> usize {
        self.inner.state.lock().peak
    }

    /// Drop all idle instances and refuse further leases. Outstanding leases
    /// stay valid and are discarded when they come back.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.idle.clear();
    }

    /// Accept leases again after [`close`](Pool::close)
    pub fn reopen(&self) {
        self.inner.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("idle", &state.idle.len())
            .field("leased", &state.leased)
            .field("max", &self.inner.max)
            .finish()
    }
}

/// An instance borrowed from a [`Pool`], returned on drop
pub struct Lease<T> {
    item: Option<T>,
    retired: bool,
    pool: Arc<Inner<T>>,
}

impl<T> Lease<T> {
    /// Consume the lease without returning the instance to the pool
    pub fn retire(mut self) {
        self.retired = true;
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item
            .as_ref()
            .expect("lease holds its instance until dropped")
    }
}

impl<T> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item
            .as_mut()
            .expect("lease holds its instance until dropped")
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        let mut item = self.item.take().filter(|_| !self.retired);
        if let (Some(item), Some(reset)) = (item.as_mut(), &self.pool.reset) {
            reset(item);
        }
        let mut state = self.pool.state.lock();
        state.leased = state.leased.saturating_sub(1);
        let Some(item) = item else {
            return;
        };
        if !state.closed && state.idle.len() < self.pool.keep {
            state.idle.push(item);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool.id)
            .field("item", &self.item)
            .finish()
    }
}
