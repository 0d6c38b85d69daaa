//! Bounded blocking pool for database connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::driver::Connection;
use crate::error::{AcquireError, Result};

type Factory<T> = Box<dyn Fn() -> std::result::Result<T, String> + Send + Sync>;

struct PoolState<T> {
    idle: Vec<T>,
}

/// A bounded pool for reusable connection-like objects.
pub struct Pool<T> {
    max: usize,
    factory: Factory<T>,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    in_flight: AtomicUsize,
}

/// A pooled value that returns to the pool on drop.
pub struct Pooled<T> {
    pool: Arc<Pool<T>>,
    value: Option<T>,
}

impl<T> Pool<T> {
    pub fn new<F>(max: usize, factory: F) -> Arc<Self>
    where
        F: Fn() -> std::result::Result<T, String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            max: max.max(1),
            factory: Box::new(factory),
            state: Mutex::new(PoolState { idle: Vec::new() }),
            available: Condvar::new(),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Waits for a free slot, forever when `timeout` is `None`.
    pub fn acquire(
        self: &Arc<Self>,
        timeout: Option<Duration>,
    ) -> std::result::Result<Pooled<T>, AcquireError> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.idle.pop() {
                return Ok(self.wrap(item));
            }

            if self.in_flight.load(Ordering::SeqCst) < self.max {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                drop(state);
                return match (self.factory)() {
                    Ok(item) => Ok(self.wrap(item)),
                    Err(message) => {
                        self.discard();
                        Err(AcquireError::Create(message))
                    }
                };
            }

            match deadline {
                None => self.available.wait(&mut state),
                Some(limit) => {
                    if self.available.wait_until(&mut state, limit).timed_out() {
                        return Err(AcquireError::Timeout);
                    }
                }
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    fn wrap(self: &Arc<Self>, item: T) -> Pooled<T> {
        Pooled {
            pool: Arc::clone(self),
            value: Some(item),
        }
    }

    fn release(&self, item: T) {
        let mut state = self.state.lock();
        state.idle.push(item);
        self.available.notify_one();
    }

    fn discard(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.available.notify_one();
    }
}

impl<T> Pooled<T> {
    /// Drops the value instead of returning it, freeing its slot.
    pub fn discard(mut self) {
        if self.value.take().is_some() {
            self.pool.discard();
        }
    }

    fn get(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("pooled value is only taken on drop or discard"),
        }
    }
}

impl<T> AsRef<T> for Pooled<T> {
    fn as_ref(&self) -> &T {
        self.get()
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.value.take() {
            self.pool.release(item);
        }
    }
}

impl<C: Connection> Connection for Pooled<C> {
    type Statement = C::Statement;

    fn prepare(&self, sql: &str) -> Result<Self::Statement> {
        self.get().prepare(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_reuses_connections() {
        let pool = Pool::new(2, || Ok(7usize));
        let first = pool.acquire(None).expect("first");
        let second = pool.acquire(None).expect("second");
        assert_eq!(pool.in_flight(), 2);
        drop(first);
        assert_eq!(pool.idle_count(), 1);
        drop(second);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(*pool.acquire(None).expect("reuse").as_ref(), 7);
    }

    #[test]
    fn pool_timeout() {
        let pool = Pool::new(1, || Ok(42usize));
        let _guard = pool.acquire(None).expect("guard");
        let result = pool.acquire(Some(Duration::from_millis(10)));
        assert_eq!(result.err(), Some(AcquireError::Timeout));
    }

    #[test]
    fn pool_discard_allows_recreate() {
        let pool = Pool::new(1, || Ok(7usize));
        let guard = pool.acquire(None).expect("guard");
        guard.discard();
        let next = pool.acquire(Some(Duration::from_millis(10)));
        assert!(next.is_ok());
    }

    #[test]
    fn failed_creation_frees_the_slot() {
        let pool: Arc<Pool<usize>> = Pool::new(1, || Err("no database".to_string()));
        let err = pool.acquire(None).err();
        assert_eq!(err, Some(AcquireError::Create("no database".into())));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn waiter_wakes_on_release() {
        let pool = Pool::new(1, || Ok(1usize));
        let guard = pool.acquire(None).expect("guard");
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| pool.acquire(Some(Duration::from_secs(5))).is_ok());
            std::thread::sleep(Duration::from_millis(20));
            drop(guard);
            assert!(waiter.join().expect("join"));
        });
    }
}
