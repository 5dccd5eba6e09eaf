//! Blocking coordination primitives for the worker pool.
//!
//! Three small building blocks sit under the scheduler:
//!
//! - [`Semaphore`] - a counting semaphore
//! - [`Latch`] - a sticky one-shot gate built on the semaphore; once `done`
//!   has fired, every past and future `wait` passes
//! - [`BoundedQueue`] - a fixed-capacity FIFO where `produce` blocks when
//!   full and `consume` blocks when empty
//!
//! The queue's blocking `produce` is what gives `dispatch` its natural
//! backpressure: a caller flooding the async workers parks until a worker
//! frees a slot.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Counting semaphore.
pub struct Semaphore {
    state: Mutex<usize>,
    waiting: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `initial` permits.
    pub fn new(initial: usize) -> Self {
        Self {
            state: Mutex::new(initial),
            waiting: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while *state == 0 {
            self.waiting.wait(&mut state);
        }
        *state -= 1;
    }

    /// Releases one permit and wakes one waiter.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        *state += 1;
        self.waiting.notify_one();
    }

    /// Releases one permit and wakes every waiter.
    ///
    /// Waiters race for the permit; combined with a re-signalling caller this
    /// turns the semaphore into a broadcast gate (see [`Latch`]).
    pub fn signal_all(&self) {
        let mut state = self.state.lock();
        *state += 1;
        self.waiting.notify_all();
    }
}

/// Sticky one-shot latch.
///
/// `wait` blocks until `done` has been called once; afterwards it returns
/// immediately, for any number of waiters, forever. Each passing waiter
/// re-signals the underlying semaphore so the permit is never consumed for
/// good.
pub struct Latch {
    semaphore: Semaphore,
}

impl Latch {
    /// Creates an unsignalled latch.
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(0),
        }
    }

    /// Blocks until the latch has fired.
    pub fn wait(&self) {
        self.semaphore.wait();
        self.semaphore.signal();
    }

    /// Fires the latch, releasing all current and future waiters.
    pub fn done(&self) {
        self.semaphore.signal_all();
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded multi-producer multi-consumer FIFO queue.
///
/// Capacity is fixed at construction. `produce` blocks while the queue is
/// full, `consume` blocks while it is empty. Item order is preserved.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    products: Semaphore,
    spaces: Semaphore,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            products: Semaphore::new(0),
            spaces: Semaphore::new(capacity),
        }
    }

    /// Appends an item, blocking while the queue is full.
    pub fn produce(&self, item: T) {
        self.spaces.wait();
        self.items.lock().push_back(item);
        self.products.signal();
    }

    /// Removes the oldest item, blocking while the queue is empty.
    pub fn consume(&self) -> T {
        self.products.wait();
        let item = self.items.lock().pop_front();
        self.spaces.signal();
        match item {
            Some(item) => item,
            None => unreachable!("item semaphore granted a permit for an empty queue"),
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_semaphore_initial_permits() {
        let semaphore = Semaphore::new(2);
        semaphore.wait();
        semaphore.wait();
        semaphore.signal();
        semaphore.wait();
    }

    #[test]
    fn test_semaphore_wakes_blocked_waiter() {
        let semaphore = Arc::new(Semaphore::new(0));
        let waiter = {
            let semaphore = semaphore.clone();
            thread::spawn(move || semaphore.wait())
        };
        thread::sleep(Duration::from_millis(20));
        semaphore.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn test_latch_is_sticky() {
        let latch = Latch::new();
        latch.done();
        // Every wait after done must pass, repeatedly.
        latch.wait();
        latch.wait();
        latch.wait();
    }

    #[test]
    fn test_latch_releases_multiple_waiters() {
        let latch = Arc::new(Latch::new());
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let latch = latch.clone();
            waiters.push(thread::spawn(move || latch.wait()));
        }
        thread::sleep(Duration::from_millis(20));
        latch.done();
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = BoundedQueue::new(8);
        for i in 0..8 {
            queue.produce(i);
        }
        for i in 0..8 {
            assert_eq!(queue.consume(), i);
        }
    }

    #[test]
    fn test_queue_backpressure_blocks_producer() {
        let queue = Arc::new(BoundedQueue::new(4));
        let produced = Arc::new(AtomicUsize::new(0));

        let producer = {
            let queue = queue.clone();
            let produced = produced.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    queue.produce(i);
                    produced.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        // Give the producer time to fill the queue; it must park at capacity.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(produced.load(Ordering::SeqCst), 4);
        assert_eq!(queue.len(), 4);

        // Drain everything; nothing may be lost or reordered.
        for i in 0..100 {
            assert_eq!(queue.consume(), i);
        }
        producer.join().unwrap();
        assert_eq!(produced.load(Ordering::SeqCst), 100);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_multiple_consumers_see_every_item() {
        let queue = Arc::new(BoundedQueue::new(4));
        let seen = Arc::new(AtomicUsize::new(0));

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let value: usize = queue.consume();
                        seen.fetch_add(value, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for i in 0..100 {
            queue.produce(i);
        }
        for consumer in consumers {
            consumer.join().unwrap();
        }
        assert_eq!(seen.load(Ordering::SeqCst), (0..100).sum::<usize>());
    }
}
