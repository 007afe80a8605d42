use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicU32},
    sync::atomic::Ordering::*,
    };
use heapless::Deque;


/**
    bounded FIFO shared between the interrupt path and a single consumer

    every access takes a short spin lock around the deque, the equivalent of masking interrupts for an enqueue or dequeue. The lock is never held across an await point.

    when full, the newest item is dropped and counted in [Self::dropped]
*/
pub struct Queue<T, const N: usize> {
    items: UnsafeCell<Deque<T, N>>,
    locked: AtomicBool,
    dropped: AtomicU32,
}
// SAFETY: the deque is only reached through `critical`, which serializes all accesses
unsafe impl<T: Send, const N: usize> Sync for Queue<T, N> {}
unsafe impl<T: Send, const N: usize> Send for Queue<T, N> {}

impl<T, const N: usize> Queue<T, N> {
    pub const fn new() -> Self {
        Self {
            items: UnsafeCell::new(Deque::new()),
            locked: AtomicBool::new(false),
            dropped: AtomicU32::new(0),
        }
    }
    /// run the given closure with exclusive access to the items
    fn critical<R>(&self, action: impl FnOnce(&mut Deque<T, N>) -> R) -> R {
        while self.locked.swap(true, Acquire)
            {core::hint::spin_loop()}
        // SAFETY: the lock flag is ours until released below
        let result = action(unsafe {&mut *self.items.get()});
        self.locked.store(false, Release);
        result
    }
    /// enqueue an item, returning it back when the queue is full
    pub fn push(&self, item: T) -> Result<(), T> {
        self.critical(|items| items.push_back(item))
    }
    /// enqueue an item, dropping and counting it when the queue is full
    pub fn push_or_drop(&self, item: T) -> bool {
        let pushed = self.push(item).is_ok();
        if !pushed {
            self.dropped.fetch_add(1, Relaxed);
        }
        pushed
    }
    pub fn pop(&self) -> Option<T> {
        self.critical(|items| items.pop_front())
    }
    /// drop all queued items
    pub fn clear(&self) {
        self.critical(|items| items.clear())
    }
    pub fn len(&self) -> usize {
        self.critical(|items| items.len())
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// free room in number of items
    pub fn room(&self) -> usize {
        N - self.len()
    }
    /// number of items dropped on overflow since creation
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Relaxed)
    }
}
impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {Self::new()}
}
