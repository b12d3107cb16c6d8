use crate::error::{validate_positive, Result, StreamError};
use std::collections::VecDeque;
use std::fmt;

/// Default capacity of a buffer stage
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// Default overflow policy of a buffer stage
pub const DEFAULT_OVERFLOW_POLICY: OverflowPolicy = OverflowPolicy::Fail;

/// Determines how the buffer should handle an element arriving while full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop every buffered element; the new element becomes the only one
    DropBuffer,
    /// Drop the oldest element to make room
    DropHead,
    /// Drop the incoming element and leave the buffer unchanged
    DropNew,
    /// Drop the newest buffered element to make room
    DropTail,
    /// Drop every buffered element and fail with `Overflow`
    Fail,
    /// Never overflow: the owning stage withholds upstream demand while full
    BackPressure,
}

type DropCallback<T> = Box<dyn FnMut(T) + Send>;

/// Bounded FIFO queue with an explicit overflow policy.
///
/// `push` never blocks. Dropped elements are handed to the drop callback.
pub struct Buffer<T> {
    queue: VecDeque<T>,
    max_size: usize,
    policy: OverflowPolicy,
    on_drop: Option<DropCallback<T>>,
    dropped_count: u64,
}

impl<T> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.queue.len())
            .field("max_size", &self.max_size)
            .field("policy", &self.policy)
            .field("dropped_count", &self.dropped_count)
            .finish()
    }
}

impl<T> Buffer<T> {
    /// Create a new buffer with the specified capacity and overflow policy
    pub fn new(max_size: usize, policy: OverflowPolicy) -> Result<Self> {
        let max_size = validate_positive("buffer max_size", max_size)?;
        Ok(Self {
            queue: VecDeque::with_capacity(max_size),
            max_size,
            policy,
            on_drop: None,
            dropped_count: 0,
        })
    }

    /// Install the callback that receives every dropped element
    pub fn with_drop_callback(mut self, callback: impl FnMut(T) + Send + 'static) -> Self {
        self.on_drop = Some(Box::new(callback));
        self
    }

    /// Insert an element, applying the overflow policy first when full
    pub fn push(&mut self, item: T) -> Result<()> {
        if self.is_full() {
            match self.policy {
                OverflowPolicy::Fail => {
                    self.drop_all();
                    return Err(StreamError::Overflow {
                        capacity: self.max_size,
                    });
                }
                OverflowPolicy::DropBuffer => self.drop_all(),
                OverflowPolicy::DropHead => {
                    if let Some(oldest) = self.queue.pop_front() {
                        self.drop_one(oldest);
                    }
                }
                OverflowPolicy::DropTail => {
                    if let Some(newest) = self.queue.pop_back() {
                        self.drop_one(newest);
                    }
                }
                OverflowPolicy::DropNew => {
                    self.drop_one(item);
                    return Ok(());
                }
                OverflowPolicy::BackPressure => {
                    return Err(StreamError::protocol(
                        "push into a full back-pressured buffer",
                    ));
                }
            }
        }
        self.queue.push_back(item);
        Ok(())
    }

    /// Remove and return the oldest element
    pub fn pop(&mut self) -> Result<T> {
        self.queue.pop_front().ok_or(StreamError::EmptyBuffer)
    }

    /// Peek at the oldest element
    pub fn head(&self) -> Result<&T> {
        self.queue.front().ok_or(StreamError::EmptyBuffer)
    }

    /// Empty the buffer and return its full contents in order
    pub fn drain(&mut self) -> Vec<T> {
        self.queue.drain(..).collect()
    }

    /// Get the current size of the buffer
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check if the buffer holds `max_size` elements
    pub fn is_full(&self) -> bool {
        self.queue.len() == self.max_size
    }

    /// Get the capacity of the buffer
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Get the overflow policy
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Get the utilization of the buffer as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.max_size).min(100) as u32
    }

    /// Get the number of dropped elements
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    fn drop_all(&mut self) {
        let dropped: Vec<T> = self.queue.drain(..).collect();
        for item in dropped {
            self.drop_one(item);
        }
    }

    fn drop_one(&mut self, item: T) {
        self.dropped_count += 1;
        if let Some(callback) = self.on_drop.as_mut() {
            callback(item);
        }
    }
}

/// Configuration of a buffer stage
pub struct BufferConfig<T> {
    max_size: usize,
    overflow_policy: OverflowPolicy,
    drop_callback: Option<DropCallback<T>>,
}

impl<T> BufferConfig<T> {
    pub fn new(max_size: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            max_size,
            overflow_policy,
            drop_callback: None,
        }
    }

    /// Callback receiving every element discarded by the overflow policy
    pub fn on_drop(mut self, callback: impl FnMut(T) + Send + 'static) -> Self {
        self.drop_callback = Some(Box::new(callback));
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Validate the configuration and build the buffer it describes
    pub fn into_buffer(self) -> Result<Buffer<T>> {
        let mut buffer = Buffer::new(self.max_size, self.overflow_policy)?;
        buffer.on_drop = self.drop_callback;
        Ok(buffer)
    }
}

impl<T> Default for BufferConfig<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_OVERFLOW_POLICY)
    }
}

impl<T> fmt::Debug for BufferConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferConfig")
            .field("max_size", &self.max_size)
            .field("overflow_policy", &self.overflow_policy)
            .field("drop_callback", &self.drop_callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn filled(policy: OverflowPolicy, items: &[i32]) -> (Buffer<i32>, Arc<Mutex<Vec<i32>>>) {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&dropped);
        let mut buffer = Buffer::new(2, policy)
            .unwrap()
            .with_drop_callback(move |x| sink.lock().push(x));
        for &item in items {
            buffer.push(item).unwrap();
        }
        (buffer, dropped)
    }

    #[test]
    fn test_buffer_push_pop() {
        let mut buffer = Buffer::new(10, OverflowPolicy::Fail).unwrap();
        buffer.push(42).unwrap();
        assert_eq!(buffer.head().unwrap(), &42);
        assert_eq!(buffer.pop().unwrap(), 42);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_buffer_errors() {
        let mut buffer: Buffer<i32> = Buffer::new(1, OverflowPolicy::Fail).unwrap();
        assert!(matches!(buffer.pop(), Err(StreamError::EmptyBuffer)));
        assert!(matches!(buffer.head(), Err(StreamError::EmptyBuffer)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            Buffer::<i32>::new(0, OverflowPolicy::DropHead),
            Err(StreamError::ConfigError(_))
        ));
    }

    #[test]
    fn test_buffer_utilization() {
        let mut buffer = Buffer::new(10, OverflowPolicy::Fail).unwrap();
        for i in 0..5 {
            buffer.push(i).unwrap();
        }
        assert_eq!(buffer.utilization(), 50);
        assert!(!buffer.is_full());
    }

    #[test]
    fn test_drop_head_policy() {
        let (mut buffer, dropped) = filled(OverflowPolicy::DropHead, &[1, 2, 3]);
        assert_eq!(buffer.drain(), vec![2, 3]);
        assert_eq!(*dropped.lock(), vec![1]);
        assert_eq!(buffer.dropped_count(), 1);
    }

    #[test]
    fn test_drop_tail_policy() {
        let (mut buffer, dropped) = filled(OverflowPolicy::DropTail, &[1, 2, 3]);
        assert_eq!(buffer.drain(), vec![1, 3]);
        assert_eq!(*dropped.lock(), vec![2]);
    }

    #[test]
    fn test_drop_new_policy() {
        let (mut buffer, dropped) = filled(OverflowPolicy::DropNew, &[1, 2, 3]);
        assert_eq!(buffer.drain(), vec![1, 2]);
        assert_eq!(*dropped.lock(), vec![3]);
    }

    #[test]
    fn test_drop_buffer_policy() {
        let (mut buffer, dropped) = filled(OverflowPolicy::DropBuffer, &[1, 2, 3]);
        assert_eq!(buffer.drain(), vec![3]);
        assert_eq!(*dropped.lock(), vec![1, 2]);
    }

    #[test]
    fn test_fail_policy() {
        let (mut buffer, dropped) = filled(OverflowPolicy::Fail, &[1, 2]);
        assert!(matches!(
            buffer.push(3),
            Err(StreamError::Overflow { capacity: 2 })
        ));
        assert_eq!(*dropped.lock(), vec![1, 2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_back_pressure_policy_refuses_push_when_full() {
        let (mut buffer, dropped) = filled(OverflowPolicy::BackPressure, &[1, 2]);
        let error = buffer.push(3).unwrap_err();
        assert!(error.is_contract_violation());
        assert!(dropped.lock().is_empty());
        assert_eq!(buffer.drain(), vec![1, 2]);
    }

    #[test]
    fn test_config_builds_buffer() {
        let config: BufferConfig<u8> = BufferConfig::default();
        assert_eq!(config.max_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(config.overflow_policy(), OverflowPolicy::Fail);
        let buffer = config.into_buffer().unwrap();
        assert_eq!(buffer.capacity(), 16);
    }

    proptest! {
        #[test]
        fn prop_drop_head_keeps_last_n(n in 1usize..8, extra in 1usize..16) {
            let mut buffer = Buffer::new(n, OverflowPolicy::DropHead).unwrap();
            let total = n + extra;
            for i in 0..total {
                buffer.push(i).unwrap();
            }
            prop_assert!(buffer.len() <= n);
            prop_assert_eq!(buffer.drain(), ((total - n)..total).collect::<Vec<_>>());
        }

        #[test]
        fn prop_drop_tail_keeps_prefix_and_last(n in 1usize..8, extra in 1usize..16) {
            let mut buffer = Buffer::new(n, OverflowPolicy::DropTail).unwrap();
            let total = n + extra;
            for i in 0..total {
                buffer.push(i).unwrap();
            }
            let mut expected: Vec<usize> = (0..n - 1).collect();
            expected.push(total - 1);
            prop_assert_eq!(buffer.drain(), expected);
        }
    }
}
