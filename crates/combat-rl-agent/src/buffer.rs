//! Experience replay buffer

use rand::seq::index;
use rand::Rng;

use combat_rl_core::Experience;

/// Fixed-capacity circular replay buffer.
///
/// Once full, every insertion overwrites the oldest stored experience.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    /// Buffer storage
    buffer: Vec<Experience>,
    /// Maximum capacity
    capacity: usize,
    /// Slot the next insertion writes to once full
    position: usize,
}

impl ReplayBuffer {
    /// Reference capacity
    pub const DEFAULT_CAPACITY: usize = 10_000;

    /// Create a new replay buffer. A capacity of 0 is raised to 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity,
            position: 0,
        }
    }

    /// Add an experience, overwriting the oldest once at capacity
    pub fn add(&mut self, experience: Experience) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(experience);
        } else {
            self.buffer[self.position] = experience;
        }
        self.position = (self.position + 1) % self.capacity;
    }

    /// Sample `batch_size` distinct stored experiences uniformly at random.
    ///
    /// Returns an empty batch when fewer than `batch_size` are stored; callers
    /// treat that as "skip this update".
    pub fn sample_batch<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<&Experience> {
        if batch_size == 0 || self.buffer.len() < batch_size {
            return Vec::new();
        }
        index::sample(rng, self.buffer.len(), batch_size)
            .into_iter()
            .map(|i| &self.buffer[i])
            .collect()
    }

    /// Stored experiences from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        let (newer, older) = if self.buffer.len() < self.capacity {
            (&self.buffer[..], &self.buffer[..0])
        } else {
            let (newer, older) = self.buffer.split_at(self.position);
            (newer, older)
        };
        older.iter().chain(newer.iter())
    }

    /// Get the current size of the buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of stored experiences
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.position = 0;
    }
}
