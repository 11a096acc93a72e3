// Copyright 2022, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A bounded FIFO that discards its oldest element when full, used for
//! diagnostic histories

use std::collections::VecDeque;

/// Bounded history of the most recent `max_size` elements
#[derive(Debug, Clone)]
pub struct FixedQueue<T> {
    max_size: usize,
    queue: VecDeque<T>,
}

impl<T> FixedQueue<T> {
    /// Constructor. A queue of size zero retains nothing.
    pub fn new(max_size: usize) -> Self {
        Self { max_size, queue: VecDeque::with_capacity(max_size) }
    }

    /// Append, dropping the oldest element if the queue is full
    pub fn push(&mut self, item: T) {
        if self.max_size == 0 {
            return;
        }
        if self.queue.len() == self.max_size {
            self.queue.pop_front();
        }
        self.queue.push_back(item);
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.queue.iter()
    }

    /// Number of retained elements
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_drops_oldest_when_full() {
        let mut queue = FixedQueue::new(3);

        for i in 0..5 {
            queue.push(i);
        }

        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_size_retains_nothing() {
        let mut queue = FixedQueue::new(0);
        queue.push(1);
        assert!(queue.is_empty());
    }
}
