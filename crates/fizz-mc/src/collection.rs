//! Frontier containers: FIFO for breadth-first, LIFO for depth-first,
//! and random removal for the random strategy and simulation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

pub trait Frontier<T> {
    fn add(&mut self, item: T);
    fn remove(&mut self) -> Option<T>;
    fn len(&self) -> usize;
    /// Drops the `n` items that have been waiting longest.
    fn drop_oldest(&mut self, n: usize);
    fn clear(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct Queue<T> {
    items: VecDeque<T>,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> Frontier<T> for Queue<T> {
    fn add(&mut self, item: T) {
        self.items.push_back(item);
    }

    fn remove(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn drop_oldest(&mut self, n: usize) {
        let n = n.min(self.items.len());
        self.items.drain(..n);
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

#[derive(Debug)]
pub struct Stack<T> {
    items: Vec<T>,
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Frontier<T> for Stack<T> {
    fn add(&mut self, item: T) {
        self.items.push(item);
    }

    fn remove(&mut self) -> Option<T> {
        self.items.pop()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn drop_oldest(&mut self, n: usize) {
        let n = n.min(self.items.len());
        self.items.drain(..n);
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// Removes a uniformly random element.
#[derive(Debug)]
pub struct RandomQueue<T> {
    items: Vec<T>,
    rng: StdRng,
}

impl<T> RandomQueue<T> {
    pub fn new(seed: u64) -> Self {
        Self {
            items: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<T> Frontier<T> for RandomQueue<T> {
    fn add(&mut self, item: T) {
        self.items.push(item);
    }

    fn remove(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let i = self.rng.gen_range(0..self.items.len());
        Some(self.items.swap_remove(i))
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn drop_oldest(&mut self, n: usize) {
        let n = n.min(self.items.len());
        self.items.drain(..n);
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}
