//! Bounded best-K selection with deterministic tie-breaks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Which end of the score range to keep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Highest scores win; on equal scores the smaller term wins.
    Top,
    /// Lowest scores win; on equal scores the larger term wins.
    Bottom,
}

impl Direction {
    /// Orders `a` against `b` by how good they are: `Greater` means `a` wins.
    ///
    /// NaN scores lose against every number.
    pub fn rank<T: Ord>(self, a: &Scored<T>, b: &Scored<T>) -> Ordering {
        let by_score = match (a.score.is_nan(), b.score.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => {
                let ord = a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal);
                match self {
                    Direction::Top => ord,
                    Direction::Bottom => ord.reverse(),
                }
            }
        };
        by_score.then_with(|| match self {
            Direction::Top => b.term.cmp(&a.term),
            Direction::Bottom => a.term.cmp(&b.term),
        })
    }
}

/// A term with the score it is ranked by.
#[derive(Clone, Debug, PartialEq)]
pub struct Scored<T> {
    /// Ranking score.
    pub score: f64,
    /// The term.
    pub term: T,
}

// Heap entry ordered so that the worst element sits on top.
#[derive(Debug)]
struct Worst<T> {
    direction: Direction,
    item: Scored<T>,
}

impl<T: Ord> PartialEq for Worst<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Ord> Eq for Worst<T> {}

impl<T: Ord> PartialOrd for Worst<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for Worst<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.direction.rank(&other.item, &self.item)
    }
}

/// Keeps the `k` best terms seen so far.
#[derive(Debug)]
pub struct TopK<T> {
    k: usize,
    direction: Direction,
    heap: BinaryHeap<Worst<T>>,
}

impl<T: Ord> TopK<T> {
    /// Creates an empty selector keeping at most `k` terms.
    pub fn new(k: usize, direction: Direction) -> Self {
        Self {
            k,
            direction,
            heap: BinaryHeap::with_capacity(k.min(1024)),
        }
    }

    /// Offers a candidate; returns whether it was kept.
    pub fn offer(&mut self, score: f64, term: T) -> bool {
        if self.k == 0 {
            return false;
        }
        let candidate = Scored { score, term };
        if self.heap.len() < self.k {
            self.push(candidate);
            return true;
        }
        let Some(mut worst) = self.heap.peek_mut() else {
            return false;
        };
        if self.direction.rank(&candidate, &worst.item) == Ordering::Greater {
            worst.item = candidate;
            return true;
        }
        false
    }

    fn push(&mut self, item: Scored<T>) {
        self.heap.push(Worst {
            direction: self.direction,
            item,
        });
    }

    /// The element that would be evicted next.
    pub fn worst(&self) -> Option<&Scored<T>> {
        self.heap.peek().map(|entry| &entry.item)
    }

    /// Number of terms kept.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing was kept.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Consumes the selector, returning kept terms best first.
    pub fn into_best_first(self) -> Vec<Scored<T>> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| entry.item)
            .collect()
    }
}
