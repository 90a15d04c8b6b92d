//! Generational work queue: which flushed entries parent the next round.
//!
//! Refilled whenever it runs dry, in two passes over a shuffled view of the
//! corpus: first every currently-covered edge gets exactly one maximizing
//! representative, then the leftovers are admitted with a probability that
//! grows with the staleness of the edges they sit on (floor ≈ 1%).

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::corpus::{Corpus, MAX_STALENESS};
use crate::coverage::MAP_SIZE;
use crate::unit::CodeUnit;

/// Parent queue for one generation; holds indices into the corpus's
/// flushed set (stable because a corpus only grows and refills happen only
/// when the queue is empty).
#[derive(Debug, Default)]
pub struct WorkQueue {
    queue: Vec<usize>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_next(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove and return the most recently enqueued parent.
    pub fn pop(&mut self) -> Option<usize> {
        self.queue.pop()
    }

    /// Rebuild the queue for the next generation.
    pub fn fill<C: CodeUnit>(&mut self, corpus: &Corpus<C>, rng: &mut ChaCha8Rng) {
        self.queue.clear();

        let mut order: Vec<usize> = (0..corpus.flushed_len()).collect();
        order.shuffle(rng);

        let mut represented = vec![false; MAP_SIZE];

        for &idx in &order {
            let cov = corpus.entry(idx).coverage();

            let mut selected = false;
            for j in 0..MAP_SIZE {
                if !represented[j] && corpus.maximizes_edge(cov, j) {
                    selected = true;
                    break;
                }
            }

            if selected {
                self.queue.push(idx);
                // One pass marks everything this entry stands for, so later
                // entries cannot be selected for the same edges.
                for j in 0..MAP_SIZE {
                    if corpus.maximizes_edge(cov, j) {
                        represented[j] = true;
                    }
                }
                continue;
            }

            let score = corpus.staleness_score(cov);
            let threshold = score.max(MAX_STALENESS / 100);
            if rng.gen_range(0..MAX_STALENESS) < threshold {
                self.queue.push(idx);
            }
        }
    }
}
