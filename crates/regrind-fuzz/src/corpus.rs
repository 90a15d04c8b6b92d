//! The corpus: every distinct behavior discovered for one campaign.
//!
//! Acceptances accumulate in a pending set during a generation and are
//! promoted by `flush_generation`, which deduplicates whole execution
//! traces by path hash and maintains the slot-wise upper bound across all
//! flushed entries. A per-edge staleness counter tracks how long each
//! edge's maximum has gone unbeaten; the work queue uses it to re-examine
//! stuck edges more aggressively.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::coverage::{CoverageMap, MAP_SIZE};
use crate::mutate;
use crate::unit::CodeUnit;

/// Staleness scores live in `[0, MAX_STALENESS]`.
pub const MAX_STALENESS: u32 = 1024;

const PATH_INDEX_SIZE: usize = 4096;

/// One accepted subject and the coverage it produced. Immutable once
/// recorded; owned by its corpus.
#[derive(Debug, Clone)]
pub struct CorpusEntry<C> {
    buf: Box<[C]>,
    coverage: CoverageMap,
}

impl<C: CodeUnit> CorpusEntry<C> {
    pub fn new(buf: Box<[C]>, coverage: CoverageMap) -> Self {
        Self { buf, coverage }
    }

    pub fn buf(&self) -> &[C] {
        &self.buf
    }

    pub fn coverage(&self) -> &CoverageMap {
        &self.coverage
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Chained hash buckets keyed by the low bits of the 128-bit path hash;
/// buckets carry full hashes so colliding traces stay distinguishable.
#[derive(Debug)]
struct PathIndex {
    buckets: Vec<Vec<u128>>,
}

impl PathIndex {
    fn new() -> Self {
        Self {
            buckets: (0..PATH_INDEX_SIZE).map(|_| Vec::new()).collect(),
        }
    }

    fn bucket(hash: u128) -> usize {
        (hash as usize) & (PATH_INDEX_SIZE - 1)
    }

    fn contains(&self, hash: u128) -> bool {
        self.buckets[Self::bucket(hash)].contains(&hash)
    }

    fn insert(&mut self, hash: u128) {
        let bucket = &mut self.buckets[Self::bucket(hash)];
        if !bucket.contains(&hash) {
            bucket.push(hash);
        }
    }
}

pub struct Corpus<C: CodeUnit> {
    flushed: Vec<CorpusEntry<C>>,
    pending: Vec<CorpusEntry<C>>,
    path_index: PathIndex,
    upper_bound: CoverageMap,
    staleness: Vec<u32>,
    maximizing: Option<CorpusEntry<C>>,
    interesting: Vec<C>,
}

impl<C: CodeUnit> Corpus<C> {
    pub fn new() -> Self {
        Self {
            flushed: Vec::new(),
            pending: Vec::new(),
            path_index: PathIndex::new(),
            upper_bound: CoverageMap::new(),
            staleness: vec![0; MAP_SIZE],
            maximizing: None,
            interesting: Vec::new(),
        }
    }

    /// Accept a new entry into the current generation's pending set. Takes
    /// the maximizing slot when its total beats the best seen so far.
    pub fn record(&mut self, entry: CorpusEntry<C>) {
        let best = self.maximizing.as_ref().map_or(0, |m| m.coverage.total());
        if entry.coverage.total() > best || self.maximizing.is_none() {
            self.maximizing = Some(entry.clone());
        }
        self.pending.push(entry);
    }

    /// Whole-trace deduplication: has this exact execution path been kept
    /// before?
    pub fn is_redundant(&self, cov: &CoverageMap) -> bool {
        self.path_index.contains(cov.path_hash())
    }

    /// Does `cov` show behavior beyond the upper bound of all flushed
    /// entries?
    pub fn has_new_path(&self, cov: &CoverageMap) -> bool {
        self.upper_bound.has_new_path(cov)
    }

    pub fn maximizes_upper_bound(&self, cov: &CoverageMap) -> bool {
        self.upper_bound.maximizes_any_edge(cov)
    }

    /// Does `cov` tie or exceed the upper bound at edge `i`?
    pub fn maximizes_edge(&self, cov: &CoverageMap, i: usize) -> bool {
        self.upper_bound.maximizes_edge(cov, i)
    }

    /// Age every upper-bound edge that `cov` tied but did not beat.
    pub fn bump_staleness(&mut self, cov: &CoverageMap) {
        for i in 0..MAP_SIZE {
            if self.upper_bound.edge_covered(i) && self.upper_bound.edge_equal(cov, i) {
                self.staleness[i] = self.staleness[i].saturating_add(1);
            }
        }
    }

    /// Promote non-redundant pending entries, refresh the upper bound, and
    /// zero the staleness of every edge a promotion raised.
    pub fn flush_generation(&mut self) {
        for entry in std::mem::take(&mut self.pending) {
            if self.path_index.contains(entry.coverage.path_hash()) {
                continue;
            }
            self.path_index.insert(entry.coverage.path_hash());
            for i in 0..MAP_SIZE {
                if entry.coverage.edge_greater(&self.upper_bound, i) {
                    self.staleness[i] = 0;
                }
            }
            self.upper_bound.merge(&entry.coverage);
            self.flushed.push(entry);
        }
    }

    /// Generate `n` children of the flushed entry at `parent_idx`, each a
    /// fresh copy of the parent with one mutation applied.
    pub fn generate_children(
        &self,
        parent_idx: usize,
        n: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Box<[C]>> {
        let parent = &self.flushed[parent_idx];
        let mut children = Vec::with_capacity(n);
        for _ in 0..n {
            let mut buf: Box<[C]> = parent.buf.clone();
            let coparent = &self.flushed[rng.gen_range(0..self.flushed.len())];
            mutate::mutate(&mut buf, coparent.buf(), &self.interesting, rng);
            children.push(buf);
        }
        children
    }

    /// How stale the edges `cov` sits on are, relative to the staleness
    /// spread across the whole upper bound. 0 when `cov` ties no covered
    /// edge or no spread exists.
    pub fn staleness_score(&self, cov: &CoverageMap) -> u32 {
        let mut my_min: Option<u32> = None;
        let mut global_min: Option<u32> = None;
        let mut global_max: u32 = 0;
        for i in 0..MAP_SIZE {
            if !self.upper_bound.edge_covered(i) {
                continue;
            }
            let s = self.staleness[i];
            global_min = Some(global_min.map_or(s, |g| g.min(s)));
            global_max = global_max.max(s);
            if self.upper_bound.edge_equal(cov, i) {
                my_min = Some(my_min.map_or(s, |m| m.min(s)));
            }
        }
        match (my_min, global_min) {
            (Some(mine), Some(global)) if global_max > 0 => {
                ((MAX_STALENESS as u64 * (mine - global) as u64) / global_max as u64) as u32
            }
            _ => 0,
        }
    }

    /// Mined interesting characters (plus any suggestion harvest), sorted
    /// and deduplicated; the `replace_with_special` pool.
    pub fn set_interesting(&mut self, mut chars: Vec<C>) {
        chars.sort();
        chars.dedup();
        self.interesting = chars;
    }

    pub fn interesting(&self) -> &[C] {
        &self.interesting
    }

    /// Fold the suggestion characters of an accepted execution into the
    /// interesting pool.
    pub fn add_suggested_chars(&mut self, cov: &CoverageMap) {
        for s in cov.suggestions() {
            if s.ch == 0 {
                continue;
            }
            let c = C::from_u32(s.ch as u32);
            if let Err(at) = self.interesting.binary_search(&c) {
                self.interesting.insert(at, c);
            }
        }
    }

    pub fn flushed_len(&self) -> usize {
        self.flushed.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn entry(&self, idx: usize) -> &CorpusEntry<C> {
        &self.flushed[idx]
    }

    pub fn upper_bound(&self) -> &CoverageMap {
        &self.upper_bound
    }

    /// The flushed-or-pending entry with the greatest coverage total.
    pub fn maximizing_entry(&self) -> Option<&CorpusEntry<C>> {
        self.maximizing.as_ref()
    }

    /// Approximate resident bytes, for debug diagnostics.
    pub fn memory_footprint(&self) -> usize {
        let per_entry = std::mem::size_of::<C>() * self.flushed.first().map_or(0, |e| e.len())
            + MAP_SIZE;
        (self.flushed.len() + self.pending.len() + 1) * per_entry
            + self.staleness.len() * std::mem::size_of::<u32>()
    }
}

impl<C: CodeUnit> Default for Corpus<C> {
    fn default() -> Self {
        Self::new()
    }
}
