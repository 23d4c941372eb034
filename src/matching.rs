//! Time-offset clustering and scoring of candidate postings.
//!
//! A true match shows up as many postings whose `stored - query` offset
//! agrees; chance hash collisions scatter.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{Fingerprint, SongId};
use crate::storage::Posting;

/// A query fingerprint as matching sees it: `(hash_value, time_offset_ms)`.
type QueryKey = (u32, u32);

/// Query fingerprints reduced to what matching needs: every offset of each
/// distinct hash among the first `cap` fingerprints, plus the full query size
/// used for confidence.
#[derive(Debug, Clone)]
pub struct QueryHashes {
    offsets: HashMap<u32, Vec<u32>>,
    used: usize,
    total: usize,
}

impl QueryHashes {
    /// Uses at most `cap` fingerprints, taken in order.
    pub fn new(fingerprints: &[Fingerprint], cap: usize) -> Self {
        let used = &fingerprints[..fingerprints.len().min(cap)];
        let mut offsets: HashMap<u32, Vec<u32>> = HashMap::with_capacity(used.len());
        for fp in used {
            offsets.entry(fp.hash_value).or_default().push(fp.time_offset_ms);
        }
        for list in offsets.values_mut() {
            list.sort_unstable();
            list.dedup();
        }
        Self {
            offsets,
            used: used.len(),
            total: fingerprints.len(),
        }
    }

    /// Size of the whole query, including fingerprints past the cap.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Fingerprints taken into account for lookups.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Distinct hashes in ascending order.
    pub fn distinct(&self) -> Vec<u32> {
        let mut hashes: Vec<u32> = self.offsets.keys().copied().collect();
        hashes.sort_unstable();
        hashes
    }

    /// Ascending query offsets carrying `hash`; empty when absent.
    pub fn offsets_of(&self, hash: u32) -> &[u32] {
        self.offsets.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
struct Cluster {
    representative: i64,
    members: HashSet<QueryKey>,
}

/// Greedy 1-D clustering: an offset joins the first cluster whose
/// representative is within tolerance, otherwise it founds a new one.
///
/// A cluster's size is the number of distinct query fingerprints in it, so a
/// hash repeated many times in the reference adds one member, not many.
#[derive(Debug, Clone)]
pub struct OffsetClusters {
    tolerance: i64,
    clusters: Vec<Cluster>,
}

impl OffsetClusters {
    pub fn new(tolerance_ms: u32) -> Self {
        Self {
            tolerance: tolerance_ms as i64,
            clusters: Vec::new(),
        }
    }

    pub fn add(&mut self, offset: i64, member: QueryKey) {
        let tolerance = self.tolerance;
        match self
            .clusters
            .iter_mut()
            .find(|c| (offset - c.representative).abs() <= tolerance)
        {
            Some(cluster) => {
                cluster.members.insert(member);
            }
            None => self.clusters.push(Cluster {
                representative: offset,
                members: HashSet::from([member]),
            }),
        }
    }

    /// Largest cluster as `(representative, size)`; the earliest created wins ties.
    pub fn best(&self) -> Option<(i64, usize)> {
        self.clusters
            .iter()
            .map(|c| (c.representative, c.members.len()))
            .fold(None, |best, candidate| match best {
                Some((_, size)) if size >= candidate.1 => best,
                _ => Some(candidate),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongScore {
    pub song_id: SongId,
    /// Query fingerprints in the winning offset cluster.
    pub match_count: usize,
    /// Query fingerprints with any posting in this song.
    pub total_matches: usize,
    pub confidence: f64,
    /// Representative offset of the winning cluster; may be negative.
    pub offset_ms: i64,
}

/// Scores every song matched by at least `min_matches` query fingerprints.
///
/// Each posting is paired with every query offset of its hash. The pairs are
/// put into a canonical order first, so the result does not depend on the
/// order the store returned postings in.
pub fn score_candidates(
    postings: &[Posting],
    query: &QueryHashes,
    min_matches: usize,
    tolerance_ms: u32,
) -> Vec<SongScore> {
    // (song, query offset, stored offset, hash)
    let mut pairs: Vec<(SongId, u32, u32, u32)> = Vec::new();
    for p in postings {
        for &query_offset in query.offsets_of(p.hash_value) {
            pairs.push((p.song_id, query_offset, p.time_offset_ms, p.hash_value));
        }
    }
    pairs.sort_unstable();
    pairs.dedup();

    let mut scores = Vec::new();
    for group in pairs.chunk_by(|a, b| a.0 == b.0) {
        let matched: HashSet<QueryKey> = group.iter().map(|&(_, q, _, h)| (h, q)).collect();
        if matched.len() < min_matches {
            continue;
        }
        let mut clusters = OffsetClusters::new(tolerance_ms);
        for &(_, query_offset, stored_offset, hash) in group {
            clusters.add(stored_offset as i64 - query_offset as i64, (hash, query_offset));
        }
        let Some((offset_ms, match_count)) = clusters.best() else {
            continue;
        };
        scores.push(SongScore {
            song_id: group[0].0,
            match_count,
            total_matches: matched.len(),
            confidence: confidence(match_count, query.total(), matched.len()),
            offset_ms,
        });
    }
    scores
}

pub fn confidence(match_count: usize, query_total: usize, song_total: usize) -> f64 {
    if query_total == 0 || song_total == 0 {
        return 0.0;
    }
    let coverage = match_count as f64 / query_total as f64;
    let coherence = match_count as f64 / song_total as f64;
    (coverage * (1.0 + coherence)).clamp(0.0, 1.0)
}

/// Most matches, then higher confidence, then lower id.
pub fn select_best(scores: &[SongScore]) -> Option<&SongScore> {
    scores.iter().min_by(|a, b| {
        b.match_count
            .cmp(&a.match_count)
            .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
            .then(a.song_id.cmp(&b.song_id))
    })
}
