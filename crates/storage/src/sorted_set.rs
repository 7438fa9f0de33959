//! Sorted set: members ordered by score
//!
//! Two indices over the same data:
//! - `scores`: member -> score, for O(log n) membership and score lookup
//! - `ordered`: (score, member), for range scans in score order
//!
//! Ties on score are broken by member bytes. `-0.0` is normalized to `0.0`
//! so the two zeros compare equal, and NaN scores are refused.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use ttseries_core::{Error, Member, Order, Result, ScanPage, ScoreRange, ScoredMember};

/// Score with a total order
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

fn normalize(score: f64) -> Result<f64> {
    if score.is_nan() {
        return Err(Error::InvalidTimestamp(score));
    }
    Ok(if score == 0.0 { 0.0 } else { score })
}

/// Resolve a possibly-negative inclusive rank window against `len`
pub(crate) fn resolve_ranks(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let n = len as i64;
    let start = if start < 0 { (start + n).max(0) } else { start };
    let stop = if stop < 0 { stop + n } else { stop.min(n - 1) };
    if n == 0 || start > stop || start >= n {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Sorted set value
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    scores: BTreeMap<Member, f64>,
    ordered: BTreeSet<(Score, Member)>,
}

impl SortedSet {
    /// Create an empty sorted set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// True if there are no members
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Insert or re-score a member. Returns true if the member is new.
    pub fn insert(&mut self, score: f64, member: Member) -> Result<bool> {
        let score = normalize(score)?;
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.clone()));
                self.ordered.insert((Score(score), member));
                Ok(false)
            }
            None => {
                self.ordered.insert((Score(score), member));
                Ok(true)
            }
        }
    }

    /// Remove a member. Returns true if it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(Score(score), member.to_vec()));
                true
            }
            None => false,
        }
    }

    fn in_range(&self, range: ScoreRange) -> impl Iterator<Item = &(Score, Member)> + '_ {
        let lower = match range.min {
            Bound::Included(m) | Bound::Excluded(m) => Bound::Included((Score(m), Vec::new())),
            Bound::Unbounded => Bound::Unbounded,
        };
        self.ordered
            .range((lower, Bound::Unbounded))
            .skip_while(move |(s, _)| !range.contains(s.0))
            .take_while(move |(s, _)| range.contains(s.0))
    }

    /// Number of members with score in `range`
    pub fn count(&self, range: ScoreRange) -> usize {
        self.in_range(range).count()
    }

    /// Members with score in `range`, in `order`, after `offset`, at most `limit`
    pub fn range_by_score(
        &self,
        range: ScoreRange,
        order: Order,
        offset: usize,
        limit: Option<usize>,
    ) -> Vec<ScoredMember> {
        let limit = limit.unwrap_or(usize::MAX);
        let to_pair = |(s, m): &(Score, Member)| (m.clone(), s.0);
        match order {
            Order::Ascending => self
                .in_range(range)
                .skip(offset)
                .take(limit)
                .map(to_pair)
                .collect(),
            Order::Descending => {
                let mut matched: Vec<&(Score, Member)> = self.in_range(range).collect();
                matched.reverse();
                matched
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .map(to_pair)
                    .collect()
            }
        }
    }

    /// Members between ranks `start` and `stop` (inclusive, negative from end)
    pub fn range_by_rank(&self, start: i64, stop: i64) -> Vec<ScoredMember> {
        match resolve_ranks(self.len(), start, stop) {
            Some((start, stop)) => self
                .ordered
                .iter()
                .skip(start)
                .take(stop - start + 1)
                .map(|(s, m)| (m.clone(), s.0))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ascending rank of a member
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = *self.scores.get(member)?;
        Some(
            self.ordered
                .range(..(Score(score), member.to_vec()))
                .count(),
        )
    }

    /// Score of a member
    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Remove members with score in `range`, returning how many
    pub fn remove_range_by_score(&mut self, range: ScoreRange) -> usize {
        let doomed: Vec<Member> = self.in_range(range).map(|(_, m)| m.clone()).collect();
        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }

    /// Remove members between ranks, returning how many
    pub fn remove_range_by_rank(&mut self, start: i64, stop: i64) -> usize {
        let doomed = self.range_by_rank(start, stop);
        for (member, _) in &doomed {
            self.remove(member);
        }
        doomed.len()
    }

    /// One page of a member-ordered scan
    pub fn scan(&self, cursor: u64, count: usize) -> ScanPage<ScoredMember> {
        let start = cursor as usize;
        let count = count.max(1);
        let items: Vec<ScoredMember> = self
            .scores
            .iter()
            .skip(start)
            .take(count)
            .map(|(m, s)| (m.clone(), *s))
            .collect();
        let next = start + items.len();
        ScanPage {
            cursor: if next >= self.len() { 0 } else { next as u64 },
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(pairs: &[(f64, &str)]) -> SortedSet {
        let mut set = SortedSet::new();
        for (score, member) in pairs {
            set.insert(*score, member.as_bytes().to_vec()).unwrap();
        }
        set
    }

    #[test]
    fn test_insert_existing_member_rescores() {
        let mut set = SortedSet::new();
        assert!(set.insert(1.0, b"a".to_vec()).unwrap());
        assert!(!set.insert(2.0, b"a".to_vec()).unwrap());
        assert_eq!(set.len(), 1);
        assert_eq!(set.score(b"a"), Some(2.0));
    }

    #[test]
    fn test_nan_rejected() {
        let mut set = SortedSet::new();
        assert!(matches!(
            set.insert(f64::NAN, b"a".to_vec()),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_range_by_score_orders() {
        let set = set_of(&[(3.0, "c"), (1.0, "a"), (2.0, "b")]);
        let asc = set.range_by_score(ScoreRange::all(), Order::Ascending, 0, None);
        assert_eq!(asc.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
        let desc = set.range_by_score(ScoreRange::all(), Order::Descending, 0, Some(2));
        assert_eq!(desc.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec![3.0, 2.0]);
    }

    #[test]
    fn test_exclusive_bounds() {
        let set = set_of(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        let range = ScoreRange::between(Some(1.0), None).exclusive_start(1.0);
        assert_eq!(set.count(range), 2);
    }

    #[test]
    fn test_rank_and_negative_rank_ranges() {
        let set = set_of(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);
        assert_eq!(set.rank(b"c"), Some(2));
        assert_eq!(set.rank(b"z"), None);
        let last_two = set.range_by_rank(-2, -1);
        assert_eq!(last_two.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec![3.0, 4.0]);
        assert!(set.range_by_rank(0, -5).is_empty());
    }

    #[test]
    fn test_remove_range_by_rank_keeps_newest() {
        let mut set = set_of(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);
        // keep the newest 3
        assert_eq!(set.remove_range_by_rank(0, -4), 1);
        assert_eq!(set.len(), 3);
        // within the bound, nothing to do
        assert_eq!(set.remove_range_by_rank(0, -4), 0);
    }

    #[test]
    fn test_scan_visits_everything() {
        let set = set_of(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        let mut cursor = 0;
        let mut seen = 0;
        loop {
            let page = set.scan(cursor, 2);
            seen += page.items.len();
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_negative_zero_is_zero() {
        let set = set_of(&[(-0.0, "a")]);
        assert_eq!(set.count(ScoreRange::exact(0.0)), 1);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone)]
    enum Op {
        Insert(i16, u8),
        Remove(u8),
        TrimOldest(u8),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (any::<i16>(), 0u8..32).prop_map(|(s, m)| Op::Insert(s, m)),
            1 => (0u8..32).prop_map(Op::Remove),
            1 => (0u8..4).prop_map(Op::TrimOldest),
        ]
    }

    /// Ordered `(score, member)` view of a plain member -> score map
    fn model_order(model: &BTreeMap<u8, i16>) -> Vec<(Member, f64)> {
        let mut pairs: Vec<(i16, u8)> = model.iter().map(|(m, s)| (*s, *m)).collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(s, m)| (vec![m], f64::from(s)))
            .collect()
    }

    proptest! {
        #[test]
        fn matches_reference_model(ops in prop::collection::vec(arb_op(), 0..64)) {
            let mut set = SortedSet::new();
            let mut model: BTreeMap<u8, i16> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Insert(score, member) => {
                        let fresh = set.insert(f64::from(score), vec![member]).unwrap();
                        prop_assert_eq!(fresh, model.insert(member, score).is_none());
                    }
                    Op::Remove(member) => {
                        prop_assert_eq!(set.remove(&[member]), model.remove(&member).is_some());
                    }
                    Op::TrimOldest(count) => {
                        let ordered = model_order(&model);
                        let doomed = ordered.len().min(count as usize);
                        for (member, _) in &ordered[..doomed] {
                            model.remove(&member[0]);
                        }
                        if count > 0 {
                            let removed = set.remove_range_by_rank(0, count as i64 - 1);
                            prop_assert_eq!(removed, doomed);
                        }
                    }
                }
            }

            let expected = model_order(&model);
            prop_assert_eq!(set.len(), expected.len());
            prop_assert_eq!(set.range_by_rank(0, -1), expected.clone());
            for (rank, (member, score)) in expected.iter().enumerate() {
                prop_assert_eq!(set.rank(member), Some(rank));
                prop_assert_eq!(set.score(member), Some(*score));
            }
        }
    }
}
