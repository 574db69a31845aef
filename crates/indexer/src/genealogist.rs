//! Ancestor resolution without a closure table.
//!
//! Each candidate walks up its parent chain until an id is found in one of the
//! location sets or in one of the two caches of already-resolved ids. Every id
//! visited on the way inherits the verdict and is cached, so later candidates
//! sharing part of the chain stop early.
//!
//! The three strategies differ only in how parent links are fetched:
//!
//! ```text
//! Single  ── one query per hop, candidates walked one after another
//! Batch   ── all walks advance together, one query per frontier
//! Hybrid  ── like Batch, but small frontiers use per-id queries
//! ```

use crate::config::GenealogistKind;
use crate::error::{IndexerError, Result};
use crate::locations::LocationSets;
use crate::query::{Column, CompareOp, Predicate, Query, Row, Value, View};
use crate::repository::{Repository, ROOT_ID};
use doctrail_cache::{Cache, CacheStatistics};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Frontiers smaller than this are fetched id by id in hybrid mode
pub const HYBRID_BATCH_THRESHOLD: usize = 4;

const MAX_IN_LIST: usize = 1000;

/// An item to resolve, with the parent link its row already carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: i64,
    pub parent_id: i64,
}

impl Candidate {
    #[must_use]
    pub fn new(id: i64, parent_id: i64) -> Self {
        Self { id, parent_id }
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.int(Column::DataId)?,
            parent_id: row.int(Column::ParentId)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenealogistStatistics {
    pub nodes: u64,
    pub queries: u64,
    pub included_cache: CacheStatistics,
    pub excluded_cache: CacheStatistics,
}

impl fmt::Display for GenealogistStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} queries; included cache: {}; excluded cache: {}",
            self.nodes, self.queries, self.included_cache, self.excluded_cache
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Included,
    Excluded,
}

struct Walk {
    candidate: i64,
    current: i64,
    known_parent: Option<i64>,
    visited: Vec<i64>,
    awaiting: Option<i64>,
    fate: Option<Fate>,
}

pub struct Genealogist {
    repository: Arc<dyn Repository>,
    kind: GenealogistKind,
    locations: LocationSets,
    included_cache: Cache<i64>,
    excluded_cache: Cache<i64>,
    nodes: u64,
    queries: u64,
}

impl Genealogist {
    #[must_use]
    pub fn new(
        repository: Arc<dyn Repository>,
        kind: GenealogistKind,
        locations: LocationSets,
        cache_min_capacity: usize,
        cache_max_capacity: usize,
    ) -> Self {
        Self {
            repository,
            kind,
            locations,
            included_cache: Cache::new(cache_min_capacity, cache_max_capacity),
            excluded_cache: Cache::new(cache_min_capacity, cache_max_capacity),
            nodes: 0,
            queries: 0,
        }
    }

    #[must_use]
    pub fn kind(&self) -> GenealogistKind {
        self.kind
    }

    #[must_use]
    pub fn statistics(&self) -> GenealogistStatistics {
        GenealogistStatistics {
            nodes: self.nodes,
            queries: self.queries,
            included_cache: self.included_cache.statistics(),
            excluded_cache: self.excluded_cache.statistics(),
        }
    }

    /// Ids of the candidates inside the included locations, in candidate
    /// order, or `None` when nothing matched
    pub fn matching_descendants(&mut self, candidates: &[Candidate]) -> Result<Option<Vec<i64>>> {
        let matches = match self.kind {
            GenealogistKind::Single => self.resolve_sequentially(candidates)?,
            GenealogistKind::Batch | GenealogistKind::Hybrid => {
                self.resolve_by_frontier(candidates)?
            }
        };
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches)
        })
    }

    fn resolve_sequentially(&mut self, candidates: &[Candidate]) -> Result<Vec<i64>> {
        let mut matches = Vec::new();
        for candidate in candidates {
            if self.walk(candidate)? == Fate::Included {
                matches.push(candidate.id);
            }
        }
        Ok(matches)
    }

    fn walk(&mut self, candidate: &Candidate) -> Result<Fate> {
        let mut visited: Vec<i64> = Vec::new();
        let mut current = candidate.id;
        let mut known_parent = Some(candidate.parent_id);

        loop {
            if let Some(fate) = self.step(current, &visited) {
                self.backfill(fate, &visited);
                return Ok(fate);
            }
            visited.push(current);

            let parent = match known_parent.take() {
                Some(parent) => Some(parent),
                None => self.fetch_parent(lookup_key(current))?,
            };
            match parent {
                Some(parent) => current = parent,
                None => {
                    self.backfill(Fate::Excluded, &visited);
                    return Ok(Fate::Excluded);
                }
            }
        }
    }

    fn resolve_by_frontier(&mut self, candidates: &[Candidate]) -> Result<Vec<i64>> {
        let mut walks: Vec<Walk> = candidates
            .iter()
            .map(|c| Walk {
                candidate: c.id,
                current: c.id,
                known_parent: Some(c.parent_id),
                visited: Vec::new(),
                awaiting: None,
                fate: None,
            })
            .collect();

        loop {
            let mut frontier: Vec<i64> = Vec::new();
            let mut seen: HashSet<i64> = HashSet::new();

            for walk in walks.iter_mut().filter(|w| w.fate.is_none()) {
                loop {
                    if let Some(fate) = self.step(walk.current, &walk.visited) {
                        self.backfill(fate, &walk.visited);
                        walk.fate = Some(fate);
                        break;
                    }
                    walk.visited.push(walk.current);
                    if let Some(parent) = walk.known_parent.take() {
                        walk.current = parent;
                        continue;
                    }
                    let key = lookup_key(walk.current);
                    walk.awaiting = Some(key);
                    if seen.insert(key) {
                        frontier.push(key);
                    }
                    break;
                }
            }

            if frontier.is_empty() {
                break;
            }

            let parents = self.fetch_parents(&frontier)?;
            for walk in walks.iter_mut().filter(|w| w.fate.is_none()) {
                let Some(key) = walk.awaiting.take() else {
                    continue;
                };
                match parents.get(&key) {
                    Some(parent) => walk.current = *parent,
                    None => {
                        self.backfill(Fate::Excluded, &walk.visited);
                        walk.fate = Some(Fate::Excluded);
                    }
                }
            }
        }

        Ok(walks
            .into_iter()
            .filter(|w| w.fate == Some(Fate::Included))
            .map(|w| w.candidate)
            .collect())
    }

    /// Verdict for `id`, or `None` when the walk must continue upwards
    fn step(&mut self, id: i64, visited: &[i64]) -> Option<Fate> {
        self.nodes += 1;
        if self.excluded_cache.contains(&id) || self.locations.is_excluded(id) {
            return Some(Fate::Excluded);
        }
        if self.included_cache.contains(&id) || self.locations.is_included(id) {
            return Some(Fate::Included);
        }
        // The root matched neither side, or the chain loops.
        if id == ROOT_ID || visited.contains(&id) {
            return Some(Fate::Excluded);
        }
        None
    }

    fn backfill(&mut self, fate: Fate, visited: &[i64]) {
        let ids = visited
            .iter()
            .flat_map(|&id| [id, -id])
            .filter(|&id| id != ROOT_ID);
        match fate {
            Fate::Included => self.included_cache.add_all(ids),
            Fate::Excluded => self.excluded_cache.add_all(ids),
        };
    }

    fn fetch_parents(&mut self, keys: &[i64]) -> Result<HashMap<i64, i64>> {
        // Hybrid falls back to single lookups for small frontiers.
        let single = self.kind == GenealogistKind::Hybrid && keys.len() < HYBRID_BATCH_THRESHOLD;

        let mut parents = HashMap::with_capacity(keys.len());
        if single {
            for &key in keys {
                if let Some(parent) = self.fetch_parent(key)? {
                    parents.insert(key, parent);
                }
            }
        } else {
            for chunk in keys.chunks(MAX_IN_LIST) {
                let query = parent_query(Predicate::in_list(Column::DataId, chunk.to_vec()));
                for row in self.run(&query)? {
                    parents.insert(row.int(Column::DataId)?, row.int(Column::ParentId)?);
                }
            }
        }
        Ok(parents)
    }

    fn fetch_parent(&mut self, key: i64) -> Result<Option<i64>> {
        let query = parent_query(Predicate::compare(
            Column::DataId,
            CompareOp::Eq,
            Value::Int(key),
        ));
        match self.run(&query)?.first() {
            Some(row) => Ok(Some(row.int(Column::ParentId)?)),
            None => Ok(None),
        }
    }

    fn run(&mut self, query: &Query) -> Result<Vec<Row>> {
        self.queries += 1;
        self.repository
            .query(query)
            .map_err(|source| IndexerError::AncestryLookup {
                sql: query.to_sql(self.repository.dialect()),
                source,
            })
    }
}

impl fmt::Debug for Genealogist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Genealogist")
            .field("kind", &self.kind)
            .field("locations", &self.locations)
            .field("statistics", &self.statistics())
            .finish()
    }
}

fn parent_query(filter: Predicate) -> Query {
    Query::select(View::DTree, &[Column::DataId, Column::ParentId]).filter(filter)
}

/// Negated container ids are looked up under the container's own id
fn lookup_key(id: i64) -> i64 {
    if id < ROOT_ID {
        -id
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_format::parse_timestamp;
    use crate::error::RepositoryError;
    use crate::memory::{Item, MemoryRepository};
    use crate::query::Dialect;
    use pretty_assertions::assert_eq;

    const CANDIDATES: [i64; 10] = [1000, 1001, 1010, 2000, 2001, 2002, 3000, 3010, 3100, 10100];

    /// Tree where every id's parent is `id / 10`, single digits at the top
    fn decimal_tree() -> Arc<MemoryRepository> {
        let repo = MemoryRepository::new(Dialect::TopN);
        let modified = parse_timestamp("2001-01-01 00:00:00").expect("timestamp");
        let mut ids: HashSet<i64> = HashSet::new();
        for &candidate in &CANDIDATES {
            let mut id = candidate;
            while id > 0 && ids.insert(id) {
                id /= 10;
            }
        }
        for id in ids {
            repo.add_item(Item::new(id, parent_of(id), modified));
        }
        Arc::new(repo)
    }

    fn parent_of(id: i64) -> i64 {
        if id >= 10 {
            id / 10
        } else {
            ROOT_ID
        }
    }

    fn candidates() -> Vec<Candidate> {
        CANDIDATES
            .iter()
            .map(|&id| Candidate::new(id, parent_of(id)))
            .collect()
    }

    fn genealogist(
        repo: Arc<MemoryRepository>,
        kind: GenealogistKind,
        included: &[i64],
        excluded: &[i64],
    ) -> Genealogist {
        Genealogist::new(repo, kind, LocationSets::new(included, excluded), 10, 100)
    }

    #[test]
    fn every_strategy_matches_the_same_descendants() {
        for kind in [
            GenealogistKind::Single,
            GenealogistKind::Batch,
            GenealogistKind::Hybrid,
        ] {
            let mut g = genealogist(decimal_tree(), kind, &[10], &[2]);
            let matches = g.matching_descendants(&candidates()).expect("resolve");
            assert_eq!(matches, Some(vec![1000, 1001, 1010, 10100]), "{kind:?}");
        }
    }

    #[test]
    fn results_are_stable_with_warm_caches() {
        let mut g = genealogist(decimal_tree(), GenealogistKind::Batch, &[10], &[2]);
        let first = g.matching_descendants(&candidates()).expect("first");
        let queries = g.statistics().queries;
        let second = g.matching_descendants(&candidates()).expect("second");

        assert_eq!(first, second);
        let stats = g.statistics();
        assert_eq!(stats.queries, queries);
        assert!(stats.included_cache.hits > 0);
        assert!(stats.excluded_cache.hits > 0);
    }

    #[test]
    fn batching_issues_fewer_queries() {
        let repo = decimal_tree();
        let mut single = genealogist(repo.clone(), GenealogistKind::Single, &[10], &[2]);
        single.matching_descendants(&candidates()).expect("single");

        let mut batch = genealogist(repo, GenealogistKind::Batch, &[10], &[2]);
        batch.matching_descendants(&candidates()).expect("batch");

        assert!(batch.statistics().queries < single.statistics().queries);
    }

    #[test]
    fn empty_inclusions_default_to_everything_not_excluded() {
        let mut g = genealogist(decimal_tree(), GenealogistKind::Hybrid, &[], &[2]);
        let matches = g.matching_descendants(&candidates()).expect("resolve");
        assert_eq!(
            matches,
            Some(vec![1000, 1001, 1010, 3000, 3010, 3100, 10100])
        );
    }

    #[test]
    fn empty_exclusions_keep_only_included() {
        let mut g = genealogist(decimal_tree(), GenealogistKind::Single, &[3], &[]);
        let matches = g.matching_descendants(&candidates()).expect("resolve");
        assert_eq!(matches, Some(vec![3000, 3010, 3100]));
    }

    #[test]
    fn no_match_yields_none() {
        let mut g = genealogist(decimal_tree(), GenealogistKind::Batch, &[9], &[2]);
        assert_eq!(g.matching_descendants(&candidates()).expect("resolve"), None);
    }

    #[test]
    fn negated_container_ids_match() {
        let repo = MemoryRepository::new(Dialect::TopN);
        let modified = parse_timestamp("2001-01-01 00:00:00").expect("timestamp");
        repo.add_item(Item::new(500, ROOT_ID, modified));
        repo.add_item(Item::new(501, -500, modified));
        repo.add_item(Item::new(502, 501, modified));
        let repo = Arc::new(repo);

        for kind in [
            GenealogistKind::Single,
            GenealogistKind::Batch,
            GenealogistKind::Hybrid,
        ] {
            let mut g = genealogist(repo.clone(), kind, &[500], &[]);
            let matches = g
                .matching_descendants(&[Candidate::new(502, 501)])
                .expect("resolve");
            assert_eq!(matches, Some(vec![502]), "{kind:?}");
        }
    }

    #[test]
    fn a_location_is_inside_itself() {
        let mut g = genealogist(decimal_tree(), GenealogistKind::Single, &[100], &[]);
        let matches = g
            .matching_descendants(&[Candidate::new(100, 10), Candidate::new(1000, 100)])
            .expect("resolve");
        assert_eq!(matches, Some(vec![100, 1000]));
    }

    #[test]
    fn lookup_failures_propagate() {
        let repo = decimal_tree();
        repo.set_failing_view(Some(View::DTree));
        for kind in [
            GenealogistKind::Single,
            GenealogistKind::Batch,
            GenealogistKind::Hybrid,
        ] {
            let mut g = genealogist(repo.clone(), kind, &[10], &[2]);
            let err = g
                .matching_descendants(&candidates())
                .expect_err("lookup should fail");
            assert!(
                matches!(
                    err,
                    IndexerError::AncestryLookup {
                        source: RepositoryError::Query(_),
                        ..
                    }
                ),
                "{err:?}"
            );
        }
    }

    #[test]
    fn missing_parent_rows_end_the_walk() {
        let repo = Arc::new(MemoryRepository::new(Dialect::TopN));
        let mut g = genealogist(repo, GenealogistKind::Hybrid, &[], &[2]);
        let matches = g
            .matching_descendants(&[Candidate::new(71, 70)])
            .expect("resolve");
        assert_eq!(matches, None);
    }

    #[test]
    fn statistics_count_nodes_and_queries() {
        let mut g = genealogist(decimal_tree(), GenealogistKind::Single, &[10], &[2]);
        g.matching_descendants(&[Candidate::new(1000, 100)])
            .expect("resolve");
        let stats = g.statistics();
        // 1000, 100, 10
        assert_eq!(stats.nodes, 3);
        // parent of 100
        assert_eq!(stats.queries, 1);
        assert_eq!(stats.included_cache.entries, 4);
    }
}
