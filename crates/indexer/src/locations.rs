use crate::repository::ROOT_ID;
use std::collections::HashSet;

/// Included and excluded location ids, as consulted during ancestor walks.
///
/// Containers can list their children under their negated id, so every
/// configured id is stored with its negation. The root sentinel lands in
/// whichever side was configured empty, which makes that side the default
/// fate of an item whose ancestry matches nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationSets {
    included: HashSet<i64>,
    excluded: HashSet<i64>,
}

impl LocationSets {
    #[must_use]
    pub fn new(included: &[i64], excluded: &[i64]) -> Self {
        Self {
            included: with_negations(included),
            excluded: with_negations(excluded),
        }
    }

    #[must_use]
    pub fn is_included(&self, id: i64) -> bool {
        self.included.contains(&id)
    }

    #[must_use]
    pub fn is_excluded(&self, id: i64) -> bool {
        self.excluded.contains(&id)
    }

    #[must_use]
    pub fn included(&self) -> &HashSet<i64> {
        &self.included
    }

    #[must_use]
    pub fn excluded(&self) -> &HashSet<i64> {
        &self.excluded
    }
}

fn with_negations(ids: &[i64]) -> HashSet<i64> {
    if ids.is_empty() {
        return HashSet::from([ROOT_ID]);
    }
    ids.iter().flat_map(|&id| [id, -id]).collect()
}

/// `ids` followed by their negations, without duplicates, in a stable order
#[must_use]
pub fn signed_ids(ids: &[i64]) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(ids.len() * 2);
    for &id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    for &id in ids {
        if !out.contains(&-id) {
            out.push(-id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_are_stored_with_negations() {
        let sets = LocationSets::new(&[10], &[2]);
        assert!(sets.is_included(10));
        assert!(sets.is_included(-10));
        assert!(sets.is_excluded(2));
        assert!(sets.is_excluded(-2));
        assert!(!sets.is_included(ROOT_ID));
        assert!(!sets.is_excluded(ROOT_ID));
    }

    #[test]
    fn empty_side_gets_root_sentinel() {
        let sets = LocationSets::new(&[], &[2]);
        assert_eq!(sets.included(), &HashSet::from([ROOT_ID]));

        let sets = LocationSets::new(&[10], &[]);
        assert_eq!(sets.excluded(), &HashSet::from([ROOT_ID]));
    }

    #[test]
    fn signed_ids_are_deduplicated() {
        assert_eq!(signed_ids(&[10, 2, 10]), vec![10, 2, -10, -2]);
        assert_eq!(signed_ids(&[]), Vec::<i64>::new());
    }
}
