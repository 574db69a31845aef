//! Item filter assembly.
//!
//! Builds the predicate ANDed with every candidate id list: subtype rules,
//! hidden-item suppression, the configured free-form SQL and, when the
//! repository has an ancestor closure table, the location rules. Without a
//! closure table the location rules are left to the genealogist.

use crate::config::{HiddenItems, TraversalConfig, VolumeTypeFilter};
use crate::locations::signed_ids;
use crate::query::{Column, CompareOp, Operand, Predicate, Query, Value, View};
use crate::repository::HIDDEN_CATALOG;

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFilters {
    predicate: Predicate,
    needs_genealogist: bool,
}

impl ItemFilters {
    #[must_use]
    pub fn new(config: &TraversalConfig, closure_available: bool) -> Self {
        let needs_genealogist = config.has_location_filters() && !closure_available;

        let mut parts = vec![
            type_predicate(config),
            hidden_predicate(&config.hidden_items, closure_available),
            volume_predicate(config),
        ];
        if closure_available {
            parts.push(inclusion_predicate(&config.included_locations));
            parts.push(exclusion_predicate(&config.excluded_locations));
        }
        if let Some(sql) = config.sql_where.as_deref() {
            parts.push(Predicate::Raw(sql.trim().to_string()));
        }

        Self {
            predicate: Predicate::and(parts),
            needs_genealogist,
        }
    }

    #[must_use]
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Location rules must be checked by walking ancestors
    #[must_use]
    pub fn needs_genealogist(&self) -> bool {
        self.needs_genealogist
    }

    /// Candidate id list combined with the item filter
    #[must_use]
    pub fn for_candidates(&self, ids: Vec<i64>) -> Predicate {
        Predicate::and([
            Predicate::in_list(Column::DataId, ids),
            self.predicate.clone(),
        ])
    }
}

fn type_predicate(config: &TraversalConfig) -> Predicate {
    let mut parts = Vec::new();
    if !config.included_types.is_empty() {
        parts.push(Predicate::in_list(
            Column::SubType,
            config.included_types.clone(),
        ));
    }
    if !config.excluded_types.is_empty() {
        parts.push(Predicate::not_in_list(
            Column::SubType,
            config.excluded_types.clone(),
        ));
    }
    Predicate::and(parts)
}

fn hidden_predicate(hidden: &HiddenItems, closure_available: bool) -> Predicate {
    let shown_types = match hidden {
        HiddenItems::ShowAll => return Predicate::True,
        HiddenItems::HideAll => Vec::new(),
        HiddenItems::ShowTypes(types) => types.clone(),
    };

    let visible = Predicate::compare(Column::Catalog, CompareOp::Ne, Value::Int(HIDDEN_CATALOG));
    let own = if shown_types.is_empty() {
        visible
    } else {
        Predicate::or([
            visible,
            Predicate::in_list(Column::SubType, shown_types.clone()),
        ])
    };
    if !closure_available {
        return own;
    }

    let mut hidden_containers = vec![Predicate::compare(
        Column::Catalog,
        CompareOp::Eq,
        Value::Int(HIDDEN_CATALOG),
    )];
    if !shown_types.is_empty() {
        hidden_containers.push(Predicate::not_in_list(Column::SubType, shown_types));
    }
    let hidden_ids =
        Query::select(View::DTree, &[Column::DataId]).filter(Predicate::and(hidden_containers));
    let below_hidden = Query::select(View::DTreeAncestors, &[Column::DataId])
        .filter(Predicate::in_query(Column::AncestorId, hidden_ids));

    Predicate::and([own, Predicate::not_in_query(Column::DataId, below_hidden)])
}

fn volume_predicate(config: &TraversalConfig) -> Predicate {
    let applies = match config.volume_type_filter {
        VolumeTypeFilter::Always => true,
        VolumeTypeFilter::WithoutIncludedLocations => config.included_locations.is_empty(),
    };
    if !applies || config.excluded_volume_types.is_empty() {
        return Predicate::True;
    }
    let volumes = Query::select(View::DTree, &[Column::DataId]).filter(Predicate::in_list(
        Column::SubType,
        config.excluded_volume_types.clone(),
    ));
    Predicate::not_in_query(Operand::Negated(Column::OwnerId), volumes)
}

fn descendants_of(ids: Vec<i64>) -> Query {
    Query::select(View::DTreeAncestors, &[Column::DataId])
        .filter(Predicate::in_list(Column::AncestorId, ids))
}

fn inclusion_predicate(locations: &[i64]) -> Predicate {
    if locations.is_empty() {
        return Predicate::True;
    }
    let ids = signed_ids(locations);
    Predicate::or([
        Predicate::in_list(Column::DataId, ids.clone()),
        Predicate::in_query(Column::DataId, descendants_of(ids)),
    ])
}

fn exclusion_predicate(locations: &[i64]) -> Predicate {
    if locations.is_empty() {
        return Predicate::True;
    }
    let ids = signed_ids(locations);
    Predicate::and([
        Predicate::not_in_list(Column::DataId, ids.clone()),
        Predicate::not_in_query(Column::DataId, descendants_of(ids)),
    ])
}
