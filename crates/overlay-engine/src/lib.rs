#![deny(warnings)]

//! The overlay merge engine for the catalog.
//!
//! Given a base catalog and a sparse overlay pack, this crate clones new
//! entities from existing templates, rewrites the catalog-wide reference
//! graph so the clones fit wherever their parents fit, injects localization
//! strings, merges trader assortments and applies the targeted fixups.
//!
//! The pass mutates the catalog in place and always runs to completion:
//! failures are scoped to the single entity or trader that caused them.

use catalog_core::{
    Catalog, HandbookEntry, LocaleText, OverlayEntity, OverlayPack, TemplateId, TraderAssort,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors scoped to a single overlay step; none of them abort the pass.
#[derive(Debug, Error, PartialEq)]
pub enum OverlayError {
    /// The overlay names a clone source missing from the catalog.
    #[error("clone source {0} not found in catalog")]
    MissingParent(String),
    /// The target id already exists, e.g. from an earlier run of the pass.
    #[error("entity {0} already exists in the catalog")]
    DuplicateEntity(String),
    /// The clone source is not an object tree.
    #[error("template {0} is not an object")]
    MalformedTemplate(String),
    /// An override tried to descend into a field the clone source lacks.
    #[error("override path {0} does not exist on the clone source")]
    MissingNestedField(String),
    /// Trader overlay or base assortment is absent.
    #[error("trader {0} has no assortment to merge")]
    MissingTraderData(String),
}

/// Outcome of one sparse merge: how many leaves were replaced and which
/// override keys the base tree does not carry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub replaced: usize,
    pub unknown_keys: Vec<String>,
}

/// Applies a sparse `overlay` tree onto `base` in place.
///
/// Scalar, array and null overlay leaves replace the base value wholesale
/// when the key exists (arrays are swapped entirely, never concatenated);
/// keys the base lacks are logged and left untouched. Nested objects
/// recurse. Descending into a base field that is absent or not itself an
/// object fails the merge.
pub fn merge(
    base: &mut Map<String, Value>,
    overlay: &Map<String, Value>,
) -> Result<MergeReport, OverlayError> {
    let mut report = MergeReport::default();
    merge_at(base, overlay, "", &mut report)?;
    Ok(report)
}

fn merge_at(
    base: &mut Map<String, Value>,
    overlay: &Map<String, Value>,
    path: &str,
    report: &mut MergeReport,
) -> Result<(), OverlayError> {
    for (key, value) in overlay {
        let full = join_path(path, key);
        match value {
            Value::Object(nested) => match base.get_mut(key) {
                Some(Value::Object(inner)) => merge_at(inner, nested, &full, report)?,
                _ => return Err(OverlayError::MissingNestedField(full)),
            },
            _ => {
                if let Some(slot) = base.get_mut(key) {
                    *slot = value.clone();
                    report.replaced += 1;
                } else {
                    warn!(path = %full, "override key not on clone source, keeping default");
                    report.unknown_keys.push(full);
                }
            }
        }
    }
    Ok(())
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Materializes one overlay entity from its clone source.
///
/// On success the new entity is fully present in the catalog with its own
/// compatibility and conflict edges applied, and is placed in the handbook.
/// Other entities' reference lists are untouched until [`propagate`] runs.
pub fn clone_entity(
    catalog: &mut Catalog,
    new_id: &TemplateId,
    decl: &OverlayEntity,
) -> Result<MergeReport, OverlayError> {
    if catalog.items.contains_key(new_id) {
        return Err(OverlayError::DuplicateEntity(new_id.0.clone()));
    }
    let mut entity = catalog
        .items
        .get(&decl.clone)
        .cloned()
        .ok_or_else(|| OverlayError::MissingParent(decl.clone.0.clone()))?;
    let tree = entity
        .as_object_mut()
        .ok_or_else(|| OverlayError::MalformedTemplate(decl.clone.0.clone()))?;
    tree.insert("_id".to_string(), Value::String(new_id.0.clone()));
    let report = match &decl.overrides {
        Value::Object(overrides) => merge(tree, overrides)?,
        _ => MergeReport::default(),
    };
    apply_own_edges(tree, decl);
    catalog.items.insert(new_id.clone(), entity);
    if !catalog.handbook.iter().any(|entry| entry.id == *new_id) {
        catalog.handbook.push(HandbookEntry {
            id: new_id.clone(),
            parent_id: decl.handbook.parent_id.clone(),
            price: decl.handbook.price,
        });
    }
    Ok(report)
}

/// Applies the overlay's self-declared compatibility and conflict edges to
/// the freshly cloned entity.
fn apply_own_edges(tree: &mut Map<String, Value>, decl: &OverlayEntity) {
    let Some(props) = tree.get_mut("_props").and_then(Value::as_object_mut) else {
        if !decl.compatibilities.is_empty() || !decl.conflicts.is_empty() {
            warn!("clone source has no _props table, declared edges dropped");
        }
        return;
    };
    for (slot_name, extra) in &decl.compatibilities {
        let mut matched = false;
        if let Some(slots) = props.get_mut("Slots").and_then(Value::as_array_mut) {
            for slot in slots {
                if slot.get("_name").and_then(Value::as_str) != Some(slot_name.as_str()) {
                    continue;
                }
                matched = true;
                if let Some(filter) = first_filter_mut(slot) {
                    for id in extra {
                        push_unique(filter, &id.0);
                    }
                }
            }
        }
        if !matched {
            warn!(slot = %slot_name, "no slot with this name on the new entity");
        }
    }
    if !decl.conflicts.is_empty() {
        let list = props
            .entry("ConflictingItems")
            .or_insert_with(|| Value::Array(vec![]));
        if let Some(list) = list.as_array_mut() {
            for id in &decl.conflicts {
                push_unique(list, &id.0);
            }
        }
    }
}

/// The active allow-list of a slot/chamber/cartridge entry: the first filter
/// group's `Filter` array. The catalog keeps one active filter set per
/// reference list.
fn first_filter_mut(entry: &mut Value) -> Option<&mut Vec<Value>> {
    entry
        .get_mut("_props")?
        .get_mut("filters")?
        .get_mut(0)?
        .get_mut("Filter")?
        .as_array_mut()
}

fn push_unique(list: &mut Vec<Value>, id: &str) -> bool {
    if list.iter().any(|v| v.as_str() == Some(id)) {
        return false;
    }
    list.push(Value::String(id.to_string()));
    true
}

/// Counts of reference and conflict lists patched by [`propagate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropagationStats {
    pub reference_lists: usize,
    pub conflict_lists: usize,
}

const REFERENCE_LIST_FIELDS: [&str; 3] = ["Slots", "Chambers", "Cartridges"];

/// Appends `new_id` beside `parent_id` in every reference and conflict list
/// of entities the overlay does not itself declare. This is what makes a
/// clone fit wherever its parent fit and conflict wherever its parent
/// conflicted.
///
/// Append-only and order-preserving: existing ids are never removed or
/// reordered, and lists already mentioning `new_id` are left alone.
pub fn propagate(
    catalog: &mut Catalog,
    overlay_ids: &BTreeSet<TemplateId>,
    parent_id: &TemplateId,
    new_id: &TemplateId,
) -> PropagationStats {
    let mut stats = PropagationStats::default();
    for (id, entity) in catalog.items.iter_mut() {
        if overlay_ids.contains(id) {
            continue;
        }
        let Some(props) = entity.get_mut("_props").and_then(Value::as_object_mut) else {
            continue;
        };
        for field in REFERENCE_LIST_FIELDS {
            let Some(entries) = props.get_mut(field).and_then(Value::as_array_mut) else {
                continue;
            };
            for entry in entries {
                let Some(filter) = first_filter_mut(entry) else {
                    continue;
                };
                if filter.iter().any(|v| v.as_str() == Some(parent_id.0.as_str()))
                    && push_unique(filter, &new_id.0)
                {
                    stats.reference_lists += 1;
                }
            }
        }
        if let Some(conflicts) = props.get_mut("ConflictingItems").and_then(Value::as_array_mut) {
            if conflicts.iter().any(|v| v.as_str() == Some(parent_id.0.as_str()))
                && push_unique(conflicts, &new_id.0)
            {
                stats.conflict_lists += 1;
            }
        }
    }
    stats
}

/// Injects the display strings for one new entity into every language table
/// present in the catalog. Keys are created when absent; there is no
/// per-language fallback. Returns the number of tables touched.
pub fn apply_locale(catalog: &mut Catalog, id: &TemplateId, text: &LocaleText) -> usize {
    for table in catalog.locales.values_mut() {
        table.insert(format!("{} Name", id.0), text.name.clone());
        table.insert(format!("{} ShortName", id.0), text.short_name.clone());
        table.insert(format!("{} Description", id.0), text.description.clone());
    }
    catalog.locales.len()
}

/// Counts of assortment records merged for one trader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssortStats {
    pub items_added: usize,
    pub barter_schemes: usize,
    pub loyalty_levels: usize,
}

/// Merges the overlay's additions for `trader_id` into the trader's live
/// assortment. Requires both the base assortment and the overlay's entry for
/// the trader. Sellable items are appended, skipping instance ids already
/// listed; barter schemes and loyalty levels are key-wise upserts.
pub fn merge_assort(
    catalog: &mut Catalog,
    trader_id: &str,
    pack: &OverlayPack,
) -> Result<AssortStats, OverlayError> {
    let additions: &TraderAssort = pack
        .traders
        .get(trader_id)
        .ok_or_else(|| OverlayError::MissingTraderData(trader_id.to_string()))?;
    let assort = catalog
        .traders
        .get_mut(trader_id)
        .ok_or_else(|| OverlayError::MissingTraderData(trader_id.to_string()))?;
    let mut stats = AssortStats::default();
    for item in &additions.items {
        let listed = item.get("_id").and_then(Value::as_str).is_some_and(|id| {
            assort
                .items
                .iter()
                .any(|existing| existing.get("_id").and_then(Value::as_str) == Some(id))
        });
        if listed {
            continue;
        }
        assort.items.push(item.clone());
        stats.items_added += 1;
    }
    for (key, scheme) in &additions.barter_scheme {
        assort.barter_scheme.insert(key.clone(), scheme.clone());
        stats.barter_schemes += 1;
    }
    for (key, level) in &additions.loyal_level_items {
        assort.loyal_level_items.insert(key.clone(), *level);
        stats.loyalty_levels += 1;
    }
    Ok(stats)
}

/// Template ids appended to mastering groups, matched by group display name.
const MASTERING_ADDITIONS: &[(&str, &[&str])] = &[
    (
        "MDR",
        &["67c263a4da87832028bdde5c", "67c263a4da87832028bdde5d"],
    ),
    ("M4", &["67c263a4da87832028bdde5e"]),
];

/// Quests whose weapon-kill counters also accept the new M4 variant.
const QUEST_WEAPON_ADDITIONS: &[(&str, &str)] = &[
    ("5a27bb8386f7741c770d2d0a", "67c263a4da87832028bdde5e"),
    ("5c0d4c12d09282029f539173", "67c263a4da87832028bdde5e"),
    ("63a9b229813bba58a50c9ee5", "67c263a4da87832028bdde5e"),
    ("64e7b9bffd30422ed03dad38", "67c263a4da87832028bdde5e"),
    ("666314b4d7f171c4c20226c3", "67c263a4da87832028bdde5e"),
];

/// Counts of targeted fixup edits applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixupStats {
    pub mastering_groups: usize,
    pub quest_conditions: usize,
}

/// Applies the hand-declared, id-keyed one-off edits: extends mastering
/// groups matched by name and widens the weapon-kill counters of a fixed set
/// of quests. All appends skip ids already present.
pub fn apply_fixups(catalog: &mut Catalog) -> FixupStats {
    let mut stats = FixupStats::default();
    for group in &mut catalog.globals.mastering {
        for (name, ids) in MASTERING_ADDITIONS {
            if group.name != *name {
                continue;
            }
            let mut changed = false;
            for id in *ids {
                if !group.templates.iter().any(|t| t.0 == *id) {
                    group.templates.push(TemplateId((*id).to_string()));
                    changed = true;
                }
            }
            if changed {
                stats.mastering_groups += 1;
            }
        }
    }
    for (quest_id, weapon_id) in QUEST_WEAPON_ADDITIONS {
        let Some(quest) = catalog.quests.get_mut(*quest_id) else {
            continue;
        };
        stats.quest_conditions += widen_weapon_counters(quest, weapon_id);
    }
    stats
}

/// Appends `weapon_id` to every weapon-counter sub-condition found under the
/// quest's finish conditions. Returns how many counters were widened.
fn widen_weapon_counters(quest: &mut Value, weapon_id: &str) -> usize {
    let mut widened = 0;
    let Some(conditions) = quest
        .get_mut("conditions")
        .and_then(|c| c.get_mut("AvailableForFinish"))
        .and_then(Value::as_array_mut)
    else {
        return 0;
    };
    for condition in conditions {
        let Some(counters) = condition
            .get_mut("counter")
            .and_then(|c| c.get_mut("conditions"))
            .and_then(Value::as_array_mut)
        else {
            continue;
        };
        for counter in counters {
            if let Some(weapons) = counter.get_mut("weapon").and_then(Value::as_array_mut) {
                if push_unique(weapons, weapon_id) {
                    widened += 1;
                }
            }
        }
    }
    widened
}

/// Per-step counts reported by one run of the overlay pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub entities_added: usize,
    pub entities_skipped: usize,
    pub entities_failed: usize,
    pub reference_lists_patched: usize,
    pub conflict_lists_patched: usize,
    pub locale_tables: usize,
    pub traders_merged: usize,
    pub traders_failed: usize,
    pub assort_items_added: usize,
    pub mastering_groups_patched: usize,
    pub quest_conditions_patched: usize,
}

/// Runs the complete overlay pass over the catalog.
///
/// Per entity: clone, then propagate through the reference graph, then
/// inject locales. Entities must exist in the catalog before anything else
/// can reference them, so the order is fixed. Per-entity and per-trader
/// failures are logged and skipped; the pass itself always completes.
pub fn apply_pack(catalog: &mut Catalog, pack: &OverlayPack) -> ApplySummary {
    let overlay_ids: BTreeSet<TemplateId> = pack.items.keys().cloned().collect();
    let mut summary = ApplySummary::default();
    for (new_id, decl) in &pack.items {
        if !decl.enable {
            summary.entities_skipped += 1;
            continue;
        }
        match clone_entity(catalog, new_id, decl) {
            Ok(report) => {
                if !report.unknown_keys.is_empty() {
                    warn!(
                        id = %new_id.0,
                        keys = report.unknown_keys.len(),
                        "overrides named fields the clone source lacks"
                    );
                }
                let stats = propagate(catalog, &overlay_ids, &decl.clone, new_id);
                summary.reference_lists_patched += stats.reference_lists;
                summary.conflict_lists_patched += stats.conflict_lists;
                summary.locale_tables = apply_locale(catalog, new_id, &decl.locales);
                summary.entities_added += 1;
            }
            Err(err) => {
                error!(id = %new_id.0, %err, "skipping overlay entity");
                summary.entities_failed += 1;
            }
        }
    }
    for trader_id in pack.traders.keys() {
        match merge_assort(catalog, trader_id, pack) {
            Ok(stats) => {
                summary.traders_merged += 1;
                summary.assort_items_added += stats.items_added;
            }
            Err(err) => {
                error!(trader = %trader_id, %err, "skipping trader assortment");
                summary.traders_failed += 1;
            }
        }
    }
    let fixups = apply_fixups(catalog);
    summary.mastering_groups_patched = fixups.mastering_groups;
    summary.quest_conditions_patched = fixups.quest_conditions;
    info!(
        added = summary.entities_added,
        skipped = summary.entities_skipped,
        failed = summary.entities_failed,
        traders = summary.traders_merged,
        "overlay pass complete"
    );
    summary
}
