#![deny(warnings)]

//! Core catalog domain models and invariants for the overlay pass.
//!
//! This crate defines the serializable tables of the host catalog, the sparse
//! overlay descriptors merged onto them, and validation helpers that
//! guarantee the overlay is safe to merge.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Unique identifier for a catalog template, e.g. "5c0e2f26d09282029f5a3762".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

/// Category/price placement record for one template in the flat handbook list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandbookEntry {
    /// Template id this entry places.
    #[serde(rename = "Id")]
    pub id: TemplateId,
    /// Handbook category the template is filed under.
    #[serde(rename = "ParentId")]
    pub parent_id: String,
    /// Listed price in base currency units.
    #[serde(rename = "Price")]
    pub price: u64,
}

/// A trader's live assortment: sellable item instances plus pricing and
/// loyalty gating keyed by item-instance id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraderAssort {
    /// Sellable item instances (each carries its own `_id`).
    #[serde(default)]
    pub items: Vec<Value>,
    /// Barter price scheme per item-instance id.
    #[serde(default)]
    pub barter_scheme: BTreeMap<String, Value>,
    /// Required loyalty level per item-instance id.
    #[serde(default)]
    pub loyal_level_items: BTreeMap<String, u32>,
}

/// A weapon mastering progression group from the global configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteringGroup {
    /// Display name the group is matched by, e.g. "M4".
    #[serde(rename = "Name")]
    pub name: String,
    /// Template ids whose kills count toward this group.
    #[serde(rename = "Templates")]
    pub templates: Vec<TemplateId>,
}

/// Global configuration tables touched by the targeted fixups.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(rename = "Mastering", default)]
    pub mastering: Vec<MasteringGroup>,
}

/// The mutable catalog handed to the overlay pass by the host for the
/// duration of process startup.
///
/// Item templates are arbitrarily nested property trees; the catalog's
/// established conventions place reference lists at `_props.Slots`,
/// `_props.Chambers` and `_props.Cartridges` (each entry holding
/// `_props.filters[0].Filter`, the active allow-list) and the conflict list
/// at `_props.ConflictingItems`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Item templates keyed by template id.
    #[serde(default)]
    pub items: BTreeMap<TemplateId, Value>,
    /// Flat category/price placement list.
    #[serde(default)]
    pub handbook: Vec<HandbookEntry>,
    /// Per-language string tables keyed by language code.
    #[serde(default)]
    pub locales: BTreeMap<String, BTreeMap<String, String>>,
    /// Trader assortments keyed by trader id.
    #[serde(default)]
    pub traders: BTreeMap<String, TraderAssort>,
    /// Global configuration (mastering groups).
    #[serde(default)]
    pub globals: GlobalConfig,
    /// Quest templates keyed by quest id (arbitrary condition trees).
    #[serde(default)]
    pub quests: BTreeMap<String, Value>,
}

/// Category/price placement declared by an overlay entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandbookMeta {
    pub parent_id: String,
    pub price: u64,
}

/// Display strings for a new entity; one bundle reused verbatim across every
/// language table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleText {
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub description: String,
}

/// Sparse descriptor for one new entity derived from an existing template.
///
/// Only declared override paths change; everything else is inherited from
/// the clone source unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlayEntity {
    /// The entity is only materialized when true.
    #[serde(default)]
    pub enable: bool,
    /// Template id of the existing entity to derive from.
    pub clone: TemplateId,
    /// Sparse field overrides applied onto the clone source.
    #[serde(default)]
    pub overrides: Value,
    /// Extra ids allowed per named slot on the new entity itself.
    #[serde(default)]
    pub compatibilities: BTreeMap<String, Vec<TemplateId>>,
    /// Extra ids appended to the new entity's conflict list.
    #[serde(default)]
    pub conflicts: Vec<TemplateId>,
    /// Category/price placement.
    pub handbook: HandbookMeta,
    /// Display strings applied to every language table.
    pub locales: LocaleText,
}

/// The complete overlay pack: new entities plus per-trader additions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayPack {
    /// New entities keyed by the id they will occupy in the catalog.
    #[serde(default)]
    pub items: BTreeMap<TemplateId, OverlayEntity>,
    /// Assortment additions keyed by trader id.
    #[serde(default)]
    pub traders: BTreeMap<String, TraderAssort>,
}

/// Validation errors for overlay merge safety.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Overlay entity key must be a non-empty id.
    #[error("overlay entity has an empty id")]
    EmptyId,
    /// Clone source must name an id.
    #[error("overlay entity {0} has an empty clone source")]
    EmptyCloneSource(String),
    /// Override tree must be an object (or omitted entirely).
    #[error("overlay entity {0} declares a non-object override tree")]
    OverridesNotObject(String),
    /// Enabled entities must carry a display name.
    #[error("overlay entity {0} has an empty display name")]
    EmptyDisplayName(String),
    /// Handbook placement must name a category.
    #[error("overlay entity {0} has an empty handbook parent")]
    EmptyHandbookParent(String),
    /// Trader additions must be keyed by a non-empty trader id.
    #[error("overlay pack declares an empty trader id")]
    EmptyTraderId,
}

/// Validate a single overlay entity against the merge-safety invariants.
pub fn validate_overlay_entity(id: &TemplateId, entity: &OverlayEntity) -> Result<(), ValidationError> {
    if id.0.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if entity.clone.0.trim().is_empty() {
        return Err(ValidationError::EmptyCloneSource(id.0.clone()));
    }
    if !(entity.overrides.is_object() || entity.overrides.is_null()) {
        return Err(ValidationError::OverridesNotObject(id.0.clone()));
    }
    if entity.enable {
        if entity.locales.name.trim().is_empty() {
            return Err(ValidationError::EmptyDisplayName(id.0.clone()));
        }
        if entity.handbook.parent_id.trim().is_empty() {
            return Err(ValidationError::EmptyHandbookParent(id.0.clone()));
        }
    }
    Ok(())
}

/// Validate a whole overlay pack before it is merged.
pub fn validate_pack(pack: &OverlayPack) -> Result<(), ValidationError> {
    for (id, entity) in &pack.items {
        validate_overlay_entity(id, entity)?;
    }
    for trader_id in pack.traders.keys() {
        if trader_id.trim().is_empty() {
            return Err(ValidationError::EmptyTraderId);
        }
    }
    Ok(())
}
