//! Cross-document relations.
//!
//! Forward relations store target row ids in their cells. Back relations are
//! never stored: they are derived from the forward relation they mirror in the
//! target document.

use crate::document::{CellValue, ColumnValues};
use crate::error::{CellDbError, Result};
use crate::schema::{DatabaseContent, PropertyDef, PropertyKind, RelationConfig};
use crate::store::DocumentStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Documents loaded during one resolution pass, keyed by page id.
///
/// A failed load is cached as `None` so each page is read at most once per pass.
#[derive(Debug, Default)]
pub struct DocumentCache {
    documents: HashMap<String, Option<DatabaseContent>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached document, loading it from `store` on first use.
    pub fn get<S: DocumentStore + ?Sized>(
        &mut self,
        store: &S,
        page_id: &str,
    ) -> Option<&DatabaseContent> {
        if !self.documents.contains_key(page_id) {
            let loaded = match store.load_document(page_id) {
                Ok(content) => {
                    log::debug!("Loaded related document {page_id}");
                    Some(content)
                }
                Err(e) => {
                    log::warn!("Related document {page_id} unavailable: {e}");
                    None
                }
            };
            self.documents.insert(page_id.to_string(), loaded);
        }
        self.documents.get(page_id).and_then(Option::as_ref)
    }

    /// Seed the cache with an already-loaded document.
    pub fn insert(&mut self, page_id: &str, content: DatabaseContent) {
        self.documents.insert(page_id.to_string(), Some(content));
    }

    pub fn invalidate(&mut self, page_id: &str) {
        self.documents.remove(page_id);
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// A row offered by a relation's link picker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationTarget {
    pub id: String,
    pub title: String,
}

/// Resolved links for every relation property of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationResolution {
    /// property id -> row id -> linked target row ids
    pub values: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// property id -> rows of the target document, in document order
    pub targets: BTreeMap<String, Vec<RelationTarget>>,
}

impl RelationResolution {
    /// Target row ids linked from `row_id` through `property_id`.
    pub fn linked(&self, property_id: &str, row_id: &str) -> &[String] {
        self.values
            .get(property_id)
            .and_then(|rows| rows.get(row_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn targets(&self, property_id: &str) -> &[RelationTarget] {
        self.targets
            .get(property_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolved links as cell values, for filtering, sorting and formulas.
    pub fn column_values(&self) -> ColumnValues {
        self.values
            .iter()
            .map(|(prop, rows)| {
                let cells = rows
                    .iter()
                    .map(|(row, ids)| (row.clone(), CellValue::List(ids.clone())))
                    .collect();
                (prop.clone(), cells)
            })
            .collect()
    }
}

/// Rows of `target` as link-picker entries, titled by its first text property.
pub fn relation_targets(target: &DatabaseContent) -> Vec<RelationTarget> {
    let title = target.title_property();
    target
        .rows
        .iter()
        .map(|row| RelationTarget {
            id: row.id.clone(),
            title: title
                .map(|p| row.cell(&p.id).to_display_string())
                .unwrap_or_default(),
        })
        .collect()
}

/// Resolve every relation property of `content`.
///
/// Target documents come from `cache`, loading through `store` on a miss. A
/// target that cannot be loaded leaves its property with no targets, and back
/// relations over it resolve to empty link sets.
pub fn resolve_relations<S: DocumentStore + ?Sized>(
    content: &DatabaseContent,
    store: &S,
    cache: &mut DocumentCache,
) -> RelationResolution {
    let mut resolution = RelationResolution::default();

    for prop in &content.properties {
        let PropertyKind::Relation(config) = &prop.kind else {
            continue;
        };
        let target = cache.get(store, &config.database_page_id);

        resolution.targets.insert(
            prop.id.clone(),
            target.map(relation_targets).unwrap_or_default(),
        );

        let values = if config.is_back() {
            back_relation_values(content, prop, config, target)
        } else {
            content
                .rows
                .iter()
                .map(|row| (row.id.clone(), row.cell(&prop.id).as_id_list()))
                .collect()
        };
        resolution.values.insert(prop.id.clone(), values);
    }

    resolution
}

fn back_relation_values(
    content: &DatabaseContent,
    prop: &PropertyDef,
    config: &RelationConfig,
    target: Option<&DatabaseContent>,
) -> BTreeMap<String, Vec<String>> {
    let mut index: HashMap<String, Vec<String>> = HashMap::new();

    match (target, config.back_relation_property_id.as_deref()) {
        (Some(target), Some(forward_id)) => {
            if target.property(forward_id).is_none() {
                log::warn!(
                    "Back relation '{}' points at missing property {forward_id} in {}",
                    prop.name,
                    config.database_page_id
                );
            }
            for target_row in &target.rows {
                for id in target_row.cell(forward_id).as_id_list() {
                    let linked = index.entry(id).or_default();
                    if !linked.contains(&target_row.id) {
                        linked.push(target_row.id.clone());
                    }
                }
            }
        }
        (Some(_), None) => {
            log::warn!("Back relation '{}' has no forward property", prop.name);
        }
        (None, _) => {}
    }

    // Every row gets an entry, even with nothing linking to it
    content
        .rows
        .iter()
        .map(|row| (row.id.clone(), index.remove(&row.id).unwrap_or_default()))
        .collect()
}

/// Outcome of a back-relation edit: target rows that gained or lost the link.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackRelationUpdate {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl BackRelationUpdate {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Set the back-relation links of one row by editing the target document.
///
/// The target is re-read from `store` (never from `cache`), the forward
/// relation arrays of exactly the affected target rows gain or lose
/// `row_id`, and the target is written back in full. The cached copy is
/// invalidated afterwards.
///
/// This is a plain read-modify-write: a concurrent writer to the same target
/// document between the read and the write loses its change. Callers must
/// serialize edits per target document.
pub fn update_back_relation<S: DocumentStore + ?Sized>(
    store: &S,
    cache: &mut DocumentCache,
    content: &DatabaseContent,
    back_property_id: &str,
    row_id: &str,
    new_target_row_ids: &[String],
) -> Result<BackRelationUpdate> {
    let prop = content
        .property(back_property_id)
        .ok_or_else(|| CellDbError::PropertyNotFound(back_property_id.to_string()))?;
    let config = prop
        .relation_config()
        .filter(|c| c.is_back())
        .ok_or_else(|| {
            CellDbError::RelationResolution(format!("'{}' is not a back relation", prop.name))
        })?;
    let forward_id = config.back_relation_property_id.as_deref().ok_or_else(|| {
        CellDbError::RelationResolution(format!("'{}' has no forward property", prop.name))
    })?;
    if content.row(row_id).is_none() {
        return Err(CellDbError::RowNotFound(row_id.to_string()));
    }

    let page_id = &config.database_page_id;
    let mut target = store.load_document(page_id).map_err(|e| {
        CellDbError::RelationResolution(format!("Cannot load target document {page_id}: {e}"))
    })?;
    if !target
        .property(forward_id)
        .is_some_and(|p| matches!(p.kind, PropertyKind::Relation(_)))
    {
        return Err(CellDbError::RelationResolution(format!(
            "Target document {page_id} has no relation property {forward_id}"
        )));
    }

    let wanted: BTreeSet<&str> = new_target_row_ids.iter().map(String::as_str).collect();
    for id in &wanted {
        if target.row(id).is_none() {
            log::warn!("Ignoring link to unknown row {id} in {page_id}");
        }
    }

    let mut update = BackRelationUpdate::default();
    for target_row in target.rows.iter_mut() {
        let mut links = target_row.cell(forward_id).as_id_list();
        let linked = links.iter().any(|id| id == row_id);
        let should_link = wanted.contains(target_row.id.as_str());

        if should_link && !linked {
            links.push(row_id.to_string());
            update.added.push(target_row.id.clone());
        } else if linked && !should_link {
            links.retain(|id| id != row_id);
            update.removed.push(target_row.id.clone());
        } else {
            continue;
        }
        target_row.set_cell(forward_id, CellValue::List(links));
    }

    if !update.is_empty() {
        log::debug!(
            "Back relation '{}' on {row_id}: +{} -{} in {page_id}",
            prop.name,
            update.added.len(),
            update.removed.len()
        );
        store.save_document(page_id, &target)?;
    }
    cache.invalidate(page_id);
    Ok(update)
}
