//! Catalog boundary
//!
//! Turns SKU records from the catalog service into class mapping entries.

use serde::{Deserialize, Serialize};

use crate::engine::ClassEntry;

/// SKU record as listed by the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSku {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Model class index; records without one take their list position.
    pub class_id: Option<i32>,
}

/// Build mapping entries from catalog records, in record order.
pub fn class_entries_from_catalog(skus: &[CatalogSku]) -> Vec<ClassEntry> {
    skus.iter()
        .enumerate()
        .map(|(i, sku)| ClassEntry {
            class_id: sku.class_id.unwrap_or(i as i32),
            external_id: sku.id.clone().unwrap_or_else(|| i.to_string()),
            display_name: sku.name.clone().unwrap_or_else(|| format!("class_{}", i)),
        })
        .collect()
}
