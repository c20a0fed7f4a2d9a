//! Class mapping overlay
//!
//! Catalog-supplied labels that override a model's built-in class names.
//! The overlay is replaced as a whole, never merged.

use std::collections::HashMap;

/// Catalog label for a single model class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabel {
    pub external_id: String,
    pub display_name: String,
}

/// One (class id, external id, display name) triple as received from sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
    pub class_id: i32,
    pub external_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassMapping {
    labels: HashMap<i32, ClassLabel>,
}

impl ClassMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, class_id: i32) -> Option<&ClassLabel> {
        self.labels.get(&class_id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Resolve `(display_name, external_id)`, falling back to `intrinsic`
    /// and an empty external id for unmapped classes.
    pub fn resolve<F>(&self, class_id: i32, intrinsic: F) -> (String, String)
    where
        F: FnOnce(i32) -> String,
    {
        match self.labels.get(&class_id) {
            Some(label) => (label.display_name.clone(), label.external_id.clone()),
            None => (intrinsic(class_id), String::new()),
        }
    }
}

/// Later entries win when a class id repeats.
impl FromIterator<ClassEntry> for ClassMapping {
    fn from_iter<I: IntoIterator<Item = ClassEntry>>(iter: I) -> Self {
        let labels = iter
            .into_iter()
            .map(|e| {
                (
                    e.class_id,
                    ClassLabel {
                        external_id: e.external_id,
                        display_name: e.display_name,
                    },
                )
            })
            .collect();
        Self { labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(class_id: i32, external_id: &str, display_name: &str) -> ClassEntry {
        ClassEntry {
            class_id,
            external_id: external_id.to_string(),
            display_name: display_name.to_string(),
        }
    }

    #[test]
    fn test_resolve_mapped_and_fallback() {
        let mapping: ClassMapping = vec![entry(0, "sku-001", "Coca-Cola")].into_iter().collect();

        assert_eq!(
            mapping.resolve(0, |_| unreachable!()),
            ("Coca-Cola".to_string(), "sku-001".to_string())
        );
        assert_eq!(
            mapping.resolve(1, |id| format!("intrinsic_{}", id)),
            ("intrinsic_1".to_string(), String::new())
        );
    }

    #[test]
    fn test_duplicate_ids_last_wins() {
        let mapping: ClassMapping = vec![entry(3, "a", "first"), entry(3, "b", "second")]
            .into_iter()
            .collect();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get(3).unwrap().display_name, "second");
    }
}
