use std::collections::{BTreeMap, BTreeSet};

use crate::error::BridgeError;
use crate::types::TypeDescriptor;

/// One field of a record, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: TypeDescriptor,
    /// Absent values are accepted (has a default or is an `Option`).
    pub optional: bool,
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            description: None,
        }
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// A named record type, immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub documentation: Option<String>,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            documentation: None,
        }
    }

    pub fn with_doc(mut self, documentation: Option<String>) -> Self {
        self.documentation = documentation;
        self
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }
}

/// Record definitions discovered while scanning command signatures.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDefinition>,
}

impl ModelRegistry {
    /// Insert by name. Returns `false` (and keeps the existing entry) when the
    /// name is already present.
    pub fn register_if_absent(&mut self, def: ModelDefinition) -> bool {
        if self.models.contains_key(&def.name) {
            return false;
        }
        self.models.insert(def.name.clone(), def);
        true
    }

    pub fn resolve(&self, name: &str) -> Result<&ModelDefinition, BridgeError> {
        self.models.get(name).ok_or_else(|| BridgeError::ModelNotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// All definitions, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.values()
    }

    /// Move every definition of `other` into this registry, keeping existing
    /// entries on name collisions.
    pub fn merge(&mut self, other: ModelRegistry) {
        for def in other.models.into_values() {
            self.register_if_absent(def);
        }
    }

    /// Names of every record reachable from `root`, following registered
    /// records' fields. Unregistered names are reported but not followed.
    pub fn collect_reachable(&self, root: &TypeDescriptor) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(ty) = stack.pop() {
            if let TypeDescriptor::Record(name) = ty {
                if visited.insert(name.clone()) {
                    if let Some(def) = self.models.get(name) {
                        stack.extend(def.fields.iter().map(|f| &f.ty));
                    }
                }
            } else {
                stack.extend(ty.children());
            }
        }
        visited
    }
}
