use indexmap::IndexSet;

use crate::types::{PrimitiveKind, TypeDescriptor};

use super::casing::pascal_case;

/// Maps descriptors to TypeScript type syntax, remembering every record it
/// references so the generator can emit their declarations.
#[derive(Debug, Default)]
pub struct TypeMapper {
    referenced: IndexSet<String>,
}

impl TypeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record names seen so far, in first-reference order.
    pub fn referenced(&self) -> &IndexSet<String> {
        &self.referenced
    }

    /// Mark a record as needing a declaration without mapping anything.
    pub fn reference(&mut self, name: &str) {
        if !self.referenced.contains(name) {
            self.referenced.insert(name.to_string());
        }
    }

    /// TypeScript syntax for `ty`. Total: every descriptor maps to a
    /// non-empty string.
    pub fn map_type(&mut self, ty: &TypeDescriptor) -> String {
        match ty {
            TypeDescriptor::Primitive(kind) => primitive(*kind).to_string(),
            TypeDescriptor::Optional(inner) => {
                let mapped = self.map_type(inner);
                if inner.is_nullable() {
                    mapped
                } else {
                    format!("{mapped} | null")
                }
            }
            TypeDescriptor::Union(variants) => self.map_union(variants),
            TypeDescriptor::List(elem) | TypeDescriptor::Set(elem) => {
                let mapped = self.map_type(elem);
                if mapped.contains(" | ") {
                    format!("({mapped})[]")
                } else {
                    format!("{mapped}[]")
                }
            }
            TypeDescriptor::Map { key, value } => {
                let value = self.map_type(value);
                format!("Record<{}, {value}>", map_key(key))
            }
            TypeDescriptor::Tuple(items) if items.is_empty() => "unknown[]".to_string(),
            TypeDescriptor::Tuple(items) => {
                let mapped: Vec<String> = items.iter().map(|t| self.map_type(t)).collect();
                format!("[{}]", mapped.join(", "))
            }
            TypeDescriptor::Record(name) => {
                self.reference(name);
                pascal_case(name)
            }
            TypeDescriptor::Unknown => "unknown".to_string(),
        }
    }

    fn map_union(&mut self, variants: &[TypeDescriptor]) -> String {
        let has_null = variants.iter().any(TypeDescriptor::is_null);
        let non_null: Vec<&TypeDescriptor> = variants.iter().filter(|v| !v.is_null()).collect();

        if let [single] = non_null.as_slice() {
            if has_null {
                return self.map_type(&TypeDescriptor::optional((*single).clone()));
            }
        }
        if variants.is_empty() {
            return "unknown".to_string();
        }

        let mut parts: IndexSet<String> = IndexSet::new();
        for variant in variants {
            parts.insert(self.map_type(variant));
        }
        parts.into_iter().collect::<Vec<_>>().join(" | ")
    }
}

fn primitive(kind: PrimitiveKind) -> &'static str {
    match kind {
        // Bytes travel as base64 text.
        PrimitiveKind::String | PrimitiveKind::Bytes => "string",
        PrimitiveKind::Integer | PrimitiveKind::Float => "number",
        PrimitiveKind::Boolean => "boolean",
        PrimitiveKind::Null => "null",
    }
}

/// Object keys can only be strings or numbers; anything else is keyed by
/// its string form.
fn map_key(key: &TypeDescriptor) -> &'static str {
    match key {
        TypeDescriptor::Primitive(PrimitiveKind::Integer | PrimitiveKind::Float) => "number",
        _ => "string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(ty: &TypeDescriptor) -> String {
        TypeMapper::new().map_type(ty)
    }

    #[test]
    fn primitives() {
        assert_eq!(map(&TypeDescriptor::string()), "string");
        assert_eq!(map(&TypeDescriptor::integer()), "number");
        assert_eq!(map(&TypeDescriptor::float()), "number");
        assert_eq!(map(&TypeDescriptor::boolean()), "boolean");
        assert_eq!(map(&TypeDescriptor::null()), "null");
        assert_eq!(map(&TypeDescriptor::Primitive(PrimitiveKind::Bytes)), "string");
    }

    #[test]
    fn optional_appends_null_once() {
        assert_eq!(map(&TypeDescriptor::optional(TypeDescriptor::string())), "string | null");
        let nested = TypeDescriptor::optional(TypeDescriptor::optional(TypeDescriptor::integer()));
        assert_eq!(map(&nested), "number | null");
        assert_eq!(map(&TypeDescriptor::optional(TypeDescriptor::Unknown)), "unknown");
    }

    #[test]
    fn single_variant_union_with_null_is_optional() {
        let union = TypeDescriptor::Union(vec![TypeDescriptor::null(), TypeDescriptor::string()]);
        assert_eq!(map(&union), "string | null");
    }

    #[test]
    fn general_union_keeps_order_and_dedupes() {
        let union = TypeDescriptor::Union(vec![
            TypeDescriptor::string(),
            TypeDescriptor::integer(),
            TypeDescriptor::float(),
            TypeDescriptor::null(),
        ]);
        assert_eq!(map(&union), "string | number | null");
        assert_eq!(map(&TypeDescriptor::Union(Vec::new())), "unknown");
    }

    #[test]
    fn arrays_parenthesize_unions() {
        assert_eq!(map(&TypeDescriptor::list(TypeDescriptor::string())), "string[]");
        assert_eq!(map(&TypeDescriptor::set(TypeDescriptor::integer())), "number[]");
        let list = TypeDescriptor::list(TypeDescriptor::optional(TypeDescriptor::string()));
        assert_eq!(map(&list), "(string | null)[]");
    }

    #[test]
    fn map_keys_fall_back_to_string() {
        let by_id = TypeDescriptor::map(TypeDescriptor::integer(), TypeDescriptor::boolean());
        assert_eq!(map(&by_id), "Record<number, boolean>");
        let by_tuple = TypeDescriptor::map(
            TypeDescriptor::Tuple(vec![TypeDescriptor::string()]),
            TypeDescriptor::string(),
        );
        assert_eq!(map(&by_tuple), "Record<string, string>");
    }

    #[test]
    fn tuples() {
        let pair = TypeDescriptor::Tuple(vec![TypeDescriptor::string(), TypeDescriptor::integer()]);
        assert_eq!(map(&pair), "[string, number]");
        assert_eq!(map(&TypeDescriptor::Tuple(Vec::new())), "unknown[]");
    }

    #[test]
    fn records_are_referenced_by_name() {
        let mut mapper = TypeMapper::new();
        let ty = TypeDescriptor::map(
            TypeDescriptor::string(),
            TypeDescriptor::list(TypeDescriptor::record("user_profile")),
        );
        assert_eq!(mapper.map_type(&ty), "Record<string, UserProfile[]>");
        mapper.map_type(&TypeDescriptor::record("Point"));
        mapper.map_type(&TypeDescriptor::record("user_profile"));
        let names: Vec<&str> = mapper.referenced().iter().map(String::as_str).collect();
        assert_eq!(names, ["user_profile", "Point"]);
    }

    #[test]
    fn mapping_is_total() {
        let samples = [
            TypeDescriptor::Unknown,
            TypeDescriptor::Union(vec![TypeDescriptor::null()]),
            TypeDescriptor::optional(TypeDescriptor::null()),
            TypeDescriptor::set(TypeDescriptor::Tuple(Vec::new())),
        ];
        for ty in &samples {
            assert!(!map(ty).is_empty(), "{ty:?}");
        }
        assert_eq!(map(&TypeDescriptor::Union(vec![TypeDescriptor::null()])), "null");
    }
}
