//! Language-neutral type descriptors and the static `Shape` declarations
//! that produce them.
//!
//! Every type that appears in a command signature implements [`Shape`].
//! Records implement [`Model`] as well, usually through [`bridge_model!`],
//! and are referenced by name so recursive graphs stay finite.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::registry::{ModelDefinition, ModelRegistry};
use crate::util::{base64_decode, base64_encode};

// ── Descriptor model ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Raw bytes, carried on the wire as base64 text.
    Bytes,
    Null,
}

/// The shape of a value, independent of any target language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Primitive(PrimitiveKind),
    Optional(Box<TypeDescriptor>),
    List(Box<TypeDescriptor>),
    Map {
        key: Box<TypeDescriptor>,
        value: Box<TypeDescriptor>,
    },
    Tuple(Vec<TypeDescriptor>),
    Set(Box<TypeDescriptor>),
    Union(Vec<TypeDescriptor>),
    /// Reference to a record in the model registry, by name.
    Record(String),
    Unknown,
}

impl TypeDescriptor {
    pub fn string() -> Self {
        Self::Primitive(PrimitiveKind::String)
    }

    pub fn integer() -> Self {
        Self::Primitive(PrimitiveKind::Integer)
    }

    pub fn float() -> Self {
        Self::Primitive(PrimitiveKind::Float)
    }

    pub fn boolean() -> Self {
        Self::Primitive(PrimitiveKind::Boolean)
    }

    pub fn null() -> Self {
        Self::Primitive(PrimitiveKind::Null)
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn list(elem: TypeDescriptor) -> Self {
        Self::List(Box::new(elem))
    }

    pub fn set(elem: TypeDescriptor) -> Self {
        Self::Set(Box::new(elem))
    }

    pub fn map(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn record(name: impl Into<String>) -> Self {
        Self::Record(name.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Primitive(PrimitiveKind::Null))
    }

    /// True when a value of this shape may be absent on the wire.
    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Optional(_) | Self::Unknown => true,
            Self::Union(variants) => variants.iter().any(TypeDescriptor::is_null),
            other => other.is_null(),
        }
    }

    /// Direct children of container descriptors, in declaration order.
    pub fn children(&self) -> Vec<&TypeDescriptor> {
        match self {
            Self::Optional(inner) | Self::List(inner) | Self::Set(inner) => vec![inner.as_ref()],
            Self::Map { key, value } => vec![key.as_ref(), value.as_ref()],
            Self::Tuple(items) | Self::Union(items) => items.iter().collect(),
            Self::Primitive(_) | Self::Record(_) | Self::Unknown => Vec::new(),
        }
    }
}

// ── Static declarations ─────────────────────────────────────────

/// Static description of a Rust type as a [`TypeDescriptor`].
pub trait Shape {
    fn descriptor() -> TypeDescriptor;

    /// Register every record this type reaches. Records insert themselves
    /// before visiting their fields, which is what ends recursion.
    fn define(_models: &mut ModelRegistry) {}

    fn is_optional() -> bool {
        false
    }
}

/// A named record type.
pub trait Model {
    fn definition() -> ModelDefinition;

    /// Register the records referenced by this record's fields.
    fn define_dependencies(models: &mut ModelRegistry);
}

/// `Shape::define` body shared by every record.
pub fn define_model<M: Model>(models: &mut ModelRegistry) {
    if models.register_if_absent(M::definition()) {
        M::define_dependencies(models);
    }
}

/// Join `#[doc]` fragments into a single documentation string.
pub fn join_doc(lines: &[&str]) -> Option<String> {
    let text = lines
        .iter()
        .map(|line| line.strip_prefix(' ').unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

macro_rules! primitive_shape {
    ($kind:ident => $($ty:ty),+) => {
        $(
            impl Shape for $ty {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::Primitive(PrimitiveKind::$kind)
                }
            }
        )+
    };
}

primitive_shape!(String => String, str, char);
primitive_shape!(Integer => i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
primitive_shape!(Float => f32, f64);
primitive_shape!(Boolean => bool);
primitive_shape!(Null => ());

impl Shape for serde_json::Value {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Unknown
    }
}

impl<T: Shape> Shape for Option<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::optional(T::descriptor())
    }

    fn define(models: &mut ModelRegistry) {
        T::define(models);
    }

    fn is_optional() -> bool {
        true
    }
}

macro_rules! transparent_shape {
    ($($wrapper:ident),+) => {
        $(
            impl<T: Shape + ?Sized> Shape for $wrapper<T> {
                fn descriptor() -> TypeDescriptor {
                    T::descriptor()
                }

                fn define(models: &mut ModelRegistry) {
                    T::define(models);
                }

                fn is_optional() -> bool {
                    T::is_optional()
                }
            }
        )+
    };
}

transparent_shape!(Box, Arc);

macro_rules! list_shape {
    ($ctor:ident => $($ty:ident $(<$($extra:ident),*>)?),+) => {
        $(
            impl<T: Shape $($(, $extra)*)?> Shape for $ty<T $($(, $extra)*)?> {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::$ctor(T::descriptor())
                }

                fn define(models: &mut ModelRegistry) {
                    T::define(models);
                }
            }
        )+
    };
}

list_shape!(list => Vec, VecDeque);
list_shape!(set => HashSet<S>, BTreeSet);

impl<T: Shape, const N: usize> Shape for [T; N] {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::list(T::descriptor())
    }

    fn define(models: &mut ModelRegistry) {
        T::define(models);
    }
}

macro_rules! map_shape {
    ($($ty:ident $(<$($extra:ident),*>)?),+) => {
        $(
            impl<K: Shape, V: Shape $($(, $extra)*)?> Shape for $ty<K, V $($(, $extra)*)?> {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::map(K::descriptor(), V::descriptor())
                }

                fn define(models: &mut ModelRegistry) {
                    K::define(models);
                    V::define(models);
                }
            }
        )+
    };
}

map_shape!(HashMap<S>, BTreeMap, IndexMap<S>);

macro_rules! tuple_shape {
    ($(($($name:ident),+)),+) => {
        $(
            impl<$($name: Shape),+> Shape for ($($name,)+) {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::Tuple(vec![$($name::descriptor()),+])
                }

                fn define(models: &mut ModelRegistry) {
                    $($name::define(models);)+
                }
            }
        )+
    };
}

tuple_shape!(
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
    (A, B, C, D, E),
    (A, B, C, D, E, F)
);

// ── Bytes ───────────────────────────────────────────────────────

/// Binary payload, base64 encoded on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl Shape for Bytes {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Primitive(PrimitiveKind::Bytes)
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64_encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        base64_decode(&text)
            .map(Bytes)
            .ok_or_else(|| serde::de::Error::custom("invalid base64 payload"))
    }
}

// ── bridge_model! ───────────────────────────────────────────────

/// Declare a serde record and its [`Model`]/[`Shape`] implementations in one
/// place. Doc comments on the struct and its fields become the record's
/// documentation and field descriptions. `Option` fields are optional.
///
/// ```ignore
/// bridge_model! {
///     /// A point on the plane.
///     pub struct Point {
///         pub x: f64,
///         pub y: f64,
///     }
/// }
/// ```
#[macro_export]
macro_rules! bridge_model {
    (
        $(#[doc = $doc:literal])*
        $vis:vis struct $name:ident {
            $(
                $(#[doc = $fdoc:literal])*
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, ::serde::Serialize, ::serde::Deserialize)]
        $vis struct $name {
            $(
                $(#[doc = $fdoc])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::types::Model for $name {
            fn definition() -> $crate::registry::ModelDefinition {
                $crate::registry::ModelDefinition::new(stringify!($name))
                    .with_doc($crate::types::join_doc(&[$($doc),*] as &[&str]))
                    $(
                        .with_field(
                            $crate::registry::FieldDefinition::new(
                                stringify!($field),
                                <$ty as $crate::types::Shape>::descriptor(),
                            )
                            .optional(<$ty as $crate::types::Shape>::is_optional())
                            .with_description($crate::types::join_doc(&[$($fdoc),*] as &[&str])),
                        )
                    )*
            }

            #[allow(unused_variables)]
            fn define_dependencies(models: &mut $crate::registry::ModelRegistry) {
                $( <$ty as $crate::types::Shape>::define(models); )*
            }
        }

        impl $crate::types::Shape for $name {
            fn descriptor() -> $crate::types::TypeDescriptor {
                $crate::types::TypeDescriptor::Record(stringify!($name).to_string())
            }

            fn define(models: &mut $crate::registry::ModelRegistry) {
                $crate::types::define_model::<$name>(models);
            }
        }
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    crate::bridge_model! {
        /// A node in a tree.
        pub struct TreeNode {
            /// Display label.
            pub label: String,
            pub children: Vec<TreeNode>,
            pub parent: Option<Box<TreeNode>>,
        }
    }

    crate::bridge_model! {
        pub struct Ping {
            pub pong: Option<Box<Pong>>,
        }
    }

    crate::bridge_model! {
        pub struct Pong {
            pub ping: Ping,
        }
    }

    #[test]
    fn container_descriptors() {
        assert_eq!(
            <Option<Vec<String>>>::descriptor(),
            TypeDescriptor::optional(TypeDescriptor::list(TypeDescriptor::string()))
        );
        assert_eq!(
            <HashMap<String, i64>>::descriptor(),
            TypeDescriptor::map(TypeDescriptor::string(), TypeDescriptor::integer())
        );
        assert_eq!(
            <BTreeSet<u8>>::descriptor(),
            TypeDescriptor::set(TypeDescriptor::integer())
        );
        assert_eq!(
            <(String, f64)>::descriptor(),
            TypeDescriptor::Tuple(vec![TypeDescriptor::string(), TypeDescriptor::float()])
        );
        assert_eq!(<()>::descriptor(), TypeDescriptor::null());
        assert_eq!(<serde_json::Value>::descriptor(), TypeDescriptor::Unknown);
        assert!(<Option<u32>>::is_optional());
        assert!(!<u32>::is_optional());
    }

    #[test]
    fn model_definition_carries_docs_and_optionality() {
        let def = TreeNode::definition();
        assert_eq!(def.name, "TreeNode");
        assert_eq!(def.documentation.as_deref(), Some("A node in a tree."));
        let names: Vec<&str> = def.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["label", "children", "parent"]);
        assert_eq!(def.fields[0].description.as_deref(), Some("Display label."));
        assert!(!def.fields[1].optional);
        assert!(def.fields[2].optional);
        assert_eq!(def.fields[1].ty, TypeDescriptor::list(TypeDescriptor::record("TreeNode")));
    }

    #[test]
    fn recursive_define_terminates() {
        let mut models = ModelRegistry::default();
        TreeNode::define(&mut models);
        assert_eq!(models.len(), 1);

        let mut models = ModelRegistry::default();
        Ping::define(&mut models);
        assert!(models.contains("Ping"));
        assert!(models.contains("Pong"));
        assert_eq!(models.len(), 2);
    }

    #[test]
    fn bytes_travel_as_base64() {
        let json = serde_json::to_value(Bytes(b"hi!".to_vec())).unwrap();
        assert_eq!(json, serde_json::json!("aGkh"));
        let back: Bytes = serde_json::from_value(json).unwrap();
        assert_eq!(back.0, b"hi!");
        assert!(serde_json::from_value::<Bytes>(serde_json::json!("%%%")).is_err());
    }

    #[test]
    fn join_doc_strips_leading_space() {
        assert_eq!(
            join_doc(&[" First line.", " Second."]).as_deref(),
            Some("First line.\nSecond.")
        );
        assert_eq!(join_doc(&[]), None);
    }

    #[test]
    fn nullable_detection() {
        assert!(TypeDescriptor::optional(TypeDescriptor::string()).is_nullable());
        assert!(TypeDescriptor::Union(vec![TypeDescriptor::string(), TypeDescriptor::null()])
            .is_nullable());
        assert!(!TypeDescriptor::list(TypeDescriptor::null()).is_nullable());
    }
}
