pub mod builder;
pub mod catalog;
mod models;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::BridgeError;
use crate::types::TypeDescriptor;

pub use builder::{CommandBuilder, NoParams};
pub(crate) use builder::{Handler, StreamTask};
pub use models::{FieldDefinition, ModelDefinition, ModelRegistry};

// ── Command metadata ────────────────────────────────────────────

/// One declared parameter, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDefinition {
    pub name: String,
    pub ty: TypeDescriptor,
    /// The caller may omit it; it binds as `null`.
    pub optional: bool,
}

/// A registered command. Immutable once built by [`CommandBuilder`].
#[derive(Clone)]
pub struct CommandDefinition {
    pub name: String,
    pub params: Vec<ParamDefinition>,
    /// `None` for commands returning `()` and for streaming commands.
    pub return_type: Option<TypeDescriptor>,
    /// Payload type carried by a streaming command's channel.
    pub stream_type: Option<TypeDescriptor>,
    pub documentation: Option<String>,
    pub module: String,
    pub(crate) handler: Handler,
    /// Records discovered while building the signature.
    pub(crate) models: ModelRegistry,
}

impl CommandDefinition {
    pub fn is_stream(&self) -> bool {
        matches!(self.handler, Handler::Stream(_))
    }

    /// The type a client receives: the stream payload for streaming
    /// commands, the return type otherwise.
    pub fn output_type(&self) -> Option<&TypeDescriptor> {
        self.stream_type.as_ref().or(self.return_type.as_ref())
    }

    pub fn param_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    /// Records the signature discovered at build time.
    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .field("stream_type", &self.stream_type)
            .field("is_stream", &self.is_stream())
            .finish_non_exhaustive()
    }
}

/// Directory entry for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CommandSummary {
    pub name: String,
    pub module: String,
    pub is_stream: bool,
    pub param_names: Vec<String>,
}

// ── Registry ────────────────────────────────────────────────────

/// Every command the process exposes, plus the records their signatures
/// reference. Built once at startup, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    commands: BTreeMap<String, CommandDefinition>,
    models: ModelRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a command. Fails with `NameConflict` naming both modules when
    /// the name is taken; the registry is left unchanged in that case.
    pub fn register(&mut self, mut def: CommandDefinition) -> Result<(), BridgeError> {
        if let Some(existing) = self.commands.get(&def.name) {
            return Err(BridgeError::NameConflict {
                name: def.name,
                existing_module: existing.module.clone(),
                new_module: def.module,
            });
        }

        self.models.merge(std::mem::take(&mut def.models));

        let roots = def.params.iter().map(|p| &p.ty).chain(def.output_type());
        for root in roots {
            for name in self.models.collect_reachable(root) {
                if !self.models.contains(&name) {
                    tracing::warn!(
                        command = %def.name,
                        record = %name,
                        "command references an unregistered record"
                    );
                }
            }
        }

        tracing::debug!(
            command = %def.name,
            module = %def.module,
            stream = def.is_stream(),
            params = def.params.len(),
            "registered command"
        );
        self.commands.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&CommandDefinition, BridgeError> {
        self.commands
            .get(name)
            .ok_or_else(|| BridgeError::CommandNotFound {
                name: name.to_string(),
            })
    }

    /// All commands, sorted by name.
    pub fn list_all(&self) -> impl Iterator<Item = &CommandDefinition> {
        self.commands.values()
    }

    /// Directory listing, sorted by name.
    pub fn list(&self) -> Vec<CommandSummary> {
        self.list_all()
            .map(|def| CommandSummary {
                name: def.name.clone(),
                module: def.module.clone(),
                is_stream: def.is_stream(),
                param_names: def.param_names(),
            })
            .collect()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// For records declared by hand rather than discovered from signatures.
    pub fn models_mut(&mut self) -> &mut ModelRegistry {
        &mut self.models
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::channel::ChannelSender;

    crate::bridge_model! {
        pub struct Point {
            pub x: f64,
            pub y: f64,
        }
    }

    crate::bridge_model! {
        pub struct Reading {
            pub value: f64,
        }
    }

    crate::bridge_model! {
        pub struct NameParams {
            pub name: String,
            pub nickname: Option<String>,
        }
    }

    crate::bridge_model! {
        pub struct CountParams {
            pub count: u32,
        }
    }

    fn points(module: &str) -> CommandDefinition {
        CommandBuilder::new("get_points", module)
            .handler(|_: NoParams| async { Ok::<_, String>(Vec::<Point>::new()) })
    }

    #[test]
    fn duplicate_name_names_both_modules() {
        let mut registry = Registry::new();
        registry.register(points("app.geometry")).unwrap();
        let err = registry.register(points("app.legacy")).unwrap_err();
        match &err {
            BridgeError::NameConflict {
                name,
                existing_module,
                new_module,
            } => {
                assert_eq!(name, "get_points");
                assert_eq!(existing_module, "app.geometry");
                assert_eq!(new_module, "app.legacy");
            }
            other => panic!("expected NameConflict, got {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("app.geometry") && message.contains("app.legacy"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn shared_model_registers_once() {
        let mut registry = Registry::new();
        registry.register(points("a")).unwrap();
        let other = CommandBuilder::new("first_point", "a")
            .handler(|_: NoParams| async { Ok::<_, String>(Point { x: 0.0, y: 0.0 }) });
        registry.register(other).unwrap();
        assert_eq!(registry.models().len(), 1);
        assert!(registry.models().contains("Point"));
    }

    #[test]
    fn params_record_is_not_a_model() {
        let mut registry = Registry::new();
        let def = CommandBuilder::new("greet", "a")
            .params::<NameParams>()
            .handler(|p: NameParams| async move { Ok::<_, String>(format!("hi {}", p.name)) });
        assert_eq!(def.param_names(), ["name", "nickname"]);
        assert!(!def.params[0].optional);
        assert!(def.params[1].optional);
        registry.register(def).unwrap();
        assert!(registry.models().is_empty());
    }

    #[test]
    fn stream_collects_payload_type() {
        let mut registry = Registry::new();
        let def = CommandBuilder::new("readings", "sensors")
            .params::<CountParams>()
            .stream(|_: CountParams, _tx: ChannelSender<Reading>| async { Ok::<_, String>(()) });
        assert!(def.is_stream());
        assert!(def.return_type.is_none());
        assert_eq!(def.output_type(), Some(&TypeDescriptor::record("Reading")));
        registry.register(def).unwrap();
        assert!(registry.models().contains("Reading"));
    }

    #[test]
    fn unit_return_has_no_return_type() {
        let def = CommandBuilder::new("ping", "a")
            .handler(|_: NoParams| async { Ok::<_, String>(()) });
        assert!(def.return_type.is_none());
        assert!(!def.is_stream());
    }

    #[test]
    fn list_is_sorted_by_name() {
        let mut registry = Registry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register(
                    CommandBuilder::new(name, "m")
                        .handler(|_: NoParams| async { Ok::<_, String>(1) }),
                )
                .unwrap();
        }
        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn summary_uses_camel_case_keys() {
        let summary = CommandSummary {
            name: "tick".into(),
            module: "demo".into(),
            is_stream: true,
            param_names: vec!["count".into()],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "tick",
                "module": "demo",
                "isStream": true,
                "paramNames": ["count"]
            })
        );
    }

    #[test]
    fn unknown_command_is_not_found() {
        let registry = Registry::new();
        let err = registry.get("doesNotExist").unwrap_err();
        assert_eq!(err.code(), "COMMAND_NOT_FOUND");
    }
}
