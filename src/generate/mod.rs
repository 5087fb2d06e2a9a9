//! TypeScript client generation.
//!
//! Output is two files: the fixed runtime (`_internal.ts`, shipped verbatim)
//! and the generated API module that imports it. Rendering is pure and
//! deterministic; [`generate`] only writes once the whole client rendered.

pub mod casing;
pub mod typemap;

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BridgeError;
use crate::registry::{CommandDefinition, ModelDefinition, Registry};
use crate::util::atomic_write;

use casing::{camel_case, pascal_case};
use typemap::TypeMapper;

/// Hand-written runtime support module.
pub const RUNTIME: &str = include_str!("runtime.ts");

/// File name of the runtime module, next to the generated file.
pub const RUNTIME_FILE: &str = "_internal.ts";

const HEADER: &str = "\
// This file is generated by bridgekit. Do not edit it by hand.
// Regenerate with `bridgekit generate`.
";

/// Values and types the API module takes from the runtime. Generated names
/// must not shadow them.
const RUNTIME_VALUES: [&str; 4] =
    ["initBridge", "BridgeRequestError", "request", "createChannel"];
const RUNTIME_TYPES: [&str; 3] = ["BridgeChannel", "BridgeError", "BridgeRequestError"];

/// The two rendered artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedClient {
    pub runtime: String,
    pub api: String,
}

#[derive(Debug, Clone)]
pub struct TypeScriptGenerator {
    /// Import specifier for the runtime module.
    runtime_import: String,
}

impl Default for TypeScriptGenerator {
    fn default() -> Self {
        Self {
            runtime_import: "./_internal".to_string(),
        }
    }
}

impl TypeScriptGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the client for `registry` without touching the filesystem.
    pub fn render(&self, registry: &Registry) -> Result<GeneratedClient, BridgeError> {
        check_unique(
            "function",
            &RUNTIME_VALUES,
            registry.list_all().map(|def| (camel_case(&def.name), def.name.as_str())),
        )?;
        check_unique(
            "interface",
            &RUNTIME_TYPES,
            registry.models().iter().map(|m| (pascal_case(&m.name), m.name.as_str())),
        )?;

        let mut mapper = TypeMapper::new();

        let mut commands = String::new();
        for def in registry.list_all() {
            write_command(&mut commands, &mut mapper, def).map_err(render_failed)?;
        }

        // Records no command reaches are still part of the contract.
        for model in registry.models().iter() {
            mapper.reference(&model.name);
        }

        let mut interfaces = String::new();
        let mut next = 0;
        while let Some(name) = mapper.referenced().get_index(next).cloned() {
            next += 1;
            let model = registry.models().resolve(&name).map_err(|e| {
                BridgeError::internal(format!("Cannot generate client: {e}"))
            })?;
            write_interface(&mut interfaces, &mut mapper, model).map_err(render_failed)?;
        }

        let mut api = String::from(HEADER);
        writeln!(
            api,
            "\nimport {{ initBridge, request, createChannel, BridgeRequestError }} from \"{0}\";\n\
             import type {{ BridgeChannel, BridgeError }} from \"{0}\";\n\n\
             export {{ initBridge, BridgeRequestError }};\n\
             export type {{ BridgeChannel, BridgeError }};\n",
            self.runtime_import
        )
        .map_err(render_failed)?;
        api.push_str("// ============ Interfaces ============\n");
        api.push_str(&interfaces);
        api.push_str("\n// ============ Commands ============\n");
        api.push_str(&commands);

        Ok(GeneratedClient {
            runtime: RUNTIME.to_string(),
            api,
        })
    }
}

/// Fail when two registry names, or a registry name and a runtime import,
/// render to the same TypeScript identifier.
fn check_unique<'a>(
    kind: &str,
    reserved: &[&'a str],
    names: impl Iterator<Item = (String, &'a str)>,
) -> Result<(), BridgeError> {
    let mut seen: HashMap<String, &'a str> =
        reserved.iter().map(|name| ((*name).to_string(), "the runtime")).collect();
    for (ts_name, source) in names {
        if let Some(previous) = seen.insert(ts_name.clone(), source) {
            return Err(BridgeError::internal(format!(
                "Cannot generate client: {kind} name '{ts_name}' is produced by both \
                 '{previous}' and '{source}'"
            )));
        }
    }
    Ok(())
}

fn render_failed(e: fmt::Error) -> BridgeError {
    BridgeError::internal(format!("Failed to render client: {e}"))
}

fn write_doc(out: &mut String, indent: &str, doc: Option<&str>) -> fmt::Result {
    let Some(doc) = doc.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(());
    };
    let doc = doc.replace("*/", "*\\/");
    let mut lines = doc.lines();
    match (lines.next(), lines.next()) {
        (Some(only), None) => writeln!(out, "{indent}/** {} */", only.trim_end()),
        _ => {
            writeln!(out, "{indent}/**")?;
            for line in doc.lines() {
                let line = line.trim_end();
                if line.is_empty() {
                    writeln!(out, "{indent} *")?;
                } else {
                    writeln!(out, "{indent} * {line}")?;
                }
            }
            writeln!(out, "{indent} */")
        }
    }
}

fn write_interface(
    out: &mut String,
    mapper: &mut TypeMapper,
    model: &ModelDefinition,
) -> fmt::Result {
    writeln!(out)?;
    write_doc(out, "", model.documentation.as_deref())?;
    writeln!(out, "export interface {} {{", pascal_case(&model.name))?;
    for field in &model.fields {
        write_doc(out, "  ", field.description.as_deref())?;
        let optional = if field.optional { "?" } else { "" };
        let ty = mapper.map_type(&field.ty);
        writeln!(out, "  {}{optional}: {ty};", camel_case(&field.name))?;
    }
    writeln!(out, "}}")
}

fn write_command(
    out: &mut String,
    mapper: &mut TypeMapper,
    def: &CommandDefinition,
) -> fmt::Result {
    let params: Vec<String> = def
        .params
        .iter()
        .map(|p| {
            let optional = if p.optional { "?" } else { "" };
            format!("{}{optional}: {}", camel_case(&p.name), mapper.map_type(&p.ty))
        })
        .collect();
    let (signature, args) = if params.is_empty() {
        (String::new(), "{}")
    } else {
        (format!("args: {{ {} }}", params.join("; ")), "args")
    };

    let output = match def.output_type() {
        Some(ty) if !ty.is_null() => mapper.map_type(ty),
        _ => "void".to_string(),
    };
    let name = camel_case(&def.name);

    writeln!(out)?;
    write_doc(out, "", def.documentation.as_deref())?;
    if def.is_stream() {
        writeln!(
            out,
            "export function {name}({signature}): BridgeChannel<{output}> {{"
        )?;
        writeln!(out, "  return createChannel<{output}>(\"{}\", {args});", def.name)?;
    } else {
        writeln!(
            out,
            "export async function {name}({signature}): Promise<{output}> {{"
        )?;
        writeln!(out, "  return request<{output}>(\"{}\", {args});", def.name)?;
    }
    writeln!(out, "}}")
}

fn runtime_path(output_path: &Path) -> PathBuf {
    output_path
        .parent()
        .map_or_else(|| PathBuf::from(RUNTIME_FILE), |dir| dir.join(RUNTIME_FILE))
}

/// Render the client and write it to `output_path`, with the runtime module
/// next to it. Nothing is written unless rendering succeeds, and each file is
/// replaced atomically, so a failure leaves earlier output intact.
pub fn generate(registry: &Registry, output_path: &Path) -> Result<GeneratedClient, BridgeError> {
    let client = TypeScriptGenerator::new().render(registry).inspect_err(|e| {
        tracing::error!(path = %output_path.display(), "client generation failed: {e}");
    })?;

    let write = || -> std::io::Result<()> {
        if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        atomic_write(&runtime_path(output_path), client.runtime.as_bytes())?;
        atomic_write(output_path, client.api.as_bytes())
    };
    write().map_err(|e| {
        tracing::error!(path = %output_path.display(), "failed to write client: {e}");
        BridgeError::internal(format!(
            "Failed to write TypeScript client to {}: {e}",
            output_path.display()
        ))
    })?;

    tracing::info!(
        path = %output_path.display(),
        commands = registry.len(),
        models = registry.models().len(),
        "generated TypeScript client"
    );
    Ok(client)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::channel::ChannelSender;
    use crate::registry::{CommandBuilder, FieldDefinition, NoParams};
    use crate::types::TypeDescriptor;

    crate::bridge_model! {
        /// A saved item.
        pub struct Item {
            pub id: u64,
            /// Display name; must not contain `*/`.
            pub item_name: String,
            pub tags: Option<Vec<String>>,
        }
    }

    crate::bridge_model! {
        pub struct AddItemParams {
            pub item_name: String,
            pub notify_user: Option<bool>,
        }
    }

    crate::bridge_model! {
        pub struct TickParams {
            pub count: u32,
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                CommandBuilder::new("add_item", "items")
                    .doc("Add an item.")
                    .params::<AddItemParams>()
                    .handler(|p: AddItemParams| async move {
                        Ok::<_, String>(Item {
                            id: 1,
                            item_name: p.item_name,
                            tags: None,
                        })
                    }),
            )
            .unwrap();
        registry
            .register(
                CommandBuilder::new("tick", "clock")
                    .params::<TickParams>()
                    .stream(|_: TickParams, _tx: ChannelSender<u32>| async { Ok::<_, String>(()) }),
            )
            .unwrap();
        registry
            .register(
                CommandBuilder::new("reset", "items")
                    .handler(|_: NoParams| async { Ok::<_, String>(()) }),
            )
            .unwrap();
        registry
    }

    #[test]
    fn renders_interfaces_and_stubs() {
        let client = TypeScriptGenerator::new().render(&registry()).unwrap();
        let api = &client.api;
        assert!(api.contains("/** A saved item. */\nexport interface Item {"));
        assert!(
            api.contains("  /** Display name; must not contain `*\\/`. */\n  itemName: string;")
        );
        assert!(api.contains("  tags?: string[] | null;"));
        assert!(api.contains(
            "/** Add an item. */\nexport async function addItem(args: { itemName: string; notifyUser?: boolean | null }): Promise<Item> {\n  return request<Item>(\"add_item\", args);\n}"
        ));
        assert!(api.contains(
            "export function tick(args: { count: number }): BridgeChannel<number> {\n  return createChannel<number>(\"tick\", args);\n}"
        ));
        assert!(api.contains(
            "export async function reset(): Promise<void> {\n  return request<void>(\"reset\", {});\n}"
        ));
        assert!(!api.contains("AddItemParams"));
        assert!(api.contains(
            "import { initBridge, request, createChannel, BridgeRequestError } from \"./_internal\";"
        ));
        assert!(api.contains("export { initBridge, BridgeRequestError };"));
        assert!(api.contains("export type { BridgeChannel, BridgeError };"));
        assert_eq!(client.runtime, RUNTIME);
    }

    #[test]
    fn colliding_command_names_fail_generation() {
        let mut registry = registry();
        registry
            .register(
                CommandBuilder::new("addItem", "legacy")
                    .handler(|_: NoParams| async { Ok::<_, String>(()) }),
            )
            .unwrap();
        let err = TypeScriptGenerator::new().render(&registry).unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(err.to_string().contains("'addItem'"));
        assert!(err.to_string().contains("'add_item'"));
    }

    #[test]
    fn colliding_model_names_fail_generation() {
        let mut registry = registry();
        registry
            .models_mut()
            .register_if_absent(ModelDefinition::new("user_profile"));
        registry
            .models_mut()
            .register_if_absent(ModelDefinition::new("UserProfile"));
        let err = TypeScriptGenerator::new().render(&registry).unwrap_err();
        assert!(err.to_string().contains("interface name 'UserProfile'"));
    }

    #[test]
    fn runtime_names_are_reserved() {
        let mut registry = registry();
        registry
            .register(
                CommandBuilder::new("request", "items")
                    .handler(|_: NoParams| async { Ok::<_, String>(()) }),
            )
            .unwrap();
        let err = TypeScriptGenerator::new().render(&registry).unwrap_err();
        assert!(err.to_string().contains("the runtime"));
    }

    #[test]
    fn channel_buffers_frames_for_late_iterators() {
        let class = RUNTIME.split("export class BridgeChannel").nth(1).unwrap();
        let iterator = class.split("[Symbol.asyncIterator]").nth(1).unwrap();
        let iterator = iterator.split("private notify").next().unwrap();
        assert!(class.contains("this.buffered.push(value);"));
        assert!(!iterator.contains("this.onMessage("));
        assert!(iterator.contains("this.buffered.shift()"));
    }

    #[test]
    fn commands_are_sorted() {
        let api = TypeScriptGenerator::new().render(&registry()).unwrap().api;
        let add = api.find("function addItem").unwrap();
        let reset = api.find("function reset").unwrap();
        let tick = api.find("function tick").unwrap();
        assert!(add < reset && reset < tick);
    }

    #[test]
    fn unregistered_record_fails_generation() {
        let mut registry = registry();
        registry.models_mut().register_if_absent(
            ModelDefinition::new("Orphan")
                .with_field(FieldDefinition::new("ghost", TypeDescriptor::record("Ghost"))),
        );
        let err = TypeScriptGenerator::new().render(&registry).unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn hand_declared_models_are_emitted() {
        let mut registry = registry();
        registry.models_mut().register_if_absent(
            ModelDefinition::new("audit_entry")
                .with_field(FieldDefinition::new("at", TypeDescriptor::string())),
        );
        let api = TypeScriptGenerator::new().render(&registry).unwrap().api;
        assert!(api.contains("export interface AuditEntry {\n  at: string;\n}"));
    }

    #[test]
    fn multi_line_docs_use_block_comments() {
        let mut out = String::new();
        write_doc(&mut out, "  ", Some("First line.\n\nSecond line.")).unwrap();
        assert_eq!(out, "  /**\n   * First line.\n   *\n   * Second line.\n   */\n");
    }
}
