use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use crate::channel::{ChannelManager, ChannelReceiver, ChannelSender};
use crate::error::BridgeError;
use crate::registry::{CommandDefinition, Handler, Registry, StreamTask};

/// Binds wire arguments to registered commands and runs them. Shared by the
/// transport across requests; the registry is read-only from here on.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    channels: ChannelManager,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_channels(registry, ChannelManager::new())
    }

    pub fn with_channels(registry: Arc<Registry>, channels: ChannelManager) -> Self {
        Self { registry, channels }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    /// Look up and run a request/response command.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, BridgeError> {
        let def = self.registry.get(name)?;
        if def.is_stream() {
            return Err(BridgeError::validation(format!(
                "Command '{name}' is a streaming command; open it as a channel"
            )));
        }
        self.execute_command(def, args).await
    }

    /// Run a request/response command against already-looked-up metadata.
    /// A panicking handler becomes an internal error.
    pub async fn execute_command(
        &self,
        def: &CommandDefinition,
        args: Value,
    ) -> Result<Value, BridgeError> {
        let Handler::Call(call) = &def.handler else {
            return Err(BridgeError::validation(format!(
                "Command '{}' is a streaming command; open it as a channel",
                def.name
            )));
        };
        let bound = bind_args(def, args)?;
        debug!(command = %def.name, "executing command");
        let result = match AssertUnwindSafe(call(bound)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(command = %def.name, "command handler panicked: {message}");
                Err(BridgeError::internal(format!(
                    "Command '{}' panicked: {message}",
                    def.name
                )))
            }
        };
        if let Err(e) = &result {
            warn!(command = %def.name, code = e.code(), "command failed: {e}");
        }
        result
    }

    /// Start a streaming command on a fresh channel and return the channel
    /// id. Argument errors surface here; handler errors only through the
    /// channel.
    pub fn open_stream(&self, name: &str, args: Value) -> Result<String, BridgeError> {
        let def = self.registry.get(name)?;
        let channel = self.channels.create();
        let id = channel.id().to_string();
        if let Err(e) = self.execute_streaming_command(def, args, channel.sender()) {
            self.channels.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Bind `args` and spawn the handler with the channel's send capability.
    /// The channel is closed when the handler returns and failed when it
    /// errors or panics.
    pub fn execute_streaming_command(
        &self,
        def: &CommandDefinition,
        args: Value,
        sender: ChannelSender,
    ) -> Result<(), BridgeError> {
        let Handler::Stream(prepare) = &def.handler else {
            return Err(BridgeError::validation(format!(
                "Command '{}' is not a streaming command",
                def.name
            )));
        };
        let task = prepare(bind_args(def, args)?)?;
        debug!(command = %def.name, channel = sender.channel_id(), "starting stream");
        tokio::spawn(run_stream(def.name.clone(), task, sender));
        Ok(())
    }

    /// Take the receive side of a channel.
    pub fn attach(&self, channel_id: &str) -> Result<ChannelReceiver, BridgeError> {
        self.channels.attach(channel_id)
    }
}

async fn run_stream(command: String, task: StreamTask, sender: ChannelSender) {
    let outcome = AssertUnwindSafe(task(sender.clone())).catch_unwind().await;
    match outcome {
        Ok(Ok(())) => sender.close(),
        Ok(Err(message)) => {
            error!(
                command = %command,
                channel = sender.channel_id(),
                "stream handler failed: {message}"
            );
            sender.fail(message);
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(
                command = %command,
                channel = sender.channel_id(),
                "stream handler panicked: {message}"
            );
            sender.send_error(BridgeError::internal(message).to_body(false));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Keep only declared parameters. Missing optional parameters bind as
/// `null`; missing required ones are a validation error.
fn bind_args(def: &CommandDefinition, args: Value) -> Result<Map<String, Value>, BridgeError> {
    let mut supplied = match args {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(BridgeError::validation(format!(
                "Arguments for '{}' must be a JSON object, got {}",
                def.name,
                json_kind(&other)
            )))
        }
    };

    let mut bound = Map::new();
    let mut missing = Vec::new();
    for param in &def.params {
        match supplied.remove(&param.name) {
            Some(value) => {
                bound.insert(param.name.clone(), value);
            }
            None if param.optional => {
                bound.insert(param.name.clone(), Value::Null);
            }
            None => missing.push(param.name.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(BridgeError::Validation {
            message: format!(
                "Missing required argument(s) for '{}': {}",
                def.name,
                missing.join(", ")
            ),
            details: Some(json!({ "missing": missing })),
        });
    }
    if !supplied.is_empty() {
        let ignored: Vec<&String> = supplied.keys().collect();
        debug!(command = %def.name, ?ignored, "ignoring undeclared arguments");
    }
    Ok(bound)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
