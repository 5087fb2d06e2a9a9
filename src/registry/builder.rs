use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channel::ChannelSender;
use crate::error::BridgeError;
use crate::types::{Model, Shape};

use super::{CommandDefinition, ModelRegistry, ParamDefinition};

// ── Type-erased handlers ────────────────────────────────────────

pub(crate) type CallFn =
    dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, BridgeError>> + Send + Sync;

/// A streaming command whose arguments are already bound, waiting for its
/// channel.
pub(crate) type StreamTask =
    Box<dyn FnOnce(ChannelSender<Value>) -> BoxFuture<'static, Result<(), String>> + Send>;

pub(crate) type StreamFn =
    dyn Fn(Map<String, Value>) -> Result<StreamTask, BridgeError> + Send + Sync;

#[derive(Clone)]
pub(crate) enum Handler {
    Call(Arc<CallFn>),
    Stream(Arc<StreamFn>),
}

/// Parameter type for commands that take no arguments.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct NoParams {}

fn decode_params<P: DeserializeOwned>(args: Map<String, Value>) -> Result<P, BridgeError> {
    serde_json::from_value(Value::Object(args)).map_err(|e| BridgeError::Validation {
        message: format!("Invalid arguments: {e}"),
        details: None,
    })
}

// ── Builder ─────────────────────────────────────────────────────

/// Declares one command. The fields of `P` become the ordered parameter
/// list; the terminal `handler`/`stream` call produces the definition.
///
/// ```ignore
/// let def = CommandBuilder::new("add_item", module_path!())
///     .doc("Add an item to the list.")
///     .params::<AddItemParams>()
///     .handler(move |p| { let store = store.clone(); async move { store.add(p.name) } });
/// ```
pub struct CommandBuilder<P = NoParams> {
    name: String,
    module: String,
    documentation: Option<String>,
    params: Vec<ParamDefinition>,
    models: ModelRegistry,
    _params: PhantomData<fn() -> P>,
}

impl CommandBuilder<NoParams> {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            documentation: None,
            params: Vec::new(),
            models: ModelRegistry::default(),
            _params: PhantomData,
        }
    }
}

impl<P> CommandBuilder<P> {
    pub fn doc(mut self, documentation: impl Into<String>) -> Self {
        let text = documentation.into();
        self.documentation = Some(text.trim().to_string()).filter(|d| !d.is_empty());
        self
    }

    /// Take the parameter list from the fields of record `Q`. `Q` itself is
    /// not registered as a model; the records its fields reference are.
    pub fn params<Q: Model + DeserializeOwned>(self) -> CommandBuilder<Q> {
        let mut models = self.models;
        Q::define_dependencies(&mut models);
        let params = Q::definition()
            .fields
            .into_iter()
            .map(|f| ParamDefinition {
                optional: f.optional || f.ty.is_nullable(),
                name: f.name,
                ty: f.ty,
            })
            .collect();
        CommandBuilder {
            name: self.name,
            module: self.module,
            documentation: self.documentation,
            params,
            models,
            _params: PhantomData,
        }
    }
}

impl<P: DeserializeOwned + Send + 'static> CommandBuilder<P> {
    /// Finish as a request/response command.
    pub fn handler<F, Fut, R, E>(self, f: F) -> CommandDefinition
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Shape + Serialize + 'static,
        E: Display + 'static,
    {
        let mut models = self.models;
        R::define(&mut models);
        let return_type = Some(R::descriptor()).filter(|t| !t.is_null());

        let call: Arc<CallFn> = Arc::new(move |args: Map<String, Value>| {
            match decode_params::<P>(args) {
                Ok(params) => {
                    let fut = f(params);
                    async move {
                        let value = fut.await.map_err(|e| BridgeError::CommandExecution {
                            message: e.to_string(),
                        })?;
                        serde_json::to_value(value).map_err(|e| {
                            BridgeError::internal(format!("Failed to serialize result: {e}"))
                        })
                    }
                    .boxed()
                }
                Err(e) => futures_util::future::ready(Err(e)).boxed(),
            }
        });

        CommandDefinition {
            name: self.name,
            params: self.params,
            return_type,
            stream_type: None,
            documentation: self.documentation,
            module: self.module,
            handler: Handler::Call(call),
            models,
        }
    }

    /// Finish as a streaming command. `f` receives a send capability typed
    /// with the payload `T`; the dispatcher closes the channel when `f`
    /// returns and turns an `Err` into the channel's error frame.
    pub fn stream<T, F, Fut, E>(self, f: F) -> CommandDefinition
    where
        T: Shape + Serialize + 'static,
        F: Fn(P, ChannelSender<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + 'static,
    {
        let mut models = self.models;
        T::define(&mut models);
        let stream_type = T::descriptor();

        let f = Arc::new(f);
        let prepare: Arc<StreamFn> = Arc::new(
            move |args: Map<String, Value>| -> Result<StreamTask, BridgeError> {
                let params = decode_params::<P>(args)?;
                let f = Arc::clone(&f);
                let task: StreamTask = Box::new(move |sender: ChannelSender<Value>| {
                    let fut = f(params, sender.retype::<T>());
                    async move { fut.await.map_err(|e| e.to_string()) }.boxed()
                });
                Ok(task)
            },
        );

        CommandDefinition {
            name: self.name,
            params: self.params,
            return_type: None,
            stream_type: Some(stream_type),
            documentation: self.documentation,
            module: self.module,
            handler: Handler::Stream(prepare),
            models,
        }
    }
}
