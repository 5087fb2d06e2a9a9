//! Typed command bridge: a registry of named commands and the records their
//! signatures reference, a TypeScript client generator driven by that
//! registry, and server push channels for streaming commands.

#[cfg(feature = "http")]
pub mod api;
pub mod channel;
pub mod demo;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod generate;
pub mod registry;
pub mod settings;
pub mod types;
pub mod util;

pub use channel::{ChannelManager, ChannelSender, Frame};
pub use dispatcher::Dispatcher;
pub use error::{BridgeError, ErrorBody};
pub use registry::{CommandBuilder, NoParams, Registry};
pub use types::{Bytes, Model, Shape, TypeDescriptor};
