//! Single source of truth for channel event names shared between Rust and
//! TypeScript. The TypeScript mirror is `src/generate/runtime.ts`; a sync
//! test verifies they match.

pub const MESSAGE: &str = "message";
pub const ERROR: &str = "error";
pub const CLOSE: &str = "close";
