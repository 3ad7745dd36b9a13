//! Platform bridge interface
//!
//! This module defines what the core expects from the native platform
//! modules: the bridge traits and the flat JSON record every bridge uses to
//! report step query results.

mod native;
mod wire;

pub use native::*;
pub use wire::*;
