//! The story graph and everything that moves a player through it.
//!
//! # Key types
//!
//! - [`Player`], [`Page`], [`Answer`]: the data model
//! - [`StoryStore`]: the persistence gateway the server talks to;
//!   [`MemoryStore`] is an in-process implementation
//! - [`ScriptEngine`] / [`ScriptCapabilities`]: what a jumper page's script
//!   may do to the player; [`LuaScriptEngine`] runs Lua
//! - [`Navigator`]: resolves answers, scripts and linear links into the
//!   player's next page

mod error;
mod model;
mod navigator;
mod script;
mod store;

pub use error::StoryError;
pub use model::{Answer, Page, PageKind, Player};
pub use navigator::{Navigator, Outcome, Step};
pub use script::{LuaScriptEngine, ScriptCapabilities, ScriptEngine, ScriptError};
pub use store::{MemoryStore, StoreError, StoryStore};
