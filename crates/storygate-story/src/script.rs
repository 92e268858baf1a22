//! Jumper page scripts.
//!
//! A jumper page carries a small script that decides where the player goes
//! next. The script sees one thing: a [`ScriptCapabilities`] bound to the
//! player being moved, built fresh for every run. Through it the script may
//! read and bump the five stats, check and set flags, and jump to a page.
//! Nothing else about the server is reachable.
//!
//! [`ScriptEngine`] is the seam; [`LuaScriptEngine`] runs Lua 5.4 through
//! `mlua`. A script sees these globals:
//!
//! ```lua
//! knowledge()  addKnowledge(n)
//! performance() addPerformance(n)
//! sober()      addSober(n)      -- also soberness() addSoberness(n)
//! prestige()   addPrestige(n)
//! connections() addConnections(n)
//! flagCheck(name)  setFlag(name)
//! jump(pageId)
//! ```

use std::cell::RefCell;

use mlua::{Lua, LuaOptions, StdLib};
use storygate_protocol::{PageId, Stat};

use crate::Player;

/// What a script may do to the player it runs for.
pub struct ScriptCapabilities<'a> {
    player: &'a mut Player,
}

impl<'a> ScriptCapabilities<'a> {
    pub fn new(player: &'a mut Player) -> Self {
        Self { player }
    }

    pub fn stat(&self, stat: Stat) -> i64 {
        self.player.stats.get(stat)
    }

    pub fn add_stat(&mut self, stat: Stat, delta: i64) {
        self.player.stats.add(stat, delta);
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.player.has_flag(flag)
    }

    pub fn set_flag(&mut self, flag: &str) {
        self.player.set_flag(flag);
    }

    /// Points the player at `page`. The navigator checks that it exists.
    pub fn jump(&mut self, page: PageId) {
        self.player.current_page = page;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// The interpreter could not be prepared.
    #[error("script setup failed: {0}")]
    Setup(String),

    /// The script raised an error or called a capability wrongly.
    #[error("script failed: {0}")]
    Runtime(String),
}

/// Runs jumper page scripts.
///
/// Mutations made before a failure stay applied; there is no rollback.
pub trait ScriptEngine: Send + Sync + 'static {
    fn execute(&self, source: &str, caps: ScriptCapabilities<'_>) -> Result<(), ScriptError>;
}

// ---------------------------------------------------------------------------
// LuaScriptEngine
// ---------------------------------------------------------------------------

/// Default per-run allocation cap for Lua scripts.
pub const DEFAULT_LUA_MEMORY_LIMIT: usize = 1024 * 1024;

/// Getter and adder names for each stat. Soberness is reachable under both
/// its short story-script name and its full one.
const STAT_FUNCTIONS: [(Stat, &str, &str); 6] = [
    (Stat::Knowledge, "knowledge", "addKnowledge"),
    (Stat::Performance, "performance", "addPerformance"),
    (Stat::Soberness, "sober", "addSober"),
    (Stat::Soberness, "soberness", "addSoberness"),
    (Stat::Prestige, "prestige", "addPrestige"),
    (Stat::Connections, "connections", "addConnections"),
];

/// A [`ScriptEngine`] that runs each script in a fresh Lua 5.4 state.
///
/// Only the `table`, `string` and `math` libraries are loaded, and the base
/// library's file loaders are removed, so scripts can't touch the host.
#[derive(Debug, Clone)]
pub struct LuaScriptEngine {
    memory_limit: usize,
}

impl LuaScriptEngine {
    pub fn new(memory_limit: usize) -> Self {
        Self { memory_limit }
    }

    fn sandbox(&self) -> mlua::Result<Lua> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )?;
        lua.set_memory_limit(self.memory_limit)?;
        {
            let globals = lua.globals();
            for name in ["dofile", "loadfile", "load", "collectgarbage"] {
                globals.set(name, mlua::Nil)?;
            }
        }
        Ok(lua)
    }
}

impl Default for LuaScriptEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LUA_MEMORY_LIMIT)
    }
}

impl ScriptEngine for LuaScriptEngine {
    fn execute(&self, source: &str, caps: ScriptCapabilities<'_>) -> Result<(), ScriptError> {
        let lua = self
            .sandbox()
            .map_err(|e| ScriptError::Setup(e.to_string()))?;
        let caps = RefCell::new(caps);
        let caps = &caps;

        let result = lua.scope(|scope| {
            let globals = lua.globals();

            for (stat, getter, adder) in STAT_FUNCTIONS {
                globals.set(
                    getter,
                    scope.create_function(move |_, ()| Ok(caps.borrow().stat(stat)))?,
                )?;
                globals.set(
                    adder,
                    scope.create_function(move |_, delta: i64| {
                        caps.borrow_mut().add_stat(stat, delta);
                        Ok(())
                    })?,
                )?;
            }

            globals.set(
                "flagCheck",
                scope.create_function(move |_, name: String| Ok(caps.borrow().has_flag(&name)))?,
            )?;
            globals.set(
                "setFlag",
                scope.create_function(move |_, name: String| {
                    caps.borrow_mut().set_flag(&name);
                    Ok(())
                })?,
            )?;
            globals.set(
                "jump",
                scope.create_function(move |_, page: u64| {
                    caps.borrow_mut().jump(PageId(page));
                    Ok(())
                })?,
            )?;

            lua.load(source).set_name("jumper").exec()
        });

        result.map_err(|e| ScriptError::Runtime(e.to_string()))
    }
}
