// src/commands/mod.rs

//! Command handlers, one module per command family

mod add;
mod install;
mod query;

pub use add::{cmd_add, cmd_add_meta};
pub use install::{cmd_install, InstallMode};
pub use query::{cmd_get_all_files, cmd_get_file, cmd_list};
