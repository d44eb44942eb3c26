//! One function per CLI subcommand. Each opens the current session through
//! a [`Manager`], acts on it and ends with [`Manager::finish`].

mod manager;
mod packages;
mod paths;
mod sessions;
mod settings;

pub use manager::{LayerContent, Manager};
pub use packages::{avail, clear, list, load, show, unload};
pub use paths::{HOST_DIR_VAR, Paths, ROOT_VAR};
pub use sessions::{copy_sessions, create_session, delete_sessions, load_session, session_info, session_list};
pub use settings::{
    config_reset, config_set, config_show, version_defaults_reset, version_defaults_set,
    version_defaults_show,
};

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Resolution level; 0 falls back to the configured one.
    pub resolve: u8,
    pub subpackages: bool,
    pub sticky: bool,
    pub dry_run: bool,
    pub force: bool,
    /// Answer yes to every confirmation.
    pub yes: bool,
    pub show_translation: bool,
}

/// Print `lines`, or `empty` when there are none.
fn print_lines(lines: &[String], empty: &str) {
    if lines.is_empty() {
        println!("{}", empty);
    }
    for line in lines {
        println!("{}", line);
    }
}
