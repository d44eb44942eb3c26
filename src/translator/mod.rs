//! Translation of environment changes into shell code.
//!
//! The process cannot change its parent shell, so every command ends by
//! writing the net environment changes as a script the shell evaluates.

mod bash;

use anyhow::{Result, bail};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::runtime::path::expand_path;

pub use bash::BashTranslator;

pub const TARGET_TRANSLATOR_VAR: &str = "ZAPPER_TARGET_TRANSLATOR";
pub const DEFAULT_TRANSLATOR: &str = "bash";

pub trait Translator {
    fn var_set(&mut self, name: &str, value: &str);
    fn var_unset(&mut self, name: &str);
    fn remove_file(&mut self, path: &Path);
    /// Write the accumulated commands.
    fn translate(&self, out: &mut dyn Write) -> Result<()>;
}

pub fn create(name: &str) -> Result<Box<dyn Translator>> {
    match name {
        "bash" => Ok(Box::new(BashTranslator::default())),
        other => bail!("unknown translator {:?}", other),
    }
}

/// `name[:file]` as found in `$ZAPPER_TARGET_TRANSLATOR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTranslator {
    pub name: String,
    pub file: Option<PathBuf>,
}

impl TargetTranslator {
    pub fn parse(value: &str, home: Option<&Path>, cwd: &Path) -> Self {
        match value.split_once(':') {
            Some((name, file)) if !file.is_empty() => TargetTranslator {
                name: name.to_string(),
                file: Some(expand_path(file, home, cwd)),
            },
            Some((name, _)) => TargetTranslator {
                name: name.to_string(),
                file: None,
            },
            None => TargetTranslator {
                name: value.to_string(),
                file: None,
            },
        }
    }
}
