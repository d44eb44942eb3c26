//! Sessions: the set of loaded packages of one shell, persisted across
//! invocations, and the resolver that loads and unloads packages.

mod collection;
mod file;
mod resolver;

use anyhow::Result;
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::{Layer, Section, join_list, split_list};
use crate::definition;
use crate::environment::Environment;
use crate::error::ZapperError;
use crate::expression::Expression;
use crate::package::{Catalog, LabelOptions, PackageId};
use crate::runtime::Runtime;
use crate::translator::Translator;

pub use collection::PackageCollection;
pub use file::{SESSION_SUFFIX, SessionDirs, SessionFile, SessionTemplate, SessionType};
pub use resolver::LoadOptions;

pub const SESSION_VAR: &str = "ZAPPER_SESSION";
pub const LOADED_PACKAGES_VAR: &str = "ZAPPER_LOADED_PACKAGES";
pub const PACKAGE_DIR_VAR: &str = "ZAPPER_PACKAGE_DIR";

/// How a session resolves and filters packages.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub directories: Vec<PathBuf>,
    pub label_options: LabelOptions,
    pub filter: Option<Expression>,
    pub dry_run: bool,
    pub force: bool,
}

#[derive(Debug)]
pub struct Session {
    file: SessionFile,
    settings: SessionSettings,
    catalog: Catalog,
    defined: PackageCollection,
    available: PackageCollection,
    loaded: PackageCollection,
    sticky: BTreeSet<String>,
    orig_sticky: BTreeSet<String>,
    environment: Environment,
    config_changed: bool,
    deleted: bool,
}

impl Session {
    /// Build a session from its file, reading package definitions from the
    /// configured directories. Nothing is loaded yet, see [`Session::initialize`].
    #[tracing::instrument(skip(runtime, file, settings, environment), fields(session = %file.name))]
    pub fn open<R: Runtime>(
        runtime: &R,
        file: SessionFile,
        settings: SessionSettings,
        environment: Environment,
    ) -> Result<Self> {
        let mut catalog = Catalog::new();
        let defined_ids = definition::load_directories(runtime, &mut catalog, &settings.directories)?;
        let mut defined = PackageCollection::new();
        for id in defined_ids {
            defined.add(catalog.package(id));
        }
        let mut session = Session {
            file,
            settings,
            catalog,
            defined,
            available: PackageCollection::new(),
            loaded: PackageCollection::new(),
            sticky: BTreeSet::new(),
            orig_sticky: BTreeSet::new(),
            environment,
            config_changed: false,
            deleted: false,
        };
        let root = session.catalog.root();
        session.add_suite(root);
        if let Some(filter) = session.settings.filter.clone() {
            session.filter_packages(&filter);
        }
        Ok(session)
    }

    /// Revert what the shell says is loaded, then load what the session file
    /// says, so that switching sessions converges to the target state.
    #[tracing::instrument(skip(self), fields(session = %self.file.name))]
    pub fn initialize(&mut self) -> Result<()> {
        self.unload_environment_packages();
        let stored = self.file.loaded_packages.clone();
        let options = LoadOptions {
            ignore_errors: true,
            ..LoadOptions::default()
        };
        self.load_package_labels(&stored, &options)?;

        let loaded = self.loaded.labels();
        let loaded_ids = self.loaded.ids();
        for label in &stored {
            let found = self
                .catalog
                .packages_from_label(label, &loaded_ids, &self.settings.label_options)
                .unwrap_or_default();
            if found.is_empty() {
                warn!("package {} is no longer available, it has been dropped", label);
            }
        }
        for label in &loaded {
            if !stored.contains(label) {
                info!("package {} has been added", label);
            }
        }
        self.loaded.set_changed(loaded != stored);
        self.sticky = self
            .file
            .sticky_packages
            .iter()
            .filter(|label| self.loaded.contains_label(label))
            .cloned()
            .collect();
        self.orig_sticky = self.file.sticky_packages.iter().cloned().collect();
        Ok(())
    }

    fn unload_environment_packages(&mut self) {
        let Some(value) = self.environment.get(LOADED_PACKAGES_VAR).map(str::to_string) else {
            return;
        };
        for label in split_list(&value).iter().rev() {
            let found = self
                .catalog
                .packages()
                .filter(|p| p.absolute_label == *label)
                .map(|p| p.id)
                .last();
            match found {
                Some(id) => {
                    debug!("reverting {} from the environment", label);
                    for transition in self.catalog.transitions(id).into_iter().rev() {
                        transition.revert(&mut self.environment);
                    }
                }
                None => warn!("cannot revert unknown package {} from the environment", label),
            }
        }
        self.environment.unset(LOADED_PACKAGES_VAR);
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn root(&self) -> &Path {
        &self.file.root
    }

    pub fn file(&self) -> &SessionFile {
        &self.file
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.settings.directories
    }

    pub fn defined(&self) -> &PackageCollection {
        &self.defined
    }

    pub fn available(&self) -> &PackageCollection {
        &self.available
    }

    pub fn loaded(&self) -> &PackageCollection {
        &self.loaded
    }

    pub fn is_sticky(&self, label: &str) -> bool {
        self.sticky.contains(label)
    }

    pub fn is_read_only(&self) -> bool {
        self.file.is_read_only()
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Refuse to mutate a read-only session unless forced.
    pub fn check_read_only(&self) -> Result<(), ZapperError> {
        if !self.is_read_only() {
            return Ok(());
        }
        if self.settings.force {
            warn!("session {} is read-only, forcing", self.file.name);
            Ok(())
        } else {
            Err(ZapperError::Session(format!("session {} is read-only", self.file.name)))
        }
    }

    fn in_directories(&self, id: PackageId) -> bool {
        self.settings
            .directories
            .contains(&self.catalog.package(id).source.dir)
    }

    /// Make the children of a loaded suite available.
    fn add_suite(&mut self, suite: PackageId) {
        let children = self.catalog.package(suite).children().to_vec();
        for child in children {
            if !self.in_directories(child) {
                continue;
            }
            if let Some(filter) = &self.settings.filter {
                if self.catalog.filter(filter, &[child]).is_empty() {
                    continue;
                }
            }
            self.available.add(self.catalog.package(child));
        }
    }

    fn remove_suite(&mut self, suite: PackageId) {
        let children = self.catalog.package(suite).children().to_vec();
        self.available.retain(|id| !children.contains(&id));
    }

    /// Discard defined and available packages not matching `expression`.
    pub fn filter_packages(&mut self, expression: &Expression) {
        for collection in [&mut self.defined, &mut self.available] {
            let keep = self.catalog.filter(expression, &collection.ids());
            collection.retain(|id| {
                let kept = keep.contains(&id);
                if !kept {
                    debug!(
                        "discarding package {} not matching {}",
                        self.catalog.package(id).absolute_label,
                        expression
                    );
                }
                kept
            });
        }
    }

    /// Packages of `pool` matching any of `labels`, or the whole pool when
    /// no label is given.
    pub fn packages_matching(&self, labels: &[String], pool: &PackageCollection) -> Result<Vec<PackageId>, ZapperError> {
        let ids = pool.ids();
        if labels.is_empty() {
            return Ok(ids);
        }
        let mut found: Vec<PackageId> = Vec::new();
        for label in labels {
            for id in self
                .catalog
                .packages_from_label(label, &ids, &self.settings.label_options)?
            {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }
        Ok(found)
    }

    /// The defined package `label` resolves to.
    pub fn find_package(&self, label: &str) -> Result<PackageId, ZapperError> {
        self.catalog
            .resolve_label(label, &self.defined.ids(), &self.settings.label_options)?
            .ok_or_else(|| ZapperError::not_found([label]))
    }

    /// Loaded packages that would be orphaned by `directories`.
    pub fn orphaned_by(&self, directories: &[PathBuf]) -> Vec<String> {
        self.loaded
            .ids()
            .into_iter()
            .filter(|id| !directories.contains(&self.catalog.package(*id).source.dir))
            .map(|id| self.catalog.package(id).absolute_label.clone())
            .collect()
    }

    /// Apply `edit` to the session `[config]` section. Changing `directories`
    /// must not orphan loaded packages.
    pub fn update_config<F>(&mut self, resolve_dirs: impl Fn(&[String]) -> Vec<PathBuf>, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Section) -> Result<bool, ZapperError>,
    {
        let mut config = self.file.config.clone();
        if !edit(&mut config)? {
            return Ok(false);
        }
        let before = self.file.config.get("directories");
        let after = config.get("directories");
        if before != after {
            let value = after.cloned().unwrap_or_default();
            let orphans = self.orphaned_by(&resolve_dirs(&split_list(&value)));
            if !orphans.is_empty() {
                for label in &orphans {
                    error!("package {} would be orphaned", label);
                }
                return Err(ZapperError::InvalidConfigValue {
                    key: "directories".into(),
                    value,
                    reason: format!("would orphan loaded packages: {}", orphans.join(", ")),
                }
                .into());
            }
        }
        debug!("updated {} config of {}", Layer::Session, self.file.name);
        self.file.config = config;
        self.config_changed = true;
        Ok(true)
    }

    pub fn update_version_defaults<F>(&mut self, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Section) -> Result<bool, ZapperError>,
    {
        let changed = edit(&mut self.file.version_defaults)?;
        self.config_changed |= changed;
        Ok(changed)
    }

    fn sticky_labels(&self) -> Vec<String> {
        self.loaded
            .labels()
            .into_iter()
            .filter(|label| self.sticky.contains(label))
            .collect()
    }

    pub fn store<R: Runtime>(&mut self, runtime: &R) -> Result<()> {
        self.file.loaded_packages = self.loaded.labels();
        self.file.sticky_packages = self.sticky_labels();
        self.file.store(runtime)?;
        self.loaded.set_changed(false);
        self.orig_sticky = self.sticky.clone();
        self.config_changed = false;
        Ok(())
    }

    /// Persist on change (never in dry-run mode); remove the file of a
    /// deleted session.
    #[tracing::instrument(skip(self, runtime), fields(session = %self.file.name))]
    pub fn finalize<R: Runtime>(&mut self, runtime: &R) -> Result<()> {
        if self.deleted {
            if !self.settings.dry_run {
                self.file.delete(runtime)?;
            }
            return Ok(());
        }
        let changed =
            self.loaded.is_changed() || self.sticky != self.orig_sticky || self.config_changed;
        if !changed {
            return Ok(());
        }
        if self.settings.dry_run {
            info!("[dry-run] session {} not stored", self.file.name);
            return Ok(());
        }
        if self.is_read_only() && !self.settings.force {
            debug!("session {} is read-only, not stored", self.file.name);
            return Ok(());
        }
        self.store(runtime)
    }

    /// Feed the net environment changes and the session variables to
    /// `translator`.
    pub fn translate(&self, translator: &mut dyn Translator) {
        for (name, value) in self.environment.changes() {
            if name == LOADED_PACKAGES_VAR || name == SESSION_VAR {
                continue;
            }
            match value {
                Some(value) => translator.var_set(name, value),
                None => translator.var_unset(name),
            }
        }
        translator.var_set(LOADED_PACKAGES_VAR, &join_list(&self.loaded.labels()));
        if self.deleted {
            translator.var_unset(SESSION_VAR);
        } else {
            translator.var_set(SESSION_VAR, &self.file.root.to_string_lossy());
        }
    }
}
