//! Load and unload resolution.
//!
//! A request is first resolved into a batch of packages. Requirements are
//! checked against the loaded packages plus the batch, optionally widening
//! the search to available (level 1) and defined (level 2) packages, and
//! conflicts are checked against the same simulated set. Only when every
//! check passes are transitions applied, in dependency order.

use anyhow::Result;
use log::{error, info, warn};
use std::collections::BTreeSet;

use super::Session;
use crate::error::ZapperError;
use crate::expression::Expression;
use crate::package::{Matched, PackageId};
use crate::toposort::{Dependencies, sorted_dependencies};

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// 0: no automatic changes, 1: search available packages, 2: also
    /// search every defined package.
    pub resolution_level: u8,
    pub subpackages: bool,
    pub sticky: bool,
    /// Warn about labels that resolve to nothing instead of failing.
    pub ignore_errors: bool,
}

impl Session {
    fn resolve_labels(
        &self,
        labels: &[String],
        pool: &[PackageId],
        ignore_errors: bool,
    ) -> Result<Vec<PackageId>, ZapperError> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for label in labels {
            match self
                .catalog
                .resolve_label(label, pool, &self.settings.label_options)
            {
                Ok(Some(id)) => found.push(id),
                Ok(None) | Err(ZapperError::PackageNotFound { .. }) => missing.push(label.clone()),
                Err(e) => return Err(e),
            }
        }
        if !missing.is_empty() {
            if !ignore_errors {
                return Err(ZapperError::not_found(missing));
            }
            for label in &missing {
                warn!("package {} not found", label);
            }
        }
        Ok(found)
    }

    fn label(&self, id: PackageId) -> &str {
        &self.catalog.package(id).absolute_label
    }

    fn labels(&self, ids: &[PackageId]) -> String {
        ids.iter().map(|id| self.label(*id)).collect::<Vec<_>>().join(", ")
    }

    /// Split into plain packages then suites, each group in dependency order.
    fn ordered(&self, dependencies: &Dependencies<PackageId>, batch: &[PackageId], reverse: bool) -> Vec<PackageId> {
        let (suites, plain): (Vec<PackageId>, Vec<PackageId>) = batch
            .iter()
            .copied()
            .partition(|id| self.catalog.package(*id).is_suite());
        let mut order = sorted_dependencies(dependencies, &plain, reverse);
        order.extend(sorted_dependencies(dependencies, &suites, reverse));
        order
    }

    /// A package able to satisfy `expression` for `source`, searched in the
    /// pools allowed by `resolution_level`.
    fn find_satisfier(&self, source: PackageId, expression: &Expression, resolution_level: u8) -> Option<PackageId> {
        let mut pools = Vec::new();
        if resolution_level >= 1 {
            pools.push(self.available.ids());
        }
        if resolution_level >= 2 {
            pools.push(self.defined.ids());
        }
        pools.into_iter().find_map(|pool| {
            let (matched, _) = self.catalog.match_expressions(source, &pool, &[expression]);
            matched.first().map(Matched::best)
        })
    }

    pub fn load_package_labels(&mut self, labels: &[String], options: &LoadOptions) -> Result<Vec<PackageId>> {
        let pool = self.available.ids();
        let packages = self.resolve_labels(labels, &pool, options.ignore_errors)?;
        self.load_packages(&packages, options)
    }

    /// Load `packages` and whatever `options` allow to satisfy their
    /// requirements. Returns the packages in the order they were applied.
    #[tracing::instrument(skip(self, packages), fields(session = %self.file.name))]
    pub fn load_packages(&mut self, packages: &[PackageId], options: &LoadOptions) -> Result<Vec<PackageId>> {
        let requested = if options.subpackages {
            self.catalog.expand_subpackages(packages)
        } else {
            packages.to_vec()
        };
        let mut batch: Vec<PackageId> = Vec::new();
        for id in requested {
            if self.loaded.contains(id) {
                info!("package {} is already loaded", self.label(id));
            } else if !batch.contains(&id) {
                batch.push(id);
            }
        }

        let mut dependencies: Dependencies<PackageId> = Dependencies::new();
        let mut errors: Vec<(PackageId, String)> = Vec::new();
        let mut index = 0;
        while index < batch.len() {
            let package = batch[index];
            index += 1;
            let mut simulated = self.loaded.ids();
            simulated.extend(batch.iter().copied());

            let (matched, unmatched) = self.catalog.match_requirements(package, &simulated);
            for m in &matched {
                dependencies.entry(package).or_default().insert(m.best());
            }
            for missing in unmatched {
                match self.find_satisfier(package, &missing.expression, options.resolution_level) {
                    Some(satisfier) => {
                        info!(
                            "package {} requires {}, adding {}",
                            self.label(package),
                            missing.expression,
                            self.label(satisfier)
                        );
                        dependencies.entry(package).or_default().insert(satisfier);
                        if !batch.contains(&satisfier) {
                            batch.push(satisfier);
                        }
                    }
                    None => errors.push((package, format!("requirement {} is not satisfied", missing.expression))),
                }
            }

            let (_, unmatched) = self.catalog.match_preferences(package, &simulated);
            for missing in unmatched {
                info!("package {}: preference {} is not satisfied", self.label(package), missing.expression);
            }
        }

        let mut simulated = self.loaded.ids();
        simulated.extend(batch.iter().copied());
        for &package in &batch {
            for conflict in self.catalog.match_conflicts(package, &simulated) {
                let reason = format!(
                    "{} conflicts with {} ({})",
                    self.label(conflict.source),
                    self.label(conflict.target),
                    conflict.expression
                );
                if !errors.iter().any(|(_, r)| *r == reason) {
                    errors.push((package, reason));
                }
            }
        }

        if !errors.is_empty() {
            let mut failed: Vec<PackageId> = Vec::new();
            for (package, reason) in &errors {
                error!("package {}: {}", self.label(*package), reason);
                if !failed.contains(package) {
                    failed.push(*package);
                }
            }
            return Err(ZapperError::LoadPackage {
                package: self.labels(&failed),
                reasons: errors.into_iter().map(|(_, reason)| reason).collect(),
            }
            .into());
        }

        let order = self.ordered(&dependencies, &batch, false);
        for &id in &order {
            if self.settings.dry_run {
                info!("[dry-run] loading package {}", self.label(id));
                continue;
            }
            info!("loading package {}", self.label(id));
            for transition in self.catalog.transitions(id) {
                transition.apply(&mut self.environment);
            }
            self.loaded.add(self.catalog.package(id));
            if self.catalog.package(id).is_suite() {
                self.add_suite(id);
            }
            if options.sticky {
                self.sticky.insert(self.catalog.package(id).absolute_label.clone());
            }
        }
        Ok(order)
    }

    pub fn unload_package_labels(&mut self, labels: &[String], options: &LoadOptions) -> Result<Vec<PackageId>> {
        let pool = self.loaded.ids();
        let packages = self.resolve_labels(labels, &pool, options.ignore_errors)?;
        self.unload_packages(&packages, options)
    }

    /// Unload `packages`, and with a resolution level the loaded packages
    /// whose requirements they satisfy. Returns the packages in the order
    /// they were reverted.
    #[tracing::instrument(skip(self, packages), fields(session = %self.file.name))]
    pub fn unload_packages(&mut self, packages: &[PackageId], options: &LoadOptions) -> Result<Vec<PackageId>> {
        let requested = if options.subpackages {
            self.catalog.expand_subpackages(packages)
        } else {
            packages.to_vec()
        };
        let mut batch: Vec<PackageId> = Vec::new();
        for id in requested {
            if !self.loaded.contains(id) {
                info!("package {} is not loaded", self.label(id));
            } else if self.is_sticky(self.label(id)) && !options.sticky {
                warn!("package {} is sticky, not unloaded", self.label(id));
            } else if !batch.contains(&id) {
                batch.push(id);
            }
        }

        let all_loaded = self.loaded.ids();
        let mut errors: Vec<String> = Vec::new();
        let mut blocked: BTreeSet<PackageId> = BTreeSet::new();
        loop {
            let remaining: Vec<PackageId> = all_loaded
                .iter()
                .copied()
                .filter(|id| !batch.contains(id))
                .collect();
            let mut added = false;
            for &dependent in &remaining {
                if blocked.contains(&dependent) {
                    continue;
                }
                let (_, before) = self.catalog.match_requirements(dependent, &all_loaded);
                let (_, after) = self.catalog.match_requirements(dependent, &remaining);
                let broken: Vec<&Expression> = after
                    .iter()
                    .map(|u| &u.expression)
                    .filter(|e| !before.iter().any(|u| u.expression == **e))
                    .collect();
                if broken.is_empty() {
                    continue;
                }
                let sticky = self.is_sticky(self.label(dependent)) && !options.sticky;
                if options.resolution_level == 0 || sticky {
                    for expression in broken {
                        errors.push(format!(
                            "{} requires {}{}",
                            self.label(dependent),
                            expression,
                            if sticky { " and is sticky" } else { "" }
                        ));
                    }
                    blocked.insert(dependent);
                } else {
                    info!("unloading dependent package {}", self.label(dependent));
                    batch.push(dependent);
                    added = true;
                }
            }
            if !added {
                break;
            }
        }

        if !errors.is_empty() {
            for reason in &errors {
                error!("{}", reason);
            }
            return Err(ZapperError::UnloadPackage {
                package: self.labels(&batch),
                reasons: errors,
            }
            .into());
        }

        // dependents are reverted before what they require
        let mut dependencies: Dependencies<PackageId> = Dependencies::new();
        for &package in &batch {
            let (matched, _) = self.catalog.match_requirements(package, &batch);
            for m in &matched {
                dependencies
                    .entry(package)
                    .or_default()
                    .extend(m.candidates.iter().copied());
            }
        }
        let order = self.ordered(&dependencies, &batch, true);
        for &id in &order {
            let label = self.catalog.package(id).absolute_label.clone();
            if self.settings.dry_run {
                info!("[dry-run] unloading package {}", label);
                continue;
            }
            info!("unloading package {}", label);
            for transition in self.catalog.transitions(id).into_iter().rev() {
                transition.revert(&mut self.environment);
            }
            self.loaded.remove(&label);
            self.sticky.remove(&label);
            if self.catalog.package(id).is_suite() {
                self.remove_suite(id);
            }
        }
        Ok(order)
    }

    /// Unload everything, most recently loaded first. Sticky packages stay
    /// unless `options.sticky`.
    pub fn clear(&mut self, options: &LoadOptions) -> Result<Vec<PackageId>> {
        let mut packages = self.loaded.ids();
        packages.reverse();
        self.unload_packages(&packages, options)
    }
}
