//! Resolution of user-supplied labels such as `gcc`, `gcc-4.8`,
//! `gcc->=4.8` or `gnu-4.8/gcc-4.8.2` to packages.

use indexmap::IndexMap;
use log::{debug, warn};

use super::{Catalog, PackageId, ROOT_NAME, SUITE_SEPARATOR, VERSION_SEPARATOR, VersionOperator};
use crate::error::ZapperError;

/// Preferred version predicate per product name or absolute package name.
pub type VersionDefaults = IndexMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct LabelOptions {
    /// Allow labels without a version, matching any version.
    pub enable_default_version: bool,
    pub version_defaults: VersionDefaults,
}

impl Catalog {
    /// Every package of `pool` (or of the suites it leads to) matching `label`.
    pub fn packages_from_label(
        &self,
        label: &str,
        pool: &[PackageId],
        options: &LabelOptions,
    ) -> Result<Vec<PackageId>, ZapperError> {
        let mut segments = label.split(SUITE_SEPARATOR);
        let first = segments.next().unwrap_or_default();
        let rest: Vec<&str> = segments.collect();
        let mut found = Vec::new();
        for id in self.match_segment(first, pool, options)? {
            if rest.is_empty() {
                found.push(id);
            } else if self.package(id).is_suite() {
                found.extend(self.suite_packages(id, &rest, options)?);
            }
        }
        debug!("packages from label {:?}: {:?}", label, found);
        Ok(found)
    }

    fn suite_packages(
        &self,
        suite: PackageId,
        segments: &[&str],
        options: &LabelOptions,
    ) -> Result<Vec<PackageId>, ZapperError> {
        let matches = self.match_segment(segments[0], self.package(suite).children(), options)?;
        if segments.len() == 1 {
            return Ok(matches);
        }
        let mut found = Vec::new();
        for id in matches {
            if self.package(id).is_suite() {
                found.extend(self.suite_packages(id, &segments[1..], options)?);
            }
        }
        Ok(found)
    }

    fn match_segment(
        &self,
        segment: &str,
        pool: &[PackageId],
        options: &LabelOptions,
    ) -> Result<Vec<PackageId>, ZapperError> {
        if segment == ROOT_NAME {
            return Ok(vec![self.root()]);
        }
        let (name, version) = match segment.split_once(VERSION_SEPARATOR) {
            Some((name, version)) => (name, Some(version)),
            None if options.enable_default_version => (segment, None),
            None => {
                warn!("invalid package name {} (default version is not allowed)", segment);
                return Err(ZapperError::not_found([segment]));
            }
        };
        let operator = VersionOperator::parse(version);
        Ok(pool
            .iter()
            .copied()
            .filter(|id| {
                let package = self.package(*id);
                package.name == name && operator.matches(&package.version)
            })
            .collect())
    }

    /// Pick one package among label matches.
    ///
    /// Packages whose version satisfies a default for their absolute name win
    /// over those satisfying a default for their product name, which win over
    /// the rest; within the winning group the highest version is chosen, the
    /// last one on ties.
    pub fn choose_package(
        &self,
        candidates: &[PackageId],
        version_defaults: &VersionDefaults,
    ) -> Option<PackageId> {
        let default_matches = |key: &str, id: PackageId| {
            version_defaults
                .get(key)
                .map(|spec| VersionOperator::parse(Some(spec)).matches(&self.package(id).version))
                .unwrap_or(false)
        };
        let level = |id: PackageId| {
            let package = self.package(id);
            if default_matches(&package.absolute_name, id) {
                0
            } else if default_matches(&package.name, id) {
                1
            } else {
                2
            }
        };
        let best_level = candidates.iter().map(|id| level(*id)).min()?;
        candidates
            .iter()
            .copied()
            .filter(|id| level(*id) == best_level)
            .max_by(|a, b| self.package(*a).version.cmp(&self.package(*b).version))
    }

    /// Resolve `label` against `pool` to a single package.
    pub fn resolve_label(
        &self,
        label: &str,
        pool: &[PackageId],
        options: &LabelOptions,
    ) -> Result<Option<PackageId>, ZapperError> {
        let candidates = self.packages_from_label(label, pool, options)?;
        Ok(self.choose_package(&candidates, &options.version_defaults))
    }
}
