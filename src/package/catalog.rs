use std::collections::{BTreeSet, HashMap};

use anyhow::{Result, bail};
use indexmap::IndexMap;
use log::{debug, warn};

use super::{
    Inherit, Package, PackageId, PackageKind, Product, ProductId, ROOT_NAME, Rules,
    SUITE_SEPARATOR, Source, Term, VERSION_SEPARATOR, Version,
};
use crate::environment::Transition;
use crate::expression::{Expression, Subject};

#[derive(Debug, Clone, Default)]
pub struct ProductOptions {
    pub short_description: Option<String>,
    pub long_description: Option<String>,
    /// Products conflict with themselves unless disabled.
    pub self_conflict: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    pub suite: Option<PackageId>,
    pub is_suite: bool,
    pub inherit: Inherit,
    pub short_description: Option<String>,
    pub long_description: Option<String>,
}

/// A satisfied constraint: `candidates` all match `expression`, sorted by
/// ascending version, and belong to the same product.
#[derive(Debug, Clone)]
pub struct Matched {
    pub source: PackageId,
    pub expression: Expression,
    pub candidates: Vec<PackageId>,
}

impl Matched {
    pub fn best(&self) -> PackageId {
        // buckets are never created empty
        self.candidates[self.candidates.len() - 1]
    }
}

#[derive(Debug, Clone)]
pub struct Unmatched {
    pub source: PackageId,
    pub expression: Expression,
}

/// `source` declares `expression`, which `target` satisfies.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub source: PackageId,
    pub expression: Expression,
    pub target: PackageId,
}

/// Arena owning every product and package defined during one invocation.
#[derive(Debug, Clone)]
pub struct Catalog {
    products: Vec<Product>,
    product_names: HashMap<String, ProductId>,
    packages: Vec<Package>,
    categories: BTreeSet<String>,
    tags: BTreeSet<String>,
    source: Source,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let root_product = Product {
            id: ProductId(0),
            name: ROOT_NAME.to_string(),
            category: String::new(),
            short_description: "The root suite".to_string(),
            long_description: "The root suite contains all available suites and packages".to_string(),
            source: Source::default(),
            rules: Rules::default(),
        };
        let root = Package {
            id: PackageId(0),
            product: ProductId(0),
            name: ROOT_NAME.to_string(),
            version: Version::default(),
            category: String::new(),
            label: ROOT_NAME.to_string(),
            absolute_name: ROOT_NAME.to_string(),
            absolute_label: ROOT_NAME.to_string(),
            suite: PackageId(0),
            kind: PackageKind::Suite {
                children: Vec::new(),
            },
            tags: BTreeSet::new(),
            inherit: Inherit::all(false),
            short_description: None,
            long_description: None,
            source: Source::default(),
            rules: Rules::default(),
        };
        Catalog {
            products: vec![root_product],
            product_names: HashMap::from([(ROOT_NAME.to_string(), ProductId(0))]),
            packages: vec![root],
            categories: BTreeSet::new(),
            tags: BTreeSet::new(),
            source: Source::default(),
        }
    }

    pub fn root(&self) -> PackageId {
        PackageId(0)
    }

    /// Entities created from now on record `source` as their origin.
    pub fn set_source(&mut self, source: Source) {
        self.source = source;
    }

    pub fn product(&self, id: ProductId) -> &Product {
        &self.products[id.0]
    }

    pub fn product_mut(&mut self, id: ProductId) -> &mut Product {
        &mut self.products[id.0]
    }

    pub fn product_by_name(&self, name: &str) -> Option<ProductId> {
        self.product_names.get(name).copied()
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0]
    }

    pub fn package_mut(&mut self, id: PackageId) -> &mut Package {
        &mut self.packages[id.0]
    }

    /// All packages except ROOT, in definition order.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter().skip(1)
    }

    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Define a product, or return the existing one when the definition agrees
    /// with it.
    pub fn add_product(
        &mut self,
        name: &str,
        category: &str,
        options: ProductOptions,
    ) -> Result<ProductId> {
        if let Some(id) = self.product_by_name(name) {
            let existing = &self.products[id.0];
            let checks = [
                ("category", Some(category), existing.category.as_str()),
                (
                    "short_description",
                    options.short_description.as_deref(),
                    existing.short_description.as_str(),
                ),
                (
                    "long_description",
                    options.long_description.as_deref(),
                    existing.long_description.as_str(),
                ),
            ];
            for (key, value, current) in checks {
                let Some(value) = value else { continue };
                if value != current {
                    bail!(
                        "invalid {} {:?} for existing product {:?}: already defined as {:?} in {}",
                        key,
                        value,
                        name,
                        current,
                        existing.source.file.display()
                    );
                }
            }
            return Ok(id);
        }

        if !is_valid_product_name(name) {
            bail!("invalid product name {:?}", name);
        }
        let id = ProductId(self.products.len());
        let mut product = Product {
            id,
            name: name.to_string(),
            category: category.to_string(),
            short_description: options.short_description.unwrap_or_default(),
            long_description: options.long_description.unwrap_or_default(),
            source: self.source.clone(),
            rules: Rules::default(),
        };
        if options.self_conflict.unwrap_or(true) {
            product.rules.conflicts([Term::Product(product.entity_ref())]);
        }
        debug!("defined product {} ({})", name, category);
        if !category.is_empty() {
            self.categories.insert(category.to_string());
        }
        self.products.push(product);
        self.product_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Define a package of `product` at `version`, attached to `options.suite`
    /// (ROOT by default).
    pub fn add_package(
        &mut self,
        product: ProductId,
        version: &str,
        options: PackageOptions,
    ) -> Result<PackageId> {
        let suite_id = options.suite.unwrap_or_else(|| self.root());
        let suite = self.package(suite_id);
        if !suite.is_suite() {
            bail!("{} is not a suite", suite.absolute_label);
        }
        let product_ref = &self.products[product.0];
        let name = product_ref.name.clone();
        let category = product_ref.category.clone();
        let version = Version::new(version);

        let label = if version.is_empty() {
            name.clone()
        } else {
            format!("{}{}{}", name, VERSION_SEPARATOR, version)
        };
        let (absolute_name, absolute_label) = if suite_id == self.root() {
            (name.clone(), label.clone())
        } else {
            let prefix = format!("{}{}", suite.absolute_label, SUITE_SEPARATOR);
            (format!("{}{}", prefix, name), format!("{}{}", prefix, label))
        };
        let suite_ref = suite.entity_ref();

        let id = PackageId(self.packages.len());
        let mut package = Package {
            id,
            product,
            name,
            version,
            category,
            label,
            absolute_name,
            absolute_label,
            suite: suite_id,
            kind: if options.is_suite {
                PackageKind::Suite {
                    children: Vec::new(),
                }
            } else {
                PackageKind::Package
            },
            tags: BTreeSet::new(),
            inherit: options.inherit,
            short_description: options.short_description,
            long_description: options.long_description,
            source: self.source.clone(),
            rules: Rules::default(),
        };
        if suite_id != self.root() {
            package.rules.requires([Term::Package(suite_ref)]);
        }
        debug!("defined {} {}", package.package_type(), package.absolute_label);
        self.packages.push(package);
        if let PackageKind::Suite { children } = &mut self.packages[suite_id.0].kind {
            children.push(id);
        }
        Ok(id)
    }

    pub fn add_tag(&mut self, id: PackageId, tag: &str) {
        self.tags.insert(tag.to_string());
        self.packages[id.0].tags.insert(tag.to_string());
    }

    /// Tag the package and make it conflict with every other package
    /// carrying the same tag.
    pub fn add_conflicting_tag(&mut self, id: PackageId, tag: &str) {
        self.add_tag(id, tag);
        self.packages[id.0]
            .rules
            .conflicts([Term::Expression(Expression::has_tag(tag))]);
    }

    fn merged<'a, T>(
        &'a self,
        id: PackageId,
        inherit: impl Fn(&Inherit) -> bool,
        list: impl Fn(&'a Rules) -> &'a [T],
    ) -> Vec<&'a T> {
        let package = self.package(id);
        let mut items = Vec::new();
        if inherit(&package.inherit) {
            items.extend(list(&self.product(package.product).rules));
        }
        items.extend(list(&package.rules));
        items
    }

    pub fn requirements(&self, id: PackageId) -> Vec<&Expression> {
        self.merged(id, |i| i.requirements, |r| r.requirements.as_slice())
    }

    pub fn preferences(&self, id: PackageId) -> Vec<&Expression> {
        self.merged(id, |i| i.preferences, |r| r.preferences.as_slice())
    }

    pub fn conflicts(&self, id: PackageId) -> Vec<&Expression> {
        self.merged(id, |i| i.conflicts, |r| r.conflicts.as_slice())
    }

    pub fn transitions(&self, id: PackageId) -> Vec<&Transition> {
        self.merged(id, |i| i.transitions, |r| r.transitions.as_slice())
    }

    pub fn short_description(&self, id: PackageId) -> &str {
        let package = self.package(id);
        package
            .short_description
            .as_deref()
            .unwrap_or(&self.product(package.product).short_description)
    }

    pub fn long_description(&self, id: PackageId) -> &str {
        let package = self.package(id);
        package
            .long_description
            .as_deref()
            .unwrap_or(&self.product(package.product).long_description)
    }

    fn evaluate(&self, expression: &Expression, candidate: PackageId) -> bool {
        let package: &dyn Subject = self.package(candidate);
        match expression.bind(package).is_true() {
            Ok(value) => value,
            Err(e) => {
                warn!("cannot evaluate {} on {}: {}", expression, self.package(candidate), e);
                false
            }
        }
    }

    /// Evaluate each expression against every candidate but `source`.
    ///
    /// Matches are grouped per (product, expression); each group lists its
    /// candidates by ascending version so that [`Matched::best`] is the latest.
    pub fn match_expressions(
        &self,
        source: PackageId,
        candidates: &[PackageId],
        expressions: &[&Expression],
    ) -> (Vec<Matched>, Vec<Unmatched>) {
        let mut buckets: IndexMap<(ProductId, usize), Vec<PackageId>> = IndexMap::new();
        let mut unmatched = Vec::new();
        for (index, expression) in expressions.iter().enumerate() {
            let mut found = false;
            for &candidate in candidates {
                if candidate == source {
                    continue;
                }
                if self.evaluate(expression, candidate) {
                    let product = self.package(candidate).product;
                    buckets.entry((product, index)).or_default().push(candidate);
                    found = true;
                }
            }
            if !found {
                unmatched.push(Unmatched {
                    source,
                    expression: (*expression).clone(),
                });
            }
        }
        let matched = buckets
            .into_iter()
            .map(|((_, index), mut packages)| {
                packages.sort_by(|a, b| self.package(*a).version.cmp(&self.package(*b).version));
                Matched {
                    source,
                    expression: expressions[index].clone(),
                    candidates: packages,
                }
            })
            .collect();
        (matched, unmatched)
    }

    pub fn match_requirements(
        &self,
        source: PackageId,
        candidates: &[PackageId],
    ) -> (Vec<Matched>, Vec<Unmatched>) {
        self.match_expressions(source, candidates, &self.requirements(source))
    }

    pub fn match_preferences(
        &self,
        source: PackageId,
        candidates: &[PackageId],
    ) -> (Vec<Matched>, Vec<Unmatched>) {
        self.match_expressions(source, candidates, &self.preferences(source))
    }

    fn own_conflicts(&self, source: PackageId, candidates: &[PackageId]) -> Vec<Conflict> {
        let mut found = Vec::new();
        for expression in self.conflicts(source) {
            for &candidate in candidates {
                if candidate != source && self.evaluate(expression, candidate) {
                    found.push(Conflict {
                        source,
                        expression: expression.clone(),
                        target: candidate,
                    });
                }
            }
        }
        found
    }

    /// Conflicts between `source` and `candidates`, declared on either side.
    pub fn match_conflicts(&self, source: PackageId, candidates: &[PackageId]) -> Vec<Conflict> {
        let mut found = self.own_conflicts(source, candidates);
        for &candidate in candidates {
            if candidate != source {
                found.extend(self.own_conflicts(candidate, &[source]));
            }
        }
        found
    }

    pub fn filter(&self, expression: &Expression, pool: &[PackageId]) -> Vec<PackageId> {
        pool.iter()
            .copied()
            .filter(|id| self.evaluate(expression, *id))
            .collect()
    }

    /// The packages plus, transitively, every child of every suite among them.
    pub fn expand_subpackages(&self, packages: &[PackageId]) -> Vec<PackageId> {
        let mut all: Vec<PackageId> = Vec::new();
        let mut queue = packages.to_vec();
        while !queue.is_empty() {
            let mut next = Vec::new();
            for id in queue {
                if all.contains(&id) {
                    continue;
                }
                all.push(id);
                next.extend_from_slice(self.package(id).children());
            }
            queue = next;
        }
        all
    }
}

fn is_valid_product_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
