//! Declarative package definitions.
//!
//! Every configured package directory is scanned for `*.json` files. Each file
//! lists products and packages; entries are templated with `{name}`,
//! `{version}`, `{label}`, `{suite}` and `{dir}` and a `versions` list
//! expands one entry into one package per version.

mod template;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::environment::{DEFAULT_SEPARATOR, ListEdit, ListKind, Transition};
use crate::expression::Expression;
use crate::package::{
    Catalog, Inherit, PackageId, PackageOptions, ProductId, ProductOptions, Rules, Source, Term,
};
use crate::runtime::Runtime;

use template::Template;

pub const DEFINITION_PATTERN: &str = "*.json";

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct DefinitionFile {
    #[serde(default)]
    pub products: Vec<ProductDef>,
    #[serde(default)]
    pub packages: Vec<PackageDef>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ProductDef {
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub short_description: Option<String>,
    pub long_description: Option<String>,
    pub self_conflict: Option<bool>,
    #[serde(flatten)]
    pub rules: RulesDef,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KindDef {
    #[default]
    Package,
    Suite,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PackageDef {
    pub product: String,
    pub version: Option<String>,
    #[serde(default)]
    pub versions: Vec<String>,
    pub suite: Option<String>,
    #[serde(default)]
    pub kind: KindDef,
    #[serde(default)]
    pub inherit: InheritDef,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub conflicting_tags: Vec<String>,
    pub short_description: Option<String>,
    pub long_description: Option<String>,
    #[serde(flatten)]
    pub rules: RulesDef,
}

#[derive(Deserialize, Debug, Default)]
pub struct RulesDef {
    #[serde(default)]
    pub requires: Vec<ConstraintDef>,
    #[serde(default)]
    pub prefers: Vec<ConstraintDef>,
    #[serde(default)]
    pub conflicts: Vec<ConstraintDef>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

/// One constraint: a single term or a conjunction of terms.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ConstraintDef {
    One(String),
    All(Vec<String>),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum InheritDef {
    All(bool),
    PerKind {
        #[serde(default = "yes")]
        requirements: bool,
        #[serde(default = "yes")]
        preferences: bool,
        #[serde(default = "yes")]
        conflicts: bool,
        #[serde(default = "yes")]
        transitions: bool,
    },
}

fn yes() -> bool {
    true
}

impl Default for InheritDef {
    fn default() -> Self {
        InheritDef::All(true)
    }
}

impl From<&InheritDef> for Inherit {
    fn from(def: &InheritDef) -> Self {
        match *def {
            InheritDef::All(inherit) => Inherit::all(inherit),
            InheritDef::PerKind {
                requirements,
                preferences,
                conflicts,
                transitions,
            } => Inherit {
                requirements,
                preferences,
                conflicts,
                transitions,
            },
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ListDef {
    pub name: String,
    pub value: String,
    pub separator: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransitionDef {
    VarSet { name: String, value: String },
    VarUnset { name: String },
    ListPrepend(ListDef),
    ListAppend(ListDef),
    ListRemove(ListDef),
    PathPrepend(ListDef),
    PathAppend(ListDef),
    PathRemove(ListDef),
}

impl TransitionDef {
    fn build(&self, template: &Template) -> Transition {
        let edit = |def: &ListDef, kind: ListKind| ListEdit {
            name: template.render(&def.name),
            value: template.render(&def.value),
            separator: def
                .separator
                .clone()
                .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string()),
            kind,
        };
        match self {
            TransitionDef::VarSet { name, value } => Transition::Set {
                name: template.render(name),
                value: template.render(value),
            },
            TransitionDef::VarUnset { name } => Transition::Unset {
                name: template.render(name),
            },
            TransitionDef::ListPrepend(def) => Transition::Prepend(edit(def, ListKind::List)),
            TransitionDef::ListAppend(def) => Transition::Append(edit(def, ListKind::List)),
            TransitionDef::ListRemove(def) => Transition::Remove(edit(def, ListKind::List)),
            TransitionDef::PathPrepend(def) => Transition::Prepend(edit(def, ListKind::Path)),
            TransitionDef::PathAppend(def) => Transition::Append(edit(def, ListKind::Path)),
            TransitionDef::PathRemove(def) => Transition::Remove(edit(def, ListKind::Path)),
        }
    }
}

fn is_product_name(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && Expression::parse(text).is_err()
}

/// A bare product name is a name term, anything else an expression.
fn parse_term(text: &str) -> Result<Term> {
    if is_product_name(text) {
        return Ok(Term::Name(text.to_string()));
    }
    let expression = Expression::parse(text)?;
    Ok(Term::Expression(expression))
}

impl ConstraintDef {
    fn terms(&self, template: &Template) -> Result<Vec<Term>> {
        let texts: Vec<&String> = match self {
            ConstraintDef::One(text) => vec![text],
            ConstraintDef::All(texts) => texts.iter().collect(),
        };
        texts
            .into_iter()
            .map(|text| parse_term(&template.render(text)))
            .collect()
    }
}

impl RulesDef {
    fn build(&self, template: &Template) -> Result<Rules> {
        let mut rules = Rules::default();
        for constraint in &self.requires {
            rules.requires(constraint.terms(template)?);
        }
        for constraint in &self.prefers {
            rules.prefers(constraint.terms(template)?);
        }
        for constraint in &self.conflicts {
            rules.conflicts(constraint.terms(template)?);
        }
        for transition in &self.transitions {
            rules.add_transition(transition.build(template));
        }
        Ok(rules)
    }
}

fn merge_rules(into: &mut Rules, rules: Rules) {
    into.requirements.extend(rules.requirements);
    into.preferences.extend(rules.preferences);
    into.conflicts.extend(rules.conflicts);
    into.transitions.extend(rules.transitions);
}

impl DefinitionFile {
    pub fn parse(text: &str) -> Result<Self> {
        let file: DefinitionFile = serde_json::from_str(text)?;
        Ok(file)
    }

    /// Register every product and package of this file into `catalog`.
    pub fn define(&self, catalog: &mut Catalog, dir: &Path) -> Result<Vec<PackageId>> {
        for def in &self.products {
            self.define_product(catalog, def, dir)?;
        }
        let mut defined = Vec::new();
        for def in &self.packages {
            defined.extend(self.define_packages(catalog, def, dir)?);
        }
        Ok(defined)
    }

    fn define_product(&self, catalog: &mut Catalog, def: &ProductDef, dir: &Path) -> Result<ProductId> {
        let template = Template::new(dir).with_name(&def.name);
        let existed = catalog.product_by_name(&def.name).is_some();
        let id = catalog.add_product(
            &def.name,
            &def.category,
            ProductOptions {
                short_description: def.short_description.as_deref().map(|s| template.render(s)),
                long_description: def.long_description.as_deref().map(|s| template.render(s)),
                self_conflict: def.self_conflict,
            },
        )?;
        if !existed {
            let rules = def.rules.build(&template)?;
            merge_rules(&mut catalog.product_mut(id).rules, rules);
        }
        Ok(id)
    }

    fn define_packages(
        &self,
        catalog: &mut Catalog,
        def: &PackageDef,
        dir: &Path,
    ) -> Result<Vec<PackageId>> {
        let product = catalog
            .product_by_name(&def.product)
            .ok_or_else(|| anyhow!("undefined product {:?}", def.product))?;
        let versions: Vec<&str> = match (&def.version, def.versions.is_empty()) {
            (Some(_), false) => bail!("{}: use either 'version' or 'versions'", def.product),
            (Some(version), true) => vec![version.as_str()],
            (None, false) => def.versions.iter().map(String::as_str).collect(),
            (None, true) => vec![""],
        };
        let suite = match &def.suite {
            Some(label) => Some(find_suite(catalog, label)?),
            None => None,
        };

        let mut ids = Vec::new();
        for version in versions {
            let id = catalog.add_package(
                product,
                version,
                PackageOptions {
                    suite,
                    is_suite: def.kind == KindDef::Suite,
                    inherit: Inherit::from(&def.inherit),
                    short_description: None,
                    long_description: None,
                },
            )?;
            let package = catalog.package(id);
            let suite_label = match suite {
                Some(suite) => catalog.package(suite).absolute_label.clone(),
                None => String::new(),
            };
            let template = Template::new(dir)
                .with_name(&package.name)
                .with_version(package.version.as_str())
                .with_label(&package.label)
                .with_suite(&suite_label);

            let rules = def.rules.build(&template)?;
            let package = catalog.package_mut(id);
            package.short_description = def.short_description.as_deref().map(|s| template.render(s));
            package.long_description = def.long_description.as_deref().map(|s| template.render(s));
            merge_rules(&mut package.rules, rules);
            for tag in &def.tags {
                catalog.add_tag(id, &template.render(tag));
            }
            for tag in &def.conflicting_tags {
                catalog.add_conflicting_tag(id, &template.render(tag));
            }
            ids.push(id);
        }
        Ok(ids)
    }
}

fn find_suite(catalog: &Catalog, label: &str) -> Result<PackageId> {
    catalog
        .packages()
        .filter(|p| p.is_suite() && p.absolute_label == label)
        .map(|p| p.id)
        .last()
        .ok_or_else(|| anyhow!("undefined suite {:?}", label))
}

/// Read one definition file and register its content.
#[tracing::instrument(skip(runtime, catalog))]
pub fn load_file<R: Runtime>(
    runtime: &R,
    catalog: &mut Catalog,
    dir: &Path,
    file: &Path,
) -> Result<Vec<PackageId>> {
    let text = runtime
        .read_to_string(file)
        .with_context(|| format!("Failed to read package file {}", file.display()))?;
    let definitions = DefinitionFile::parse(&text)
        .with_context(|| format!("Failed to parse package file {}", file.display()))?;
    // a file that fails halfway contributes nothing
    let snapshot = catalog.clone();
    catalog.set_source(Source {
        dir: dir.to_path_buf(),
        file: file.to_path_buf(),
    });
    let defined = definitions
        .define(catalog, dir)
        .with_context(|| format!("Invalid package file {}", file.display()));
    match defined {
        Ok(ids) => {
            catalog.set_source(Source::default());
            Ok(ids)
        }
        Err(e) => {
            *catalog = snapshot;
            Err(e)
        }
    }
}

/// Load every definition file found in `dirs`, skipping broken files with a
/// warning. Returns the packages defined by each directory, in order.
#[tracing::instrument(skip(runtime, catalog))]
pub fn load_directories<R: Runtime>(
    runtime: &R,
    catalog: &mut Catalog,
    dirs: &[PathBuf],
) -> Result<Vec<PackageId>> {
    let mut defined = Vec::new();
    for dir in dirs {
        if !runtime.exists(dir) {
            debug!("Package directory {} does not exist", dir.display());
            continue;
        }
        info!("Loading package definitions from {}", dir.display());
        let pattern = dir.join(DEFINITION_PATTERN);
        for file in runtime.glob(&pattern.to_string_lossy())? {
            match load_file(runtime, catalog, dir, &file) {
                Ok(ids) => defined.extend(ids),
                Err(e) => warn!("Skipping package file {}: {:#}", file.display(), e),
            }
        }
    }
    Ok(defined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{NAME, VERSION};
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    fn define(json: &str) -> (Catalog, Vec<PackageId>) {
        let mut catalog = Catalog::new();
        let ids = DefinitionFile::parse(json)
            .unwrap()
            .define(&mut catalog, Path::new("/opt/packages"))
            .unwrap();
        (catalog, ids)
    }

    #[test]
    fn test_versions_expand_with_templates() {
        let (catalog, ids) = define(
            r#"{
                "products": [{"name": "gcc", "category": "compiler"}],
                "packages": [{
                    "product": "gcc",
                    "versions": ["4.8.2", "5.1"],
                    "short_description": "GNU compiler {version}",
                    "transitions": [
                        {"action": "var_set", "name": "GCC_HOME", "value": "{dir}/{label}"},
                        {"action": "path_prepend", "name": "PATH", "value": "{dir}/{label}/bin"}
                    ]
                }]
            }"#,
        );
        assert_eq!(ids.len(), 2);
        let first = catalog.package(ids[0]);
        assert_eq!(first.label, "gcc-4.8.2");
        assert_eq!(first.short_description.as_deref(), Some("GNU compiler 4.8.2"));
        let transitions: Vec<String> = catalog
            .transitions(ids[1])
            .iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(
            transitions,
            vec![
                "var_set(GCC_HOME, '/opt/packages/gcc-5.1')",
                "path_prepend(PATH, '/opt/packages/gcc-5.1/bin')"
            ]
        );
    }

    #[test]
    fn test_constraints_names_and_expressions() {
        let (catalog, ids) = define(
            r#"{
                "products": [
                    {"name": "alfa"},
                    {"name": "beta", "requires": ["alfa"]}
                ],
                "packages": [
                    {"product": "alfa", "version": "1.0"},
                    {"product": "beta", "version": "1.0",
                     "requires": [["NAME == 'alfa'", "VERSION >= '1.0'"]],
                     "conflicts": ["CATEGORY == 'mpi'"]}
                ]
            }"#,
        );
        let beta = ids[1];
        let requirements = catalog.requirements(beta);
        assert_eq!(requirements.len(), 2);
        assert_eq!(*requirements[0], NAME.equals("alfa"));
        assert_eq!(
            *requirements[1],
            NAME.equals("alfa") & VERSION.greater_equal("1.0")
        );
        // product self-conflict plus the declared one
        assert_eq!(catalog.conflicts(beta).len(), 2);
    }

    #[test]
    fn test_suite_children_and_inherit() {
        let (catalog, ids) = define(
            r#"{
                "products": [
                    {"name": "gnu", "category": "toolchain"},
                    {"name": "gcc", "category": "compiler",
                     "transitions": [{"action": "var_set", "name": "CC", "value": "gcc"}]}
                ],
                "packages": [
                    {"product": "gnu", "version": "4.8", "kind": "suite"},
                    {"product": "gcc", "version": "4.8.2", "suite": "gnu-4.8",
                     "inherit": {"transitions": false},
                     "tags": ["{suite}"], "conflicting_tags": ["compiler"]}
                ]
            }"#,
        );
        let (suite, gcc) = (ids[0], ids[1]);
        assert!(catalog.package(suite).is_suite());
        assert_eq!(catalog.package(suite).children(), &[gcc]);
        assert_eq!(catalog.package(gcc).absolute_label, "gnu-4.8/gcc-4.8.2");
        assert!(catalog.transitions(gcc).is_empty());
        assert!(catalog.package(gcc).tags.contains("gnu-4.8"));
        assert!(catalog.tags().contains("compiler"));
        // suite requirement is inherited
        assert_eq!(catalog.requirements(gcc).len(), 1);
    }

    #[test]
    fn test_invalid_definitions() {
        let mut catalog = Catalog::new();
        let undefined = DefinitionFile::parse(r#"{"packages": [{"product": "nope", "version": "1"}]}"#)
            .unwrap()
            .define(&mut catalog, Path::new("/p"));
        assert!(undefined.unwrap_err().to_string().contains("undefined product"));

        assert!(DefinitionFile::parse(r#"{"packages": [{"product": "x", "colour": "red"}]}"#).is_err());
        assert!(
            DefinitionFile::parse(r#"{"products": [{"name": "x", "transitions": [{"action": "explode"}]}]}"#)
                .is_err()
        );

        let bad_expression =
            DefinitionFile::parse(r#"{"products": [{"name": "x", "requires": ["NAME =="]}]}"#)
                .unwrap()
                .define(&mut catalog, Path::new("/p"));
        assert!(bad_expression.is_err());
    }

    #[test]
    fn test_load_directories_skips_broken_files() {
        // --- Setup ---
        let mut runtime = MockRuntime::new();
        let dir = PathBuf::from("/opt/packages");
        let missing = PathBuf::from("/missing");
        let good = dir.join("alfa.json");
        let broken = dir.join("broken.json");

        runtime.expect_exists().with(eq(dir.clone())).returning(|_| true);
        runtime.expect_exists().with(eq(missing.clone())).returning(|_| false);
        let (g, b) = (good.clone(), broken.clone());
        runtime
            .expect_glob()
            .with(eq("/opt/packages/*.json"))
            .returning(move |_| Ok(vec![b.clone(), g.clone()]));
        runtime
            .expect_read_to_string()
            .with(eq(broken))
            .returning(|_| Ok("{ not json".to_string()));
        runtime
            .expect_read_to_string()
            .with(eq(good.clone()))
            .returning(|_| {
                Ok(r#"{"products": [{"name": "alfa"}],
                        "packages": [{"product": "alfa", "version": "1.0"}]}"#
                    .to_string())
            });

        // --- Execute ---
        let mut catalog = Catalog::new();
        let ids = load_directories(&runtime, &mut catalog, &[missing, dir.clone()]).unwrap();

        // --- Verify ---
        assert_eq!(ids.len(), 1);
        let alfa = catalog.package(ids[0]);
        assert_eq!(alfa.label, "alfa-1.0");
        assert_eq!(alfa.source.dir, dir);
        assert_eq!(alfa.source.file, good);
    }

    #[test]
    fn test_failed_file_leaves_catalog_untouched() {
        // --- Setup ---
        let mut runtime = MockRuntime::new();
        let dir = PathBuf::from("/opt/packages");
        let file = dir.join("half.json");
        runtime.expect_exists().returning(|_| true);
        let f = file.clone();
        runtime.expect_glob().returning(move |_| Ok(vec![f.clone()]));
        runtime.expect_read_to_string().returning(|_| {
            Ok(r#"{"products": [{"name": "alfa", "category": "tools"}],
                    "packages": [{"product": "alfa", "version": "1.0", "tags": ["fast"]},
                                 {"product": "nope"}]}"#
                .to_string())
        });

        // --- Execute ---
        let mut catalog = Catalog::new();
        let ids = load_directories(&runtime, &mut catalog, &[dir]).unwrap();

        // --- Verify ---
        assert!(ids.is_empty());
        assert_eq!(catalog.packages().count(), 0);
        assert!(catalog.product_by_name("alfa").is_none());
        assert!(catalog.categories().is_empty());
        assert!(catalog.tags().is_empty());
        assert!(catalog.package(catalog.root()).children().is_empty());
    }
}
