//! Package model
//!
//! Products are named templates; packages are versioned instances of a
//! product attached to exactly one suite. Suites are packages that contain
//! other packages. Every entity lives in a [`Catalog`] arena and is addressed
//! by [`ProductId`] / [`PackageId`].

mod catalog;
mod label;
mod rules;
pub mod version;

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::expression::{Attribute, EntityRef, Subject, Value};

pub use catalog::{Catalog, Conflict, Matched, PackageOptions, ProductOptions, Unmatched};
pub use label::{LabelOptions, VersionDefaults};
pub use rules::{Rules, Term};
pub use version::{Version, VersionOperator};

pub const SUITE_SEPARATOR: char = '/';
pub const VERSION_SEPARATOR: char = '-';
pub const ROOT_NAME: &str = "ROOT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub(crate) usize);

/// Where an entity was defined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source {
    pub dir: PathBuf,
    pub file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: String,
    pub short_description: String,
    pub long_description: String,
    pub source: Source,
    pub rules: Rules,
}

impl Product {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            id: self.id.0,
            label: self.name.clone(),
        }
    }
}

/// Per-kind switches for merging product rules into a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inherit {
    pub requirements: bool,
    pub preferences: bool,
    pub conflicts: bool,
    pub transitions: bool,
}

impl Inherit {
    pub fn all(inherit: bool) -> Self {
        Inherit {
            requirements: inherit,
            preferences: inherit,
            conflicts: inherit,
            transitions: inherit,
        }
    }
}

impl Default for Inherit {
    fn default() -> Self {
        Inherit::all(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageKind {
    Package,
    Suite { children: Vec<PackageId> },
}

#[derive(Debug, Clone)]
pub struct Package {
    pub id: PackageId,
    pub product: ProductId,
    pub name: String,
    pub version: Version,
    pub category: String,
    pub label: String,
    pub absolute_name: String,
    pub absolute_label: String,
    pub suite: PackageId,
    pub kind: PackageKind,
    pub tags: BTreeSet<String>,
    pub inherit: Inherit,
    pub short_description: Option<String>,
    pub long_description: Option<String>,
    pub source: Source,
    pub rules: Rules,
}

impl Package {
    pub fn is_suite(&self) -> bool {
        matches!(self.kind, PackageKind::Suite { .. })
    }

    pub fn package_type(&self) -> &'static str {
        if self.is_suite() { "suite" } else { "package" }
    }

    pub fn children(&self) -> &[PackageId] {
        match &self.kind {
            PackageKind::Suite { children } => children,
            PackageKind::Package => &[],
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef {
            id: self.id.0,
            label: self.absolute_label.clone(),
        }
    }
}

impl Subject for Package {
    fn attribute(&self, attribute: Attribute) -> Value {
        match attribute {
            Attribute::Name => Value::Str(self.name.clone()),
            Attribute::AbsoluteName => Value::Str(self.absolute_name.clone()),
            Attribute::Label => Value::Str(self.label.clone()),
            Attribute::AbsoluteLabel => Value::Str(self.absolute_label.clone()),
            Attribute::Version => Value::Version(self.version.clone()),
            Attribute::Category => Value::Str(self.category.clone()),
            Attribute::Package => Value::Package(self.entity_ref()),
            Attribute::Product => Value::Product(EntityRef {
                id: self.product.0,
                label: self.name.clone(),
            }),
        }
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.absolute_label)
    }
}
