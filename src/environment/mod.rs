//! Process environment model
//!
//! An [`Environment`] starts from a snapshot of variables (usually the
//! process environment), records every key touched afterwards and can report
//! the net changes against the snapshot. Separator-delimited variables such as
//! `PATH` are edited through the list helpers, which keep each value at most
//! once.

mod transition;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::runtime::path::normalize_path;

pub use transition::{ListEdit, Transition};

pub const DEFAULT_SEPARATOR: &str = ":";

/// How list items are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Items compare as plain strings.
    List,
    /// Items are lexically normalized paths (`a/./b/../c` == `a/c`).
    Path,
}

impl ListKind {
    pub fn normalize(&self, item: &str) -> String {
        match self {
            ListKind::List => item.to_string(),
            ListKind::Path => normalize_path(Path::new(item)).to_string_lossy().into_owned(),
        }
    }
}

fn split<'a>(value: Option<&'a str>, separator: &str) -> Vec<&'a str> {
    value
        .map(|v| v.split(separator).filter(|item| !item.is_empty()).collect())
        .unwrap_or_default()
}

/// Items of `value` other than `item`, compared after normalization.
fn without<'a>(value: Option<&'a str>, item: &str, separator: &str, kind: ListKind) -> Vec<&'a str> {
    split(value, separator)
        .into_iter()
        .filter(|existing| kind.normalize(existing) != item)
        .collect()
}

pub(crate) fn prepended(value: Option<&str>, item: &str, separator: &str, kind: ListKind) -> String {
    let item = kind.normalize(item);
    let mut items = vec![item.as_str()];
    items.extend(without(value, &item, separator, kind));
    items.join(separator)
}

pub(crate) fn appended(value: Option<&str>, item: &str, separator: &str, kind: ListKind) -> String {
    let item = kind.normalize(item);
    let mut items = without(value, &item, separator, kind);
    items.push(&item);
    items.join(separator)
}

pub(crate) fn removed(value: Option<&str>, item: &str, separator: &str, kind: ListKind) -> String {
    without(value, &kind.normalize(item), separator, kind).join(separator)
}

/// Insert `item` next to the neighbour it had in `template`, or at the front.
pub(crate) fn inserted(
    value: Option<&str>,
    item: &str,
    template: &str,
    separator: &str,
    kind: ListKind,
) -> String {
    let item = kind.normalize(item);
    let mut items: Vec<String> = without(value, &item, separator, kind)
        .into_iter()
        .map(str::to_string)
        .collect();
    let normalized: Vec<String> = items.iter().map(|i| kind.normalize(i)).collect();
    let template: Vec<String> = split(Some(template), separator)
        .into_iter()
        .map(|i| kind.normalize(i))
        .collect();
    let position_of = |neighbour: &String| normalized.iter().position(|i| i == neighbour);

    let mut index = 0;
    if let Some(at) = template.iter().position(|i| *i == item) {
        if let Some(pos) = at.checked_sub(1).and_then(|prev| position_of(&template[prev])) {
            index = pos + 1;
        } else if let Some(pos) = template.get(at + 1).and_then(position_of) {
            index = pos;
        }
    }
    items.insert(index, item);
    items.join(separator)
}

/// Variable map with change tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
    original: BTreeMap<String, String>,
    changed: BTreeSet<String>,
}

impl Environment {
    pub fn new(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars: BTreeMap<String, String> = vars.into_iter().collect();
        Environment {
            original: vars.clone(),
            vars,
            changed: BTreeSet::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Value at construction time.
    pub fn original(&self, name: &str) -> Option<&str> {
        self.original.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if self.get(name) != Some(value.as_str()) {
            self.changed.insert(name.to_string());
            self.vars.insert(name.to_string(), value);
        }
    }

    pub fn unset(&mut self, name: &str) {
        if self.vars.remove(name).is_some() {
            self.changed.insert(name.to_string());
        }
    }

    /// Keys touched since construction, including those changed back.
    pub fn changed_keys(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    /// Net changes against the snapshot: `None` means the key was removed.
    pub fn changes(&self) -> Vec<(&str, Option<&str>)> {
        self.changed_keys()
            .filter(|key| self.get(key) != self.original(key))
            .map(|key| (key, self.get(key)))
            .collect()
    }

    pub fn list_items(&self, name: &str, separator: &str) -> Vec<&str> {
        split(self.get(name), separator)
    }

    pub fn list_contains(&self, name: &str, item: &str, separator: &str, kind: ListKind) -> bool {
        let item = kind.normalize(item);
        self.list_items(name, separator)
            .iter()
            .any(|existing| kind.normalize(existing) == item)
    }

    pub fn list_prepend(&mut self, name: &str, item: &str, separator: &str, kind: ListKind) {
        let value = prepended(self.get(name), item, separator, kind);
        self.set(name, value);
    }

    pub fn list_append(&mut self, name: &str, item: &str, separator: &str, kind: ListKind) {
        let value = appended(self.get(name), item, separator, kind);
        self.set(name, value);
    }

    pub fn list_remove(&mut self, name: &str, item: &str, separator: &str, kind: ListKind) {
        let value = removed(self.get(name), item, separator, kind);
        self.set(name, value);
    }

    pub fn list_insert(
        &mut self,
        name: &str,
        item: &str,
        template: &str,
        separator: &str,
        kind: ListKind,
    ) {
        let value = inserted(self.get(name), item, template, separator, kind);
        self.set(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        Environment::new(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn test_set_tracks_only_real_changes() {
        let mut e = env(&[("A", "1")]);
        e.set("A", "1");
        assert_eq!(e.changed_keys().count(), 0);

        e.set("A", "2");
        e.set("B", "x");
        e.unset("MISSING");
        assert_eq!(e.changed_keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(e.changes(), vec![("A", Some("2")), ("B", Some("x"))]);
    }

    #[test]
    fn test_changes_ignore_keys_changed_back() {
        let mut e = env(&[("A", "1")]);
        e.set("A", "2");
        e.set("A", "1");
        e.unset("A");
        e.set("A", "1");
        assert!(e.changes().is_empty());

        e.unset("A");
        assert_eq!(e.changes(), vec![("A", None)]);
    }

    #[test]
    fn test_list_prepend_and_append_deduplicate() {
        let mut e = env(&[("PATH", "/usr/bin:/bin:/opt/x")]);
        e.list_prepend("PATH", "/opt/x", ":", ListKind::List);
        assert_eq!(e.get("PATH"), Some("/opt/x:/usr/bin:/bin"));
        e.list_append("PATH", "/usr/bin", ":", ListKind::List);
        assert_eq!(e.get("PATH"), Some("/opt/x:/bin:/usr/bin"));
    }

    #[test]
    fn test_list_on_missing_variable() {
        let mut e = env(&[]);
        e.list_append("LD_LIBRARY_PATH", "/lib", ":", ListKind::List);
        assert_eq!(e.get("LD_LIBRARY_PATH"), Some("/lib"));
    }

    #[test]
    fn test_path_items_compare_normalized() {
        let mut e = env(&[("PATH", "/opt/a/../b:/bin")]);
        assert!(e.list_contains("PATH", "/opt/b", ":", ListKind::Path));
        assert!(!e.list_contains("PATH", "/opt/b", ":", ListKind::List));

        e.list_prepend("PATH", "/opt/./b", ":", ListKind::Path);
        assert_eq!(e.get("PATH"), Some("/opt/b:/bin"));
    }

    #[test]
    fn test_custom_separator() {
        let mut e = env(&[("FLAGS", "-O2 -g")]);
        e.list_remove("FLAGS", "-g", " ", ListKind::List);
        assert_eq!(e.get("FLAGS"), Some("-O2"));
    }

    #[test]
    fn test_insert_uses_template_neighbours() {
        // previous neighbour still present
        assert_eq!(inserted(Some("a:c"), "b", "a:b:c", ":", ListKind::List), "a:b:c");
        // only the following neighbour is left
        assert_eq!(inserted(Some("x:c"), "b", "a:b:c", ":", ListKind::List), "x:b:c");
        // no neighbour left, goes to the front
        assert_eq!(inserted(Some("x:y"), "b", "a:b:c", ":", ListKind::List), "b:x:y");
        // value not in the template at all
        assert_eq!(inserted(Some("x"), "b", "a", ":", ListKind::List), "b:x");
    }
}
