//! Reversible environment edits.
//!
//! Every transition caches what it overwrites under a shadow variable that
//! travels with the environment, so a later invocation can revert it. The
//! shadow name is derived from the transition itself, which keeps two
//! packages editing the same variable from clobbering each other's cache.

use std::fmt;

use super::{Environment, ListKind, appended, prepended, removed};

/// A list edit on a separator-delimited variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEdit {
    pub name: String,
    pub value: String,
    pub separator: String,
    pub kind: ListKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Set { name: String, value: String },
    Unset { name: String },
    Prepend(ListEdit),
    Append(ListEdit),
    Remove(ListEdit),
}

/// 32-bit FNV-1a, stable across builds and platforms.
fn fnv1a(parts: &[&str]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for part in parts {
        for byte in part.bytes().chain(std::iter::once(0)) {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
    }
    hash
}

impl Transition {
    /// Name of the variable this transition edits.
    pub fn name(&self) -> &str {
        match self {
            Transition::Set { name, .. } | Transition::Unset { name } => name,
            Transition::Prepend(edit) | Transition::Append(edit) | Transition::Remove(edit) => {
                &edit.name
            }
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Transition::Set { .. } => "var_set",
            Transition::Unset { .. } => "var_unset",
            Transition::Prepend(edit) if edit.kind == ListKind::Path => "path_prepend",
            Transition::Prepend(_) => "list_prepend",
            Transition::Append(edit) if edit.kind == ListKind::Path => "path_append",
            Transition::Append(_) => "list_append",
            Transition::Remove(edit) if edit.kind == ListKind::Path => "path_remove",
            Transition::Remove(_) => "list_remove",
        }
    }

    fn value(&self) -> &str {
        match self {
            Transition::Set { value, .. } => value,
            Transition::Unset { .. } => "",
            Transition::Prepend(edit) | Transition::Append(edit) | Transition::Remove(edit) => {
                &edit.value
            }
        }
    }

    /// Variable holding the value this transition replaced.
    pub fn shadow_key(&self) -> String {
        format!(
            "_ZAP_{}_{:08x}",
            self.name(),
            fnv1a(&[self.action(), self.value()])
        )
    }

    /// Result of this edit applied to `value`; `None` for scalar transitions.
    fn edited(&self, value: Option<&str>) -> Option<String> {
        match self {
            Transition::Prepend(e) => Some(prepended(value, &e.value, &e.separator, e.kind)),
            Transition::Append(e) => Some(appended(value, &e.value, &e.separator, e.kind)),
            Transition::Remove(e) => Some(removed(value, &e.value, &e.separator, e.kind)),
            Transition::Set { .. } | Transition::Unset { .. } => None,
        }
    }

    fn cache(&self, env: &mut Environment, value: Option<String>) {
        let shadow = self.shadow_key();
        match value {
            Some(value) if env.get(&shadow).is_none() => env.set(&shadow, value),
            _ => {}
        }
    }

    pub fn apply(&self, env: &mut Environment) {
        let current = env.get(self.name()).map(str::to_string);
        match self {
            Transition::Set { name, value } => {
                self.cache(env, current);
                env.set(name, value.clone());
            }
            Transition::Unset { name } => {
                self.cache(env, current);
                env.unset(name);
            }
            Transition::Prepend(e) => {
                self.cache(env, current);
                env.list_prepend(&e.name, &e.value, &e.separator, e.kind);
            }
            Transition::Append(e) => {
                self.cache(env, current);
                env.list_append(&e.name, &e.value, &e.separator, e.kind);
            }
            Transition::Remove(e) => {
                if env.list_contains(&e.name, &e.value, &e.separator, e.kind) {
                    self.cache(env, current);
                    env.list_remove(&e.name, &e.value, &e.separator, e.kind);
                }
            }
        }
    }

    /// Undo [`apply`](Self::apply). The shadow variable is always removed.
    ///
    /// List edits restore the cached value verbatim when nothing else touched
    /// the variable in between, and otherwise only undo their own item.
    pub fn revert(&self, env: &mut Environment) {
        let shadow = self.shadow_key();
        let cached = env.get(&shadow).map(str::to_string);
        env.unset(&shadow);
        let current = env.get(self.name()).map(str::to_string);
        match self {
            Transition::Set { name, value } => match cached {
                Some(cached) => env.set(name, cached),
                None if current.as_deref() == Some(value.as_str()) => env.unset(name),
                None => {}
            },
            Transition::Unset { name } => {
                if let Some(cached) = cached {
                    env.set(name, cached);
                }
            }
            Transition::Prepend(e) | Transition::Append(e) => {
                if current == self.edited(cached.as_deref()) {
                    match cached {
                        Some(cached) => env.set(&e.name, cached),
                        None => env.unset(&e.name),
                    }
                    return;
                }
                env.list_remove(&e.name, &e.value, &e.separator, e.kind);
                if env.get(&e.name).is_none_or(str::is_empty) {
                    env.unset(&e.name);
                }
            }
            Transition::Remove(e) => {
                let Some(cached) = cached else { return };
                if current == self.edited(Some(cached.as_str())) {
                    env.set(&e.name, cached);
                } else {
                    env.list_insert(&e.name, &e.value, &cached, &e.separator, e.kind);
                }
            }
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Unset { name } => write!(f, "{}({})", self.action(), name),
            _ => write!(f, "{}({}, '{}')", self.action(), self.name(), self.value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        Environment::new(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    fn edit(name: &str, value: &str, kind: ListKind) -> ListEdit {
        ListEdit {
            name: name.to_string(),
            value: value.to_string(),
            separator: ":".to_string(),
            kind,
        }
    }

    fn all_kinds(name: &str, value: &str) -> Vec<Transition> {
        let mut transitions = vec![
            Transition::Set {
                name: name.to_string(),
                value: value.to_string(),
            },
            Transition::Unset {
                name: name.to_string(),
            },
        ];
        for kind in [ListKind::List, ListKind::Path] {
            transitions.push(Transition::Prepend(edit(name, value, kind)));
            transitions.push(Transition::Append(edit(name, value, kind)));
            transitions.push(Transition::Remove(edit(name, value, kind)));
        }
        transitions
    }

    #[test]
    fn test_apply_then_revert_restores_environment() {
        let initial_states: Vec<Vec<(&str, &str)>> = vec![
            vec![],
            vec![("X", "/opt/a")],
            vec![("X", "/opt/b")],
            vec![("X", "/opt/a:/opt/b:/opt/a")],
            vec![("X", "/opt/b:/opt/a:/opt/c")],
        ];
        for state in initial_states {
            for transition in all_kinds("X", "/opt/a") {
                let before = env(&state);
                let mut e = before.clone();
                transition.apply(&mut e);
                transition.revert(&mut e);
                assert_eq!(
                    e.get("X"),
                    before.get("X"),
                    "{} on {:?}",
                    transition,
                    state
                );
                assert_eq!(e.get(&transition.shadow_key()), None, "{}", transition);
            }
        }
    }

    #[test]
    fn test_set_revert_without_prior_value_unsets() {
        let mut e = env(&[]);
        let t = Transition::Set {
            name: "CC".into(),
            value: "gcc".into(),
        };
        t.apply(&mut e);
        assert_eq!(e.get("CC"), Some("gcc"));
        t.revert(&mut e);
        assert_eq!(e.get("CC"), None);
        assert!(e.changes().is_empty());
    }

    #[test]
    fn test_repeated_apply_keeps_first_cache() {
        let mut e = env(&[("CC", "cc")]);
        let t = Transition::Set {
            name: "CC".into(),
            value: "gcc".into(),
        };
        t.apply(&mut e);
        t.apply(&mut e);
        t.revert(&mut e);
        assert_eq!(e.get("CC"), Some("cc"));
    }

    #[test]
    fn test_interleaved_list_edits() {
        let mut e = env(&[("PATH", "/bin")]);
        let a = Transition::Prepend(edit("PATH", "/opt/a", ListKind::Path));
        let b = Transition::Prepend(edit("PATH", "/opt/b", ListKind::Path));
        a.apply(&mut e);
        b.apply(&mut e);
        assert_eq!(e.get("PATH"), Some("/opt/b:/opt/a:/bin"));

        // out-of-order revert only drops its own item
        a.revert(&mut e);
        assert_eq!(e.get("PATH"), Some("/opt/b:/bin"));
        b.revert(&mut e);
        assert_eq!(e.get("PATH"), Some("/bin"));
    }

    #[test]
    fn test_interleaved_list_edits_on_missing_variable() {
        let mut e = env(&[]);
        let a = Transition::Append(edit("MANPATH", "/a", ListKind::List));
        let b = Transition::Append(edit("MANPATH", "/b", ListKind::List));
        a.apply(&mut e);
        b.apply(&mut e);
        a.revert(&mut e);
        assert_eq!(e.get("MANPATH"), Some("/b"));
        b.revert(&mut e);
        assert_eq!(e.get("MANPATH"), None);
    }

    #[test]
    fn test_remove_of_absent_item_is_a_no_op() {
        let mut e = env(&[("PATH", "/bin")]);
        let t = Transition::Remove(edit("PATH", "/opt/a", ListKind::List));
        t.apply(&mut e);
        assert!(e.changed_keys().next().is_none());
        t.revert(&mut e);
        assert_eq!(e.get("PATH"), Some("/bin"));
    }

    #[test]
    fn test_remove_revert_reinserts_near_old_neighbour() {
        let mut e = env(&[("PATH", "/a:/b:/c")]);
        let t = Transition::Remove(edit("PATH", "/b", ListKind::List));
        t.apply(&mut e);
        assert_eq!(e.get("PATH"), Some("/a:/c"));
        e.list_append("PATH", "/d", ":", ListKind::List);
        t.revert(&mut e);
        assert_eq!(e.get("PATH"), Some("/a:/b:/c:/d"));
    }

    #[test]
    fn test_shadow_keys_differ_per_transition() {
        let a = Transition::Prepend(edit("PATH", "/opt/a", ListKind::List));
        let b = Transition::Prepend(edit("PATH", "/opt/b", ListKind::List));
        assert_ne!(a.shadow_key(), b.shadow_key());
        assert!(a.shadow_key().starts_with("_ZAP_PATH_"));
        assert_eq!(a.shadow_key(), a.clone().shadow_key());
    }

    #[test]
    fn test_display() {
        let t = Transition::Prepend(edit("PATH", "/opt/a", ListKind::Path));
        assert_eq!(t.to_string(), "path_prepend(PATH, '/opt/a')");
        let t = Transition::Unset { name: "CC".into() };
        assert_eq!(t.to_string(), "var_unset(CC)");
    }
}
