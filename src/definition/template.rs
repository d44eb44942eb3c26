use std::path::Path;

/// Placeholder values available to definition strings.
#[derive(Debug, Clone, Default)]
pub(crate) struct Template {
    values: Vec<(&'static str, String)>,
}

impl Template {
    pub(crate) fn new(dir: &Path) -> Self {
        Template {
            values: vec![("dir", dir.to_string_lossy().into_owned())],
        }
    }

    fn with(mut self, key: &'static str, value: &str) -> Self {
        self.values.retain(|(k, _)| *k != key);
        self.values.push((key, value.to_string()));
        self
    }

    pub(crate) fn with_name(self, name: &str) -> Self {
        self.with("name", name)
    }

    pub(crate) fn with_version(self, version: &str) -> Self {
        self.with("version", version)
    }

    pub(crate) fn with_label(self, label: &str) -> Self {
        self.with("label", label)
    }

    pub(crate) fn with_suite(self, suite: &str) -> Self {
        self.with("suite", suite)
    }

    /// Replace known `{key}` placeholders; unknown ones are kept as written.
    pub(crate) fn render(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let replaced = after.find('}').and_then(|end| {
                let key = &after[..end];
                self.values
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, value)| (value, end))
            });
            match replaced {
                Some((value, end)) => {
                    out.push_str(value);
                    rest = &after[end + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}
