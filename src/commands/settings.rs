use anyhow::Result;
use log::info;

use super::{Manager, Options, print_lines};
use crate::config::{
    Assignment, Config, Layer, Section, keys_for, parse_version_default, reset_keys, set_keys,
};
use crate::error::ZapperError;
use crate::runtime::Runtime;

/// Show configuration. Without a layer the effective value of every key is
/// printed with the layer it comes from.
#[tracing::instrument(skip(runtime, options))]
pub fn config_show<R: Runtime>(runtime: R, options: Options, layer: Option<Layer>) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut session = manager.restore()?;
    let lines = match layer {
        None => effective_rows(&manager.session_config(session.file())),
        Some(Layer::Session) => layer_rows(Layer::Session, &session.file().config),
        Some(layer) => {
            let content = manager.layer(layer).cloned().unwrap_or_default();
            layer_rows(layer, &content.config)
        }
    };
    print_lines(&lines, "");
    manager.finish(&mut session)
}

/// Set `key=value`, `key+=value` or `key-=value` in one layer
#[tracing::instrument(skip(runtime, options))]
pub fn config_set<R: Runtime>(runtime: R, options: Options, layer: Layer, pairs: &[String]) -> Result<()> {
    let assignments = pairs
        .iter()
        .map(|pair| Assignment::parse(pair))
        .collect::<Result<Vec<_>, _>>()?;
    edit_config(runtime, options, layer, |config| set_keys(layer, config, &assignments))
}

/// Remove keys from one layer
#[tracing::instrument(skip(runtime, options))]
pub fn config_reset<R: Runtime>(runtime: R, options: Options, layer: Layer, keys: &[String]) -> Result<()> {
    edit_config(runtime, options, layer, |config| reset_keys(layer, config, keys))
}

fn edit_config<R, F>(runtime: R, options: Options, layer: Layer, edit: F) -> Result<()>
where
    R: Runtime,
    F: FnOnce(&mut Section) -> Result<bool, ZapperError>,
{
    let manager = Manager::new(runtime, options)?;
    let changed = match layer {
        Layer::Session => {
            let mut session = manager.restore()?;
            session.check_read_only()?;
            let changed = session.update_config(|dirs| manager.package_dirs(dirs), edit)?;
            manager.finish(&mut session)?;
            changed
        }
        layer => manager.update_layer(layer, |content| edit(&mut content.config))?,
    };
    if !changed {
        info!("{} config unchanged", layer);
    }
    Ok(())
}

/// Show version defaults, effective or of one layer
#[tracing::instrument(skip(runtime, options))]
pub fn version_defaults_show<R: Runtime>(runtime: R, options: Options, layer: Option<Layer>) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut session = manager.restore()?;
    let lines = match layer {
        None => {
            let config = manager.session_config(session.file());
            config
                .version_default_entries()
                .map(|(key, entry)| format!("{:<24} = {:<16} [{}]", key, entry.value, entry.layer))
                .collect()
        }
        Some(Layer::Session) => layer_rows(Layer::Session, &session.file().version_defaults),
        Some(layer) => {
            let content = manager.layer(layer).cloned().unwrap_or_default();
            layer_rows(layer, &content.version_defaults)
        }
    };
    print_lines(&lines, "No version defaults.");
    manager.finish(&mut session)
}

/// Set `product=predicate` version defaults in one layer
#[tracing::instrument(skip(runtime, options))]
pub fn version_defaults_set<R: Runtime>(
    runtime: R,
    options: Options,
    layer: Layer,
    pairs: &[String],
) -> Result<()> {
    let defaults = pairs
        .iter()
        .map(|pair| parse_version_default(pair))
        .collect::<Result<Vec<_>, _>>()?;
    edit_version_defaults(runtime, options, layer, |section| {
        let mut changed = false;
        for (key, value) in defaults {
            changed |= section.insert(key, value.clone()).as_ref() != Some(&value);
        }
        Ok(changed)
    })
}

/// Remove version defaults from one layer; all of them without keys
#[tracing::instrument(skip(runtime, options))]
pub fn version_defaults_reset<R: Runtime>(
    runtime: R,
    options: Options,
    layer: Layer,
    keys: &[String],
) -> Result<()> {
    edit_version_defaults(runtime, options, layer, |section| {
        if keys.is_empty() {
            let changed = !section.is_empty();
            section.clear();
            return Ok(changed);
        }
        let mut changed = false;
        for key in keys {
            changed |= section.shift_remove(key).is_some();
        }
        Ok(changed)
    })
}

fn edit_version_defaults<R, F>(runtime: R, options: Options, layer: Layer, edit: F) -> Result<()>
where
    R: Runtime,
    F: FnOnce(&mut Section) -> Result<bool, ZapperError>,
{
    let manager = Manager::new(runtime, options)?;
    match layer {
        Layer::Session => {
            let mut session = manager.restore()?;
            session.check_read_only()?;
            session.update_version_defaults(edit)?;
            manager.finish(&mut session)
        }
        layer => {
            manager.update_layer(layer, |content| edit(&mut content.version_defaults))?;
            Ok(())
        }
    }
}

pub(crate) fn effective_rows(config: &Config) -> Vec<String> {
    config
        .entries()
        .map(|(key, entry)| format!("{:<24} = {:<16} [{}]", key, entry.value, entry.layer))
        .map(|row| row.trim_end().to_string())
        .collect()
}

/// Stored values of `layer`, keys that layer accepts first.
pub(crate) fn layer_rows(layer: Layer, section: &Section) -> Vec<String> {
    let mut rows: Vec<String> = keys_for(layer)
        .filter_map(|def| section.get(def.name).map(|value| (def.name, value)))
        .map(|(key, value)| format!("{:<24} = {}", key, value))
        .collect();
    rows.extend(
        section
            .iter()
            .filter(|(key, _)| !keys_for(layer).any(|def| def.name == key.as_str()))
            .map(|(key, value)| format!("{:<24} = {}", key, value)),
    );
    rows.iter().map(|row| row.trim_end().to_string()).collect()
}
