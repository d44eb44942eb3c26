use anyhow::Result;
use log::{debug, info};

use super::{Manager, Options, print_lines};
use crate::package::PackageId;
use crate::runtime::Runtime;
use crate::session::Session;

/// Load packages into the current session
#[tracing::instrument(skip(runtime, options))]
pub fn load<R: Runtime>(runtime: R, options: Options, labels: &[String]) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut session = manager.restore()?;
    session.check_read_only()?;
    let load_options = manager.load_options(&session);
    let loaded = session.load_package_labels(labels, &load_options)?;
    if loaded.is_empty() {
        info!("nothing to load");
    }
    manager.finish(&mut session)
}

/// Unload packages from the current session
#[tracing::instrument(skip(runtime, options))]
pub fn unload<R: Runtime>(runtime: R, options: Options, labels: &[String]) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut session = manager.restore()?;
    session.check_read_only()?;
    let load_options = manager.load_options(&session);
    session.unload_package_labels(labels, &load_options)?;
    manager.finish(&mut session)
}

/// Unload every package of the current session
#[tracing::instrument(skip(runtime, options))]
pub fn clear<R: Runtime>(runtime: R, options: Options) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut session = manager.restore()?;
    session.check_read_only()?;
    let load_options = manager.load_options(&session);
    session.clear(&load_options)?;
    manager.finish(&mut session)
}

/// List available packages
#[tracing::instrument(skip(runtime, options))]
pub fn avail<R: Runtime>(runtime: R, options: Options, labels: &[String]) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut session = manager.restore()?;
    print_lines(&available_rows(&session, labels)?, "No packages available.");
    manager.finish(&mut session)
}

/// List loaded packages
#[tracing::instrument(skip(runtime, options))]
pub fn list<R: Runtime>(runtime: R, options: Options) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut session = manager.restore()?;
    print_lines(&loaded_rows(&session), "No packages loaded.");
    manager.finish(&mut session)
}

/// Show detailed information about a package
#[tracing::instrument(skip(runtime, options))]
pub fn show<R: Runtime>(runtime: R, options: Options, label: &str) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut session = manager.restore()?;
    let id = session.find_package(label)?;
    debug!("showing {}", session.catalog().package(id));
    for line in describe(&session, id) {
        println!("{}", line);
    }
    manager.finish(&mut session)
}

/// By category, then product, then version.
fn sorted(session: &Session, mut ids: Vec<PackageId>) -> Vec<PackageId> {
    let catalog = session.catalog();
    ids.sort_by(|a, b| {
        let (a, b) = (catalog.package(*a), catalog.package(*b));
        (&a.category, &a.name, &a.version).cmp(&(&b.category, &b.name, &b.version))
    });
    ids
}

fn mark(flag: bool, c: char) -> char {
    if flag { c } else { ' ' }
}

fn row(session: &Session, ord: usize, id: PackageId, marks: &str) -> String {
    let package = session.catalog().package(id);
    let abbr = package.package_type().chars().next().unwrap_or(' ');
    let tags: Vec<&str> = package.tags.iter().map(String::as_str).collect();
    format!(
        "{:>3}) {}{} {} {} {}",
        ord,
        abbr,
        marks,
        package.category,
        package.absolute_label,
        tags.join(" ")
    )
    .trim_end()
    .to_string()
}

/// One row per available package: type, `l` when loaded, `c` when it
/// conflicts with a loaded package.
pub(crate) fn available_rows(session: &Session, labels: &[String]) -> Result<Vec<String>> {
    let catalog = session.catalog();
    let loaded = session.loaded().ids();
    let ids = sorted(session, session.packages_matching(labels, session.available())?);
    Ok(ids
        .into_iter()
        .enumerate()
        .map(|(index, id)| {
            let is_loaded = loaded.contains(&id);
            let conflicting = !is_loaded && !catalog.match_conflicts(id, &loaded).is_empty();
            let marks = format!("{}{}", mark(is_loaded, 'l'), mark(conflicting, 'c'));
            row(session, index, id, &marks)
        })
        .collect())
}

/// One row per loaded package, `s` marking sticky ones.
pub(crate) fn loaded_rows(session: &Session) -> Vec<String> {
    sorted(session, session.loaded().ids())
        .into_iter()
        .enumerate()
        .map(|(index, id)| {
            let label = &session.catalog().package(id).absolute_label;
            let marks = mark(session.is_sticky(label), 's').to_string();
            row(session, index, id, &marks)
        })
        .collect()
}

fn section<T: ToString>(lines: &mut Vec<String>, title: &str, items: &[T]) {
    if items.is_empty() {
        return;
    }
    lines.push(format!("{}:", title));
    lines.extend(items.iter().map(|item| format!("  {}", item.to_string())));
}

pub(crate) fn describe(session: &Session, id: PackageId) -> Vec<String> {
    let catalog = session.catalog();
    let package = catalog.package(id);
    let suite = catalog.package(package.suite);
    let tags: Vec<&str> = package.tags.iter().map(String::as_str).collect();
    let mut lines = vec![
        format!("{} {}", package.package_type(), package.absolute_label),
        format!("  name          : {}", package.name),
        format!("  version       : {}", package.version),
        format!("  category      : {}", package.category),
        format!("  suite         : {}", suite.absolute_label),
        format!("  tags          : {}", tags.join(", ")),
        format!("  source        : {}", package.source.file.display()),
        format!("  loaded        : {}", session.loaded().contains(id)),
    ];
    section(&mut lines, "Transitions", &catalog.transitions(id));
    section(&mut lines, "Requirements", &catalog.requirements(id));
    section(&mut lines, "Preferences", &catalog.preferences(id));
    section(&mut lines, "Conflicts", &catalog.conflicts(id));
    if package.is_suite() {
        let children: Vec<&str> = package
            .children()
            .iter()
            .map(|child| catalog.package(*child).label.as_str())
            .collect();
        section(&mut lines, "Packages", &children);
    }
    for (title, text) in [
        ("Short description", catalog.short_description(id)),
        ("Long description", catalog.long_description(id)),
    ] {
        if !text.is_empty() {
            lines.push(format!("{}:", title));
            lines.extend(text.lines().map(|line| format!("  {}", line)));
        }
    }
    lines
}
