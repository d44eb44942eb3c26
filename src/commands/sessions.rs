use anyhow::Result;
use log::{debug, info};
use std::path::Path;

use super::{Manager, Options, print_lines};
use crate::error::ZapperError;
use crate::runtime::Runtime;
use crate::session::{SESSION_VAR, Session, SessionFile, SessionType};

/// Create a session and switch to it
#[tracing::instrument(skip(runtime, options))]
pub fn create_session<R: Runtime>(
    runtime: R,
    options: Options,
    name: Option<&str>,
    description: &str,
) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut session = manager.create(name, description)?;
    println!("Created session {} at {}", session.name(), session.root().display());
    manager.finish(&mut session)
}

/// Switch to an existing session
#[tracing::instrument(skip(runtime, options))]
pub fn load_session<R: Runtime>(runtime: R, options: Options, name: &str) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let file = manager.find(name)?;
    let mut session = manager.open(file)?;
    manager.finish(&mut session)
}

/// Delete the sessions matching `patterns`, or the current one
#[tracing::instrument(skip(runtime, options))]
pub fn delete_sessions<R: Runtime>(runtime: R, options: Options, patterns: &[String]) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut current = manager.restore()?;
    let targets = if patterns.is_empty() {
        vec![current.file().clone()]
    } else {
        let dirs = manager.session_dirs();
        let mut found: Vec<SessionFile> = Vec::new();
        for pattern in patterns {
            for file in dirs.list(manager.runtime(), pattern)? {
                if !found.iter().any(|f| f.root == file.root) {
                    found.push(file);
                }
            }
        }
        found
    };
    if targets.is_empty() {
        return Err(ZapperError::Session(format!("no session matches {}", patterns.join(", "))).into());
    }

    let options = manager.options();
    if !options.force {
        if let Some(file) = targets.iter().find(|f| f.is_read_only()) {
            return Err(ZapperError::Session(format!(
                "session {} is read-only, use --force to delete it",
                file.name
            ))
            .into());
        }
    }

    for file in &targets {
        if file.session_type == SessionType::Persistent
            && !options.yes
            && !manager
                .runtime()
                .confirm(&format!("Delete session {}?", file.name))?
        {
            info!("session {} kept", file.name);
            continue;
        }
        if file.root == current.root() {
            current.mark_deleted();
        } else if options.dry_run {
            info!("[dry-run] session {} not deleted", file.name);
        } else {
            file.delete(manager.runtime())?;
        }
        println!("Deleted session {}", file.name);
    }
    manager.finish(&mut current)
}

/// Copy a session to new persistent sessions. With a single name the
/// current session is copied.
#[tracing::instrument(skip(runtime, options))]
pub fn copy_sessions<R: Runtime>(runtime: R, options: Options, names: &[String]) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let mut current = manager.restore()?;
    manager.finish(&mut current)?;

    let (source, targets) = match names {
        [] => return Err(ZapperError::Session("no target session".into()).into()),
        [target] => (current.file().clone(), std::slice::from_ref(target)),
        [source, targets @ ..] => (manager.find(source)?, targets),
    };
    let dirs = manager.session_dirs();
    for target in targets {
        if manager.options().dry_run {
            info!("[dry-run] session {} not copied to {}", source.name, target);
            continue;
        }
        let copy = dirs.copy(manager.runtime(), &source, target)?;
        println!("Copied session {} to {}", source.name, copy.name);
    }
    Ok(())
}

/// Show information about a session
#[tracing::instrument(skip(runtime, options))]
pub fn session_info<R: Runtime>(runtime: R, options: Options, name: Option<&str>) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    match name {
        Some(name) => {
            let file = manager.find(name)?;
            let session = manager.open(file)?;
            print_lines(&info_lines(&session), "");
            Ok(())
        }
        None => {
            let mut session = manager.restore()?;
            print_lines(&info_lines(&session), "");
            manager.finish(&mut session)
        }
    }
}

/// List sessions
#[tracing::instrument(skip(runtime, options))]
pub fn session_list<R: Runtime>(runtime: R, options: Options, pattern: Option<&str>) -> Result<()> {
    let manager = Manager::new(runtime, options)?;
    let current = manager.runtime().env_var(SESSION_VAR).ok();
    let files = manager
        .session_dirs()
        .list(manager.runtime(), pattern.unwrap_or("*"))?;
    debug!("found {} session(s)", files.len());
    print_lines(&list_rows(&files, current.as_deref().map(Path::new)), "No sessions.");
    Ok(())
}

pub(crate) fn info_lines(session: &Session) -> Vec<String> {
    let file = session.file();
    let mut lines = vec![
        format!("Session {} at {}", file.name, file.root.display()),
        format!("  name          : {}", file.name),
        format!("  type          : {}", file.session_type),
        format!("  description   : {}", file.description()),
        format!("  read-only     : {}", file.is_read_only()),
        format!("  creation time : {}", file.creation_time),
        "Package directories:".to_string(),
    ];
    lines.extend(
        session
            .directories()
            .iter()
            .enumerate()
            .map(|(index, dir)| format!("{:>3}) {}", index, dir.display())),
    );
    lines.push("Loaded packages:".to_string());
    lines.extend(
        session
            .loaded()
            .labels()
            .iter()
            .enumerate()
            .map(|(index, label)| format!("{:>3}) {}", index, label)),
    );
    lines
}

pub(crate) fn list_rows(files: &[SessionFile], current: Option<&Path>) -> Vec<String> {
    files
        .iter()
        .enumerate()
        .map(|(index, file)| {
            let mark = if current == Some(file.root.as_path()) { '*' } else { ' ' };
            format!(
                "{:>3}) {} {:<10} {} {}",
                index,
                mark,
                file.session_type.to_string(),
                file.name,
                file.description()
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{open_session, runtime_with_definitions, session_file};
    use crate::test_utils::SandboxRuntime;
    use std::fs;
    use tempfile::tempdir;

    fn sandbox(home: &Path) -> SandboxRuntime {
        let mut runtime = SandboxRuntime::new(home);
        runtime.set_var("ZAPPER_HOST_DIR", home.join("host").display().to_string());
        runtime
    }

    fn sessions_dir(home: &Path) -> std::path::PathBuf {
        home.join(".zapper").join("sessions")
    }

    #[test]
    fn test_info_lines() {
        let runtime = runtime_with_definitions(r#"{"products": [{"name": "alfa"}],
            "packages": [{"product": "alfa", "version": "1.0"}]}"#);
        let mut file = session_file(&["alfa-1.0"]);
        file.config.insert("description".into(), "daily work".into());
        let mut session = open_session(&runtime, file, &[]);
        session.initialize().unwrap();

        let lines = info_lines(&session);
        assert_eq!(lines[0], "Session work at /tmp/zapper/sessions/work");
        assert_eq!(lines[2], "  type          : persistent");
        assert_eq!(lines[3], "  description   : daily work");
        assert_eq!(lines[7], "  0) /opt/packages");
        assert_eq!(lines[9], "  0) alfa-1.0");
    }

    #[test]
    fn test_list_rows_mark_current() {
        let mut work = SessionFile::new("/s/work", "work", SessionType::Persistent);
        work.config.insert("description".into(), "daily".into());
        let temp = SessionFile::new("/t/zapAb1x2", "zapAb1x2", SessionType::Temporary);

        let rows = list_rows(&[work, temp], Some(Path::new("/t/zapAb1x2")));
        assert_eq!(
            rows,
            vec!["  0)   persistent work daily", "  1) * temporary  zapAb1x2"]
        );
    }

    #[test]
    fn test_create_and_copy_sessions() {
        let dir = tempdir().unwrap();
        let home = dir.path();

        create_session(sandbox(home), Options::default(), Some("work"), "daily").unwrap();
        assert!(sessions_dir(home).join("work.session").exists());

        let names = ["work".to_string(), "backup".to_string()];
        copy_sessions(sandbox(home), Options::default(), &names).unwrap();
        let copy = SessionFile::load(&sandbox(home), &sessions_dir(home).join("backup")).unwrap();
        assert_eq!(copy.session_type, SessionType::Persistent);
        assert_eq!(copy.description(), "daily");

        // the target exists now
        let err = copy_sessions(sandbox(home), Options::default(), &names).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ZapperError>(),
            Some(ZapperError::SessionCreation(_))
        ));
    }

    #[test]
    fn test_create_session_rejects_invalid_name() {
        let dir = tempdir().unwrap();
        let result = create_session(sandbox(dir.path()), Options::default(), Some("1x"), "");
        assert!(result.is_err());
    }

    #[test]
    fn test_delete_sessions_asks_for_persistent_ones() {
        let dir = tempdir().unwrap();
        let home = dir.path();
        create_session(sandbox(home), Options::default(), Some("alpha"), "").unwrap();
        create_session(sandbox(home), Options::default(), Some("beta"), "").unwrap();

        let mut declining = sandbox(home);
        declining.answer = false;
        delete_sessions(declining, Options::default(), &["al*".to_string()]).unwrap();
        assert!(sessions_dir(home).join("alpha.session").exists());

        delete_sessions(sandbox(home), Options::default(), &["al*".to_string()]).unwrap();
        assert!(!sessions_dir(home).join("alpha.session").exists());
        assert!(sessions_dir(home).join("beta.session").exists());
    }

    #[test]
    fn test_delete_read_only_session_needs_force() {
        let dir = tempdir().unwrap();
        let home = dir.path();
        create_session(sandbox(home), Options::default(), Some("frozen"), "").unwrap();
        let path = sessions_dir(home).join("frozen.session");
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("[config]", "[config]\nread_only=true")).unwrap();

        let yes = Options {
            yes: true,
            ..Options::default()
        };
        let err = delete_sessions(sandbox(home), yes.clone(), &["frozen".to_string()]).unwrap_err();
        assert!(matches!(err.downcast_ref::<ZapperError>(), Some(ZapperError::Session(_))));
        assert!(path.exists());

        let forced = Options { force: true, ..yes };
        delete_sessions(sandbox(home), forced, &["frozen".to_string()]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_load_unknown_session() {
        let dir = tempdir().unwrap();
        let err = load_session(sandbox(dir.path()), Options::default(), "nowhere").unwrap_err();
        assert!(matches!(err.downcast_ref::<ZapperError>(), Some(ZapperError::Session(_))));
    }
}
