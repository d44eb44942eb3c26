use anyhow::{Context, Result};
use log::debug;
use std::path::PathBuf;

use crate::runtime::Runtime;
use crate::runtime::path::expand_path;

pub const ROOT_VAR: &str = "ZAPPER_ROOT";
pub const HOST_DIR_VAR: &str = "ZAPPER_HOST_DIR";

const HOST_CONFIG: &str = "host.config";
const USER_CONFIG: &str = "user.config";

/// Well-known locations of configuration files, package directories and
/// session directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub home: Option<PathBuf>,
    pub cwd: PathBuf,
    pub rc_dir: PathBuf,
    pub host_dir: PathBuf,
}

impl Paths {
    #[tracing::instrument(skip(runtime))]
    pub fn new<R: Runtime>(runtime: &R) -> Result<Self> {
        let home = runtime.home_dir();
        let cwd = runtime.current_dir()?;
        let rc_dir = match runtime.env_var(ROOT_VAR) {
            Ok(dir) if !dir.is_empty() => expand_path(&dir, home.as_deref(), &cwd),
            _ => default_rc_dir(runtime)?,
        };
        let host_dir = match runtime.env_var(HOST_DIR_VAR) {
            Ok(dir) if !dir.is_empty() => expand_path(&dir, home.as_deref(), &cwd),
            _ => system_host_dir(),
        };
        debug!("rc dir {}, host dir {}", rc_dir.display(), host_dir.display());
        Ok(Paths {
            home,
            cwd,
            rc_dir,
            host_dir,
        })
    }

    /// Expand `~` and make `raw` absolute.
    pub fn expand(&self, raw: &str) -> PathBuf {
        expand_path(raw, self.home.as_deref(), &self.cwd)
    }

    pub fn host_config(&self) -> PathBuf {
        self.host_dir.join(HOST_CONFIG)
    }

    pub fn host_packages_dir(&self) -> PathBuf {
        self.host_dir.join("packages")
    }

    pub fn user_config(&self) -> PathBuf {
        self.rc_dir.join(USER_CONFIG)
    }

    pub fn user_packages_dir(&self) -> PathBuf {
        self.rc_dir.join("packages")
    }

    pub fn persistent_sessions_dir(&self) -> PathBuf {
        self.rc_dir.join("sessions")
    }

    /// Per-user directory under the system temporary directory.
    pub fn temporary_sessions_dir<R: Runtime>(&self, runtime: &R) -> PathBuf {
        let user = runtime
            .env_var("USER")
            .or_else(|_| runtime.env_var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        runtime
            .temp_dir()
            .join(format!("zapper-{}", user))
            .join("sessions")
    }
}

/// Get the default user rc directory
#[tracing::instrument(skip(runtime))]
pub fn default_rc_dir<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    let home_dir = runtime
        .home_dir()
        .context("Could not find home directory")?;
    Ok(home_dir.join(".zapper"))
}

#[cfg(target_os = "windows")]
fn system_host_dir() -> PathBuf {
    PathBuf::from(r"C:\ProgramData\zapper")
}

#[cfg(not(target_os = "windows"))]
fn system_host_dir() -> PathBuf {
    PathBuf::from("/etc/zapper")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use crate::test_utils::{configure_mock_runtime_basics, configure_mock_runtime_with_env, test_home, test_temp};

    #[test]
    fn test_default_locations() {
        let mut runtime = MockRuntime::new();
        configure_mock_runtime_basics(&mut runtime);

        // --- Execute ---
        let paths = Paths::new(&runtime).unwrap();

        // --- Verify ---
        assert_eq!(paths.rc_dir, test_home().join(".zapper"));
        assert_eq!(paths.user_config(), test_home().join(".zapper").join("user.config"));
        assert_eq!(paths.persistent_sessions_dir(), test_home().join(".zapper").join("sessions"));
        assert_eq!(paths.host_config(), system_host_dir().join("host.config"));
        assert_eq!(
            paths.temporary_sessions_dir(&runtime),
            test_temp().join("zapper-user").join("sessions")
        );
    }

    #[test]
    fn test_env_overrides() {
        // --- Setup ---
        let mut runtime = MockRuntime::new();
        configure_mock_runtime_with_env(&mut runtime, &[(ROOT_VAR, "~/rc"), (HOST_DIR_VAR, "site")]);

        // --- Execute ---
        let paths = Paths::new(&runtime).unwrap();

        // --- Verify ---
        assert_eq!(paths.rc_dir, test_home().join("rc"));
        // relative to the current directory
        assert_eq!(paths.host_dir, test_home().join("site"));
        assert_eq!(paths.host_packages_dir(), test_home().join("site").join("packages"));
    }

    #[test]
    fn test_default_rc_dir_no_home() {
        let mut runtime = MockRuntime::new();
        runtime.expect_home_dir().returning(|| None);
        assert!(default_rc_dir(&runtime).is_err());
    }
}
