pub mod commands;
pub mod config;
pub mod definition;
pub mod environment;
pub mod error;
pub mod expression;
pub mod package;
pub mod runtime;
pub mod session;
pub mod toposort;
pub mod translator;

/// Test utilities for cross-platform path handling.
#[cfg(test)]
pub mod test_utils {
    use crate::runtime::{FileLock, MockRuntime, RealRuntime, Runtime};
    use anyhow::Result;
    use std::env::VarError;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    /// Returns a test home directory path based on the platform.
    /// - Unix: `/home/user`
    /// - Windows: `C:\Users\user`
    pub fn test_home() -> PathBuf {
        #[cfg(not(windows))]
        {
            PathBuf::from("/home/user")
        }
        #[cfg(windows)]
        {
            PathBuf::from(r"C:\Users\user")
        }
    }

    /// Returns a test temporary directory path based on the platform.
    pub fn test_temp() -> PathBuf {
        #[cfg(not(windows))]
        {
            PathBuf::from("/tmp")
        }
        #[cfg(windows)]
        {
            PathBuf::from(r"C:\Temp")
        }
    }

    fn lookup(vars: &[(String, String)], key: &str) -> Result<String, VarError> {
        vars.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .ok_or(VarError::NotPresent)
    }

    /// Configure a mock runtime with common defaults for tests.
    /// - home dir and current dir set to [`test_home`]
    /// - temp dir set to [`test_temp`]
    /// - USER env set to "user", every other variable absent
    /// - not privileged
    pub fn configure_mock_runtime_basics(runtime: &mut MockRuntime) {
        configure_mock_runtime_with_env(runtime, &[]);
    }

    /// Like [`configure_mock_runtime_basics`] with extra environment variables.
    pub fn configure_mock_runtime_with_env(runtime: &mut MockRuntime, vars: &[(&str, &str)]) {
        let mut vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        vars.push(("USER".to_string(), "user".to_string()));
        let snapshot = vars.clone();

        runtime.expect_home_dir().returning(|| Some(test_home()));
        runtime.expect_current_dir().returning(|| Ok(test_home()));
        runtime.expect_temp_dir().returning(test_temp);
        runtime.expect_is_privileged().returning(|| false);
        runtime
            .expect_env_var()
            .returning(move |key| lookup(&vars, key));
        runtime
            .expect_env_vars()
            .returning(move || snapshot.clone());
    }

    /// Real file system rooted in a temporary directory, with a fixed
    /// environment, home and temp dir.
    pub struct SandboxRuntime {
        pub home: PathBuf,
        pub vars: Vec<(String, String)>,
        pub privileged: bool,
        pub answer: bool,
    }

    impl SandboxRuntime {
        pub fn new(home: &Path) -> Self {
            SandboxRuntime {
                home: home.to_path_buf(),
                vars: vec![
                    ("USER".to_string(), "user".to_string()),
                    ("PATH".to_string(), "/usr/bin".to_string()),
                ],
                privileged: false,
                answer: true,
            }
        }

        pub fn set_var(&mut self, key: &str, value: impl Into<String>) {
            self.vars.retain(|(k, _)| k != key);
            self.vars.push((key.to_string(), value.into()));
        }
    }

    impl Runtime for SandboxRuntime {
        fn env_var(&self, key: &str) -> Result<String, VarError> {
            lookup(&self.vars, key)
        }

        fn env_vars(&self) -> Vec<(String, String)> {
            self.vars.clone()
        }

        fn current_dir(&self) -> Result<PathBuf> {
            Ok(self.home.clone())
        }

        fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
            RealRuntime.write(path, contents)
        }

        fn read_to_string(&self, path: &Path) -> Result<String> {
            RealRuntime.read_to_string(path)
        }

        fn create_dir_all(&self, path: &Path) -> Result<()> {
            RealRuntime.create_dir_all(path)
        }

        fn remove_file(&self, path: &Path) -> Result<()> {
            RealRuntime.remove_file(path)
        }

        fn exists(&self, path: &Path) -> bool {
            RealRuntime.exists(path)
        }

        fn create_new(&self, path: &Path) -> Result<bool> {
            RealRuntime.create_new(path)
        }

        fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
            RealRuntime.glob(pattern)
        }

        fn lock_exclusive(&self, path: &Path, timeout: Duration) -> Result<FileLock> {
            RealRuntime.lock_exclusive(path, timeout)
        }

        fn home_dir(&self) -> Option<PathBuf> {
            Some(self.home.clone())
        }

        fn temp_dir(&self) -> PathBuf {
            self.home.join("tmp")
        }

        fn is_privileged(&self) -> bool {
            self.privileged
        }

        fn confirm(&self, _prompt: &str) -> Result<bool> {
            Ok(self.answer)
        }
    }
}
