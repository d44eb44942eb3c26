//! Wiring of configuration layers, session directories and translation
//! around the one [`Session`] a command works on.

use anyhow::{Context, Result};
use ini::Ini;
use log::{debug, warn};
use std::io::{self, Write};
use std::path::PathBuf;

use super::Options;
use super::paths::Paths;
use crate::config::{
    CONFIG_SECTION, Config, DEFAULT_SESSION_LAST, DEFAULT_SESSION_NEW, IniFile, LAST_SESSION_KEY,
    Layer, SESSIONS_SECTION, Section, VERSION_DEFAULTS_SECTION, join_list, section, set_section,
    split_list,
};
use crate::environment::Environment;
use crate::error::ZapperError;
use crate::package::LabelOptions;
use crate::runtime::Runtime;
use crate::session::{
    LoadOptions, PACKAGE_DIR_VAR, SESSION_VAR, Session, SessionDirs, SessionFile, SessionSettings,
    SessionTemplate,
};
use crate::translator::{self, DEFAULT_TRANSLATOR, TARGET_TRANSLATOR_VAR, TargetTranslator};

const RULER_WIDTH: usize = 70;

/// `[config]` and `[version_defaults]` of one config file.
#[derive(Debug, Clone, Default)]
pub struct LayerContent {
    pub config: Section,
    pub version_defaults: Section,
}

impl LayerContent {
    fn from_ini(ini: &Ini) -> Self {
        LayerContent {
            config: section(ini, CONFIG_SECTION),
            version_defaults: section(ini, VERSION_DEFAULTS_SECTION),
        }
    }
}

pub struct Manager<R: Runtime> {
    runtime: R,
    options: Options,
    paths: Paths,
    host_file: IniFile,
    user_file: IniFile,
    host: LayerContent,
    user: LayerContent,
    last_session: Option<String>,
    config: Config,
    target: Option<TargetTranslator>,
}

impl<R: Runtime> Manager<R> {
    #[tracing::instrument(skip(runtime))]
    pub fn new(runtime: R, options: Options) -> Result<Self> {
        let paths = Paths::new(&runtime)?;
        let host_file = IniFile::new(paths.host_config());
        let user_file = IniFile::new(paths.user_config());
        let host_ini = host_file.read(&runtime)?;
        let user_ini = user_file.read(&runtime)?;
        let host = LayerContent::from_ini(&host_ini);
        let user = LayerContent::from_ini(&user_ini);
        let last_session = user_ini
            .get_from(Some(SESSIONS_SECTION), LAST_SESSION_KEY)
            .map(str::to_string);

        let package_dirs = [paths.host_packages_dir(), paths.user_packages_dir()]
            .map(|dir| dir.display().to_string());
        let defaults = [
            ("directories", join_list(&package_dirs)),
            (
                "persistent_sessions_dir",
                paths.persistent_sessions_dir().display().to_string(),
            ),
            (
                "temporary_sessions_dir",
                paths.temporary_sessions_dir(&runtime).display().to_string(),
            ),
        ];
        let mut config = Config::new(&defaults);
        config.merge(Layer::Host, &host.config, &host.version_defaults);
        config.merge(Layer::User, &user.config, &user.version_defaults);

        let target = match runtime.env_var(TARGET_TRANSLATOR_VAR) {
            Ok(value) if !value.is_empty() => {
                let target = TargetTranslator::parse(&value, paths.home.as_deref(), &paths.cwd);
                translator::create(&target.name).map_err(|e| {
                    ZapperError::Session(format!("invalid target translator {:?}: {}", target.name, e))
                })?;
                Some(target)
            }
            _ => None,
        };

        Ok(Manager {
            runtime,
            options,
            paths,
            host_file,
            user_file,
            host,
            user,
            last_session,
            config,
            target,
        })
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Defaults merged with the host and user layers.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layer(&self, layer: Layer) -> Option<&LayerContent> {
        match layer {
            Layer::Host => Some(&self.host),
            Layer::User => Some(&self.user),
            Layer::Default | Layer::Session => None,
        }
    }

    /// The effective configuration of `file`.
    pub fn session_config(&self, file: &SessionFile) -> Config {
        let mut config = self.config.clone();
        config.merge(Layer::Session, &file.config, &file.version_defaults);
        config
    }

    pub fn session_dirs(&self) -> SessionDirs {
        SessionDirs {
            persistent: self.paths.expand(self.config.get("persistent_sessions_dir")),
            temporary: self.paths.expand(self.config.get("temporary_sessions_dir")),
        }
    }

    /// Absolute package directories for a `directories` value, followed by
    /// those of `$ZAPPER_PACKAGE_DIR`.
    pub fn package_dirs(&self, directories: &[String]) -> Vec<PathBuf> {
        let extra = self
            .runtime
            .env_var(PACKAGE_DIR_VAR)
            .map(|value| split_list(&value))
            .unwrap_or_default();
        let mut dirs: Vec<PathBuf> = Vec::new();
        for dir in directories.iter().chain(extra.iter()) {
            let dir = self.paths.expand(dir);
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }

    fn settings(&self, config: &Config) -> Result<SessionSettings> {
        Ok(SessionSettings {
            directories: self.package_dirs(&config.get_list("directories")),
            label_options: LabelOptions {
                enable_default_version: config.get_bool("enable_default_version"),
                version_defaults: config.version_defaults(),
            },
            filter: config.get_expression("filter_packages")?,
            dry_run: self.options.dry_run,
            force: self.options.force,
        })
    }

    /// Open `file` against the current shell environment.
    #[tracing::instrument(skip(self, file), fields(session = %file.name))]
    pub fn open(&self, file: SessionFile) -> Result<Session> {
        let config = self.session_config(&file);
        let settings = self.settings(&config)?;
        let environment = Environment::new(self.runtime.env_vars());
        let mut session = Session::open(&self.runtime, file, settings, environment)?;
        session.initialize()?;
        Ok(session)
    }

    fn current_root(&self) -> Option<PathBuf> {
        if let Ok(root) = self.runtime.env_var(SESSION_VAR) {
            let root = PathBuf::from(root);
            if self.runtime.exists(&SessionFile::path_for(&root)) {
                return Some(root);
            }
            debug!("session {} from the environment is gone", root.display());
        }
        let dirs = self.session_dirs();
        match self.config.get("default_session") {
            DEFAULT_SESSION_NEW => None,
            DEFAULT_SESSION_LAST => self
                .last_session
                .as_deref()
                .and_then(|name| dirs.find(&self.runtime, name)),
            name => dirs.find(&self.runtime, name),
        }
    }

    /// The session of this shell; a fresh temporary session when there is
    /// none or it cannot be loaded.
    #[tracing::instrument(skip(self))]
    pub fn restore(&self) -> Result<Session> {
        if let Some(root) = self.current_root() {
            match SessionFile::load(&self.runtime, &root).and_then(|file| self.open(file)) {
                Ok(session) => return Ok(session),
                Err(e) => warn!("cannot restore session {}: {:#}", root.display(), e),
            }
        }
        self.create(None, "")
    }

    /// Create a new session, persistent when named, and open it.
    pub fn create(&self, name: Option<&str>, description: &str) -> Result<Session> {
        let template = SessionTemplate {
            description: description.to_string(),
            directories: self.config.get_list("directories"),
            default_packages: self.config.get_list("default_packages"),
        };
        let file = self.session_dirs().create(&self.runtime, name, &template)?;
        self.open(file)
    }

    pub fn find(&self, name: &str) -> Result<SessionFile> {
        let root = self
            .session_dirs()
            .find(&self.runtime, name)
            .ok_or_else(|| ZapperError::Session(format!("session {} not found", name)))?;
        SessionFile::load(&self.runtime, &root)
    }

    /// Command line flags over configured defaults.
    pub fn load_options(&self, session: &Session) -> LoadOptions {
        let config = self.session_config(session.file());
        let resolution_level = if self.options.resolve > 0 {
            self.options.resolve
        } else {
            u8::try_from(config.get_int("resolution_level").max(0)).unwrap_or(u8::MAX)
        };
        LoadOptions {
            resolution_level,
            subpackages: self.options.subpackages || config.get_bool("subpackages"),
            sticky: self.options.sticky,
            ignore_errors: false,
        }
    }

    /// Edit the `[config]` and `[version_defaults]` sections of the host or
    /// user config file. The host layer needs administrator privileges.
    pub fn update_layer<F>(&self, layer: Layer, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut LayerContent) -> Result<bool, ZapperError>,
    {
        let file = match layer {
            Layer::Host if !self.runtime.is_privileged() => {
                return Err(ZapperError::SessionAuth(
                    "only an administrator can change the host config".into(),
                )
                .into());
            }
            Layer::Host => &self.host_file,
            Layer::User => &self.user_file,
            Layer::Default | Layer::Session => {
                anyhow::bail!("the {} layer is not stored in a config file", layer)
            }
        };
        if self.options.dry_run {
            debug!("[dry-run] {} config not written", layer);
            let mut content = self.layer(layer).cloned().unwrap_or_default();
            return Ok(edit(&mut content)?);
        }
        file.update(&self.runtime, |ini| {
            let mut content = LayerContent::from_ini(ini);
            let changed = edit(&mut content)?;
            if changed {
                set_section(ini, CONFIG_SECTION, &content.config);
                set_section(ini, VERSION_DEFAULTS_SECTION, &content.version_defaults);
            }
            Ok(changed)
        })
    }

    fn record_last_session(&self, name: &str) -> Result<()> {
        if self.last_session.as_deref() == Some(name) {
            return Ok(());
        }
        self.user_file.update(&self.runtime, |ini| {
            ini.with_section(Some(SESSIONS_SECTION))
                .set(LAST_SESSION_KEY, name);
            Ok(())
        })
    }

    /// Persist the session and hand its environment changes to the shell.
    #[tracing::instrument(skip(self, session), fields(session = %session.name()))]
    pub fn finish(&self, session: &mut Session) -> Result<()> {
        session.finalize(&self.runtime)?;
        if !session.is_deleted() && !self.options.dry_run {
            self.record_last_session(session.name())?;
        }

        if let Some(target) = &self.target {
            match &target.file {
                Some(file) => {
                    let mut translator = translator::create(&target.name)?;
                    session.translate(translator.as_mut());
                    translator.remove_file(file);
                    let mut buffer = Vec::new();
                    translator.translate(&mut buffer)?;
                    self.runtime
                        .write(file, &buffer)
                        .with_context(|| format!("Failed to write translation {}", file.display()))?;
                }
                None => debug!("no translation file for {}", target.name),
            }
        }

        if self.options.show_translation {
            let name = self
                .target
                .as_ref()
                .map_or(DEFAULT_TRANSLATOR, |target| target.name.as_str());
            let mut translator = translator::create(name)?;
            session.translate(translator.as_mut());
            let ruler = "=".repeat(RULER_WIDTH);
            let stdout = io::stdout();
            let mut out = stdout.lock();
            writeln!(out, "{}", ruler)?;
            translator.translate(&mut out)?;
            writeln!(out, "{}", ruler)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionType;
    use crate::test_utils::SandboxRuntime;
    use std::fs;
    use tempfile::tempdir;

    const PACKAGES: &str = r#"{
        "products": [
            {"name": "alfa", "transitions": [
                {"action": "path_prepend", "name": "PATH", "value": "/opt/alfa/bin"}]},
            {"name": "beta", "requires": ["alfa"]}
        ],
        "packages": [
            {"product": "alfa", "version": "1.0"},
            {"product": "beta", "version": "1.0"}
        ]
    }"#;

    fn sandbox(home: &std::path::Path) -> SandboxRuntime {
        let packages = home.join(".zapper").join("packages");
        fs::create_dir_all(&packages).unwrap();
        fs::write(packages.join("base.json"), PACKAGES).unwrap();
        let mut runtime = SandboxRuntime::new(home);
        runtime.set_var("ZAPPER_HOST_DIR", home.join("host").display().to_string());
        runtime
    }

    #[test_log::test]
    fn test_restore_falls_back_to_a_temporary_session() {
        let dir = tempdir().unwrap();
        let runtime = sandbox(dir.path());
        let manager = Manager::new(runtime, Options::default()).unwrap();

        let session = manager.restore().unwrap();
        assert_eq!(session.file().session_type, SessionType::Temporary);
        assert!(session.name().starts_with("zap"));
        assert!(session.root().starts_with(dir.path().join("tmp")));
        assert_eq!(session.defined().len(), 2);
    }

    #[test]
    fn test_restore_last_session_and_default_packages() {
        let dir = tempdir().unwrap();
        let runtime = sandbox(dir.path());
        fs::create_dir_all(dir.path().join(".zapper")).unwrap();
        fs::write(
            dir.path().join(".zapper").join("user.config"),
            "[config]\ndefault_packages=alfa\n",
        )
        .unwrap();

        let manager = Manager::new(runtime, Options::default()).unwrap();
        let mut work = manager.create(Some("work"), "daily").unwrap();
        assert_eq!(work.loaded().labels(), vec!["alfa-1.0"]);
        manager.finish(&mut work).unwrap();

        // a new invocation picks the last session up
        let manager = Manager::new(sandbox(dir.path()), Options::default()).unwrap();
        let session = manager.restore().unwrap();
        assert_eq!(session.name(), "work");
        assert_eq!(session.file().description(), "daily");
        assert_eq!(session.loaded().labels(), vec!["alfa-1.0"]);
    }

    #[test]
    fn test_finish_writes_translation_file() {
        let dir = tempdir().unwrap();
        let mut runtime = sandbox(dir.path());
        let script = dir.path().join("zap.sh");
        runtime.set_var(TARGET_TRANSLATOR_VAR, format!("bash:{}", script.display()));
        let options = Options {
            resolve: 1,
            ..Options::default()
        };
        let manager = Manager::new(runtime, options).unwrap();

        let mut session = manager.restore().unwrap();
        let load_options = manager.load_options(&session);
        assert_eq!(load_options.resolution_level, 1);
        session
            .load_package_labels(&["beta".to_string()], &load_options)
            .unwrap();
        manager.finish(&mut session).unwrap();

        let text = fs::read_to_string(&script).unwrap();
        assert!(text.contains("export PATH='/opt/alfa/bin:/usr/bin'"));
        assert!(text.contains("export ZAPPER_LOADED_PACKAGES='alfa-1.0:beta-1.0'"));
        assert!(text.contains(&format!("rm -f '{}'", script.display())));
    }

    #[test]
    fn test_invalid_target_translator() {
        let dir = tempdir().unwrap();
        let mut runtime = sandbox(dir.path());
        runtime.set_var(TARGET_TRANSLATOR_VAR, "tcsh");
        let err = Manager::new(runtime, Options::default()).err().unwrap();
        assert!(matches!(err.downcast_ref::<ZapperError>(), Some(ZapperError::Session(_))));
    }

    #[test]
    fn test_host_layer_needs_privileges() {
        let dir = tempdir().unwrap();
        let manager = Manager::new(sandbox(dir.path()), Options::default()).unwrap();
        let err = manager.update_layer(Layer::Host, |_| Ok(true)).unwrap_err();
        assert!(matches!(err.downcast_ref::<ZapperError>(), Some(ZapperError::SessionAuth(_))));

        let mut runtime = sandbox(dir.path());
        runtime.privileged = true;
        let manager = Manager::new(runtime, Options::default()).unwrap();
        manager
            .update_layer(Layer::Host, |content| {
                content.config.insert("resolution_level".into(), "2".into());
                Ok(true)
            })
            .unwrap();
        let text = fs::read_to_string(dir.path().join("host").join("host.config")).unwrap();
        assert!(text.contains("resolution_level=2"));
    }
}
