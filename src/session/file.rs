use anyhow::{Context, Result};
use ini::Ini;
use log::{debug, info};
use rand::{Rng, distr::Alphanumeric};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{
    self, CONFIG_SECTION, IniFile, Section, VERSION_DEFAULTS_SECTION, join_list, parse_bool,
    split_list,
};
use crate::error::ZapperError;
use crate::runtime::Runtime;

pub const SESSION_SUFFIX: &str = ".session";
pub const TEMPORARY_PREFIX: &str = "zap";
const TEMPORARY_SUFFIX_LEN: usize = 5;
const MAX_CREATE_ATTEMPTS: usize = 100;
const CREATION_TIME_FORMAT: &str = "%Y%m%d %H:%M:%S";

const SESSION_SECTION: &str = "session";
const PACKAGES_SECTION: &str = "packages";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Persistent,
    Temporary,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionType::Persistent => "persistent",
            SessionType::Temporary => "temporary",
        })
    }
}

impl FromStr for SessionType {
    type Err = ZapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "persistent" => Ok(SessionType::Persistent),
            "temporary" => Ok(SessionType::Temporary),
            other => Err(ZapperError::Session(format!("invalid session type {:?}", other))),
        }
    }
}

fn now() -> String {
    chrono::Local::now().format(CREATION_TIME_FORMAT).to_string()
}

/// The persisted part of a session: `<root>.session`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFile {
    pub root: PathBuf,
    pub name: String,
    pub session_type: SessionType,
    pub creation_time: String,
    pub config: Section,
    pub version_defaults: Section,
    pub loaded_packages: Vec<String>,
    pub sticky_packages: Vec<String>,
}

impl SessionFile {
    pub fn new(root: impl Into<PathBuf>, name: &str, session_type: SessionType) -> Self {
        SessionFile {
            root: root.into(),
            name: name.to_string(),
            session_type,
            creation_time: now(),
            config: Section::new(),
            version_defaults: Section::new(),
            loaded_packages: Vec::new(),
            sticky_packages: Vec::new(),
        }
    }

    pub fn path_for(root: &Path) -> PathBuf {
        let mut name = root.file_name().unwrap_or_default().to_os_string();
        name.push(SESSION_SUFFIX);
        root.with_file_name(name)
    }

    pub fn path(&self) -> PathBuf {
        Self::path_for(&self.root)
    }

    fn ini_file(&self) -> IniFile {
        IniFile::new(self.path())
    }

    pub fn description(&self) -> &str {
        self.config.get("description").map(String::as_str).unwrap_or_default()
    }

    pub fn is_read_only(&self) -> bool {
        self.config
            .get("read_only")
            .and_then(|v| parse_bool(v))
            .unwrap_or(false)
    }

    pub fn directories(&self) -> Vec<String> {
        self.config
            .get("directories")
            .map(|v| split_list(v))
            .unwrap_or_default()
    }

    pub fn from_ini(root: &Path, ini: &Ini) -> Result<Self, ZapperError> {
        let session = config::section(ini, SESSION_SECTION);
        let required = |key: &str| {
            session.get(key).cloned().ok_or_else(|| {
                ZapperError::Session(format!(
                    "{}: missing [{}] {}",
                    Self::path_for(root).display(),
                    SESSION_SECTION,
                    key
                ))
            })
        };
        let name = required("name")?;
        let session_type = required("type")?.parse()?;
        let creation_time = session.get("creation_time").cloned().unwrap_or_default();
        let packages = config::section(ini, PACKAGES_SECTION);
        let list = |key: &str| packages.get(key).map(|v| split_list(v)).unwrap_or_default();
        Ok(SessionFile {
            root: root.to_path_buf(),
            name,
            session_type,
            creation_time,
            config: config::section(ini, CONFIG_SECTION),
            version_defaults: config::section(ini, VERSION_DEFAULTS_SECTION),
            loaded_packages: list("loaded_packages"),
            sticky_packages: list("sticky_packages"),
        })
    }

    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some(SESSION_SECTION))
            .set("name", self.name.as_str())
            .set("type", self.session_type.to_string())
            .set("creation_time", self.creation_time.as_str());
        config::set_section(&mut ini, CONFIG_SECTION, &self.config);
        config::set_section(&mut ini, VERSION_DEFAULTS_SECTION, &self.version_defaults);
        ini.with_section(Some(PACKAGES_SECTION))
            .set("loaded_packages", join_list(&self.loaded_packages))
            .set("sticky_packages", join_list(&self.sticky_packages));
        ini
    }

    /// Load the session rooted at `root`.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, root: &Path) -> Result<Self> {
        let path = Self::path_for(root);
        if !runtime.exists(&path) {
            return Err(ZapperError::Session(format!("session file {} does not exist", path.display())).into());
        }
        let ini = IniFile::new(&path).read(runtime)?;
        Ok(Self::from_ini(root, &ini)?)
    }

    #[tracing::instrument(skip(self, runtime), fields(session = %self.name))]
    pub fn store<R: Runtime>(&self, runtime: &R) -> Result<()> {
        debug!("Storing session {} to {}", self.name, self.path().display());
        let content = self.to_ini();
        self.ini_file().update(runtime, |ini| {
            *ini = content;
            Ok(())
        })
    }

    pub fn delete<R: Runtime>(&self, runtime: &R) -> Result<()> {
        info!("Deleting session {}", self.name);
        self.ini_file()
            .remove(runtime)
            .with_context(|| format!("Failed to delete session {}", self.name))
    }
}

/// Where persistent and temporary sessions live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDirs {
    pub persistent: PathBuf,
    pub temporary: PathBuf,
}

/// Initial content of a new session.
#[derive(Debug, Clone, Default)]
pub struct SessionTemplate {
    pub description: String,
    pub directories: Vec<String>,
    pub default_packages: Vec<String>,
}

impl SessionDirs {
    pub fn dir(&self, session_type: SessionType) -> &Path {
        match session_type {
            SessionType::Persistent => &self.persistent,
            SessionType::Temporary => &self.temporary,
        }
    }

    /// Create a persistent session called `name`, or a temporary one with a
    /// unique random name.
    #[tracing::instrument(skip(self, runtime, template))]
    pub fn create<R: Runtime>(
        &self,
        runtime: &R,
        name: Option<&str>,
        template: &SessionTemplate,
    ) -> Result<SessionFile> {
        let mut file = match name {
            Some(name) => self.reserve_persistent(runtime, name)?,
            None => self.reserve_temporary(runtime)?,
        };
        file.config.insert("directories".into(), join_list(&template.directories));
        file.config.insert("description".into(), template.description.clone());
        file.loaded_packages = template.default_packages.clone();
        file.store(runtime)?;
        info!("Created {} session {}", file.session_type, file.name);
        Ok(file)
    }

    fn reserve_persistent<R: Runtime>(&self, runtime: &R, name: &str) -> Result<SessionFile> {
        if !config::is_valid_session_name(name) {
            return Err(ZapperError::Session(format!("invalid session name {:?}", name)).into());
        }
        runtime.create_dir_all(&self.persistent)?;
        let root = self.persistent.join(name);
        if !runtime.create_new(&SessionFile::path_for(&root))? {
            return Err(ZapperError::SessionCreation(format!("session {} already exists", name)).into());
        }
        Ok(SessionFile::new(root, name, SessionType::Persistent))
    }

    fn reserve_temporary<R: Runtime>(&self, runtime: &R) -> Result<SessionFile> {
        runtime.create_dir_all(&self.temporary)?;
        let mut rng = rand::rng();
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let suffix: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(TEMPORARY_SUFFIX_LEN)
                .map(char::from)
                .collect();
            let name = format!("{}{}", TEMPORARY_PREFIX, suffix);
            let root = self.temporary.join(&name);
            if runtime.create_new(&SessionFile::path_for(&root))? {
                return Ok(SessionFile::new(root, &name, SessionType::Temporary));
            }
            debug!("Temporary session {} already exists", name);
        }
        Err(ZapperError::SessionCreation(format!(
            "no unique session name found in {}",
            self.temporary.display()
        ))
        .into())
    }

    /// Root of the session called `name`, persistent sessions first.
    pub fn find<R: Runtime>(&self, runtime: &R, name: &str) -> Option<PathBuf> {
        [&self.persistent, &self.temporary]
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|root| runtime.exists(&SessionFile::path_for(root)))
    }

    /// Sessions whose name matches the glob `pattern`. Unreadable files are
    /// skipped.
    #[tracing::instrument(skip(self, runtime))]
    pub fn list<R: Runtime>(&self, runtime: &R, pattern: &str) -> Result<Vec<SessionFile>> {
        let mut sessions = Vec::new();
        for dir in [&self.persistent, &self.temporary] {
            if !runtime.exists(dir) {
                continue;
            }
            let glob = dir.join(format!("{}{}", pattern, SESSION_SUFFIX));
            for path in runtime.glob(&glob.to_string_lossy())? {
                let root = path.with_extension("");
                match SessionFile::load(runtime, &root) {
                    Ok(file) => sessions.push(file),
                    Err(e) => debug!("Skipping {}: {:#}", path.display(), e),
                }
            }
        }
        Ok(sessions)
    }

    /// Copy `source` to a new persistent session called `name`.
    #[tracing::instrument(skip(self, runtime, source), fields(source = %source.name))]
    pub fn copy<R: Runtime>(&self, runtime: &R, source: &SessionFile, name: &str) -> Result<SessionFile> {
        let reserved = self.reserve_persistent(runtime, name)?;
        let copy = SessionFile {
            root: reserved.root,
            name: reserved.name,
            session_type: SessionType::Persistent,
            creation_time: reserved.creation_time,
            ..source.clone()
        };
        copy.store(runtime)?;
        info!("Copied session {} to {}", source.name, copy.name);
        Ok(copy)
    }
}
