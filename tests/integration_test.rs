use assert_cmd::Command;
use assert_cmd::cargo;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

const PACKAGES: &str = r#"{
    "products": [
        {"name": "alfa", "category": "tools",
         "transitions": [{"action": "path_prepend", "name": "PATH", "value": "/opt/alfa/bin"}]},
        {"name": "beta", "category": "tools", "requires": ["NAME == 'alfa'"],
         "transitions": [{"action": "var_set", "name": "BETA_HOME", "value": "/opt/beta"}]},
        {"name": "omega", "category": "tools", "conflicts": ["alfa"]}
    ],
    "packages": [
        {"product": "alfa", "version": "1.0"},
        {"product": "beta", "version": "1.0"},
        {"product": "omega", "version": "0.1"}
    ]
}"#;

/// A home directory with its own rc dir, host dir and temp dir.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let packages = dir.path().join("rc").join("packages");
        fs::create_dir_all(&packages).unwrap();
        fs::create_dir_all(dir.path().join("tmp")).unwrap();
        fs::write(packages.join("base.json"), PACKAGES).unwrap();
        Sandbox { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn session_file(&self, name: &str) -> PathBuf {
        self.path().join("rc").join("sessions").join(format!("{}.session", name))
    }

    fn zapper(&self) -> Command {
        let mut cmd = Command::new(cargo::cargo_bin!("zapper"));
        cmd.env("HOME", self.path())
            .env("TMPDIR", self.path().join("tmp"))
            .env("ZAPPER_ROOT", self.path().join("rc"))
            .env("ZAPPER_HOST_DIR", self.path().join("host"))
            .env("PATH", "/usr/bin:/bin")
            .env_remove("ZAPPER_SESSION")
            .env_remove("ZAPPER_LOADED_PACKAGES")
            .env_remove("ZAPPER_PACKAGE_DIR")
            .env_remove("ZAPPER_TARGET_TRANSLATOR")
            .env_remove("RUST_LOG");
        cmd
    }
}

#[test]
fn test_end_to_end_load_with_resolution() {
    let sandbox = Sandbox::new();

    sandbox
        .zapper()
        .args(["session", "create", "work", "--description", "daily"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created session work"));

    sandbox
        .zapper()
        .args(["-r", "load", "beta-1.0", "--show-translation"])
        .assert()
        .success()
        .stdout(predicate::str::contains("export PATH='/opt/alfa/bin:/usr/bin:/bin'"))
        .stdout(predicate::str::contains("export BETA_HOME='/opt/beta'"))
        .stdout(predicate::str::contains(
            "export ZAPPER_LOADED_PACKAGES='alfa-1.0:beta-1.0'",
        ));

    let session = fs::read_to_string(sandbox.session_file("work")).unwrap();
    assert!(session.contains("loaded_packages=alfa-1.0:beta-1.0"));

    sandbox
        .zapper()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("tools alfa-1.0"))
        .stdout(predicate::str::contains("tools beta-1.0"));
}

#[test]
fn test_missing_requirement_fails_without_resolution() {
    let sandbox = Sandbox::new();
    sandbox.zapper().args(["session", "create", "work"]).assert().success();

    sandbox
        .zapper()
        .args(["load", "beta"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot load beta-1.0"));

    let session = fs::read_to_string(sandbox.session_file("work")).unwrap();
    assert!(!session.contains("beta-1.0"));
}

#[test]
fn test_conflict_keeps_session_unchanged() {
    let sandbox = Sandbox::new();
    sandbox.zapper().args(["session", "create", "work"]).assert().success();
    sandbox.zapper().args(["load", "alfa"]).assert().success();
    let before = fs::read_to_string(sandbox.session_file("work")).unwrap();

    sandbox
        .zapper()
        .args(["load", "omega"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot load omega-0.1"));

    assert_eq!(fs::read_to_string(sandbox.session_file("work")).unwrap(), before);
}

#[test]
fn test_unknown_package() {
    let sandbox = Sandbox::new();
    sandbox
        .zapper()
        .args(["load", "zeta", "eta-2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("package(s) not found: zeta, eta-2"));
}

#[test]
fn test_translation_file() {
    let sandbox = Sandbox::new();
    let script = sandbox.path().join("zap.sh");

    sandbox
        .zapper()
        .env("ZAPPER_TARGET_TRANSLATOR", format!("bash:{}", script.display()))
        .args(["load", "alfa"])
        .assert()
        .success();

    let text = fs::read_to_string(&script).unwrap();
    assert!(text.contains("export PATH='/opt/alfa/bin:/usr/bin:/bin'"));
    assert!(text.contains("export ZAPPER_SESSION="));
    assert!(text.contains(&format!("rm -f '{}'", script.display())));
}

#[test]
fn test_dry_run_changes_nothing() {
    let sandbox = Sandbox::new();
    sandbox.zapper().args(["session", "create", "work"]).assert().success();

    sandbox.zapper().args(["--dry-run", "load", "alfa"]).assert().success();

    let session = fs::read_to_string(sandbox.session_file("work")).unwrap();
    assert!(!session.contains("alfa-1.0"));
}

#[test]
fn test_session_list_and_info() {
    let sandbox = Sandbox::new();
    sandbox
        .zapper()
        .args(["session", "create", "work", "-d", "daily"])
        .assert()
        .success();
    sandbox.zapper().args(["session", "create", "spare"]).assert().success();

    sandbox
        .zapper()
        .args(["session", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("persistent work daily"))
        .stdout(predicate::str::contains("persistent spare"));

    sandbox
        .zapper()
        .args(["session", "info", "work"])
        .assert()
        .success()
        .stdout(predicate::str::contains("description   : daily"));
}

#[test]
fn test_config_show_reports_layers() {
    let sandbox = Sandbox::new();
    sandbox
        .zapper()
        .args(["config", "set", "--user", "resolution_level=1"])
        .assert()
        .success();

    sandbox
        .zapper()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"resolution_level\s+= 1\s+\[user\]").unwrap());

    sandbox
        .zapper()
        .args(["config", "set", "--user", "resolution_level"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid key=value pair 'resolution_level'"));
}
