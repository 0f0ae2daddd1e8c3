//! Tests for interface construction and executable validation.

use std::os::unix::fs::PermissionsExt;

use cli_driver::config::{DriverConfig, EnvPolicy};
use cli_driver::{Interface, InterfaceError};
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, mode: u32) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
    path
}

#[test]
fn empty_path_fails() {
    assert!(matches!(Interface::new(""), Err(InterfaceError::EmptyPath)));
}

#[test]
fn missing_path_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing");
    match Interface::new(&path) {
        Err(InterfaceError::NotFound(reported)) => assert_eq!(reported, path),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn directory_fails() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Interface::new(dir.path()),
        Err(InterfaceError::NotAFile(_))
    ));
}

#[test]
fn file_without_execute_bit_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "tool", 0o644);
    assert!(matches!(
        Interface::new(&path),
        Err(InterfaceError::NotExecutable(_))
    ));
}

#[test]
fn any_execute_bit_is_enough() {
    let dir = TempDir::new().unwrap();
    for (name, mode) in [("owner", 0o744), ("group", 0o654), ("other", 0o645)] {
        let path = write_file(&dir, name, mode);
        let interface = Interface::new(&path).unwrap();
        assert_eq!(interface.executable(), path.as_path());
    }
}

#[test]
fn system_shell_is_accepted() {
    let interface = Interface::new("/bin/sh").unwrap();
    assert!(!interface.is_running());
}

#[test]
fn error_messages_name_the_path() {
    let err = Interface::new("/no/such/tool").unwrap_err();
    assert_eq!(err.to_string(), "Executable not found: /no/such/tool");
}

#[test]
fn from_config_applies_settings() {
    let config: DriverConfig = toml::from_str(
        r#"
executable = "/bin/sh"
env_policy = "replace"

[env]
GREETING = "hi"
"#,
    )
    .unwrap();
    assert_eq!(config.env_policy, EnvPolicy::Replace);

    let interface = Interface::from_config(&config).unwrap();
    assert_eq!(interface.executable(), std::path::Path::new("/bin/sh"));
}

#[test]
fn from_config_validates_executable() {
    let dir = TempDir::new().unwrap();
    let config = DriverConfig {
        executable: Some(dir.path().to_path_buf()),
        ..DriverConfig::default()
    };
    assert!(matches!(
        Interface::from_config(&config),
        Err(InterfaceError::NotAFile(_))
    ));
}
