use std::env;
use std::fs;
use std::sync::Mutex;

use takeout_dedupe::config::{Config, ENV_PREFIX};
use takeout_dedupe::scanner::Strategy;
use tempfile::tempdir;

// Environment variables are process-wide.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

struct EnvGuard(Vec<String>);

impl EnvGuard {
    fn set(vars: &[(&str, &str)]) -> Self {
        let mut names = Vec::new();
        for (name, value) in vars {
            let full = format!("{ENV_PREFIX}{name}");
            env::set_var(&full, value);
            names.push(full);
        }
        Self(names)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for name in &self.0 {
            env::remove_var(name);
        }
    }
}

#[test]
fn test_environment_overrides_file() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "strategy = \"full\"\nio_threads = 8\nskip_hidden = true\n").unwrap();

    let _env = EnvGuard::set(&[("IO_THREADS", "3"), ("STRATEGY", "size_crc")]);
    let config = Config::try_load(Some(&path), None).unwrap();
    assert_eq!(config.io_threads, 3);
    assert_eq!(config.strategy, Strategy::SizeCrc);
    assert!(config.skip_hidden);
}

#[test]
fn test_environment_overrides_profile() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
io_threads = 8

[profile.nas]
io_threads = 2
ignore_patterns = ["@eaDir/"]
"#,
    )
    .unwrap();

    let nas = Config::try_load(Some(&path), Some("nas")).unwrap();
    assert_eq!(nas.io_threads, 2);
    assert_eq!(nas.ignore_patterns, vec!["@eaDir/".to_string()]);

    let _env = EnvGuard::set(&[("IO_THREADS", "5")]);
    let nas = Config::try_load(Some(&path), Some("nas")).unwrap();
    assert_eq!(nas.io_threads, 5);
}

#[test]
fn test_unknown_profile_uses_base() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "io_threads = 6\n").unwrap();

    let config = Config::try_load(Some(&path), Some("missing")).unwrap();
    assert_eq!(config.io_threads, 6);
}

#[test]
fn test_missing_file_gives_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempdir().unwrap();
    let config = Config::load_from_path(dir.path().join("absent.toml"), None);
    assert_eq!(config, Config::default());
}

#[test]
fn test_bad_environment_value_falls_back() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let _env = EnvGuard::set(&[("STRATEGY", "md5")]);
    assert!(Config::try_load(None, None).is_err());
    let config = Config::load(None, None);
    assert_eq!(config.strategy, Config::default().strategy);
}
