//! Layered configuration.
//!
//! Settings are resolved in priority order:
//! 1. **Environment variables** prefixed `HANDHELD_` (`HANDHELD_BLOCK_SIZE=50`).
//! 2. **Config file**: an explicit path, or `handheld.toml` in the platform
//!    config directory. TOML, YAML and JSON are accepted, by extension.
//! 3. **Compiled defaults**.
//!
//! | Key           | Default                | Description                                   |
//! |---------------|------------------------|-----------------------------------------------|
//! | `archive_dir` | `<data dir>/archives`  | Where migration backups are written           |
//! | `compression` | `gzip`                 | `gzip`, `bzip2` or `none`                     |
//! | `block_size`  | `25`                   | Records between progress updates/abort checks |
//! | `write_mode`  | `erase_all`            | How restored records merge into the device    |
//! | `prefill`     | `[]`                   | Databases cached in the background on connect |

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use handheld_archive::Compression;
use handheld_device::{DeviceInfo, WriteMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::UtcDateTime;

const ENV_PREFIX: &str = "HANDHELD_";
const CONFIG_FILE: &str = "handheld.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "handheld", "handheld")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub archive_dir: PathBuf,
    pub compression: Compression,
    pub block_size: u64,
    pub write_mode: WriteMode,
    pub prefill: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let archive_dir = project_dirs()
            .map(|dirs| dirs.data_dir().join("archives"))
            .unwrap_or_else(|| PathBuf::from("archives"));
        Self {
            archive_dir,
            compression: Compression::default(),
            block_size: 25,
            write_mode: WriteMode::default(),
            prefill: Vec::new(),
        }
    }
}

impl Config {
    /// Load the configuration from `path`, or from the platform config
    /// directory when no path is given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match path {
            Some(path) => figment = merge_file(figment, path)?,
            None => {
                if let Some(path) = project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
                    && path.is_file()
                {
                    figment = merge_file(figment, &path)?;
                }
            },
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            exn::bail!(ErrorKind::Invalid("block_size must be greater than zero".to_string()));
        }
        if self.archive_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("archive_dir must not be empty".to_string()));
        }
        if let Some(name) = self.prefill.iter().find(|name| name.trim().is_empty()) {
            exn::bail!(ErrorKind::Invalid(format!("prefill contains a blank database name: {name:?}")));
        }
        Ok(())
    }

    /// Archive path for a backup of `device` taken at `timestamp`:
    /// `<archive_dir>/<pin>-<YYYYMMDD>-<HHMMSS>.<ext>`.
    pub fn archive_path(&self, device: &DeviceInfo, timestamp: UtcDateTime) -> PathBuf {
        let name = format!(
            "{:08x}-{:04}{:02}{:02}-{:02}{:02}{:02}.{}",
            device.pin,
            timestamp.year(),
            u8::from(timestamp.month()),
            timestamp.day(),
            timestamp.hour(),
            timestamp.minute(),
            timestamp.second(),
            self.compression.extension(),
        );
        self.archive_dir.join(name)
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase);
    tracing::debug!(path = %path.display(), "Loading configuration file");
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;
    use time::{Date, Month, Time};

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.block_size, 25);
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.write_mode, WriteMode::EraseAll);
        assert!(config.archive_dir.ends_with("archives"));
    }

    #[rstest]
    #[case("handheld.toml", "block_size = 10\nwrite_mode = \"add_only\"\nprefill = [\"Memos\"]\n")]
    #[case("handheld.yaml", "block_size: 10\nwrite_mode: add_only\nprefill: [Memos]\n")]
    #[case("handheld.json", r#"{"block_size": 10, "write_mode": "add_only", "prefill": ["Memos"]}"#)]
    fn test_load_file(#[case] name: &str, #[case] contents: &str) {
        Jail::expect_with(|jail| {
            jail.create_file(name, contents)?;
            let config = Config::load(Some(Path::new(name))).unwrap();
            assert_eq!(config.block_size, 10);
            assert_eq!(config.write_mode, WriteMode::AddOnly);
            assert_eq!(config.prefill, vec!["Memos".to_string()]);
            assert_eq!(config.compression, Compression::Gzip);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("handheld.toml", "block_size = 10\ncompression = \"bzip2\"\n")?;
            jail.set_env("HANDHELD_BLOCK_SIZE", "40");
            jail.set_env("HANDHELD_ARCHIVE_DIR", "/srv/backups");
            let config = Config::load(Some(Path::new("handheld.toml"))).unwrap();
            assert_eq!(config.block_size, 40);
            assert_eq!(config.compression, Compression::Bzip2);
            assert_eq!(config.archive_dir, PathBuf::from("/srv/backups"));
            Ok(())
        });
    }

    #[test]
    fn test_rejects_zero_block_size() {
        Jail::expect_with(|jail| {
            jail.create_file("handheld.toml", "")?;
            jail.set_env("HANDHELD_BLOCK_SIZE", "0");
            let err = Config::load(Some(Path::new("handheld.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_rejects_unknown_format() {
        let err = Config::load(Some(Path::new("handheld.ini"))).unwrap_err();
        assert_eq!(*err, ErrorKind::UnsupportedFormat(PathBuf::from("handheld.ini")));
    }

    #[test]
    fn test_rejects_bad_values() {
        Jail::expect_with(|jail| {
            jail.create_file("handheld.toml", "write_mode = \"merge\"\n")?;
            let err = Config::load(Some(Path::new("handheld.toml"))).unwrap_err();
            assert_eq!(*err, ErrorKind::Load);
            Ok(())
        });
    }

    #[rstest]
    #[case(Compression::Gzip, "2a3b4c5d-20250307-090502.tar.gz")]
    #[case(Compression::Bzip2, "2a3b4c5d-20250307-090502.tar.bz2")]
    #[case(Compression::None, "2a3b4c5d-20250307-090502.tar")]
    fn test_archive_path(#[case] compression: Compression, #[case] expected: &str) {
        let config = Config {
            archive_dir: PathBuf::from("/backups"),
            compression,
            ..Config::default()
        };
        let device = DeviceInfo::new(0x2a3b4c5d, "Bold");
        let date = Date::from_calendar_date(2025, Month::March, 7).unwrap();
        let timestamp = UtcDateTime::new(date, Time::from_hms(9, 5, 2).unwrap());
        assert_eq!(config.archive_path(&device, timestamp), PathBuf::from("/backups").join(expected));
    }
}
