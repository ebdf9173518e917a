//! TOML settings: `[app]`, `[server]`, `[database]`, `[redis]` plus any
//! application-defined sections read through [`Settings::section`].

mod sections;

pub use sections::{AppSettings, DatabaseSettings, ProtectedFill, RedisSettings, ServerSettings};

use crate::error::SettingsError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Env var naming the settings file.
pub const SETTINGS_ENV: &str = "RESOURCE_SETTINGS";
pub const DEFAULT_SETTINGS_PATH: &str = "app.toml";

#[derive(Clone, Debug)]
pub struct Settings {
    path: PathBuf,
    pub app: AppSettings,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    /// Sections not known to this crate, kept verbatim.
    extra: toml::Table,
}

fn take_section<T: DeserializeOwned + Default>(table: &mut toml::Table, name: &str) -> Result<T, SettingsError> {
    match table.remove(name) {
        Some(value) => Ok(value.try_into()?),
        None => Ok(T::default()),
    }
}

fn read_table(path: &Path) -> Result<toml::Table, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(text.parse::<toml::Table>()?)
}

impl Settings {
    /// Initial load. Missing sections take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let mut table = read_table(&path)?;
        let settings = Settings {
            app: take_section(&mut table, "app")?,
            server: take_section(&mut table, "server")?,
            database: take_section(&mut table, "database")?,
            redis: take_section(&mut table, "redis")?,
            extra: table,
            path,
        };
        tracing::info!(path = %settings.path.display(), "settings loaded");
        Ok(settings)
    }

    /// Load from the file named by `RESOURCE_SETTINGS`, or `app.toml`.
    pub fn from_env() -> Result<Self, SettingsError> {
        let path = std::env::var(SETTINGS_ENV).unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
        Self::load(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file. Protected fields keep the values from the initial load.
    pub fn reload(&mut self) -> Result<(), SettingsError> {
        let mut table = read_table(&self.path)?;
        self.app.protected_fill(take_section(&mut table, "app")?);
        self.server.protected_fill(take_section(&mut table, "server")?);
        self.database.protected_fill(take_section(&mut table, "database")?);
        self.redis.protected_fill(take_section(&mut table, "redis")?);
        self.extra = table;
        tracing::info!(path = %self.path.display(), "settings reloaded");
        Ok(())
    }

    /// Write every section back to the settings file.
    pub fn save(&self) -> Result<(), SettingsError> {
        let mut table = self.extra.clone();
        table.insert("app".into(), toml::Value::try_from(&self.app)?);
        table.insert("server".into(), toml::Value::try_from(&self.server)?);
        table.insert("database".into(), toml::Value::try_from(&self.database)?);
        table.insert("redis".into(), toml::Value::try_from(&self.redis)?);
        let text = toml::to_string(&table)?;
        std::fs::write(&self.path, text).map_err(|source| SettingsError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Application-defined section.
    pub fn section<T: DeserializeOwned>(&self, name: &str) -> Result<T, SettingsError> {
        let value = self
            .extra
            .get(name)
            .cloned()
            .ok_or_else(|| SettingsError::MissingSection(name.to_string()))?;
        Ok(value.try_into()?)
    }

    pub fn set_section<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), SettingsError> {
        self.extra.insert(name.to_string(), toml::Value::try_from(value)?);
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            path: PathBuf::from(DEFAULT_SETTINGS_PATH),
            app: AppSettings::default(),
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            redis: RedisSettings::default(),
            extra: toml::Table::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    const INITIAL: &str = r#"
[app]
page_size = 10
jwt_secret = "first"

[database]
url = "postgres://localhost/app"
max_connections = 5

[mailer]
host = "smtp.local"
port = 25
"#;

    fn write(file: &mut tempfile::NamedTempFile, text: &str) {
        file.as_file().set_len(0).unwrap();
        let mut f = file.reopen().unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Mailer {
        host: String,
        port: u16,
    }

    #[test]
    fn loads_sections_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write(&mut file, INITIAL);
        let s = Settings::load(file.path()).unwrap();
        assert_eq!(s.app.page_size, 10);
        assert_eq!(s.app.max_page_size, 100);
        assert_eq!(s.server.port, 3000);
        assert_eq!(s.database.max_connections, 5);
        let mailer: Mailer = s.section("mailer").unwrap();
        assert_eq!(mailer.port, 25);
        assert!(matches!(s.section::<Mailer>("nope"), Err(SettingsError::MissingSection(_))));
    }

    #[test]
    fn reload_keeps_protected_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write(&mut file, INITIAL);
        let mut s = Settings::load(file.path()).unwrap();

        write(
            &mut file,
            "[app]\npage_size = 50\njwt_secret = \"second\"\n[database]\nurl = \"postgres://elsewhere/db\"\nmax_connections = 9\n",
        );
        s.reload().unwrap();
        assert_eq!(s.app.page_size, 50);
        assert_eq!(s.app.jwt_secret, "first");
        assert_eq!(s.database.url, "postgres://localhost/app");
        assert_eq!(s.database.max_connections, 9);
    }

    #[test]
    fn save_round_trips_through_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write(&mut file, INITIAL);
        let mut s = Settings::load(file.path()).unwrap();
        s.server.port = 8088;
        s.set_section("mailer", &Mailer { host: "mx".into(), port: 587 }).unwrap();
        s.save().unwrap();

        let again = Settings::load(file.path()).unwrap();
        assert_eq!(again.server.port, 8088);
        assert_eq!(again.section::<Mailer>("mailer").unwrap(), Mailer { host: "mx".into(), port: 587 });
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(Settings::load("/definitely/not/here.toml"), Err(SettingsError::Io { .. })));
    }
}
