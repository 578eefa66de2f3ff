use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use json::JsonValue;

pub const URL_KEY: &str = "saved_url";
pub const SETTINGS_ENV: &str = "DOOR_TRIGGER_SETTINGS";
const FILE_NAME: &str = "prefs.json";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("unable to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: json::Error,
    },
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}

#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
}

impl Settings {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Settings { path: path.into() }
    }

    /// `$DOOR_TRIGGER_SETTINGS` if set, otherwise `<config dir>/door-trigger/prefs.json`.
    pub fn default_location() -> Result<Self, SettingsError> {
        if let Some(path) = std::env::var_os(SETTINGS_ENV) {
            return Ok(Settings::new(path));
        }
        let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(Settings::new(dir.join("door-trigger").join(FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<String, SettingsError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        let doc = json::parse(&text).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(doc[URL_KEY].as_str().unwrap_or_default().to_owned())
    }

    pub fn save(&self, url: &str) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| self.io_error(source))?;
        }

        let mut doc = JsonValue::new_object();
        doc[URL_KEY] = url.into();
        let body = json::stringify_pretty(doc, 2);

        // Write beside the target and rename so readers never see a partial file.
        let tmp = self.path.with_extension("json.tmp");
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(body.as_bytes())?;
            file.sync_all()
        });
        written
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|source| {
                let _ = fs::remove_file(&tmp);
                self.io_error(source)
            })?;
        log::info!("saved target URL to {}", self.path.display());
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
