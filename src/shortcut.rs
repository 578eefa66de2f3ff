use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::launch::{OPEN_DOOR_ACTION, URI_SCHEME};

pub const DESKTOP_FILE: &str = "door-trigger.desktop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    pub short_label: String,
    pub long_label: String,
    pub icon: String,
    pub exec: PathBuf,
}

impl Shortcut {
    pub fn new<P: Into<PathBuf>>(exec: P) -> Self {
        Shortcut {
            short_label: "Open door".to_owned(),
            long_label: "Open the main door".to_owned(),
            icon: "door-open".to_owned(),
            exec: exec.into(),
        }
    }

    pub fn render(&self) -> String {
        let exec = quote_exec(&self.exec);
        format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name={short}\n\
             GenericName={long}\n\
             Comment={long}\n\
             Icon={icon}\n\
             Exec={exec} --once --action {action} %u\n\
             Terminal=false\n\
             MimeType=x-scheme-handler/{scheme};\n\
             Actions=open-door;\n\
             \n\
             [Desktop Action open-door]\n\
             Name={long}\n\
             Icon={icon}\n\
             Exec={exec} --once --action {action}\n",
            short = self.short_label,
            long = self.long_label,
            icon = self.icon,
            exec = exec,
            scheme = URI_SCHEME,
            action = OPEN_DOOR_ACTION,
        )
    }

    pub fn install(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(DESKTOP_FILE);
        fs::write(&path, self.render())?;
        log::info!("installed shortcut at {}", path.display());
        Ok(path)
    }
}

/// Removes a previously installed entry. Returns whether one was there.
pub fn uninstall(dir: &Path) -> io::Result<bool> {
    let path = dir.join(DESKTOP_FILE);
    match fs::remove_file(&path) {
        Ok(()) => {
            log::info!("removed shortcut at {}", path.display());
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub fn default_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("applications"))
}

// Exec keys need quoting when the path contains a space or a reserved character.
fn quote_exec(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if raw.chars().any(|c| " \t\"'\\><~|&;$*?#()`".contains(c)) {
        let escaped = raw
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('`', "\\`")
            .replace('$', "\\$");
        format!("\"{}\"", escaped)
    } else {
        raw.into_owned()
    }
}
