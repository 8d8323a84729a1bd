use anyhow::Result;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Sink for raw link traffic, used by [`crate::link::DebugLink`].
pub trait Logger: Send + Sync {
    fn sent(&self, _data: &[u8]) {}
    fn received(&self, _data: &[u8]) {}
}

/// Appends every block as its text form followed by its hex form.
pub struct TextLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(f),
        })
    }

    /// `debug.<ddmmYYYY-HHMMSS>.out` inside `dir`
    pub fn timestamped<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let name = Local::now().format("debug.%d%m%Y-%H%M%S.out").to_string();
        Self::new(dir.as_ref().join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn block(&self, direction: &str, data: &[u8]) {
        let text: String = data.iter().map(|&b| b as char).collect();
        let hex: String = data.iter().map(|b| format!("{:02X}", b)).collect();
        if let Ok(mut f) = self.file.lock() {
            let _ = write!(f, "\n--- {} {}\n{}\n---\n{}\n---\n", direction, Local::now().to_rfc3339(), text, hex);
        }
    }
}

impl Logger for TextLogger {
    fn sent(&self, data: &[u8]) {
        self.block("TX", data);
    }
    // Single bytes are mostly XMODEM control chatter
    fn received(&self, data: &[u8]) {
        if data.len() > 1 {
            self.block("RX", data);
        }
    }
}
