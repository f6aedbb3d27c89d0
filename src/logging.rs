//! Logging setup.
//!
//! Installs `env_logger` with a writer that tees every record to stderr and to
//! a size-rotated log file (`app.log`, `app.log.1`, ... `app.log.N`).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Local;

use crate::config::LogConfig;
use crate::error::{LockResultExt, RecorderResult};

/// Size-rotating log file.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    /// Open (append) the active file, creating its directory.
    pub fn open(dir: &Path, file_name: &str, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_bytes,
            backup_count,
            file,
            written,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    /// Shift `app.log.N-1` -> `app.log.N`, ..., `app.log` -> `app.log.1`.
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backup_count == 0 {
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        let _ = fs::remove_file(self.backup_path(self.backup_count));
        for i in (1..self.backup_count).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                fs::rename(&from, self.backup_path(i + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;

        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.written + buf.len() as u64 > self.max_bytes && self.written > 0 {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Writer handed to env_logger: optional stderr plus the rotating file.
#[derive(Clone)]
struct TeeWriter {
    file: Arc<Mutex<RotatingFile>>,
    console: bool,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.console {
            let _ = io::stderr().write_all(buf);
        }
        let mut file = self
            .file
            .lock()
            .map_lock_err("log file")
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Ok(mut file) = self.file.lock() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Initialize logging. The filter defaults to `info` and honours `RUST_LOG`.
///
/// Calling this twice is harmless: the second call returns Ok without
/// replacing the installed logger.
pub fn init(config: &LogConfig) -> RecorderResult<()> {
    let file = RotatingFile::open(
        &config.dir,
        &config.file_name,
        config.max_bytes,
        config.backup_count,
    )?;
    let writer = TeeWriter {
        file: Arc::new(Mutex::new(file)),
        console: config.console,
    };

    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(writer)))
        .try_init();

    if result.is_ok() {
        log::info!("Logging system initialized");
        log::info!("Log directory: {:?}", config.dir);
    }

    Ok(())
}
