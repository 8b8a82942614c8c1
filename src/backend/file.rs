use crate::backend::Backend;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Directory used by [FileBackend::default], relative to the working directory.
pub const DEFAULT_STORAGE_DIR: &str = "logs/rate_limits";

const EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit storage unavailable: {0}")]
    Io(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Malformed rate limit window: {0}")]
    Malformed(
        #[source]
        #[from]
        serde_json::Error,
    ),
}

/// A [Backend] that keeps one JSON document per window inside a directory.
///
/// Each window is stored as `{dir}/{key}.json` containing an array of timestamps, e.g.
/// `[1700000000,1700000004]`. Writers hold an exclusive lock on the file for the duration of the
/// write and readers hold a shared lock, so a reader never observes a half written document.
///
/// Note that the lock does not span the limiter's load-decide-save cycle: two processes checking
/// the same key at the same moment may both be admitted.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: Arc<PathBuf>,
}

impl FileBackend {
    /// Use `dir` for storage, creating it if it does not exist.
    ///
    /// Failing to create the directory is not fatal; it is logged, retried on every save, and
    /// until then the limiter sees every window as empty.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            log::warn!(
                "Unable to create rate limit directory {}: {e}",
                dir.display()
            );
        }
        Self { dir: Arc::new(dir) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file a window key is persisted to.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{EXTENSION}"))
    }
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_DIR)
    }
}

impl Backend for FileBackend {
    type Error = Error;

    async fn load(&self, key: &str) -> Result<Vec<u64>, Self::Error> {
        let mut file = match File::open(self.path_for(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        FileExt::lock_shared(&file)?;
        let mut contents = Vec::new();
        let read = file.read_to_end(&mut contents);
        let _ = FileExt::unlock(&file);
        read?;
        // An empty file is a window that was created but never written.
        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&contents)?)
    }

    async fn save(&self, key: &str, events: &[u64]) -> Result<(), Self::Error> {
        fs::create_dir_all(self.dir.as_path())?;
        let document = serde_json::to_vec(events)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.path_for(key))?;
        FileExt::lock_exclusive(&file)?;
        // Truncate only once the lock is held.
        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(&document))
            .and_then(|_| file.flush());
        let _ = FileExt::unlock(&file);
        Ok(written?)
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_backend() -> (TempDir, FileBackend) {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path());
        (dir, backend)
    }

    #[actix_web::test]
    async fn test_missing_key_is_empty() {
        let (_dir, backend) = make_backend();
        assert!(backend.load("login_1234").await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_save_and_load() {
        let (dir, backend) = make_backend();
        backend.save("login_1234", &[10, 20, 30]).await.unwrap();
        assert_eq!(backend.load("login_1234").await.unwrap(), vec![10, 20, 30]);
        // Stored as a plain array of numbers
        let raw = fs::read_to_string(dir.path().join("login_1234.json")).unwrap();
        assert_eq!(raw, "[10,20,30]");
        // A shorter window must fully replace the longer one
        backend.save("login_1234", &[40]).await.unwrap();
        assert_eq!(backend.load("login_1234").await.unwrap(), vec![40]);
    }

    #[actix_web::test]
    async fn test_malformed_window() {
        let (dir, backend) = make_backend();
        fs::write(dir.path().join("login_bad.json"), "{not json").unwrap();
        assert!(matches!(
            backend.load("login_bad").await,
            Err(Error::Malformed(_))
        ));
        fs::write(dir.path().join("login_neg.json"), "[-5]").unwrap();
        assert!(matches!(
            backend.load("login_neg").await,
            Err(Error::Malformed(_))
        ));
    }

    #[actix_web::test]
    async fn test_empty_file_is_empty_window() {
        let (dir, backend) = make_backend();
        fs::write(dir.path().join("login_empty.json"), "").unwrap();
        assert!(backend.load("login_empty").await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_delete_is_idempotent() {
        let (dir, backend) = make_backend();
        backend.save("login_k", &[1]).await.unwrap();
        backend.delete("login_k").await.unwrap();
        assert!(!dir.path().join("login_k.json").exists());
        backend.delete("login_k").await.unwrap();
        assert!(backend.load("login_k").await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("logs").join("rate_limits");
        let backend = FileBackend::new(&nested);
        assert!(nested.is_dir());
        assert_eq!(backend.dir(), nested);
        assert_eq!(backend.path_for("default_k"), nested.join("default_k.json"));
        // Recreated on save if removed underneath us
        fs::remove_dir_all(&nested).unwrap();
        backend.save("default_k", &[1]).await.unwrap();
        assert_eq!(backend.load("default_k").await.unwrap(), vec![1]);
    }

    #[test]
    fn test_concurrent_writers_never_tear() {
        let (_dir, backend) = make_backend();
        let threads: Vec<_> = (0..8u64)
            .map(|n| {
                let backend = backend.clone();
                std::thread::spawn(move || {
                    futures::executor::block_on(async {
                        for i in 0..50 {
                            let len = (n + i) % 7 + 1;
                            let events: Vec<u64> = (0..len).collect();
                            backend.save("login_shared", &events).await.unwrap();
                            // Whatever writer got there last, the file is a whole window
                            let loaded = backend.load("login_shared").await.unwrap();
                            assert!(!loaded.is_empty());
                            assert_eq!(loaded, (0..loaded.len() as u64).collect::<Vec<_>>());
                        }
                    })
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
    }
}
