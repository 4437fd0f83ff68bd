use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bb_events::Bus;
use fs2::FileExt;

use super::store::{publish_written, KvError, KvStore, Record};

/// JSON-file store shared by separate processes.
///
/// Each call holds an exclusive advisory lock on a sidecar `.lock` file and
/// replaces the data file via rename, so single calls are atomic across
/// processes. Sequences of calls are not; that is the lease manager's job.
#[derive(Clone)]
pub struct FileKv {
    path: PathBuf,
    bus: Bus,
}

struct CallGuard {
    file: File,
}

impl CallGuard {
    fn acquire(path: &Path) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileKv {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, KvError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            bus: Bus::new(64),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, KvError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &Path) -> Result<T, KvError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path();
        tokio::task::spawn_blocking(move || f(&path, &lock_path))
            .await
            .map_err(|err| KvError::Join(err.to_string()))?
    }
}

fn read_all(path: &Path) -> Result<Record, KvError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Record::new()),
        Err(err) => return Err(err.into()),
    };
    if raw.trim().is_empty() {
        return Ok(Record::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn write_all(path: &Path, record: &Record) -> Result<(), KvError> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(record)?)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait::async_trait]
impl KvStore for FileKv {
    async fn get(&self, keys: &[&str]) -> Result<Record, KvError> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.blocking(move |path, lock_path| {
            let _guard = CallGuard::acquire(lock_path)?;
            let mut all = read_all(path)?;
            Ok(keys
                .into_iter()
                .filter_map(|k| all.remove(&k).map(|v| (k, v)))
                .collect())
        })
        .await
    }

    async fn set(&self, items: Record) -> Result<(), KvError> {
        let written = items.clone();
        self.blocking(move |path, lock_path| {
            let _guard = CallGuard::acquire(lock_path)?;
            let mut all = read_all(path)?;
            for (k, v) in items {
                all.insert(k, v);
            }
            write_all(path, &all)
        })
        .await?;
        publish_written(&self.bus, &written);
        Ok(())
    }

    fn changes(&self) -> Option<Bus> {
        Some(self.bus.clone())
    }
}
