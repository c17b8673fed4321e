use crate::errors::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Produce the engine's initial snapshot: parse the backing file if it
/// exists, fall back to `default` if it does not. A file that exists but
/// cannot be read or parsed is fatal — silently starting from an empty
/// store would drop the caller's data on the next persist.
pub(crate) fn load_or_default<T: DeserializeOwned>(path: &Path, default: T) -> StoreResult<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(default),
        Err(error) => {
            return Err(StoreError::Read(format!("{}: {}", path.display(), error)));
        }
    };
    serde_json::from_slice(&bytes)
        .map_err(|error| StoreError::Read(format!("{}: {}", path.display(), error)))
}

/// Publishes a serialized value to a target path so that the path always
/// resolves to either the complete previous version or the complete new
/// version. The temp file lives in the target's directory so the rename
/// stays on one filesystem.
#[derive(Debug, Clone)]
pub struct AtomicJsonWriter {
    path: PathBuf,
}

impl AtomicJsonWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `value` as indented JSON and atomically replace the target.
    /// `durable` forces fsync of both the temp file and the renamed target.
    pub fn write<T: Serialize>(&self, value: &T, durable: bool) -> StoreResult<()> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent)
                .map_err(|error| StoreError::Write(format!("{}: {}", parent.display(), error)))?;
        }

        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|error| StoreError::Write(format!("serialize snapshot: {}", error)))?;

        let tmp_path = self.temp_path();
        if let Err(error) = self.write_temp(&tmp_path, &bytes, durable) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::Write(format!(
                "{}: {}",
                tmp_path.display(),
                error
            )));
        }

        if let Err(error) = self.replace_target(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::Write(format!(
                "{}: {}",
                self.path.display(),
                error
            )));
        }

        if durable {
            self.sync()?;
        }

        Ok(())
    }

    /// Force the current target contents to stable storage. A target that
    /// does not exist yet means nothing has been published, which is not an
    /// error.
    pub fn sync(&self) -> StoreResult<()> {
        match File::open(&self.path) {
            Ok(file) => file.sync_all().map_err(|error| {
                StoreError::Write(format!("{}: {}", self.path.display(), error))
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::Write(format!(
                "{}: {}",
                self.path.display(),
                error
            ))),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
    }

    fn write_temp(&self, tmp_path: &Path, bytes: &[u8], durable: bool) -> io::Result<()> {
        let mut file = File::create(tmp_path)?;
        file.write_all(bytes)?;
        if durable {
            file.sync_all()?;
        }
        Ok(())
    }

    fn replace_target(&self, tmp_path: &Path) -> io::Result<()> {
        match fs::rename(tmp_path, &self.path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Some platforms refuse to rename over an existing file;
                // fall back to remove-then-rename.
                if self.path.exists() {
                    fs::remove_file(&self.path)?;
                }
                fs::rename(tmp_path, &self.path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    type State = BTreeMap<String, u64>;

    fn state(pairs: &[(&str, u64)]) -> State {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }

    #[test]
    fn missing_file_returns_default() {
        let dir = tempdir().unwrap();
        let loaded: State =
            load_or_default(&dir.path().join("absent.json"), state(&[("seed", 1)])).unwrap();
        assert_eq!(loaded, state(&[("seed", 1)]));
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").unwrap();

        let result: StoreResult<State> = load_or_default(&path, State::default());
        assert!(matches!(result, Err(StoreError::Read(_))));
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let writer = AtomicJsonWriter::new(&path);

        let value = state(&[("a", 1), ("b", 2)]);
        writer.write(&value, true).unwrap();

        let loaded: State = load_or_default(&path, State::default()).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn write_replaces_previous_content_completely() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let writer = AtomicJsonWriter::new(&path);

        writer.write(&state(&[("old", 1), ("stale", 2)]), false).unwrap();
        writer.write(&state(&[("new", 3)]), false).unwrap();

        let loaded: State = load_or_default(&path, State::default()).unwrap();
        assert_eq!(loaded, state(&[("new", 3)]));
    }

    #[test]
    fn no_temp_file_survives_a_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let writer = AtomicJsonWriter::new(&path);
        writer.write(&state(&[("a", 1)]), true).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != path)
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    #[test]
    fn sync_on_a_missing_target_is_a_no_op() {
        let dir = tempdir().unwrap();
        AtomicJsonWriter::new(dir.path().join("absent.json"))
            .sync()
            .unwrap();
    }

    #[test]
    fn output_is_indented_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        AtomicJsonWriter::new(&path)
            .write(&state(&[("a", 1)]), false)
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains('\n'));
        assert!(content.contains("  \"a\": 1"));
    }
}
