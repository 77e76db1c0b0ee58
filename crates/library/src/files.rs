use std::fs;
use std::io;
use std::path::PathBuf;

use common::unique_path;

/// The flat uploads directory. Only top-level files belong to the library.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Sorted names of the visible top-level files.
    pub fn file_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    /// 0 when the file is missing.
    pub fn file_size(&self, name: &str) -> u64 {
        fs::metadata(self.file_path(name))
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    pub fn total_storage_used(&self) -> io::Result<u64> {
        let mut total = 0u64;
        for name in self.file_names()? {
            total += self.file_size(&name);
        }
        Ok(total)
    }

    /// Writes `bytes` under `name`, or under a suffixed name when `name` is taken.
    pub fn save(&self, name: &str, bytes: &[u8]) -> io::Result<String> {
        let name = self.unique_name(name);
        fs::write(self.file_path(&name), bytes)?;
        Ok(name)
    }

    pub fn unique_name(&self, name: &str) -> String {
        match unique_path(&self.file_path(name)).file_name() {
            Some(unique) => unique.to_string_lossy().to_string(),
            None => name.to_string(),
        }
    }

    /// Returns false when there was nothing to delete.
    pub fn delete(&self, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.file_path(name)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}
