mod catalog;
mod files;
mod query;
mod store;
mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metadata::MetadataError;
use redb::{CommitError, Database, DatabaseError, StorageError, TableError, TransactionError};
use tracing::info;

pub use catalog::{
    AlbumDetails, AlbumEdit, AlbumSummary, ArtistDetails, ArtistEdit, ArtistSummary, ArtistTrack,
    StorageStats, TrackEdit, TrackUpdateOutcome,
};
pub use files::FileStore;
pub use metadata::ArtworkUpdate;
pub use query::{TrackDetails, TrackQuery, TrackSort};
pub use sync::{LoftyTags, SyncReport, TagAccess};

/// Catalog of the uploads directory backed by an embedded redb index.
#[derive(Clone)]
pub struct Library {
    files: FileStore,
    db: Arc<Database>,
    tags: Arc<dyn TagAccess>,
}

impl Library {
    pub fn open(uploads: PathBuf, db_path: &Path) -> Result<Self, LibraryError> {
        let db = Self::open_db(db_path)?;
        Self::with_db(uploads, db)
    }

    pub fn open_db(path: &Path) -> Result<Arc<Database>, LibraryError> {
        let db = store::open_or_create_db(path)?;
        Ok(Arc::new(db))
    }

    /// Uses a database that other stores may share.
    pub fn with_db(uploads: PathBuf, db: Arc<Database>) -> Result<Self, LibraryError> {
        let files = FileStore::new(uploads);
        files.ensure_dir()?;
        if store::init_tables(&db)? {
            info!("Created catalog tables");
        }
        Ok(Self {
            files,
            db,
            tags: Arc::new(LoftyTags),
        })
    }

    pub fn with_tag_access(mut self, tags: Arc<dyn TagAccess>) -> Self {
        self.tags = tags;
        self
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    KeyParse(String),
    VersionMismatch(u32),
    NotFound(String),
    Conflict(String),
    Invalid(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::KeyParse(value) => write!(f, "key parse error: {}", value),
            LibraryError::VersionMismatch(version) => {
                write!(f, "index version mismatch: {}", version)
            }
            LibraryError::NotFound(what) => write!(f, "{} not found", what),
            LibraryError::Conflict(message) => write!(f, "{}", message),
            LibraryError::Invalid(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}
