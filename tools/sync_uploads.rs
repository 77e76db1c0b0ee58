use std::env;
use std::path::{Path, PathBuf};

use library::Library;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let uploads_path = args
        .next()
        .or_else(|| env::var("UPLOADS_PATH").ok())
        .ok_or("UPLOADS_PATH not set and no path argument")?;
    let index_path = args
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .unwrap_or_else(|| "data/phono.redb".to_string());

    if let Some(parent) = Path::new(&index_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let library = Library::open(PathBuf::from(&uploads_path), Path::new(&index_path))?;
    let report = library.full_sync()?;
    let stats = library.storage_stats()?;

    println!(
        "Synced: {} imported, {} removed, {} failed",
        report.imported, report.removed, report.failed
    );
    println!(
        "Library: {} tracks, {} albums, {} artists, {} on disk",
        stats.tracks, stats.albums, stats.artists, stats.total_display
    );

    Ok(())
}
