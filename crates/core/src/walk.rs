//! Recursive folder walk
//!
//! Visits `root` itself and everything below it, parents before children.
//! Symlinks are reported but not followed.

use crate::error::Result;
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Walk `root`, invoking `visit(path, is_dir)` for every entry
///
/// The first error returned by `visit` stops the walk. Entries that vanish
/// while the walk is running are skipped; any other walk error is returned.
pub fn walk_tree<F>(root: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&Path, bool) -> Result<()>,
{
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let vanished = e
                    .io_error()
                    .map(|io| io.kind() == io::ErrorKind::NotFound)
                    .unwrap_or(false);
                // The root itself missing is a real error
                if vanished && e.depth() > 0 {
                    debug!("Skipping vanished entry during walk: {}", e);
                    continue;
                }
                return Err(io::Error::from(e).into());
            }
        };

        visit(entry.path(), entry.file_type().is_dir())?;
    }
    Ok(())
}

/// Walk `root`, invoking `visit` for directories only
pub fn walk_dirs<F>(root: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&Path) -> Result<()>,
{
    walk_tree(root, |path, is_dir| if is_dir { visit(path) } else { Ok(()) })
}
