// ABOUTME: Crash-safe file replacement shared by every file frpdeck persists.
// ABOUTME: Writes to a sibling temp file, syncs, then renames over the target.

use std::io::Write;
use std::path::Path;

/// Replace `path` with `contents` so readers see either the old or the new file, never a torn one.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
