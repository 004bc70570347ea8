//! Zip handling: entry-point resolution and bounded extraction.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::error::LoadError;

/// File names that mark a package entry point.
pub const ENTRY_NAMES: [&str; 2] = ["model.yaml", "model.yml"];

pub(crate) type Zip<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub(crate) fn open(bytes: &[u8]) -> Result<Zip<'_>, LoadError> {
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| LoadError::Malformed(format!("unreadable archive: {e}")))
}

/// Exactly one entry manifest must exist, at any depth.
pub(crate) fn resolve_entry(zip: &mut Zip<'_>) -> Result<String, LoadError> {
    let mut candidates = Vec::new();
    for i in 0..zip.len() {
        let file = zip.by_index(i).map_err(|e| LoadError::Malformed(format!("entry {i}: {e}")))?;
        if file.is_dir() { continue; }
        let path = enclosed(&file)?;
        let is_entry = path.file_name().and_then(|n| n.to_str()).map(|n| ENTRY_NAMES.contains(&n)).unwrap_or(false);
        if is_entry { candidates.push(path.to_string_lossy().replace('\\', "/")); }
    }
    candidates.sort();
    match candidates.len() {
        0 => Err(LoadError::Malformed(format!("no entry point ({}) in archive", ENTRY_NAMES.join(" or ")))),
        1 => Ok(candidates.remove(0)),
        _ => Err(LoadError::EntryAmbiguous(candidates)),
    }
}

/// Read the entry manifest, refusing to inflate more than `max_bytes`.
pub(crate) fn read_text(zip: &mut Zip<'_>, name: &str, max_bytes: u64) -> Result<String, LoadError> {
    let too_big = || LoadError::Malformed(format!("entry manifest `{name}` exceeds the {max_bytes} byte limit"));
    let file = zip.by_name(name).map_err(|e| LoadError::Malformed(format!("{name}: {e}")))?;
    if file.size() > max_bytes { return Err(too_big()); }
    let mut buf = Vec::new();
    // The declared size is untrusted; the cap on the stream is what holds.
    file.take(max_bytes + 1).read_to_end(&mut buf).map_err(|e| LoadError::Malformed(format!("{name}: {e}")))?;
    if buf.len() as u64 > max_bytes { return Err(too_big()); }
    String::from_utf8(buf).map_err(|_| LoadError::Malformed(format!("{name}: not UTF-8")))
}

/// Write every entry below `dest`. Fails once more than `max_bytes` would be written.
pub(crate) fn extract(zip: &mut Zip<'_>, dest: &Path, max_bytes: u64) -> Result<u64, LoadError> {
    let mut written = 0u64;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).map_err(|e| LoadError::Malformed(format!("entry {i}: {e}")))?;
        let out_path = dest.join(enclosed(&file)?);
        if file.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() { std::fs::create_dir_all(parent)?; }
        let mut out = std::fs::File::create(&out_path)?;
        let budget = max_bytes.saturating_sub(written);
        let n = std::io::copy(&mut (&mut file).take(budget + 1), &mut out)?;
        if n > budget { return Err(LoadError::Malformed(format!("package expands beyond {max_bytes} bytes"))); }
        written += n;
        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o755))?;
        }
    }
    Ok(written)
}

fn enclosed(file: &zip::read::ZipFile<'_>) -> Result<PathBuf, LoadError> {
    file.enclosed_name()
        .map(Path::to_path_buf)
        .ok_or_else(|| LoadError::Malformed(format!("unsafe path in archive: {}", file.name())))
}
