//! Persistence of calibration results.
//!
//! Each glacier is written to its own JSON file as soon as its calibration
//! finishes, so a crashed or interrupted batch loses at most the glacier in
//! flight. A separate merge step collects the per-glacier files into one
//! id-keyed document once the batch is done.

use crate::calibrate::CalibrationResult;
use crate::{Error, Result};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File name a glacier's result is stored under.
fn result_file(dir: &Path, glacier_id: &str) -> PathBuf {
    dir.join(format!("{glacier_id}.json"))
}

/// Write one glacier's result to `<dir>/<glacier_id>.json`, creating `dir`
/// if needed. An existing file for the same glacier is overwritten.
pub fn write_result(dir: &Path, result: &CalibrationResult) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::Persistence(format!("creating {}: {e}", dir.display())))?;
    let path = result_file(dir, &result.glacier_id);
    let body = serde_json::to_vec(result)
        .map_err(|e| Error::Persistence(format!("encoding {}: {e}", result.glacier_id)))?;
    fs::write(&path, body)
        .map_err(|e| Error::Persistence(format!("writing {}: {e}", path.display())))?;
    Ok(path)
}

/// Read one glacier's result back.
pub fn read_result(path: &Path) -> Result<CalibrationResult> {
    let body = fs::read(path)
        .map_err(|e| Error::Persistence(format!("reading {}: {e}", path.display())))?;
    serde_json::from_slice(&body)
        .map_err(|e| Error::Persistence(format!("decoding {}: {e}", path.display())))
}

/// Delete every per-glacier result file in `dir`. Missing directories are
/// fine; a fresh batch run starts from a clean slate either way.
pub fn clear_results(dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(Error::Persistence(format!(
                "listing {}: {e}",
                dir.display()
            )))
        }
    };
    let mut removed = 0;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::Persistence(format!("listing {}: {e}", dir.display())))?;
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            fs::remove_file(&path)
                .map_err(|e| Error::Persistence(format!("removing {}: {e}", path.display())))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Collect every per-glacier result file in `dir` into one id-keyed map,
/// ordered by glacier id.
///
/// # Errors
///
/// [`Error::Persistence`] on unreadable files or when two files claim the
/// same glacier id.
pub fn merge_results(dir: &Path) -> Result<IndexMap<String, CalibrationResult>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::Persistence(format!("listing {}: {e}", dir.display())))?;

    let mut merged = IndexMap::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::Persistence(format!("listing {}: {e}", dir.display())))?;
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        let result = read_result(&path)?;
        let glacier_id = result.glacier_id.clone();
        if merged.insert(glacier_id.clone(), result).is_some() {
            return Err(Error::Persistence(format!(
                "glacier {glacier_id} appears in more than one result file"
            )));
        }
    }
    merged.sort_keys();
    log::info!("merged {} glacier results from {}", merged.len(), dir.display());
    Ok(merged)
}

/// Merge the per-glacier files in `dir` and write the combined document to
/// `out`.
pub fn write_merged(dir: &Path, out: &Path) -> Result<usize> {
    let merged = merge_results(dir)?;
    let body = serde_json::to_vec(&merged)
        .map_err(|e| Error::Persistence(format!("encoding merged results: {e}")))?;
    fs::write(out, body)
        .map_err(|e| Error::Persistence(format!("writing {}: {e}", out.display())))?;
    Ok(merged.len())
}
