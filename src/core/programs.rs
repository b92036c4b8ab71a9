//! Resolve configured program paths against the base installation.

use std::path::Path;

/// Resolve a configured program path.
///
/// - Backslashes are normalized to `/`.
/// - An absolute path that exists is used as-is.
/// - With a base installation configured, a relative path is joined onto it,
///   and an absolute path that does not exist is treated as base-relative.
/// - Otherwise the normalized path is returned unchanged.
///
/// A path that still does not exist only fails when the step is spawned.
pub fn resolve_program_path(program: &str, base: Option<&str>) -> String {
    if program.is_empty() {
        return String::new();
    }

    let norm = program.replace('\\', "/");
    let norm_path = Path::new(&norm);

    if norm_path.is_absolute() && norm_path.exists() {
        return norm;
    }

    let Some(base) = base.filter(|b| !b.is_empty()) else {
        return norm;
    };

    if !norm_path.is_absolute() {
        return Path::new(base).join(&norm).to_string_lossy().to_string();
    }

    let trimmed = norm.trim_start_matches(['/', '\\']);
    Path::new(base).join(trimmed).to_string_lossy().to_string()
}
