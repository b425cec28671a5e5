//! Filename helpers for uploads and download names.
//!
//! Display names are user-supplied and end up in a `Content-Disposition`
//! header, so characters that are invalid in Windows filenames are dropped
//! rather than replaced. Unicode text (CJK and friends) is kept as-is.

/// Characters that are invalid in Windows filenames.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Display name used when the caller supplies nothing usable.
pub const DEFAULT_DISPLAY_NAME: &str = "muxed_video";

/// Strip invalid and control characters from a display name.
///
/// Returns [`DEFAULT_DISPLAY_NAME`] if nothing is left after trimming.
///
/// ```
/// use rust_mux::utils::filename::sanitize_display_name;
///
/// assert_eq!(sanitize_display_name("Episode 01: Pilot?"), "Episode 01 Pilot");
/// assert_eq!(sanitize_display_name("  "), "muxed_video");
/// ```
pub fn sanitize_display_name(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() && !INVALID_CHARS.contains(c))
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        DEFAULT_DISPLAY_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lowercased extension of `name`, if it has one.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || (stem.is_empty() && !name.starts_with('.')) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Whether `name` ends with one of the `allowed` extensions (case-insensitive).
pub fn has_allowed_extension(name: &str, allowed: &[&str]) -> bool {
    extension_of(name).is_some_and(|ext| allowed.contains(&ext.as_str()))
}

/// Reduce an uploaded filename to its last path component.
///
/// Browsers may send full client paths; only the base name is ever used.
pub fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}
