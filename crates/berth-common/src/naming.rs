//! Kubernetes-safe naming

/// Maximum length of a DNS-1123 label
pub const MAX_LABEL_LEN: usize = 63;

/// Name used when sanitizing leaves nothing behind
pub const FALLBACK_NAME: &str = "unnamed";

/// Turn arbitrary text into a DNS-1123 label.
///
/// Lowercases, collapses every run of characters outside `[a-z0-9]` into a
/// single `-`, trims leading/trailing dashes and truncates to 63 characters.
/// Returns [`FALLBACK_NAME`] when nothing usable remains.
pub fn safe_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    truncate_label(&out)
}

/// Truncate a label to 63 characters, dropping any trailing dash the cut exposes
pub fn truncate_label(name: &str) -> String {
    let cut: String = name.chars().take(MAX_LABEL_LEN).collect();
    let trimmed = cut.trim_end_matches('-');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether `name` is a valid DNS-1123 subdomain (the rule for most object names)
pub fn is_dns1123_subdomain(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|part| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !part.starts_with('-')
            && !part.ends_with('-')
    })
}
