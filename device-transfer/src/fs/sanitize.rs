//! Host-safe names for device files and folders.

/// Longest name kept, in UTF-8 bytes. Leaves headroom under the common
/// 255-byte limit for the rotation suffix.
const MAX_NAME_BYTES: usize = 250;

const WINDOWS_INVALID: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const WINDOWS_RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Map a device file or folder name to one valid on this host.
pub fn sanitize_name(raw: &str) -> String {
    sanitize_for(raw, cfg!(windows))
}

/// Platform-explicit variant of [`sanitize_name`].
pub fn sanitize_for(raw: &str, windows: bool) -> String {
    let mut name: String = raw
        .chars()
        .filter(|c| !matches!(c, '\u{0}'..='\u{1f}' | '\u{7f}'))
        .collect();

    if windows {
        name = name
            .chars()
            .map(|c| if WINDOWS_INVALID.contains(&c) { '_' } else { c })
            .collect();

        let stem = name.split('.').next().unwrap_or("");
        if WINDOWS_RESERVED.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
            name.insert(0, '_');
        }

        name = name.trim_end_matches(['.', ' ']).to_string();
    }

    let name = name.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if name.is_empty() {
        return "unnamed".to_string();
    }

    truncate_to_bytes(name, MAX_NAME_BYTES).to_string()
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
fn truncate_to_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
