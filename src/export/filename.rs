use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

const EXTENSION: &str = "pdf";

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("valid pattern"));
static RESERVED_NAMES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(CON|PRN|AUX|NUL|COM[1-9]|LPT[1-9])$").expect("valid pattern"));

/// Sanitize a file name for cross-platform compatibility
/// Removes/replaces characters that are invalid on Windows, macOS, or Linux
pub fn sanitize_filename(name: &str) -> String {
    let sanitized = INVALID_CHARS.replace_all(name, "_");
    let sanitized = sanitized.trim_matches(|c| c == ' ' || c == '.');

    if RESERVED_NAMES.is_match(sanitized) {
        return format!("_{sanitized}");
    }

    let sanitized: String = sanitized.chars().take(200).collect();
    if sanitized.is_empty() {
        "Rifas".to_string()
    } else {
        sanitized
    }
}

/// `Rifas #<unix-millis>.pdf`
pub fn default_file_name(now: DateTime<Utc>) -> String {
    format!("Rifas #{}.{EXTENSION}", now.timestamp_millis())
}

/// Append `.pdf` unless the name already ends in it (any case).
pub fn ensure_pdf_extension(path: &Path) -> PathBuf {
    let has_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION));
    if has_pdf {
        return path.to_path_buf();
    }

    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(EXTENSION);
    PathBuf::from(name)
}

/// Where the document goes.
///
/// An explicit path wins; its file name is sanitized and it is taken relative
/// to `output_dir` when it is not absolute. Otherwise the timestamped default
/// name is placed in `output_dir`, or the current directory.
pub fn resolve_output_path(
    explicit: Option<&Path>,
    output_dir: Option<&Path>,
    now: DateTime<Utc>,
) -> PathBuf {
    let dir = output_dir.unwrap_or_else(|| Path::new(""));

    match explicit {
        Some(path) => {
            let name = path
                .file_name()
                .map(|n| sanitize_filename(&n.to_string_lossy()))
                .unwrap_or_else(|| default_file_name(now));
            let path = path.with_file_name(name);
            let path = if path.is_absolute() {
                path
            } else {
                dir.join(path)
            };
            ensure_pdf_extension(&path)
        }
        None => dir.join(default_file_name(now)),
    }
}
