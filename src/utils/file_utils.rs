//! File system utilities

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Longest title fragment kept in generated file names
pub const MAX_FILENAME_CHARS: usize = 200;

/// Sanitize filename for filesystem
pub fn sanitize_filename(filename: &str) -> String {
    let replaced: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    let limited: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();
    let limited = limited.trim_end_matches(|c| c == ' ' || c == '.');

    if limited.is_empty() {
        "video".to_string()
    } else {
        limited.to_string()
    }
}

/// First path under `dir` named `file_name`, or `stem (n).ext` if taken
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let ext = path.extension().and_then(|e| e.to_str());

    let mut counter = 1u32;
    loop {
        let name = match ext {
            Some(ext) => format!("{} ({}).{}", stem, counter, ext),
            None => format!("{} ({})", stem, counter),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Move a file, falling back to copy + remove across filesystems
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
