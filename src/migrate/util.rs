use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

pub fn pid_alive(pid: u32) -> bool {
    if cfg!(windows) {
        // The fs2 lock is authoritative; liveness here only decorates `status`.
        true
    } else {
        let Ok(status) = Command::new("kill").arg("-0").arg(pid.to_string()).status() else {
            return false;
        };
        status.success()
    }
}

/// Replace `path` with `contents` so readers see either the old or the new
/// file, never a truncated one. Returns once the data is on disk.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("failed to write staged copy of {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync staged copy of {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;

    #[cfg(unix)]
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)?;
    write_atomic(path, format!("{data}\n").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn truncation_appends_ellipsis() {
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
        assert_eq!(truncate_with_ellipsis("ab\ncd", 10), "abcd");
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let tmp = tempdir().expect("tempdir");
        let file = tmp.path().join("nested/state.json");
        write_atomic(&file, b"first").expect("first write");
        write_atomic(&file, b"second").expect("second write");
        assert_eq!(fs::read_to_string(&file).expect("read"), "second");

        let leftovers = fs::read_dir(file.parent().expect("parent"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 1);
    }
}
