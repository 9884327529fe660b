//! Locating external tools.

use std::path::PathBuf;

/// Resolve a binary from an environment override, falling back to `PATH`.
pub fn find_binary(env_key: &str, default_bin: &str) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(env_key) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    find_on_path(default_bin)
}

/// Look a binary up on `PATH`. Path-like names are checked directly.
pub fn find_on_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.exists() { Some(p) } else { None };
    }

    let paths_os = std::env::var_os("PATH")?;
    std::env::split_paths(&paths_os)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_none() {
        assert!(find_on_path("voxpipe-definitely-not-installed").is_none());
        assert!(find_on_path("/nonexistent/dir/tool").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn finds_shell_on_path() {
        assert!(find_on_path("sh").is_some());
    }
}
