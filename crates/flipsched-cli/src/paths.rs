use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "flipper.yaml";

/// Resolve the flipper settings path.
///
/// Priority:
/// 1. `--config` flag / `FLIPSCHED_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `flipper.yaml`
/// 3. Fall back to `flipper.yaml` in `cwd`
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Some(found) = find_upward(&cwd) {
        return found;
    }
    cwd.join(CONFIG_FILE)
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => return None,
        }
    }
}
