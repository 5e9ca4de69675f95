use std::path::{Path, PathBuf};

use tracing::warn;

/// Expand `~`, `$VAR` and `${VAR}` in a path.
///
/// Unknown variables are left as written, with a warning.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(raw.as_ref()) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            warn!("Cannot expand {}: {}", raw, e);
            PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // cross-platform path comparison
    fn normalize_path_separator(s: &str) -> String {
        s.replace('\\', "/")
    }

    #[test]
    fn given_home_variable_when_expanding_then_replaced() {
        let home = std::env::var("HOME").expect("HOME should be set");
        let expanded = expand_path(Path::new("${HOME}/store.json"));
        assert_eq!(
            normalize_path_separator(&expanded.to_string_lossy()),
            normalize_path_separator(&format!("{home}/store.json"))
        );
    }

    #[test]
    fn given_unknown_variable_when_expanding_then_kept_verbatim() {
        let expanded = expand_path(Path::new("$HSTREE_SURELY_UNSET_VAR/x"));
        assert_eq!(expanded, PathBuf::from("$HSTREE_SURELY_UNSET_VAR/x"));
    }
}
