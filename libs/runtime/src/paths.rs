use anyhow::{Context, Result};
use std::path::PathBuf;

/// Resolve the server home directory.
///
/// - `None` or empty => `$HOME/<default_subdir>` (`%APPDATA%` on Windows).
/// - A leading `~` is expanded against the platform home.
/// - Relative paths are resolved against the current directory.
///
/// When `create` is set the directory is created if missing.
pub fn resolve_home_dir(
    configured: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf> {
    let resolved = match configured.filter(|s| !s.trim().is_empty()) {
        None => platform_home()?.join(default_subdir),
        Some(raw) => {
            if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
                platform_home()?.join(rest)
            } else if raw == "~" {
                platform_home()?
            } else {
                let p = PathBuf::from(&raw);
                if p.is_absolute() {
                    p
                } else {
                    std::env::current_dir()
                        .context("cannot resolve current directory")?
                        .join(p)
                }
            }
        }
    };

    if create {
        std::fs::create_dir_all(&resolved)
            .with_context(|| format!("cannot create home dir {}", resolved.display()))?;
    }
    Ok(resolved)
}

fn platform_home() -> Result<PathBuf> {
    #[cfg(target_os = "windows")]
    let var = "APPDATA";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";

    std::env::var_os(var)
        .map(PathBuf::from)
        .with_context(|| format!("{var} is not set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_subdir_under_home() {
        let tmp = tempdir().unwrap();
        #[cfg(not(target_os = "windows"))]
        std::env::set_var("HOME", tmp.path());
        #[cfg(target_os = "windows")]
        std::env::set_var("APPDATA", tmp.path());

        let p = resolve_home_dir(None, ".plinth", true).unwrap();
        assert!(p.starts_with(tmp.path()));
        assert!(p.ends_with(".plinth"));
        assert!(p.exists());
    }

    #[test]
    fn tilde_is_expanded() {
        let tmp = tempdir().unwrap();
        #[cfg(not(target_os = "windows"))]
        std::env::set_var("HOME", tmp.path());
        #[cfg(target_os = "windows")]
        std::env::set_var("APPDATA", tmp.path());

        let p = resolve_home_dir(Some("~/.custom".into()), ".plinth", false).unwrap();
        assert!(p.starts_with(tmp.path()));
        assert!(p.ends_with(".custom"));
    }

    #[test]
    fn absolute_path_kept_as_is() {
        let tmp = tempdir().unwrap();
        let abs = tmp.path().join("explicit");
        let p = resolve_home_dir(Some(abs.to_string_lossy().into_owned()), ".plinth", true).unwrap();
        assert_eq!(p, abs);
        assert!(p.exists());
    }
}
