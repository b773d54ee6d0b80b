use chrono::{DateTime, SubsecRound, Utc};
use std::path::PathBuf;

/// `$<xdg_var>/tagmark`, else `$HOME/<home_rel>/tagmark`, else the working directory
fn app_dir(xdg_var: &str, home_rel: &str) -> PathBuf {
    if let Ok(path) = std::env::var(xdg_var) {
        return PathBuf::from(path).join("tagmark");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(home_rel).join("tagmark");
    }
    #[cfg(target_os = "windows")]
    if let Ok(appdata) = std::env::var("APPDATA") {
        return PathBuf::from(appdata).join("tagmark");
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Where the database, index and queue files go by default.
/// `TAGMARK_DATA_DIR` overrides the XDG lookup.
pub fn get_default_datadir() -> PathBuf {
    match std::env::var("TAGMARK_DATA_DIR") {
        Ok(path) => PathBuf::from(path),
        Err(_) => app_dir("XDG_DATA_HOME", ".local/share"),
    }
}

pub fn get_config_dir() -> PathBuf {
    app_dir("XDG_CONFIG_HOME", ".config")
}

/// Current UTC time truncated to the microsecond precision kept by the store
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Build `?, ?, ?` for an IN list of `n` items
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, "?")]
    #[case(3, "?, ?, ?")]
    #[case(0, "")]
    fn test_placeholders(#[case] n: usize, #[case] expected: &str) {
        assert_eq!(placeholders(n), expected);
    }

    #[test]
    fn test_now_utc_has_micro_precision() {
        let now = now_utc();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }
}
