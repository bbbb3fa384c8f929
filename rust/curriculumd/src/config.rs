use std::path::PathBuf;

pub const LOG_ENV: &str = "CURRICULUMD_LOG";
pub const WORKSPACE_ENV: &str = "CURRICULUMD_WORKSPACE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_filter = lookup(LOG_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" | "off" => v.to_ascii_lowercase(),
                _ => v,
            })
            .unwrap_or_else(|| "info".to_string());
        let workspace = lookup(WORKSPACE_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self {
            log_filter,
            workspace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = DaemonConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.workspace, None);
    }

    #[test]
    fn reads_level_and_workspace() {
        let cfg = DaemonConfig::from_lookup(lookup(&[
            (LOG_ENV, " DEBUG "),
            (WORKSPACE_ENV, "/tmp/plans"),
        ]));
        assert_eq!(cfg.log_filter, "debug");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/plans")));
    }

    #[test]
    fn passes_full_directives_through() {
        let cfg = DaemonConfig::from_lookup(lookup(&[(LOG_ENV, "curriculumd=trace,warn")]));
        assert_eq!(cfg.log_filter, "curriculumd=trace,warn");
    }

    #[test]
    fn blank_workspace_is_ignored() {
        let cfg = DaemonConfig::from_lookup(lookup(&[(WORKSPACE_ENV, "   ")]));
        assert_eq!(cfg.workspace, None);
    }
}
