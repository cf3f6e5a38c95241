use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// FetchConfig — file-based config loader (fetchd.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Top-level config loaded from `fetchd.json`. Every field is optional; a
/// field absent from the file falls back to an env var, then to a hardcoded
/// default, via the `resolve_*` methods below.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FetchConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub browser_headless: Option<bool>,
    pub disable_sandbox: Option<bool>,
    pub browser_idle_seconds: Option<u64>,
    pub ready_state_target: Option<String>,
    pub ready_state_timeout_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
}

impl FetchConfig {
    /// Bind host: JSON field → `FETCHD_HOST` env var → `0.0.0.0`.
    pub fn resolve_host(&self) -> String {
        if let Some(h) = &self.host {
            if !h.trim().is_empty() {
                return h.clone();
            }
        }
        std::env::var("FETCHD_HOST")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Bind port: JSON field → `FETCHD_PORT` env var → `PORT` env var → 4000.
    pub fn resolve_port(&self) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        std::env::var("FETCHD_PORT")
            .ok()
            .or_else(|| std::env::var("PORT").ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(4000)
    }

    /// Headless launch: JSON field → `FETCHD_BROWSER_HEADLESS` env var → `false`.
    pub fn resolve_browser_headless(&self) -> bool {
        if let Some(b) = self.browser_headless {
            return b;
        }
        std::env::var("FETCHD_BROWSER_HEADLESS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    /// Sandbox disable: JSON field → `FETCHD_DISABLE_SANDBOX` env var → `false`.
    ///
    /// Needed for running inside most containers, where the setuid sandbox
    /// helper can't be installed.
    pub fn resolve_disable_sandbox(&self) -> bool {
        if let Some(b) = self.disable_sandbox {
            return b;
        }
        std::env::var("FETCHD_DISABLE_SANDBOX")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    /// Per-domain browser idle shutdown: JSON field →
    /// `FETCHD_BROWSER_IDLE_SECONDS` env var → 10.
    pub fn resolve_browser_idle_seconds(&self) -> u64 {
        if let Some(n) = self.browser_idle_seconds {
            return n;
        }
        std::env::var("FETCHD_BROWSER_IDLE_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10)
    }

    /// `document.readyState` value a navigation must reach before it's
    /// considered settled: JSON field → `FETCHD_READY_STATE_TARGET` env var
    /// → `"complete"`.
    pub fn resolve_ready_state_target(&self) -> String {
        if let Some(s) = &self.ready_state_target {
            if !s.trim().is_empty() {
                return s.clone();
            }
        }
        std::env::var("FETCHD_READY_STATE_TARGET")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "complete".to_string())
    }

    /// Seconds to wait for `resolve_ready_state_target` before failing the
    /// navigation: JSON field → `FETCHD_READY_STATE_TIMEOUT` env var → 20.
    pub fn resolve_ready_state_timeout_secs(&self) -> u64 {
        if let Some(n) = self.ready_state_timeout_secs {
            return n;
        }
        std::env::var("FETCHD_READY_STATE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20)
    }

    /// Plain-HTTP client request timeout: JSON field → `FETCHD_HTTP_TIMEOUT`
    /// env var → 20.
    pub fn resolve_http_timeout_secs(&self) -> u64 {
        if let Some(n) = self.http_timeout_secs {
            return n;
        }
        std::env::var("FETCHD_HTTP_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20)
    }
}

/// Load `fetchd.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `FETCHD_CONFIG` env var path
/// 2. `./fetchd.json` (process cwd)
/// 3. `../fetchd.json` (one level up)
///
/// Missing file → `FetchConfig::default()` (silent, all env-var fallbacks
/// apply). Parse error → log a warning, return `FetchConfig::default()`.
pub fn load_fetch_config() -> FetchConfig {
    let candidates: Vec<PathBuf> = {
        let mut v = vec![
            PathBuf::from("fetchd.json"),
            PathBuf::from("../fetchd.json"),
        ];
        if let Ok(env_path) = std::env::var("FETCHD_CONFIG") {
            v.insert(0, PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<FetchConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("fetchd.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "fetchd.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return FetchConfig::default();
                }
            },
            Err(_) => continue,
        }
    }

    FetchConfig::default()
}

pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

/// Optional override for the Chromium-family browser executable.
///
/// Default behavior is **auto-discovery** (see
/// `browser::config::find_chrome_executable()`). This function only returns
/// a value when `CHROME_EXECUTABLE` is set to an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_port_falls_back_to_default() {
        let cfg = FetchConfig::default();
        std::env::remove_var("FETCHD_PORT");
        std::env::remove_var("PORT");
        assert_eq!(cfg.resolve_port(), 4000);
    }

    #[test]
    fn resolve_port_prefers_json_field() {
        let cfg = FetchConfig {
            port: Some(9001),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_port(), 9001);
    }

    #[test]
    fn resolve_ready_state_target_default_is_complete() {
        std::env::remove_var("FETCHD_READY_STATE_TARGET");
        let cfg = FetchConfig::default();
        assert_eq!(cfg.resolve_ready_state_target(), "complete");
    }
}
