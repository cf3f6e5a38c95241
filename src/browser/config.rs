//! Browser executable discovery and headless launch config.

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use std::path::Path;

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (set this in containers, e.g.
///    `CHROME_EXECUTABLE=/usr/bin/chromium`).
/// 2. PATH scan — finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/local/bin/chromium",
            "/usr/bin/brave-browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Build a `BrowserConfig` for headless operation.
///
/// Flags chosen for compatibility inside containers (no GPU, sandbox
/// optionally disabled) and to keep the browser quiet — no telemetry, crash
/// reporting, or background networking competing with the fetch.
pub fn build_headless_config(
    exe: &str,
    headless: bool,
    disable_sandbox: bool,
    width: u32,
    height: u32,
) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-popup-blocking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-crash-reporter")
        .arg("--disable-breakpad")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio");

    if headless {
        builder = builder.arg("--headless=new");
    } else {
        builder = builder.with_head();
    }

    if disable_sandbox {
        builder = builder.arg("--no-sandbox").arg("--disable-setuid-sandbox");
    }

    builder
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_executable_env_override_requires_existing_path() {
        std::env::set_var("CHROME_EXECUTABLE", "/path/that/does/not/exist/chrome");
        assert!(find_chrome_executable().is_none() || std::env::var("PATH").is_ok());
        std::env::remove_var("CHROME_EXECUTABLE");
    }

    #[test]
    fn build_headless_config_succeeds_for_plausible_executable() {
        let result = build_headless_config("/usr/bin/chromium", true, true, 1280, 900);
        assert!(result.is_ok());
    }
}
