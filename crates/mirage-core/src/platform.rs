//! Process-wide platform state
//!
//! Mode, learning flag, active chaos profile, and the proxy target URL all
//! live behind a single mutex. Everything here is cheap to read; nothing
//! async happens under the lock.

use crate::chaos::ChaosProfile;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Global serving mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformMode {
    /// Forward to the upstream, learning as traffic flows.
    #[default]
    Proxy,
    /// Serve everything synthetically from the learned model.
    Mock,
}

/// Snapshot of the mutable platform state.
#[derive(Debug, Clone)]
pub struct PlatformSnapshot {
    /// Current serving mode.
    pub mode: PlatformMode,
    /// Whether observations feed the learning buffer.
    pub learning_enabled: bool,
    /// Active chaos profile.
    pub active_profile: ChaosProfile,
    /// Upstream base URL, when configured.
    pub target_url: Option<String>,
}

struct PlatformInner {
    mode: PlatformMode,
    learning_enabled: bool,
    active_profile: ChaosProfile,
    target_url: Option<String>,
}

/// The shared platform state handle.
pub struct Platform {
    inner: Mutex<PlatformInner>,
}

impl Platform {
    /// Create platform state with an optional initial target URL.
    pub fn new(target_url: Option<String>) -> Self {
        Self {
            inner: Mutex::new(PlatformInner {
                mode: PlatformMode::Proxy,
                learning_enabled: true,
                active_profile: ChaosProfile::Normal,
                target_url: target_url.map(|u| u.trim_end_matches('/').to_string()),
            }),
        }
    }

    /// Read the whole state at once.
    pub fn snapshot(&self) -> PlatformSnapshot {
        let inner = self.inner.lock();
        PlatformSnapshot {
            mode: inner.mode,
            learning_enabled: inner.learning_enabled,
            active_profile: inner.active_profile,
            target_url: inner.target_url.clone(),
        }
    }

    /// Current serving mode.
    pub fn mode(&self) -> PlatformMode {
        self.inner.lock().mode
    }

    /// Switch serving mode.
    pub fn set_mode(&self, mode: PlatformMode) {
        self.inner.lock().mode = mode;
    }

    /// Whether learning is enabled.
    pub fn learning_enabled(&self) -> bool {
        self.inner.lock().learning_enabled
    }

    /// Toggle learning.
    pub fn set_learning_enabled(&self, enabled: bool) {
        self.inner.lock().learning_enabled = enabled;
    }

    /// The active chaos profile.
    pub fn active_profile(&self) -> ChaosProfile {
        self.inner.lock().active_profile
    }

    /// Select a chaos profile.
    pub fn set_active_profile(&self, profile: ChaosProfile) {
        self.inner.lock().active_profile = profile;
    }

    /// Upstream base URL, when configured.
    pub fn target_url(&self) -> Option<String> {
        self.inner.lock().target_url.clone()
    }

    /// Change the proxy target at runtime. Only absolute `http`/`https` URLs
    /// are accepted; the trailing slash is stripped.
    pub fn set_target_url(&self, raw: &str) -> Result<String> {
        let trimmed = raw.trim().trim_end_matches('/');
        let parsed = url::Url::parse(trimmed)
            .map_err(|_| Error::validation("Invalid URL. Must start with http:// or https://"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::validation(
                "Invalid URL. Must start with http:// or https://",
            ));
        }
        let cleaned = trimmed.to_string();
        self.inner.lock().target_url = Some(cleaned.clone());
        Ok(cleaned)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_proxy_mode_with_learning_on() {
        let platform = Platform::default();
        let snapshot = platform.snapshot();
        assert_eq!(snapshot.mode, PlatformMode::Proxy);
        assert!(snapshot.learning_enabled);
        assert_eq!(snapshot.active_profile, ChaosProfile::Normal);
        assert!(snapshot.target_url.is_none());
    }

    #[test]
    fn target_url_must_be_http_or_https() {
        let platform = Platform::default();
        assert!(platform.set_target_url("ftp://example.com").is_err());
        assert!(platform.set_target_url("not a url").is_err());
        assert!(platform.set_target_url("https://api.example.com").is_ok());
    }

    #[test]
    fn target_url_trailing_slash_is_stripped() {
        let platform = Platform::default();
        platform
            .set_target_url("http://api.example.com/")
            .expect("valid url");
        assert_eq!(
            platform.target_url().as_deref(),
            Some("http://api.example.com")
        );
    }

    #[test]
    fn mode_and_profile_round_trip() {
        let platform = Platform::default();
        platform.set_mode(PlatformMode::Mock);
        platform.set_active_profile(ChaosProfile::ZombieApi);
        platform.set_learning_enabled(false);
        let snapshot = platform.snapshot();
        assert_eq!(snapshot.mode, PlatformMode::Mock);
        assert_eq!(snapshot.active_profile, ChaosProfile::ZombieApi);
        assert!(!snapshot.learning_enabled);
    }
}
