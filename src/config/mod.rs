use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use crate::error::{FsError, Result};
use crate::tree::NodeKind;

pub const DEFAULT_CACHE_MB: u64 = 50;
pub const DEFAULT_CACHE_TIMEOUT_MINUTES: f64 = 30.0;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime knobs for a mounted portal.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Byte capacity of the content cache.
    pub cache_capacity: u64,
    /// How long directory listings and cached file contents stay valid.
    pub cache_ttl: Duration,
    /// Upper bound for every outbound request.
    pub request_timeout: Duration,
    pub foreground: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_MB * 1024 * 1024,
            cache_ttl: minutes(DEFAULT_CACHE_TIMEOUT_MINUTES),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            foreground: false,
        }
    }
}

impl MountConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cache_megabytes(mut self, megabytes: u64) -> Self {
        self.cache_capacity = megabytes.saturating_mul(1024 * 1024);
        self
    }

    #[must_use]
    pub fn with_cache_timeout_minutes(mut self, minutes_value: f64) -> Self {
        self.cache_ttl = minutes(minutes_value);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_foreground(mut self, foreground: bool) -> Self {
        self.foreground = foreground;
        self
    }
}

fn minutes(value: f64) -> Duration {
    Duration::try_from_secs_f64(value * 60.0).unwrap_or(Duration::ZERO)
}

/// One locator pattern of the classification table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RuleConfig {
    pub pattern: String,
    pub kind: NodeKind,
}

/// Endpoints and page conventions of one portal installation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Base URL relative hrefs are resolved against. Must end with `/`.
    pub base_url: String,
    /// Locator of the dashboard, the root of the tree.
    pub dashboard_url: String,
    /// Entry point of the federated login.
    pub login_url: String,
    /// Form fields posted to `login_url`.
    pub login_form: BTreeMap<String, String>,
    /// Identity provider origin, prefixed to the relative passcode form action.
    pub idp_url: String,
    /// Where the identity assertion is posted back to.
    pub assertion_url: String,
    pub rules: Vec<RuleConfig>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        let base_url = "https://ilias.studium.kit.edu/".to_string();
        let mut login_form = BTreeMap::new();
        login_form.insert("sendLogin".to_string(), "1".to_string());
        login_form.insert(
            "idp_selection".to_string(),
            "https://idp.scc.kit.edu/idp/shibboleth".to_string(),
        );
        login_form.insert(
            "target".to_string(),
            format!("{}shib_login.php?target=", base_url),
        );
        login_form.insert(
            "home_organization_selection".to_string(),
            "Mit KIT-Account anmelden".to_string(),
        );

        Self {
            dashboard_url: format!(
                "{}ilias.php?baseClass=ilPersonalDesktopGUI&cmd=jumpToSelectedItems",
                base_url
            ),
            login_url: format!("{}Shibboleth.sso/Login", base_url),
            login_form,
            idp_url: "https://idp.scc.kit.edu".to_string(),
            assertion_url: format!("{}Shibboleth.sso/SAML2/POST", base_url),
            rules: vec![
                RuleConfig {
                    pattern: r"^ilias\.php\?.*cmdClass=ilrepositorygui".to_string(),
                    kind: NodeKind::Course,
                },
                RuleConfig {
                    pattern: r"^ilias\.php\?.*cmd=view".to_string(),
                    kind: NodeKind::Folder,
                },
                RuleConfig {
                    pattern: format!(
                        r"^{}goto\.php\?.*target=file_[0-9]*_download",
                        regex::escape(&base_url)
                    ),
                    kind: NodeKind::File,
                },
            ],
            base_url,
        }
    }
}

impl PortalConfig {
    /// Loads a portal profile from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PortalConfig = serde_json::from_str(&text)
            .map_err(|e| FsError::Config(format!("{}: {}", path.display(), e)))?;
        if !config.base_url.ends_with('/') {
            return Err(FsError::Config(format!(
                "base_url must end with '/': {}",
                config.base_url
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mount_defaults() {
        let config = MountConfig::default();
        assert_eq!(config.cache_capacity, 50 * 1024 * 1024);
        assert_eq!(config.cache_ttl, Duration::from_secs(30 * 60));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(!config.foreground);
    }

    #[test]
    fn test_mount_builder() {
        let config = MountConfig::new()
            .with_cache_megabytes(2)
            .with_cache_timeout_minutes(0.5)
            .with_foreground(true);
        assert_eq!(config.cache_capacity, 2 * 1024 * 1024);
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert!(config.foreground);
    }

    #[test]
    fn test_negative_timeout_is_zero() {
        let config = MountConfig::new().with_cache_timeout_minutes(-1.0);
        assert_eq!(config.cache_ttl, Duration::ZERO);
    }

    #[test]
    fn test_portal_default_rules_order() {
        let portal = PortalConfig::default();
        let kinds: Vec<NodeKind> = portal.rules.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![NodeKind::Course, NodeKind::Folder, NodeKind::File]);
        assert!(portal.dashboard_url.starts_with(&portal.base_url));
    }

    #[test]
    fn test_portal_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"base_url": "https://lms.example.org/", "idp_url": "https://idp.example.org"}}"#
        )
        .unwrap();

        let portal = PortalConfig::from_file(file.path()).unwrap();
        assert_eq!(portal.base_url, "https://lms.example.org/");
        assert_eq!(portal.idp_url, "https://idp.example.org");
        assert_eq!(portal.rules.len(), 3);
    }

    #[test]
    fn test_portal_from_file_rejects_bad_base() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"base_url": "https://lms.example.org"}}"#).unwrap();
        assert!(matches!(
            PortalConfig::from_file(file.path()),
            Err(FsError::Config(_))
        ));
    }

    #[test]
    fn test_portal_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            PortalConfig::from_file(file.path()),
            Err(FsError::Config(_))
        ));
    }
}
