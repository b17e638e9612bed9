// Crawl parameters and their defaults

use crate::error::ParamError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlParams {
    pub background_js_timeout: i64,
    pub page_timeout: i64,
    pub processing_timeout: i64,
    pub single_js_timeout: i64,
    pub add_referrer_cookie: bool,
    pub add_referrer: bool,
    pub save_js_context: bool,
    pub save_cookies: bool,
    pub save_html: bool,
    pub save_failed: bool,
    pub save_images: bool,
    pub save_multimedia: bool,
    pub save_objects: bool,
    pub save_others: bool,
    pub save_multiple: bool,
    pub redirect_depth_limit: usize,
    pub redirect_total_limit: usize,
    pub link_limit: usize,
    pub link_click_policy: bool,
    pub js_recursion_limit: i32,
    pub js_enable: bool,
    pub profile: String,
}

impl Default for CrawlParams {
    fn default() -> Self {
        Self {
            background_js_timeout: 10_000,
            page_timeout: 30_000,
            processing_timeout: 90_000,
            single_js_timeout: 3_000,
            add_referrer_cookie: true,
            add_referrer: true,
            save_js_context: true,
            save_cookies: true,
            save_html: true,
            save_failed: true,
            save_images: false,
            save_multimedia: false,
            save_objects: false,
            save_others: false,
            save_multiple: false,
            redirect_depth_limit: 10,
            redirect_total_limit: 50,
            link_limit: 100,
            link_click_policy: true,
            js_recursion_limit: 80,
            js_enable: true,
            profile: "Firefox 3.6".to_string(),
        }
    }
}

impl CrawlParams {
    /// Builds parameters from `key=value` style pairs, starting from the defaults.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ParamError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            params.set(key.as_ref().trim(), value.as_ref().trim())?;
        }
        Ok(params)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ParamError> {
        match key {
            "background_js_timeout" => self.background_js_timeout = parse_int(key, value)?,
            "page_timeout" => self.page_timeout = parse_int(key, value)?,
            "processing_timeout" => self.processing_timeout = parse_int(key, value)?,
            "single_js_timeout" => self.single_js_timeout = parse_int(key, value)?,
            "add_referrer_cookie" => self.add_referrer_cookie = parse_bool(key, value)?,
            "add_referrer" => self.add_referrer = parse_bool(key, value)?,
            "save_js_context" => self.save_js_context = parse_bool(key, value)?,
            "save_cookies" => self.save_cookies = parse_bool(key, value)?,
            "save_html" => self.save_html = parse_bool(key, value)?,
            "save_failed" => self.save_failed = parse_bool(key, value)?,
            "save_images" => self.save_images = parse_bool(key, value)?,
            "save_multimedia" => self.save_multimedia = parse_bool(key, value)?,
            "save_objects" => self.save_objects = parse_bool(key, value)?,
            "save_others" => self.save_others = parse_bool(key, value)?,
            "save_multiple" => self.save_multiple = parse_bool(key, value)?,
            "redirect_depth_limit" => self.redirect_depth_limit = parse_count(key, value)?,
            "redirect_total_limit" => self.redirect_total_limit = parse_count(key, value)?,
            "link_limit" => self.link_limit = parse_count(key, value)?,
            "link_click_policy" => self.link_click_policy = parse_bool(key, value)?,
            "js_recursion_limit" => {
                self.js_recursion_limit =
                    value.parse().map_err(|_| ParamError::InvalidInt {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?
            }
            "js_enable" => self.js_enable = parse_bool(key, value)?,
            "profile" => self.profile = value.to_string(),
            _ => debug!("Ignoring unknown parameter: {}", key),
        }
        Ok(())
    }

    pub fn page_timeout(&self) -> Option<Duration> {
        positive_millis(self.page_timeout)
    }

    pub fn processing_timeout(&self) -> Option<Duration> {
        positive_millis(self.processing_timeout)
    }

    pub fn background_js_timeout(&self) -> Duration {
        positive_millis(self.background_js_timeout).unwrap_or_default()
    }

    pub fn single_js_timeout(&self) -> Option<Duration> {
        positive_millis(self.single_js_timeout)
    }

    /// Maximum tree height: the root plus `redirect_depth_limit` levels.
    pub fn tree_height_limit(&self) -> usize {
        self.redirect_depth_limit.saturating_add(1)
    }

    /// Maximum node count, root included.
    pub fn tree_size_limit(&self) -> usize {
        self.redirect_total_limit.saturating_add(1)
    }
}

fn positive_millis(millis: i64) -> Option<Duration> {
    u64::try_from(millis)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ParamError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "follow" => Ok(true),
        "false" | "0" | "no" | "ignore" => Ok(false),
        _ => Err(ParamError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64, ParamError> {
    value.parse().map_err(|_| ParamError::InvalidInt {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_count(key: &str, value: &str) -> Result<usize, ParamError> {
    value.parse().map_err(|_| ParamError::InvalidInt {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = CrawlParams::default();
        assert_eq!(params.page_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(params.processing_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(params.redirect_depth_limit, 10);
        assert_eq!(params.link_limit, 100);
        assert!(params.link_click_policy);
        assert!(!params.save_images);
        assert_eq!(params.profile, "Firefox 3.6");
    }

    #[test]
    fn test_from_pairs_overrides() {
        let params = CrawlParams::from_pairs([
            ("link_limit", "3"),
            ("save_images", "true"),
            ("js_recursion_limit", "-1"),
            ("profile", "Chrome"),
        ])
        .unwrap();

        assert_eq!(params.link_limit, 3);
        assert!(params.save_images);
        assert_eq!(params.js_recursion_limit, -1);
        assert_eq!(params.profile, "Chrome");
    }

    #[test]
    fn test_from_pairs_ignores_unknown_keys() {
        let params = CrawlParams::from_pairs([("no_such_option", "whatever")]).unwrap();
        assert_eq!(params, CrawlParams::default());
    }

    #[test]
    fn test_from_pairs_rejects_bad_values() {
        let err = CrawlParams::from_pairs([("save_html", "maybe")]).unwrap_err();
        assert!(matches!(err, ParamError::InvalidBool { .. }));

        let err = CrawlParams::from_pairs([("link_limit", "-4")]).unwrap_err();
        assert!(matches!(err, ParamError::InvalidInt { .. }));
    }

    #[test]
    fn test_non_positive_timeouts_mean_no_limit() {
        let params =
            CrawlParams::from_pairs([("page_timeout", "0"), ("processing_timeout", "-5")]).unwrap();
        assert_eq!(params.page_timeout(), None);
        assert_eq!(params.processing_timeout(), None);
    }

    #[test]
    fn test_tree_limits() {
        let params = CrawlParams::from_pairs([
            ("redirect_depth_limit", "0"),
            ("redirect_total_limit", "4"),
        ])
        .unwrap();
        assert_eq!(params.tree_height_limit(), 1);
        assert_eq!(params.tree_size_limit(), 5);
    }

    #[test]
    fn test_tree_limits_saturate() {
        let params = CrawlParams::from_pairs([
            ("redirect_depth_limit", usize::MAX.to_string()),
            ("redirect_total_limit", usize::MAX.to_string()),
        ])
        .unwrap();
        assert_eq!(params.tree_height_limit(), usize::MAX);
        assert_eq!(params.tree_size_limit(), usize::MAX);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let params: CrawlParams = serde_json::from_str(r#"{"save_multiple": true}"#).unwrap();
        assert!(params.save_multiple);
        assert_eq!(params.page_timeout, 30_000);
    }
}
