//! Control-plane status payload and the snapshot the request path acts on

use hyper::body::Bytes;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Status used for a reverse-proxy response that does not name one
pub const DEFAULT_REVERSE_PROXY_STATUS: u16 = 503;

/// Status response as sent by the control plane.
///
/// Every key is optional; missing keys fall back to the defaults applied in
/// [`StatusSnapshot::interpret`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawStatus {
    #[serde(default)]
    pub switch_url: Option<String>,
    #[serde(default)]
    pub test_mode: Option<bool>,
    #[serde(default)]
    pub is_switched: Option<bool>,
    #[serde(default)]
    pub ip_whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub reverse_proxy: Option<RawReverseProxy>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawReverseProxy {
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Kept loose so an odd status value does not reject the whole payload
    #[serde(default)]
    pub http_status: Option<serde_json::Value>,
    #[serde(default)]
    pub response_body: Option<String>,
    #[serde(default)]
    pub response_headers: Option<BTreeMap<String, String>>,
}

/// Canned response served instead of redirecting
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseProxy {
    pub enabled: bool,
    pub http_status: u16,
    pub response_headers: BTreeMap<String, String>,
    pub response_body: Bytes,
}

/// Config switches that affect how a raw status is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpretOptions {
    pub ignore_test_mode: bool,
    pub disable_reverse_proxy: bool,
}

impl Default for InterpretOptions {
    fn default() -> Self {
        Self {
            ignore_test_mode: true,
            disable_reverse_proxy: false,
        }
    }
}

/// Immutable view of the maintenance state, replaced wholesale on every poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Maintenance mode is active (test-mode suppression already applied)
    pub switched: bool,
    /// Redirect target; empty if the control plane did not send one
    pub switch_url: String,
    /// CIDR ranges exempt from maintenance
    pub ip_allow_list: Vec<String>,
    /// `None` when absent from the payload or disabled by config
    pub reverse_proxy: Option<ReverseProxy>,
}

impl StatusSnapshot {
    /// Build a snapshot from one successfully parsed status response
    pub fn interpret(raw: RawStatus, options: InterpretOptions) -> Self {
        let test_mode = raw.test_mode.unwrap_or(false);
        let is_switched = raw.is_switched.unwrap_or(false);
        let switched = is_switched && !(options.ignore_test_mode && test_mode);

        let reverse_proxy = if options.disable_reverse_proxy {
            None
        } else {
            raw.reverse_proxy.map(|rp| ReverseProxy {
                enabled: rp.enabled.unwrap_or(false),
                http_status: rp
                    .http_status
                    .as_ref()
                    .and_then(parse_http_status)
                    .unwrap_or(DEFAULT_REVERSE_PROXY_STATUS),
                response_headers: rp.response_headers.unwrap_or_default(),
                response_body: Bytes::from(rp.response_body.unwrap_or_default()),
            })
        };

        Self {
            switched,
            switch_url: raw.switch_url.unwrap_or_default(),
            ip_allow_list: raw.ip_whitelist.unwrap_or_default(),
            reverse_proxy,
        }
    }

    /// Copy of this snapshot with maintenance forced off, used after a failed poll
    pub fn fail_open(&self) -> Self {
        Self {
            switched: false,
            ..self.clone()
        }
    }

    /// The reverse-proxy response, if it should be served instead of a redirect
    pub fn active_reverse_proxy(&self) -> Option<&ReverseProxy> {
        self.reverse_proxy.as_ref().filter(|rp| rp.enabled)
    }
}

/// Status code sent as a number or a numeric string; `None` if it does not fit a `u16`
fn parse_http_status(value: &serde_json::Value) -> Option<u16> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawStatus {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let snapshot = StatusSnapshot::interpret(raw("{}"), InterpretOptions::default());

        assert!(!snapshot.switched);
        assert_eq!(snapshot.switch_url, "");
        assert!(snapshot.ip_allow_list.is_empty());
        assert!(snapshot.reverse_proxy.is_none());
    }

    #[test]
    fn test_null_values_use_defaults() {
        let snapshot = StatusSnapshot::interpret(
            raw(r#"{"is_switched": null, "ip_whitelist": null, "test_mode": null}"#),
            InterpretOptions::default(),
        );
        assert!(!snapshot.switched);
        assert!(snapshot.ip_allow_list.is_empty());
    }

    #[test]
    fn test_switched() {
        let snapshot = StatusSnapshot::interpret(
            raw(r#"{"is_switched": true, "switch_url": "http://app/maintenance"}"#),
            InterpretOptions::default(),
        );
        assert!(snapshot.switched);
        assert_eq!(snapshot.switch_url, "http://app/maintenance");
    }

    #[test]
    fn test_test_mode_ignored_by_default() {
        let payload = r#"{"is_switched": true, "test_mode": true}"#;

        let snapshot = StatusSnapshot::interpret(raw(payload), InterpretOptions::default());
        assert!(!snapshot.switched);

        let options = InterpretOptions {
            ignore_test_mode: false,
            ..InterpretOptions::default()
        };
        let snapshot = StatusSnapshot::interpret(raw(payload), options);
        assert!(snapshot.switched);
    }

    #[test]
    fn test_test_mode_without_switch() {
        let snapshot = StatusSnapshot::interpret(
            raw(r#"{"is_switched": false, "test_mode": true}"#),
            InterpretOptions {
                ignore_test_mode: false,
                disable_reverse_proxy: false,
            },
        );
        assert!(!snapshot.switched);
    }

    #[test]
    fn test_reverse_proxy_parsed() {
        let snapshot = StatusSnapshot::interpret(
            raw(
                r#"{
                    "is_switched": true,
                    "reverse_proxy": {
                        "enabled": true,
                        "http_status": 503,
                        "response_body": "<h1>down</h1>",
                        "response_headers": {"X-A": "1"}
                    }
                }"#,
            ),
            InterpretOptions::default(),
        );

        let rp = snapshot.active_reverse_proxy().unwrap();
        assert_eq!(rp.http_status, 503);
        assert_eq!(rp.response_body, Bytes::from_static(b"<h1>down</h1>"));
        assert_eq!(rp.response_headers.get("X-A").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_reverse_proxy_disabled_in_payload() {
        let snapshot = StatusSnapshot::interpret(
            raw(r#"{"reverse_proxy": {"enabled": false, "http_status": 503}}"#),
            InterpretOptions::default(),
        );
        assert!(snapshot.reverse_proxy.is_some());
        assert!(snapshot.active_reverse_proxy().is_none());
    }

    #[test]
    fn test_reverse_proxy_disabled_by_config() {
        let options = InterpretOptions {
            disable_reverse_proxy: true,
            ..InterpretOptions::default()
        };
        let snapshot = StatusSnapshot::interpret(
            raw(r#"{"reverse_proxy": {"enabled": true, "http_status": 503}}"#),
            options,
        );
        assert!(snapshot.reverse_proxy.is_none());
    }

    #[test]
    fn test_reverse_proxy_status_default() {
        let snapshot = StatusSnapshot::interpret(
            raw(r#"{"reverse_proxy": {"enabled": true}}"#),
            InterpretOptions::default(),
        );
        let rp = snapshot.active_reverse_proxy().unwrap();
        assert_eq!(rp.http_status, DEFAULT_REVERSE_PROXY_STATUS);
        assert!(rp.response_body.is_empty());
    }

    #[test]
    fn test_reverse_proxy_odd_status_values() {
        let status_of = |json: &str| {
            let snapshot = StatusSnapshot::interpret(raw(json), InterpretOptions::default());
            snapshot.active_reverse_proxy().unwrap().http_status
        };

        assert_eq!(status_of(r#"{"reverse_proxy": {"enabled": true, "http_status": "418"}}"#), 418);
        assert_eq!(status_of(r#"{"reverse_proxy": {"enabled": true, "http_status": 70000}}"#), 503);
        assert_eq!(status_of(r#"{"reverse_proxy": {"enabled": true, "http_status": -1}}"#), 503);
        assert_eq!(status_of(r#"{"reverse_proxy": {"enabled": true, "http_status": "down"}}"#), 503);
        assert_eq!(status_of(r#"{"reverse_proxy": {"enabled": true, "http_status": 503.5}}"#), 503);
    }

    #[test]
    fn test_out_of_range_status_keeps_maintenance_on() {
        let snapshot = StatusSnapshot::interpret(
            raw(r#"{"is_switched": true, "reverse_proxy": {"enabled": true, "http_status": 70000}}"#),
            InterpretOptions::default(),
        );
        assert!(snapshot.switched);
        assert_eq!(
            snapshot.active_reverse_proxy().unwrap().http_status,
            DEFAULT_REVERSE_PROXY_STATUS
        );
    }

    #[test]
    fn test_fail_open_keeps_other_fields() {
        let snapshot = StatusSnapshot {
            switched: true,
            switch_url: "http://app/maintenance".to_string(),
            ip_allow_list: vec!["10.0.0.0/8".to_string()],
            reverse_proxy: None,
        };

        let failed = snapshot.fail_open();
        assert!(!failed.switched);
        assert_eq!(failed.switch_url, snapshot.switch_url);
        assert_eq!(failed.ip_allow_list, snapshot.ip_allow_list);
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        assert!(serde_json::from_str::<RawStatus>("[1, 2, 3]").is_err());
        assert!(serde_json::from_str::<RawStatus>(r#"{"is_switched": "yes"}"#).is_err());
    }
}
