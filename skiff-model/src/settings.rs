use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// One row of the string-keyed settings store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

/// Typed snapshot of the settings table. Unknown keys are ignored,
/// unparsable values fall back to the default for that key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub trash_retention_days: i64,
    pub default_storage_quota: i64,
    pub max_file_size: i64,
    pub session_timeout_hours: i64,
    pub rate_limit_rps: i64,
    pub bruteforce_max_attempts: i64,
    pub bruteforce_window_minutes: i64,
    pub bruteforce_lock_minutes: i64,
    pub bruteforce_ip_max_attempts: i64,
    pub bruteforce_ip_lock_minutes: i64,
    pub bruteforce_enabled: bool,
    pub security_headers_enabled: bool,
    pub hsts_enabled: bool,
    pub csp_enabled: bool,
    pub x_frame_options: String,
    /// How long a finished web upload suppresses SMB attribution of the
    /// resulting filesystem event. Too short and web uploads show up twice
    /// (once as web, once as SMB); too long and a genuine SMB write to the
    /// same path right after an upload goes unattributed.
    pub web_origin_tag_seconds: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trash_retention_days: 30,
            default_storage_quota: 10_737_418_240,
            max_file_size: 10_737_418_240,
            session_timeout_hours: 24,
            rate_limit_rps: 100,
            bruteforce_max_attempts: 5,
            bruteforce_window_minutes: 5,
            bruteforce_lock_minutes: 15,
            bruteforce_ip_max_attempts: 20,
            bruteforce_ip_lock_minutes: 30,
            bruteforce_enabled: true,
            security_headers_enabled: true,
            hsts_enabled: true,
            csp_enabled: true,
            x_frame_options: "SAMEORIGIN".to_string(),
            web_origin_tag_seconds: 10,
        }
    }
}

impl Settings {
    pub fn from_rows(rows: &[SettingRow]) -> Self {
        let map: HashMap<&str, &str> = rows
            .iter()
            .map(|r| (r.key.as_str(), r.value.as_str()))
            .collect();
        let defaults = Settings::default();

        fn int(map: &HashMap<&str, &str>, key: &str, default: i64) -> i64 {
            map.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn boolean(map: &HashMap<&str, &str>, key: &str, default: bool) -> bool {
            map.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        Self {
            trash_retention_days: int(&map, "trash_retention_days", defaults.trash_retention_days),
            default_storage_quota: int(
                &map,
                "default_storage_quota",
                defaults.default_storage_quota,
            ),
            max_file_size: int(&map, "max_file_size", defaults.max_file_size),
            session_timeout_hours: int(
                &map,
                "session_timeout_hours",
                defaults.session_timeout_hours,
            ),
            rate_limit_rps: int(&map, "rate_limit_rps", defaults.rate_limit_rps),
            bruteforce_max_attempts: int(
                &map,
                "bruteforce_max_attempts",
                defaults.bruteforce_max_attempts,
            ),
            bruteforce_window_minutes: int(
                &map,
                "bruteforce_window_minutes",
                defaults.bruteforce_window_minutes,
            ),
            bruteforce_lock_minutes: int(
                &map,
                "bruteforce_lock_minutes",
                defaults.bruteforce_lock_minutes,
            ),
            bruteforce_ip_max_attempts: int(
                &map,
                "bruteforce_ip_max_attempts",
                defaults.bruteforce_ip_max_attempts,
            ),
            bruteforce_ip_lock_minutes: int(
                &map,
                "bruteforce_ip_lock_minutes",
                defaults.bruteforce_ip_lock_minutes,
            ),
            bruteforce_enabled: boolean(&map, "bruteforce_enabled", defaults.bruteforce_enabled),
            security_headers_enabled: boolean(
                &map,
                "security_headers_enabled",
                defaults.security_headers_enabled,
            ),
            hsts_enabled: boolean(&map, "hsts_enabled", defaults.hsts_enabled),
            csp_enabled: boolean(&map, "csp_enabled", defaults.csp_enabled),
            x_frame_options: map
                .get("x_frame_options")
                .map(|v| v.to_string())
                .unwrap_or(defaults.x_frame_options),
            web_origin_tag_seconds: int(
                &map,
                "web_origin_tag_seconds",
                defaults.web_origin_tag_seconds,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: &str) -> SettingRow {
        SettingRow {
            key: key.to_string(),
            value: value.to_string(),
            description: None,
            updated_by: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn defaults_fill_missing_and_bad_values() {
        let rows = vec![
            row("trash_retention_days", "7"),
            row("bruteforce_enabled", "false"),
            row("max_file_size", "not-a-number"),
        ];
        let settings = Settings::from_rows(&rows);
        assert_eq!(settings.trash_retention_days, 7);
        assert!(!settings.bruteforce_enabled);
        assert_eq!(settings.max_file_size, Settings::default().max_file_size);
        assert_eq!(settings.web_origin_tag_seconds, 10);
    }
}
