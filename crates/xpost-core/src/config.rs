//! Timeout policy for requests.
//!
//! All values are milliseconds. A response timeout of `-1` means no response deadline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{XpostError, XpostResult};

/// Ack deadline for a window that has never been contacted.
pub const ACK_TIMEOUT: u64 = 1500;
/// Ack deadline for a window that already said hello.
pub const ACK_TIMEOUT_KNOWN: u64 = 800;
/// Default response deadline. `-1` leaves responses unbounded.
pub const RES_TIMEOUT: i64 = -1;
/// How long to wait for a child window's hello before sending into it.
pub const CHILD_WINDOW_TIMEOUT: u64 = 5000;
/// Watchdog tick interval.
pub const RESPONSE_CYCLE_TIME: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout: u64,
    #[serde(default = "default_ack_timeout_known")]
    pub ack_timeout_known: u64,
    #[serde(default = "default_res_timeout")]
    pub res_timeout: i64,
    #[serde(default = "default_child_window_timeout")]
    pub child_window_timeout: u64,
    #[serde(default = "default_response_cycle_time")]
    pub response_cycle_time: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ack_timeout: default_ack_timeout(),
            ack_timeout_known: default_ack_timeout_known(),
            res_timeout: default_res_timeout(),
            child_window_timeout: default_child_window_timeout(),
            response_cycle_time: default_response_cycle_time(),
        }
    }
}

fn default_ack_timeout() -> u64 {
    ACK_TIMEOUT
}
fn default_ack_timeout_known() -> u64 {
    ACK_TIMEOUT_KNOWN
}
fn default_res_timeout() -> i64 {
    RES_TIMEOUT
}
fn default_child_window_timeout() -> u64 {
    CHILD_WINDOW_TIMEOUT
}
fn default_response_cycle_time() -> u64 {
    RESPONSE_CYCLE_TIME
}

impl TimeoutConfig {
    pub fn validate(&self) -> XpostResult<()> {
        if self.response_cycle_time == 0 {
            return Err(XpostError::Config("response_cycle_time must be positive".into()));
        }
        if self.res_timeout < -1 {
            return Err(XpostError::Config(format!(
                "res_timeout must be -1 or a non-negative number of ms, got {}",
                self.res_timeout
            )));
        }
        Ok(())
    }

    /// Ack deadline depending on whether the peer is already known.
    pub fn ack_timeout_for(&self, known: bool) -> u64 {
        if known {
            self.ack_timeout_known
        } else {
            self.ack_timeout
        }
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.response_cycle_time)
    }

    pub fn child_window_timeout(&self) -> Duration {
        Duration::from_millis(self.child_window_timeout)
    }
}

/// Convert a caller-facing response timeout (`-1` = unbounded) into a deadline.
pub fn response_deadline(timeout_ms: i64) -> Option<u64> {
    u64::try_from(timeout_ms).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_windows_get_the_shorter_ack_deadline() {
        let cfg = TimeoutConfig::default();
        assert!(cfg.ack_timeout_for(true) < cfg.ack_timeout_for(false));
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let cfg: TimeoutConfig = serde_json::from_str(r#"{"ack_timeout": 3000}"#).unwrap();
        assert_eq!(cfg.ack_timeout, 3000);
        assert_eq!(cfg.res_timeout, RES_TIMEOUT);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_cycle_is_rejected() {
        let cfg = TimeoutConfig {
            response_cycle_time: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_one_is_unbounded() {
        assert_eq!(response_deadline(-1), None);
        assert_eq!(response_deadline(2000), Some(2000));
    }
}
