//! Access-key derivation and the clock it reads.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one access attempt for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessKey(String);

impl AccessKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much of the request goes into the access key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessKeyPolicy {
    /// `route_subject_resource`. One grant per TTL window per triple.
    #[default]
    PerResource,
    /// `route_subject_resource_<RFC3339 ns>`. Requests only collide when they
    /// land on the same clock tick.
    PerInstant,
}

pub fn derive_access_key(
    policy: AccessKeyPolicy,
    route_path: &str,
    subject_id: &str,
    resource_id: &str,
    issued_at: DateTime<Utc>,
) -> AccessKey {
    match policy {
        AccessKeyPolicy::PerResource => {
            AccessKey(format!("{}_{}_{}", route_path, subject_id, resource_id))
        }
        AccessKeyPolicy::PerInstant => AccessKey(format!(
            "{}_{}_{}_{}",
            route_path,
            subject_id,
            resource_id,
            issued_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
        )),
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Mutex::new(at))
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.0.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.0.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }
}
