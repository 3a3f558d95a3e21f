//! Configuration for the job queue and its workers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Configuration for job leasing and worker claiming.
///
/// The lease window and claim ordering are deliberately tunable rather than
/// contractual: deployments with slow primitives want longer leases, and
/// embedders decide how much priority their foreground consumers get.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// How long a claimed job's lease lasts without renewal.
    ///
    /// After this much time without a successful ping, the job becomes
    /// claimable by another worker.
    pub lease_duration: Duration,

    /// How often a worker renews its lease while processing a job.
    pub heartbeat_interval: Duration,

    /// The pause before claiming new work, for consumers that are not the
    /// visible/foreground consumer.
    ///
    /// `None` claims immediately. This is a soft priority, not a guarantee:
    /// a foreground consumer that does not claim within the delay simply
    /// loses first refusal.
    pub backgrounded_claim_delay: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lease_duration: constants::DEFAULT_LEASE_DURATION,
            heartbeat_interval: constants::DEFAULT_HEARTBEAT_INTERVAL,
            backgrounded_claim_delay: None,
        }
    }
}

impl Config {
    /// Returns a config for a backgrounded consumer, with the default claim
    /// delay.
    pub fn backgrounded() -> Self {
        Self {
            backgrounded_claim_delay: Some(constants::DEFAULT_BACKGROUNDED_CLAIM_DELAY),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_serde_round_trip() {
        let config = Config::backgrounded();

        let serialized = serde_json::to_string(&config).expect("config serializes");
        let parsed: Config = serde_json::from_str(&serialized).expect("config parses");

        assert_eq!(parsed.lease_duration, config.lease_duration);
        assert_eq!(parsed.heartbeat_interval, config.heartbeat_interval);
        assert_eq!(
            parsed.backgrounded_claim_delay,
            config.backgrounded_claim_delay
        );
    }

    #[test]
    fn default_lease_outlasts_several_heartbeats() {
        let config = Config::default();

        assert!(config.lease_duration >= 3 * config.heartbeat_interval);
    }
}
