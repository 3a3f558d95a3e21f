//! Definitions of constants.

use std::time::Duration;

/// The default time before an unrenewed lease lapses and the job becomes
/// claimable again.
///
/// Five heartbeat ticks: losing a single ping to scheduling jitter must not
/// cost a worker its lease.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(5);

/// The default interval between lease renewals while a job is processing.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// The default pause before a backgrounded consumer claims new work, giving
/// foreground consumers first refusal.
pub const DEFAULT_BACKGROUNDED_CLAIM_DELAY: Duration = Duration::from_millis(500);

/// The buffer size of the new-job wake-up channel.
///
/// Wake-ups are hints, not deliveries: a consumer that misses some while busy
/// re-polls the queue anyway, so lagging this channel is harmless.
pub const NEW_JOB_CHANNEL_CAPACITY: usize = 512;
