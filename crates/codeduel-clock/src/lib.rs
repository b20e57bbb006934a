//! Monotonic match clock and timing configuration for Codeduel.
//!
//! Every session owns one [`MatchClock`]. The clock is fixed the moment the
//! session is created: its scheduled start is `now + join_buffer` and it is
//! never re-baselined. Both participants' countdown and elapsed displays are
//! computed from that single instant, so they agree no matter when each one
//! actually joined.
//!
//! Two time sources are involved and they are not mixed:
//!
//! - [`tokio::time::Instant`] drives every deadline and elapsed computation.
//!   It is monotonic and is what `start_paused` tests control.
//! - Wall-clock Unix milliseconds are captured exactly once, at creation,
//!   so the scheduled start can be sent to browsers as an absolute time.
//!
//! # Reading the clock
//!
//! ```
//! use std::time::Duration;
//! use codeduel_clock::ClockReading;
//! use tokio::time::Instant;
//!
//! let start = Instant::now() + Duration::from_secs(5);
//! let reading = ClockReading::at(start, start - Duration::from_millis(4200));
//! assert_eq!(reading.to_string(), "Starting in 5s");
//!
//! let reading = ClockReading::at(start, start + Duration::from_secs(83));
//! assert_eq!(reading.to_string(), "01:23");
//! ```

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timer settings shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Delay between pairing and the authoritative start. Also the deadline
    /// for both `match:join` acknowledgements.
    pub join_buffer: Duration,
    /// How long an active participant may be disconnected before the
    /// session is abandoned.
    pub reconnect_grace: Duration,
    /// Length of the match measured from the scheduled start.
    pub match_duration: Duration,
    /// How long a completed session stays live for late `match:join`
    /// snapshots before it is archived.
    pub completed_retention: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            join_buffer: Duration::from_secs(5),
            reconnect_grace: Duration::from_secs(30),
            match_duration: Duration::from_secs(30 * 60),
            completed_retention: Duration::from_secs(60),
        }
    }
}

impl TimingConfig {
    pub const MIN_JOIN_BUFFER: Duration = Duration::from_secs(1);
    pub const MAX_JOIN_BUFFER: Duration = Duration::from_secs(60);
    pub const MIN_RECONNECT_GRACE: Duration = Duration::from_secs(1);
    pub const MAX_RECONNECT_GRACE: Duration = Duration::from_secs(10 * 60);
    pub const MIN_MATCH_DURATION: Duration = Duration::from_secs(60);
    pub const MAX_MATCH_DURATION: Duration = Duration::from_secs(4 * 60 * 60);
    pub const MIN_COMPLETED_RETENTION: Duration = Duration::from_secs(1);
    pub const MAX_COMPLETED_RETENTION: Duration = Duration::from_secs(60 * 60);

    /// Clamp every field into its supported range.
    ///
    /// A zero duration would fire its timer immediately and an oversized
    /// one would pin a session in memory, so both are pulled back to the
    /// nearest bound with a warning.
    pub fn validated(mut self) -> Self {
        self.join_buffer = clamp_field(
            "join_buffer",
            self.join_buffer,
            Self::MIN_JOIN_BUFFER,
            Self::MAX_JOIN_BUFFER,
        );
        self.reconnect_grace = clamp_field(
            "reconnect_grace",
            self.reconnect_grace,
            Self::MIN_RECONNECT_GRACE,
            Self::MAX_RECONNECT_GRACE,
        );
        self.match_duration = clamp_field(
            "match_duration",
            self.match_duration,
            Self::MIN_MATCH_DURATION,
            Self::MAX_MATCH_DURATION,
        );
        self.completed_retention = clamp_field(
            "completed_retention",
            self.completed_retention,
            Self::MIN_COMPLETED_RETENTION,
            Self::MAX_COMPLETED_RETENTION,
        );
        self
    }
}

fn clamp_field(name: &'static str, value: Duration, min: Duration, max: Duration) -> Duration {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(
            field = name,
            requested_ms = value.as_millis() as u64,
            clamped_ms = clamped.as_millis() as u64,
            "timing value out of range, clamping"
        );
    }
    clamped
}

// ---------------------------------------------------------------------------
// Clock reading
// ---------------------------------------------------------------------------

/// Where a session's clock stands relative to its scheduled start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockReading {
    /// The scheduled start is still ahead by this much.
    StartingIn(Duration),
    /// The match has been running for this long.
    Elapsed(Duration),
}

impl ClockReading {
    /// Reads a clock whose baseline is `scheduled_start` at instant `now`.
    ///
    /// The scheduled start itself reads as `Elapsed(0)`.
    pub fn at(scheduled_start: Instant, now: Instant) -> Self {
        if now < scheduled_start {
            Self::StartingIn(scheduled_start - now)
        } else {
            Self::Elapsed(now - scheduled_start)
        }
    }

    /// Signed milliseconds since the scheduled start; negative before it.
    pub fn as_millis(&self) -> i64 {
        match *self {
            Self::StartingIn(d) => -(d.as_millis() as i64),
            Self::Elapsed(d) => d.as_millis() as i64,
        }
    }

    pub fn has_started(&self) -> bool {
        matches!(self, Self::Elapsed(_))
    }
}

impl fmt::Display for ClockReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::StartingIn(d) => {
                // Whole seconds, rounded up: 4.2 s left still shows "5s".
                let secs = d.as_millis().div_ceil(1000);
                write!(f, "Starting in {secs}s")
            }
            Self::Elapsed(d) => {
                let secs = d.as_secs();
                write!(f, "{:02}:{:02}", secs / 60, secs % 60)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Match clock
// ---------------------------------------------------------------------------

/// The single time baseline of one session.
#[derive(Debug, Clone, Copy)]
pub struct MatchClock {
    scheduled_start: Instant,
    scheduled_start_unix_ms: u64,
}

impl MatchClock {
    /// Creates a clock whose scheduled start is `join_buffer` from now.
    pub fn schedule(join_buffer: Duration) -> Self {
        let scheduled_start = Instant::now() + join_buffer;
        let scheduled_start_unix_ms = unix_millis().saturating_add(join_buffer.as_millis() as u64);
        debug!(
            buffer_ms = join_buffer.as_millis() as u64,
            scheduled_start_unix_ms, "match clock scheduled"
        );
        Self {
            scheduled_start,
            scheduled_start_unix_ms,
        }
    }

    /// The monotonic instant the match starts.
    pub fn scheduled_start(&self) -> Instant {
        self.scheduled_start
    }

    /// The same instant as Unix milliseconds, for the wire.
    pub fn scheduled_start_unix_ms(&self) -> u64 {
        self.scheduled_start_unix_ms
    }

    /// Reads the clock now.
    pub fn reading(&self) -> ClockReading {
        self.reading_at(Instant::now())
    }

    pub fn reading_at(&self, now: Instant) -> ClockReading {
        ClockReading::at(self.scheduled_start, now)
    }

    /// Time left until the scheduled start, zero once it has passed.
    pub fn starts_in(&self) -> Duration {
        self.scheduled_start
            .saturating_duration_since(Instant::now())
    }

    /// The instant a match of length `duration` ends.
    pub fn deadline(&self, duration: Duration) -> Instant {
        self.scheduled_start + duration
    }
}

/// Current wall-clock time as Unix milliseconds.
///
/// Only used for values sent to clients; nothing in the core compares
/// wall-clock times.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
