//! Protocol constants and system defaults

/// First node id assigned to anchors
pub const ANCHOR_ID_BASE: u16 = 0xFF00;

/// First node id assigned to tags
pub const TAG_ID_BASE: u16 = 0x0000;

/// Default serial baud rate of the ranging bridge
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Read timeout of the background serial reader (milliseconds)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// How long a single command waits for its response (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 100;

/// Number of (x, y) points kept per tag trajectory
pub const DEFAULT_PATH_HISTORY_LIMIT: usize = 100;

/// Bidirectional ranging attempts per anchor pair during calibration
pub const DEFAULT_CALIBRATION_ATTEMPTS: usize = 10;

/// A tag with no fix for this long is reported as not visible (milliseconds)
pub const DEFAULT_STALE_AFTER_MS: u64 = 2000;

/// Queued events above this count trigger a warning
pub const DEFAULT_QUEUE_HIGH_WATER_MARK: usize = 256;

/// Minimum anchors for a known-height fix
pub const MIN_ANCHORS_KNOWN_HEIGHT: usize = 3;

/// Minimum anchors for an unconstrained 3D fix
pub const MIN_ANCHORS_3D: usize = 4;
