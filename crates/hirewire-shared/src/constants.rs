/// Display name used when a partner exists in neither user collection
pub const UNKNOWN_USER_NAME: &str = "Unknown User";

/// Maximum message body size in bytes (16 KiB, after trimming)
pub const MAX_MESSAGE_BODY: usize = 16 * 1024;

/// Maximum inbound live-transport frame size in bytes (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5001;

/// Outbound events buffered per live connection before it counts as stale
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Seconds without any inbound frame before a live connection is dropped
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Seconds between server pings on a live connection
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 25;

/// Upper bound on a single persistence call, in milliseconds
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Origins allowed by default (local frontend dev servers)
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:5173",
    "http://localhost:5174",
    "http://localhost:5175",
    "http://localhost:3000",
];
