//! Shared constants for end-to-end tests

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the server to answer /health
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Poll interval while waiting for the server
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Per-request timeout of the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum time to wait for a job to settle
pub const JOB_SETTLE_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Job settings used by test servers
// ============================================================================

/// Simulated processing time of the canned processor
pub const TEST_PROCESSING_DELAY_MS: u64 = 50;

/// Upload limit of test servers
pub const TEST_MAX_UPLOAD_BYTES: u64 = 64 * 1024;

// ============================================================================
// Upload fixtures
// ============================================================================

/// Ten bytes carrying a JPEG signature
pub const FAKE_JPEG: [u8; 10] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];

/// PNG signature
pub const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
