//! Hard caps on inputs and per-tenant state. Everything here maps to
//! `EngineError::LimitExceeded` when violated.

use crate::model::Ms;

/// Earliest accepted timestamp (Unix epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest accepted timestamp (2100-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest accepted booking window (366 days).
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_TEXT_LEN: usize = 4096;

pub const MAX_USERS_PER_TENANT: usize = 100_000;
pub const MAX_ITEMS_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_ITEM: usize = 100_000;
pub const MAX_COMMENTS_PER_ITEM: usize = 10_000;

/// Max item ids accepted by one summary query.
pub const MAX_IN_CLAUSE_IDS: usize = 1000;

pub const MAX_PAGE_SIZE: usize = 1000;
pub const DEFAULT_PAGE_SIZE: usize = 50;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 256;
