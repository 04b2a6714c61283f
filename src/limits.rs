//! Hard caps on tenant-supplied sizes.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;
pub const MAX_RESOURCES_PER_TENANT: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PARTICIPANTS: usize = 500;
pub const MAX_PARTICIPANT_FIELD_LEN: usize = 256;
/// Active bookings on one resource for one date.
pub const MAX_BOOKINGS_PER_DAY: usize = 1440;
