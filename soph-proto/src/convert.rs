//! Mappings between entity records and wire messages.

use chrono::{DateTime, TimeZone, Utc};
use soph_data::{Check, Profile, User};

use crate::v1;

/// UTC instant → well-known timestamp message.
pub fn to_timestamp(dt: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

/// Well-known timestamp message → UTC instant. Out-of-range values clamp
/// to the epoch rather than failing the whole message.
pub fn from_timestamp(ts: &prost_types::Timestamp) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.seconds, ts.nanos.max(0) as u32)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"))
}

impl From<&User> for v1::GetUserResponse {
    fn from(user: &User) -> Self {
        v1::GetUserResponse {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            default_profile: user.default_profile.map(|id| id.to_string()),
            created_at: Some(to_timestamp(user.created_at)),
            updated_at: Some(to_timestamp(user.updated_at)),
            deleted_at: user.deleted_at.map(to_timestamp),
        }
    }
}

impl From<&Profile> for v1::GetProfileResponse {
    fn from(profile: &Profile) -> Self {
        v1::GetProfileResponse {
            id: profile.id.to_string(),
            name: profile.name.clone(),
            checks: profile.checks.iter().map(|id| id.to_string()).collect(),
            created_at: Some(to_timestamp(profile.created_at)),
            updated_at: Some(to_timestamp(profile.updated_at)),
        }
    }
}

impl From<&Check> for v1::GetCheckResponse {
    fn from(check: &Check) -> Self {
        v1::GetCheckResponse {
            id: check.id.to_string(),
            name: check.name.clone(),
            profiles: check.profiles.iter().map(|id| id.to_string()).collect(),
            upstream_services: check.upstream_services.clone(),
            created_at: Some(to_timestamp(check.created_at)),
            updated_at: Some(to_timestamp(check.updated_at)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trips() {
        let dt = Utc.timestamp_opt(1_700_000_000, 123_456_789).single().unwrap();
        let ts = to_timestamp(dt);
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 123_456_789);
        assert_eq!(from_timestamp(&ts), dt);
    }
}
