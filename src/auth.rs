use crate::errors::ServiceError;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

pub const STAFF_ID_HEADER: &str = "x-staff-id";
pub const STAFF_ROLE_HEADER: &str = "x-staff-role";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Practitioner,
    Admin,
    Dev,
}

/// Caller identity for staff endpoints. The upstream auth gateway
/// authenticates the session and forwards identity via trusted headers;
/// this service only reads them.
#[derive(Clone, Copy, Debug)]
pub struct StaffIdentity {
    pub staff_id: Uuid,
    pub role: StaffRole,
}

impl StaffIdentity {
    /// Admin and dev roles may act on any recommendation; practitioners
    /// only on their own.
    pub fn can_act_on(&self, practitioner_id: Uuid) -> bool {
        match self.role {
            StaffRole::Admin | StaffRole::Dev => true,
            StaffRole::Practitioner => self.staff_id == practitioner_id,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for StaffIdentity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let staff_id = parts
            .headers
            .get(STAFF_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing staff identity".into()))?;
        let staff_id = Uuid::parse_str(staff_id)
            .map_err(|_| ServiceError::Unauthorized("malformed staff identity".into()))?;

        let role = parts
            .headers
            .get(STAFF_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing staff role".into()))?;
        let role = role
            .parse::<StaffRole>()
            .map_err(|_| ServiceError::Unauthorized("unknown staff role".into()))?;

        Ok(StaffIdentity { staff_id, role })
    }
}
