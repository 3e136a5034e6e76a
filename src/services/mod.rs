//! Domain services: cart store, coupon engine, checkout orchestrator and
//! payment intent generation.

pub mod carts;
pub mod checkout;
pub mod coupons;
pub mod payments;
pub mod vietqr;

use crate::errors::ServiceError;
use uuid::Uuid;

/// Identity a cart or coupon redemption is scoped to: an authenticated
/// user or an anonymous session, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemerKey {
    User(Uuid),
    Session(String),
}

impl RedeemerKey {
    /// Builds a key from optional request fields, enforcing that exactly
    /// one identifier is supplied.
    pub fn try_from_parts(
        user_id: Option<Uuid>,
        session_id: Option<String>,
    ) -> Result<Self, ServiceError> {
        match (user_id, session_id) {
            (Some(uid), None) => Ok(RedeemerKey::User(uid)),
            (None, Some(sid)) if !sid.trim().is_empty() => Ok(RedeemerKey::Session(sid)),
            (None, Some(_)) => Err(ServiceError::ValidationError(
                "session_id must not be empty".to_string(),
            )),
            (Some(_), Some(_)) => Err(ServiceError::ValidationError(
                "provide either user_id or session_id, not both".to_string(),
            )),
            (None, None) => Err(ServiceError::ValidationError(
                "either user_id or session_id is required".to_string(),
            )),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            RedeemerKey::User(uid) => Some(*uid),
            RedeemerKey::Session(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            RedeemerKey::User(_) => None,
            RedeemerKey::Session(sid) => Some(sid),
        }
    }

    /// Opaque string form persisted on `coupon_usages.redeemer_key`.
    pub fn as_key(&self) -> String {
        match self {
            RedeemerKey::User(uid) => format!("user:{}", uid),
            RedeemerKey::Session(sid) => format!("session:{}", sid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_identifier_is_required() {
        let uid = Uuid::new_v4();
        assert!(RedeemerKey::try_from_parts(Some(uid), None).is_ok());
        assert!(RedeemerKey::try_from_parts(None, Some("s1".into())).is_ok());
        assert!(RedeemerKey::try_from_parts(None, None).is_err());
        assert!(RedeemerKey::try_from_parts(Some(uid), Some("s1".into())).is_err());
        assert!(RedeemerKey::try_from_parts(None, Some("  ".into())).is_err());
    }

    #[test]
    fn key_forms_are_disjoint() {
        let uid = Uuid::new_v4();
        let user = RedeemerKey::User(uid);
        let session = RedeemerKey::Session(uid.to_string());
        assert_ne!(user.as_key(), session.as_key());
        assert!(user.as_key().starts_with("user:"));
        assert!(session.as_key().starts_with("session:"));
    }
}
