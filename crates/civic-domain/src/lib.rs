//! # Citizen Data Platform - Domain Model
//!
//! Core domain entities, value objects, and enums for the municipal
//! citizen data platform. These types are the single source of truth
//! across all layers: persistence, sync engine, and API surfaces.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod operation;
pub mod registry;

pub use operation::{
    BetaGroupWrite, CfLookupWrite, CitizenWrite, DataOperation, MaintenanceRequestWrite,
    OptInEventWrite, PhoneMappingWrite, PhoneVerificationWrite, SelfDeclaredWrite,
    UserConfigWrite,
};
pub use registry::{EntityDescriptor, EntityRegistry};

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Postal address as composed by the address service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

/// Contact channel preference for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactChannel {
    Whatsapp,
    Sms,
    Email,
}

impl ContactChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "WHATSAPP",
            Self::Sms => "SMS",
            Self::Email => "EMAIL",
        }
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Master citizen record, keyed by CPF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citizen {
    pub cpf: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mother_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub updated_at: DateTime<Utc>,
}

/// Phone number to CPF mapping, keyed by phone number (E.164).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneMapping {
    pub phone_number: String,
    pub cpf: String,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Per-citizen notification configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    pub cpf: String,
    pub opt_in: bool,
    pub preferred_channel: ContactChannel,
    pub updated_at: DateTime<Utc>,
}

/// Opt-in / opt-out action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptInAction {
    OptIn,
    OptOut,
}

/// Audit record of a single opt-in/out action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptInEvent {
    pub id: Uuid,
    pub cpf: String,
    pub action: OptInAction,
    pub channel: ContactChannel,
    pub occurred_at: DateTime<Utc>,
}

/// Beta feature group and its membership roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaGroup {
    pub id: Uuid,
    pub name: String,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One-time phone verification document.
///
/// Consumed atomically by the verification workers: matched on
/// `(phone_number, code)` while unused and unexpired, then flipped
/// to `used` exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneVerification {
    pub phone_number: String,
    pub code: String,
    pub cpf: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Maintenance request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenanceStatus {
    Open,
    InProgress,
    Resolved,
    Cancelled,
}

/// Citizen-filed maintenance request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRequest {
    pub id: Uuid,
    pub cpf: String,
    pub category: String,
    pub description: String,
    pub status: MaintenanceStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kinds of attributes a citizen may self-declare.
///
/// Each kind carries its own entity type tag so the sync engine
/// partitions queues per attribute, while all kinds share the
/// `self_declared` collection keyed by CPF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfDeclaredKind {
    Address,
    Email,
    Phone,
    Race,
    DisplayName,
    Gender,
    Income,
    Education,
    Disability,
}

impl SelfDeclaredKind {
    /// Entity type tag used in cache keys and queue names.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Address => "self_declared_address",
            Self::Email => "self_declared_email",
            Self::Phone => "self_declared_phone",
            Self::Race => "self_declared_race",
            Self::DisplayName => "self_declared_display_name",
            Self::Gender => "self_declared_gender",
            Self::Income => "self_declared_income",
            Self::Education => "self_declared_education",
            Self::Disability => "self_declared_disability",
        }
    }

    pub const ALL: [SelfDeclaredKind; 9] = [
        Self::Address,
        Self::Email,
        Self::Phone,
        Self::Race,
        Self::DisplayName,
        Self::Gender,
        Self::Income,
        Self::Education,
        Self::Disability,
    ];
}

/// A single self-declared attribute snapshot.
///
/// The value shape varies per kind (an address document, a plain
/// string, an enumerated code); it is carried opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfDeclared {
    pub cpf: String,
    pub kind: SelfDeclaredKind,
    pub value: serde_json::Value,
    pub declared_at: DateTime<Utc>,
}

/// Cached result of a family clinic (CF) lookup for a citizen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfLookup {
    pub cpf: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cf_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cf_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_unit: Option<String>,
    pub looked_up_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_channel_as_str() {
        assert_eq!(ContactChannel::Whatsapp.as_str(), "WHATSAPP");
        assert_eq!(ContactChannel::Sms.as_str(), "SMS");
    }

    #[test]
    fn test_self_declared_kind_tags_are_unique() {
        let mut tags: Vec<&str> = SelfDeclaredKind::ALL.iter().map(|k| k.type_tag()).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), SelfDeclaredKind::ALL.len());
    }

    #[test]
    fn test_citizen_serde_round_trip() {
        let citizen = Citizen {
            cpf: "03561350712".to_string(),
            name: "João da Silva".to_string(),
            social_name: None,
            birth_date: None,
            mother_name: Some("Maria da Silva".to_string()),
            email: None,
            phone: Some("+5521988887777".to_string()),
            address: None,
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&citizen).unwrap();
        let decoded: Citizen = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, citizen);
        // Empty optionals are omitted from the wire form
        assert!(!json.contains("social_name"));
    }
}
