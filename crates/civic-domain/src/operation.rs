//! # Data Operation Contract
//!
//! Erases entity identity behind a uniform capability set. The engine's
//! write path, read path, and sync workers only ever see this trait;
//! every domain entity kind provides one concrete operation that
//! hard-codes its type tag and target collection.

use std::time::Duration;

use crate::registry::WRITE_BUFFER_TTL;
use crate::{
    BetaGroup, CfLookup, Citizen, MaintenanceRequest, OptInEvent, PhoneMapping,
    PhoneVerification, SelfDeclared, UserConfig,
};

/// A single staged write against one entity.
///
/// The payload is a full snapshot of the entity; the engine does not
/// reason about field-level diffs.
pub trait DataOperation: Send + Sync {
    /// Short ASCII tag naming the entity kind.
    fn entity_type(&self) -> &'static str;

    /// Natural key value, unique within the entity type.
    fn key(&self) -> &str;

    /// Target collection in the document store.
    fn collection(&self) -> &'static str;

    /// Full snapshot of the entity as a JSON document.
    fn payload(&self) -> Result<serde_json::Value, serde_json::Error>;

    /// Write-buffer time-to-live hint.
    fn ttl(&self) -> Duration {
        WRITE_BUFFER_TTL
    }
}

macro_rules! entity_write_op {
    ($(#[$doc:meta])* $name:ident, $record:ty, $tag:literal, $collection:literal, |$r:ident| $key:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub record: $record,
        }

        impl $name {
            pub fn new(record: $record) -> Self {
                Self { record }
            }
        }

        impl DataOperation for $name {
            fn entity_type(&self) -> &'static str {
                $tag
            }

            fn key(&self) -> &str {
                let $r = &self.record;
                $key
            }

            fn collection(&self) -> &'static str {
                $collection
            }

            fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
                serde_json::to_value(&self.record)
            }
        }
    };
}

entity_write_op!(
    /// Stage a citizen record write, keyed by CPF.
    CitizenWrite, Citizen, "citizen", "citizens", |r| &r.cpf
);

entity_write_op!(
    /// Stage a phone-to-CPF mapping write, keyed by phone number.
    PhoneMappingWrite, PhoneMapping, "phone_mapping", "phone_cpf_mappings", |r| &r.phone_number
);

entity_write_op!(
    /// Stage a user configuration write.
    UserConfigWrite, UserConfig, "user_config", "user_configs", |r| &r.cpf
);

entity_write_op!(
    /// Stage a phone verification document write.
    PhoneVerificationWrite, PhoneVerification, "phone_verification", "phone_verifications",
    |r| &r.phone_number
);

entity_write_op!(
    /// Stage a family-clinic lookup result write.
    CfLookupWrite, CfLookup, "cf_lookup", "cf_lookups", |r| &r.cpf
);

/// Stage an opt-in/out audit event, keyed by its generated id.
#[derive(Debug, Clone)]
pub struct OptInEventWrite {
    key: String,
    pub record: OptInEvent,
}

impl OptInEventWrite {
    pub fn new(record: OptInEvent) -> Self {
        Self {
            key: record.id.to_string(),
            record,
        }
    }
}

impl DataOperation for OptInEventWrite {
    fn entity_type(&self) -> &'static str {
        "opt_in_history"
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn collection(&self) -> &'static str {
        "opt_in_histories"
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.record)
    }
}

/// Stage a beta group roster write, keyed by group id.
#[derive(Debug, Clone)]
pub struct BetaGroupWrite {
    key: String,
    pub record: BetaGroup,
}

impl BetaGroupWrite {
    pub fn new(record: BetaGroup) -> Self {
        Self {
            key: record.id.to_string(),
            record,
        }
    }
}

impl DataOperation for BetaGroupWrite {
    fn entity_type(&self) -> &'static str {
        "beta_group"
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn collection(&self) -> &'static str {
        "beta_groups"
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.record)
    }
}

/// Stage a maintenance request write, keyed by request id.
#[derive(Debug, Clone)]
pub struct MaintenanceRequestWrite {
    key: String,
    pub record: MaintenanceRequest,
}

impl MaintenanceRequestWrite {
    pub fn new(record: MaintenanceRequest) -> Self {
        Self {
            key: record.id.to_string(),
            record,
        }
    }
}

impl DataOperation for MaintenanceRequestWrite {
    fn entity_type(&self) -> &'static str {
        "maintenance_request"
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn collection(&self) -> &'static str {
        "maintenance_requests"
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.record)
    }
}

/// Stage a self-declared attribute write.
///
/// The type tag comes from the record's kind, so each attribute gets
/// its own sync queue while all of them land in the shared
/// `self_declared` collection keyed by CPF.
#[derive(Debug, Clone)]
pub struct SelfDeclaredWrite {
    pub record: SelfDeclared,
}

impl SelfDeclaredWrite {
    pub fn new(record: SelfDeclared) -> Self {
        Self { record }
    }
}

impl DataOperation for SelfDeclaredWrite {
    fn entity_type(&self) -> &'static str {
        self.record.kind.type_tag()
    }

    fn key(&self) -> &str {
        &self.record.cpf
    }

    fn collection(&self) -> &'static str {
        "self_declared"
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.record)
    }
}
