//! Customer request types.
//!
//! A customer request is the server-side record of one checkout: the actions
//! the merchant asked for, how the customer can authorize them, and the grants
//! issued once they did.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ProtocolError;
use crate::action::Action;

/// Declares a string enum that keeps unrecognized wire values.
///
/// Values this crate does not know are preserved in an `Unknown` variant
/// rather than rejected, so one new server value never breaks decoding of a
/// whole snapshot.
macro_rules! open_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// A value not recognized by this version.
            Unknown(String),
        }

        impl $name {
            /// Returns the wire representation.
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Unknown(s) => s,
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                match value {
                    $($wire => Self::$variant,)+
                    other => Self::Unknown(other.to_owned()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s.as_str()))
            }
        }
    };
}

open_enum! {
    /// Status of a customer request as reported by the server.
    pub enum RequestStatus {
        /// Created, waiting for the customer.
        Pending => "PENDING",
        /// The customer acted; the server is still deciding.
        Processing => "PROCESSING",
        /// The customer approved the request.
        Approved => "APPROVED",
        /// The customer declined the request.
        Declined => "DECLINED",
    }
}

open_enum! {
    /// Channel through which the customer interacts with the request.
    pub enum Channel {
        /// Handoff from a mobile application.
        InApp => "IN_APP",
        /// Point of sale.
        InPerson => "IN_PERSON",
        /// Browser checkout.
        Online => "ONLINE",
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::InApp
    }
}

/// URLs the customer can use to authorize a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthFlowTriggers {
    /// PNG QR code for desktop flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_image_url: Option<String>,
    /// SVG QR code for desktop flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_svg_url: Option<String>,
    /// Deep link that opens the wallet app on the current device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_url: Option<String>,
    /// When these URLs stop being valid and must be refreshed (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshes_at: Option<String>,
}

open_enum! {
    /// Status of an issued grant.
    pub enum GrantStatus {
        /// Usable.
        Active => "ACTIVE",
        /// Already charged.
        Consumed => "CONSUMED",
        /// Revoked by the customer.
        Revoked => "REVOKED",
        /// Past its expiry.
        Expired => "EXPIRED",
    }
}

open_enum! {
    /// Lifetime class of a grant.
    pub enum GrantType {
        /// Usable for one charge.
        OneTime => "ONE_TIME",
        /// Usable until revoked.
        Extended => "EXTENDED",
    }
}

/// A permission, issued on approval, to charge the customer for an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Grant identifier used when charging.
    pub id: String,
    /// Customer that approved the grant.
    pub customer_id: String,
    /// The approved action.
    pub action: Action,
    /// Current status.
    pub status: GrantStatus,
    /// Lifetime class.
    #[serde(rename = "type")]
    pub grant_type: GrantType,
    /// Channel the grant was issued through.
    #[serde(default)]
    pub channel: Channel,
    /// Expiry time (RFC 3339), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Public profile of the customer who acted on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    /// Customer identifier.
    pub id: String,
    /// Public handle.
    pub cashtag: String,
}

/// Latest known server-side representation of a customer request.
///
/// # JSON Format
///
/// ```json
/// {
///   "id": "GRR_abc",
///   "status": "PENDING",
///   "actions": [{ "type": "ONE_TIME_PAYMENT", "scope_id": "BRAND_1", "amount": 500, "currency": "USD" }],
///   "auth_flow_triggers": { "mobile_url": "https://cash.app/..." },
///   "redirect_url": "myapp://checkout",
///   "channel": "IN_APP",
///   "grants": []
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    /// Server-assigned request identifier.
    pub id: String,
    /// Current status.
    pub status: RequestStatus,
    /// Requested actions.
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Authorization URLs. Absent once the request is decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_flow_triggers: Option<AuthFlowTriggers>,
    /// Where the wallet app sends the customer back to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Merchant-side reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Request channel.
    #[serde(default)]
    pub channel: Channel,
    /// Grants issued on approval.
    #[serde(default)]
    pub grants: Vec<Grant>,
    /// Creation time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last update time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Expiry time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Customer who acted on the request, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_profile: Option<CustomerProfile>,
}

impl ResponseSnapshot {
    /// Returns `true` when the request is approved and carries at least one grant.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        !self.grants.is_empty() && self.status == RequestStatus::Approved
    }

    /// Returns `true` when the request was declined.
    #[must_use]
    pub fn is_declined(&self) -> bool {
        self.status == RequestStatus::Declined
    }

    /// Returns the deep link used to hand off to the wallet app, if present.
    #[must_use]
    pub fn mobile_url(&self) -> Option<&str> {
        self.auth_flow_triggers
            .as_ref()
            .and_then(|t| t.mobile_url.as_deref())
    }
}

/// Response envelope wrapping a [`ResponseSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// The customer request.
    pub request: ResponseSnapshot,
}

impl RequestEnvelope {
    /// Decodes an envelope from a response body and unwraps the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the body is not a valid envelope.
    pub fn snapshot_from_slice(body: &[u8]) -> Result<ResponseSnapshot, ProtocolError> {
        let envelope: Self = serde_json::from_slice(body)?;
        Ok(envelope.request)
    }
}

/// Parameters of a request to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    /// Actions to request.
    pub actions: Vec<Action>,
    /// Return URL for the wallet app.
    pub redirect_url: String,
    /// Optional merchant-side reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Request channel.
    #[serde(default)]
    pub channel: Channel,
}

/// Parameters of an update to an existing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequestParams {
    /// Actions replacing the current ones.
    pub actions: Vec<Action>,
    /// Optional merchant-side reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

/// Body of `POST /requests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequestBody {
    /// Key deduplicating retried creations.
    pub idempotency_key: String,
    /// The request to create.
    pub request: RequestParams,
}

/// Body of `PATCH /requests/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequestBody {
    /// Key deduplicating retried updates.
    pub idempotency_key: String,
    /// The fields to update.
    pub request: UpdateRequestParams,
}
