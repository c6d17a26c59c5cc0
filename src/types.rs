use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Error returned when a stored or submitted enum label is not recognised.
#[derive(Debug, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct ParseLabelError {
    what: &'static str,
    value: String,
}

/// Generates the text label conversions for enums persisted as TEXT columns.
macro_rules! text_label {
    ($name:ident, $what:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseLabelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(Self::$variant),)+
                    other => Err(ParseLabelError {
                        what: $what,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseLabelError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// The role a user acts under. Every user carries exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Role {
    Customer { customer_id: i64 },
    Business { business_id: i64, business_name: String },
}

impl Role {
    pub fn customer_id(&self) -> Option<i64> {
        match self {
            Role::Customer { customer_id } => Some(*customer_id),
            Role::Business { .. } => None,
        }
    }

    pub fn business_id(&self) -> Option<i64> {
        match self {
            Role::Business { business_id, .. } => Some(*business_id),
            Role::Customer { .. } => None,
        }
    }

    pub fn is_business(&self) -> bool {
        matches!(self, Role::Business { .. })
    }
}

/// A registered user together with its resolved role.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    /// The ID of the user.
    pub id: i64,
    /// The login e-mail.
    pub email: String,
    /// The display name.
    pub full_name: String,
    /// The optional phone number.
    pub phone_number: Option<String>,
    /// The push device token, never exposed over the API.
    #[serde(skip)]
    pub device_token: Option<String>,
    /// The role the user acts under.
    pub role: Role,
    /// The timestamp when the user registered.
    pub created_at: DateTime<Utc>,
}

/// The profile requested at registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NewProfile {
    Customer,
    Business { business_name: String },
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub profile: NewProfile,
}

/// Which side of a relationship a caller stands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Customer,
    Business,
}

/// A customer-business pairing that anchors a running balance and a chat room.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Relationship {
    /// The ID of the relationship.
    pub id: i64,
    /// The customer profile ID.
    pub customer_id: i64,
    /// The business profile ID.
    pub business_id: i64,
    /// Positive when the customer owes the business, negative otherwise.
    pub pending_due: Decimal,
    /// The timestamp when the relationship was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp of the last balance recompute.
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// Returns the side `role` occupies in this relationship, if any.
    pub fn side_of(&self, role: &Role) -> Option<Side> {
        match role {
            Role::Customer { customer_id } if *customer_id == self.customer_id => {
                Some(Side::Customer)
            }
            Role::Business { business_id, .. } if *business_id == self.business_id => {
                Some(Side::Business)
            }
            _ => None,
        }
    }

    pub fn pair(&self) -> PartyPair {
        PartyPair {
            customer_id: self.customer_id,
            business_id: self.business_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartyPair {
    pub customer_id: i64,
    pub business_id: i64,
}

/// Derives the (customer, business) pair of two users. Exactly one of them
/// must be a customer and the other a business.
pub fn resolve_parties(a: &Role, b: &Role) -> Option<PartyPair> {
    match (a, b) {
        (Role::Customer { customer_id }, Role::Business { business_id, .. })
        | (Role::Business { business_id, .. }, Role::Customer { customer_id }) => {
            Some(PartyPair {
                customer_id: *customer_id,
                business_id: *business_id,
            })
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Purchase,
    Payment,
    Credit,
    Refund,
    Adjustment,
}

text_label!(EntryKind, "entry kind", {
    Purchase => "purchase",
    Payment => "payment",
    Credit => "credit",
    Refund => "refund",
    Adjustment => "adjustment",
});

impl EntryKind {
    /// Customers may only record payments; businesses record everything else.
    pub fn permitted_for(self, side: Side) -> bool {
        match side {
            Side::Customer => self == EntryKind::Payment,
            Side::Business => self != EntryKind::Payment,
        }
    }

    /// Purchases and credits raise what the customer owes, payments and
    /// refunds lower it. Adjustments go either way.
    pub fn accepts_amount(self, amount: Decimal) -> bool {
        if amount.is_zero() {
            return false;
        }
        match self {
            EntryKind::Purchase | EntryKind::Credit => amount.is_sign_positive(),
            EntryKind::Payment | EntryKind::Refund => amount.is_sign_negative(),
            EntryKind::Adjustment => true,
        }
    }
}

/// A single signed monetary event attributed to a relationship.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    /// The ID of the entry.
    pub id: i64,
    /// The owning relationship.
    pub relationship_id: i64,
    /// Signed amount, two decimal places.
    pub amount: Decimal,
    /// What kind of event this was.
    #[sqlx(try_from = "String")]
    pub kind: EntryKind,
    /// Free-text description.
    pub description: String,
    /// The timestamp when the entry was recorded.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub relationship_id: i64,
    pub amount: Decimal,
    pub kind: EntryKind,
    pub description: String,
}

/// Sums of the positive and (absolute) negative entries of a set of relationships.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryTotals {
    pub to_pay: Decimal,
    pub paid: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

text_label!(RequestStatus, "request status", {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
});

/// The invitation handshake between two users.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConnectionRequest {
    /// The ID of the request.
    pub id: i64,
    /// The user who sent the request.
    pub sender_id: i64,
    /// The user who may accept or reject it.
    pub receiver_id: i64,
    /// Where the request is in its lifecycle.
    #[sqlx(try_from = "String")]
    pub status: RequestStatus,
    /// When the request was sent.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRequest {
    /// Returns the other participant when `user_id` is one of the two.
    pub fn counterpart(&self, user_id: i64) -> Option<i64> {
        if self.sender_id == user_id {
            Some(self.receiver_id)
        } else if self.receiver_id == user_id {
            Some(self.sender_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFilter {
    Sent,
    Received,
    PendingReceived,
    Accepted,
}

/// Chat room of a (customer, business) pair. Outlives the relationship so the
/// history is kept when a connection is removed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatRoom {
    /// The ID of the room.
    pub id: i64,
    /// The customer participant.
    pub customer_id: i64,
    /// The business participant.
    pub business_id: i64,
    /// Cleared when the relationship is deleted.
    pub relationship_id: Option<i64>,
    /// When the room was first provisioned.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the newest message, if any.
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ChatRoom {
    pub fn pair(&self) -> PartyPair {
        PartyPair {
            customer_id: self.customer_id,
            business_id: self.business_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
    TransactionUpdate,
    System,
}

text_label!(MessageKind, "message kind", {
    Text => "text",
    Image => "image",
    File => "file",
    TransactionUpdate => "transaction_update",
    System => "system",
});

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    /// The ID of the message.
    pub id: i64,
    /// The room it was posted in.
    pub room_id: i64,
    /// The participant who posted it.
    pub sender_id: i64,
    /// What the message carries.
    #[sqlx(try_from = "String")]
    pub kind: MessageKind,
    /// Text body; may be empty for attachments.
    pub content: String,
    /// Attachment location for image and file messages.
    pub file_url: Option<String>,
    /// When the message was posted.
    pub created_at: DateTime<Utc>,
    /// When the other participant read it.
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: i64,
    pub sender_id: i64,
    pub kind: MessageKind,
    pub content: String,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ConnectionRequest,
    ConnectionRequestAccepted,
    ConnectionRequestRejected,
    ConnectionRemoved,
}

text_label!(NotificationKind, "notification type", {
    ConnectionRequest => "connection_request",
    ConnectionRequestAccepted => "connection_request_accepted",
    ConnectionRequestRejected => "connection_request_rejected",
    ConnectionRemoved => "connection_removed",
});

/// An in-app notification.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Notification {
    /// The ID of the notification.
    pub id: i64,
    /// The user whose action triggered it.
    pub sender_id: i64,
    /// The user it is addressed to.
    pub receiver_id: i64,
    /// Short headline.
    pub title: String,
    /// Full text shown in the app.
    pub message: String,
    /// The event that produced it.
    #[serde(rename = "type")]
    #[sqlx(try_from = "String")]
    pub kind: NotificationKind,
    /// Whether the receiver has read it.
    pub is_read: bool,
    /// When it was created.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

/// A customer's favorite business.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Favorite {
    /// The ID of the favorite.
    pub id: i64,
    /// The customer who marked it.
    pub customer_id: i64,
    /// The favorited business.
    pub business_id: i64,
    /// Display name of the business.
    pub business_name: String,
    /// When it was marked.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn customer(id: i64) -> Role {
        Role::Customer { customer_id: id }
    }

    fn business(id: i64) -> Role {
        Role::Business {
            business_id: id,
            business_name: "Shop".into(),
        }
    }

    #[test]
    fn parties_resolve_in_either_order() {
        let expected = PartyPair {
            customer_id: 1,
            business_id: 2,
        };
        assert_eq!(resolve_parties(&customer(1), &business(2)), Some(expected));
        assert_eq!(resolve_parties(&business(2), &customer(1)), Some(expected));
    }

    #[test]
    fn parties_need_one_of_each_role() {
        assert_eq!(resolve_parties(&customer(1), &customer(2)), None);
        assert_eq!(resolve_parties(&business(1), &business(2)), None);
    }

    #[test]
    fn only_customers_record_payments() {
        assert!(EntryKind::Payment.permitted_for(Side::Customer));
        assert!(!EntryKind::Purchase.permitted_for(Side::Customer));
        assert!(!EntryKind::Payment.permitted_for(Side::Business));
        assert!(EntryKind::Refund.permitted_for(Side::Business));
    }

    #[test]
    fn amount_sign_follows_kind() {
        assert!(EntryKind::Purchase.accepts_amount(dec!(100)));
        assert!(!EntryKind::Purchase.accepts_amount(dec!(-100)));
        assert!(EntryKind::Payment.accepts_amount(dec!(-40)));
        assert!(!EntryKind::Refund.accepts_amount(dec!(5)));
        assert!(EntryKind::Adjustment.accepts_amount(dec!(-1.50)));
        assert!(!EntryKind::Adjustment.accepts_amount(Decimal::ZERO));
    }

    #[test]
    fn labels_parse_back() {
        assert_eq!(
            "transaction_update".parse::<MessageKind>().unwrap(),
            MessageKind::TransactionUpdate
        );
        assert_eq!(RequestStatus::Accepted.to_string(), "accepted");
        assert!("settled".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn side_of_matches_profile_ids() {
        let rel = Relationship {
            id: 7,
            customer_id: 1,
            business_id: 2,
            pending_due: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(rel.side_of(&customer(1)), Some(Side::Customer));
        assert_eq!(rel.side_of(&business(2)), Some(Side::Business));
        assert_eq!(rel.side_of(&customer(2)), None);
        assert_eq!(rel.side_of(&business(1)), None);
    }
}
