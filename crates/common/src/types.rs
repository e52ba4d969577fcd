use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each identifier is a distinct type so an order ID can never be passed
/// where a ticket ID is expected.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of a scheduled event owned by an organizer.
    EventId
);
uuid_id!(
    /// Identifier of a priced, capacity-tracked ticket type.
    TicketTypeId
);
uuid_id!(
    /// Identifier of a promo code.
    PromoCodeId
);
uuid_id!(
    /// Identifier of an order aggregate.
    OrderId
);
uuid_id!(
    /// Identifier of an issued ticket.
    TicketId
);
uuid_id!(
    /// Identifier of a ticket transfer intent.
    TransferId
);
uuid_id!(
    /// Identifier of an authenticated buyer principal.
    BuyerId
);
uuid_id!(
    /// Identifier of an inventory reservation token.
    ReservationId
);
uuid_id!(
    /// Identifier of an organizer.
    OrganizerId
);

/// Generates a human-readable, upper-case reference such as `ORD-1A2B3C4D5E6F`.
///
/// Uniqueness is enforced by the store; the 48 random bits only make
/// collisions unlikely.
pub fn human_reference(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{prefix}-{}", &hex[..12])
}
