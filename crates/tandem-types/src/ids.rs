//! Type-safe identifier wrappers around `u32`.
//!
//! Every entity handled by the controller has a strongly-typed ID to
//! prevent accidental mixing of identifiers at compile time. Station
//! ids are assigned by the traffic simulator (fixed stations by
//! configuration); message, application, and subscription ids are
//! assigned by the controller from monotonic counters. All of them
//! travel the wire as int32, so the raw representation stays `u32`.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around `u32` with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Wrap a raw identifier value.
            #[must_use]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Return the inner `u32` value.
            #[must_use]
            pub const fn into_inner(self) -> u32 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a station (vehicle or roadside unit).
    ///
    /// Never reused while the station is active; the traffic simulator
    /// is the authority for mobile stations.
    StationId
}

define_id! {
    /// Unique identifier for a geobroadcast message, monotonically
    /// assigned per run.
    MessageId
}

define_id! {
    /// Unique identifier for a registered application.
    AppId
}

define_id! {
    /// Handle for a subscription held by an application.
    SubscriptionId
}
