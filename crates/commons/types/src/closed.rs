//! Closed value sets.
//!
//! Each closed set is a plain enum whose serialized form is a fixed string.
//! Parsing from untrusted text goes through `FromStr`, which names the set and
//! the rejected value.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {set} value: {value:?}")]
pub struct ClosedSetError {
    pub set: &'static str,
    pub value: String,
}

macro_rules! closed_set {
    (
        $(#[$meta:meta])*
        $name:ident = $set:tt {
            $( $(#[$vmeta:meta])* $variant:ident => $text:tt ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::closed::ClosedSetError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.as_str() == s)
                    .ok_or_else(|| $crate::closed::ClosedSetError {
                        set: $set,
                        value: s.to_string(),
                    })
            }
        }
    };
}

pub(crate) use closed_set;
