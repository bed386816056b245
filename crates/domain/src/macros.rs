//! Macro for implementing string conversions on closed domain enums
//!
//! Query verbs, provider names, activity types and client statuses all travel
//! as strings (in payloads, config files and log fields). This macro gives each
//! enum one canonical spelling plus case-insensitive parsing.
//!
//! # Example
//!
//! ```rust
//! use clientkey_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Verb {
//!     Select,
//!     Insert,
//! }
//!
//! impl_domain_status_conversions!(Verb {
//!     Select => "SELECT",
//!     Insert => "INSERT",
//! });
//!
//! assert_eq!(Verb::Select.to_string(), "SELECT");
//! assert_eq!("insert".parse::<Verb>().unwrap(), Verb::Insert);
//! ```

/// Implements `as_str`, Display and FromStr for a closed enum
///
/// - `as_str` and Display return the canonical spelling given in the mapping
/// - FromStr accepts any ASCII casing of that spelling
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Canonical string form
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case($str) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(format!("Invalid {}: {}", stringify!($enum_name), s))
            }
        }
    };
}
