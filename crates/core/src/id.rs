// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ID newtypes for tool calls, groups, and plugins.
//!
//! Call ids arrive from the model and can be arbitrary strings (batch
//! unwrapping appends `-unwrapped-{index}` suffixes), so they are backed
//! by [`smol_str::SmolStr`] rather than a fixed inline buffer. Group ids
//! are generated locally with a `grp-` prefix.

use smol_str::SmolStr;

/// Define a newtype wrapper around [`SmolStr`] for caller-supplied names.
///
/// Generates `new()`, `as_str()`, `Display`, `From<&str>`, `From<String>`,
/// `PartialEq<str>`, `Borrow<str>`, and `Deref` implementations.
macro_rules! define_name {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(SmolStr);

        impl $name {
            pub fn new(s: impl AsRef<str>) -> Self {
                Self(SmolStr::new(s.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(SmolStr::from(s))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0.as_str() == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                self.0.as_str()
            }
        }
    };
}

define_name! {
    /// Identifier of a single tool call within a turn.
    ///
    /// Supplied by the model, or synthesized during batch unwrapping as
    /// `{parent}-unwrapped-{index}`. Group ids also travel as `CallId`
    /// when they appear in activity-event `id`/`parent` positions.
    pub struct CallId;
}

define_name! {
    /// Name of a plugin, as declared in its manifest.
    pub struct PluginName;
}

impl CallId {
    /// Synthesize the id of an unwrapped batch member.
    pub fn unwrapped(parent: &CallId, index: usize) -> Self {
        Self::new(format!("{}-unwrapped-{}", parent, index))
    }
}

/// Identifier of a concurrent tool-call group.
///
/// Generated per dispatch: `grp-` + 19-char nanoid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct GroupId(SmolStr);

impl GroupId {
    pub const PREFIX: &'static str = "grp-";

    /// Generate a new random group id.
    pub fn generate() -> Self {
        Self(SmolStr::new(format!("{}{}", Self::PREFIX, nanoid::nanoid!(19))))
    }

    pub fn from_string(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The group id in `CallId` position (event ids and parents).
    pub fn as_call_id(&self) -> CallId {
        CallId::new(self.0.as_str())
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
