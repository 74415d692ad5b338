use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
        pub struct $name(pub ulid::Ulid);

        impl $name {
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            pub fn from_ulid(id: ulid::Ulid) -> Self {
                Self(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id = ulid::Ulid::from_string(s)?;
                Ok($name(id))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse::<$name>()
                    .map_err(|_| serde::de::Error::custom(concat!("invalid ", $what)))
            }
        }
    };
}

ulid_id!(
    /// Identifier of one generation run's output.
    BundleId,
    "bundle id"
);

ulid_id!(
    /// Identifier of a deployment record.
    DeploymentId,
    "deployment id"
);

/// Project identifier supplied by the surrounding CRUD layer.
///
/// Projects are addressed by slug-like strings (`acme-erp`) or by opaque
/// ids; either way the value must be usable as a directory name and as part
/// of a container image tag, so it is restricted to `[A-Za-z0-9_-]`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct ProjectId(String);

/// Rejected project identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid project id {0:?}: expected 1-64 characters of [A-Za-z0-9_-]")]
pub struct InvalidProjectId(pub String);

impl ProjectId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidProjectId> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw))
        } else {
            Err(InvalidProjectId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used for image tags and container names.
    pub fn slug(&self) -> String {
        self.0.to_ascii_lowercase().replace('_', "-")
    }
}

impl Display for ProjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProjectId {
    type Err = InvalidProjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProjectId::new(s)
    }
}

impl<'de> Deserialize<'de> for ProjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ProjectId::new(s).map_err(serde::de::Error::custom)
    }
}
