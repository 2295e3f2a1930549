use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque name of a call participant.
///
/// Supplied once per process (usually as a launch parameter) and used as the
/// routing key on the signaling relay. Ordering is plain string ordering and
/// is what the glare tie-break compares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identity must not be empty")]
pub struct EmptyIdentity;

impl Identity {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyIdentity> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(EmptyIdentity);
        }
        Ok(Self(value))
    }

    /// Identity from an optional launch parameter. Absent or blank means the
    /// client stays idle.
    pub fn from_launch_param(param: Option<&str>) -> Option<Self> {
        param.and_then(|p| Self::new(p.trim()).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = EmptyIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = EmptyIdentity;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A callable contact as returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub identity: Identity,
    pub display_name: String,
}

impl Contact {
    pub fn new(identity: Identity, display_name: impl Into<String>) -> Self {
        Self {
            identity,
            display_name: display_name.into(),
        }
    }
}
