//! Cloud Resource Names.
//!
//! A CRN is a colon-delimited identifier
//! `crn:version:cname:ctype:service-name:location:scope:service-instance:resource-type:resource`.
//! Empty segments act as wildcards when a CRN is used as a mask, so the
//! generic mask [`GENERIC_CRN`] matches every resource.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mask matching every resource
pub const GENERIC_CRN: &str = "crn:v1::::::::";

const SEGMENTS: usize = 10;

/// Parsed CRN with all ten segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crn {
    segments: [String; SEGMENTS],
}

impl Crn {
    /// Parse a CRN
    ///
    /// A single missing trailing segment is treated as empty.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        let parts: Vec<&str> = trimmed.split(':').collect();

        if parts.first().map(|p| p.to_ascii_lowercase()) != Some("crn".to_string()) {
            return Err(ValidationError::InvalidFormat {
                field: "crn".to_string(),
                message: format!("'{}' does not start with 'crn:'", trimmed),
            });
        }
        if parts.len() > SEGMENTS {
            return Err(ValidationError::InvalidFormat {
                field: "crn".to_string(),
                message: format!("'{}' has more than {} segments", trimmed, SEGMENTS),
            });
        }
        if parts.len() < SEGMENTS - 1 {
            return Err(ValidationError::InvalidFormat {
                field: "crn".to_string(),
                message: format!("'{}' has only {} segments", trimmed, parts.len()),
            });
        }

        let mut segments: [String; SEGMENTS] = Default::default();
        for (slot, part) in segments.iter_mut().zip(parts) {
            *slot = part.to_string();
        }
        Ok(Self { segments })
    }

    /// Public service CRN used for a catalog service name
    pub fn for_service(service_name: &str) -> Self {
        let mut segments: [String; SEGMENTS] = Default::default();
        segments[0] = "crn".to_string();
        segments[1] = "v1".to_string();
        segments[2] = "bluemix".to_string();
        segments[3] = "public".to_string();
        segments[4] = service_name.to_string();
        Self { segments }
    }

    pub fn version(&self) -> &str {
        &self.segments[1]
    }

    pub fn cname(&self) -> &str {
        &self.segments[2]
    }

    pub fn ctype(&self) -> &str {
        &self.segments[3]
    }

    pub fn service_name(&self) -> &str {
        &self.segments[4]
    }

    pub fn location(&self) -> &str {
        &self.segments[5]
    }

    pub fn scope(&self) -> &str {
        &self.segments[6]
    }

    pub fn service_instance(&self) -> &str {
        &self.segments[7]
    }

    pub fn resource_type(&self) -> &str {
        &self.segments[8]
    }

    pub fn resource(&self) -> &str {
        &self.segments[9]
    }

    /// Whether every segment after the version is empty
    pub fn is_generic(&self) -> bool {
        self.segments[2..].iter().all(String::is_empty)
    }

    /// Whether this CRN falls under `mask`
    ///
    /// Each non-empty mask segment after the leading `crn` must equal the
    /// corresponding segment, ignoring ASCII case.
    pub fn matches(&self, mask: &Crn) -> bool {
        self.segments
            .iter()
            .zip(mask.segments.iter())
            .skip(1)
            .all(|(own, wanted)| wanted.is_empty() || own.eq_ignore_ascii_case(wanted))
    }
}

/// Whether `value` is the generic mask (or an equivalent spelling of it)
pub fn is_generic(value: &str) -> bool {
    Crn::parse(value).map(|c| c.is_generic()).unwrap_or(false)
}

/// Whether the CRN string `value` falls under the mask string `mask`
///
/// Strings that fail to parse only match when equal.
pub fn crn_matches(value: &str, mask: &str) -> bool {
    match (Crn::parse(value), Crn::parse(mask)) {
        (Ok(crn), Ok(mask)) => crn.matches(&mask),
        _ => value.eq_ignore_ascii_case(mask),
    }
}

impl fmt::Display for Crn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join(":"))
    }
}

impl FromStr for Crn {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Crn {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Crn> for String {
    fn from(crn: Crn) -> Self {
        crn.to_string()
    }
}

#[cfg(test)]
#[path = "crn_tests.rs"]
mod tests;
