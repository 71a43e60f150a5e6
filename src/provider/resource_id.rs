//! Parser for ARM-style resource identifiers:
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}`.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub provider_namespace: String,
    pub resource_type: String,
    pub name: String,
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(id: &str) -> Result<Self> {
        let parts: Vec<&str> = id.split('/').collect();
        // Leading slash yields an empty first segment:
        // ["", "subscriptions", sub, "resourceGroups", rg, "providers", ns, type, name]
        if parts.len() < 9
            || !parts[1].eq_ignore_ascii_case("subscriptions")
            || !parts[3].eq_ignore_ascii_case("resourcegroups")
            || !parts[5].eq_ignore_ascii_case("providers")
        {
            return Err(Error::parse(format!("malformed resource id: {id}")));
        }

        if parts[2].is_empty() || parts[4].is_empty() || parts[8].is_empty() {
            return Err(Error::parse(format!("resource id has empty segments: {id}")));
        }

        Ok(Self {
            subscription_id: parts[2].to_string(),
            resource_group: parts[4].to_string(),
            provider_namespace: parts[6].to_string(),
            resource_type: parts[7].to_string(),
            name: parts[8].to_string(),
        })
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}/{}",
            self.subscription_id,
            self.resource_group,
            self.provider_namespace,
            self.resource_type,
            self.name
        )
    }
}

/// Lenient resource-group extraction for ids that may not carry a full
/// provider path (e.g. resource-group-level ids).
pub fn resource_group_from_id(id: &str) -> Option<String> {
    let parts: Vec<&str> = id.split('/').collect();
    if parts.len() >= 5 && parts[3].eq_ignore_ascii_case("resourcegroups") {
        Some(parts[4].to_string())
    } else {
        None
    }
}

/// Last path segment, used for NIC names referenced only by id.
pub fn leaf_name(id: &str) -> Option<&str> {
    id.rsplit('/').next().filter(|name| !name.is_empty())
}
