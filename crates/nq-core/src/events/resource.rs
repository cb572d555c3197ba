//! Resource payloads.

use super::split_records;
use crate::resource::CloudResource;
use crate::PipelineError;

/// Decoded resource payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBatch {
    pub resources: Vec<CloudResource>,
    pub bulk: bool,
}

/// Decode a single resource, an array or a `{resources: [...]}` envelope
pub fn parse_resources(payload: &[u8]) -> Result<ResourceBatch, PipelineError> {
    let records = split_records(payload, "resources")?;

    let resources = records
        .items
        .into_iter()
        .map(|item| {
            let resource: CloudResource = serde_json::from_value(serde_json::Value::Object(item))?;
            resource.validate()?;
            Ok(resource)
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;

    Ok(ResourceBatch {
        resources,
        bulk: records.bulk,
    })
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
