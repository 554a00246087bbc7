use serde::Deserialize;

use crate::error::CheckError;

/// One verification query and the pattern its result must satisfy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Query {
    #[serde(rename = "Query")]
    pub query: String,
    #[serde(rename = "Regex")]
    pub regex: String,
}

/// One database to copy snapshots from and validate. Field names follow
/// the YAML document stored in object storage.
#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Database", default)]
    pub database: String,
    #[serde(rename = "Type", default)]
    pub instance_type: String,
    #[serde(rename = "Password", default)]
    pub password: String,
    #[serde(rename = "Retention", default)]
    pub retention: Option<i32>,
    #[serde(rename = "Destination", default)]
    pub destination: Option<String>,
    #[serde(rename = "KmsID", default)]
    pub kms_id: Option<String>,
    #[serde(rename = "Queries", default)]
    pub queries: Vec<Query>,
}

impl Instance {
    pub fn retention_days(&self) -> i32 {
        self.retention.unwrap_or(1)
    }

    pub fn destination(&self) -> &str {
        self.destination.as_deref().unwrap_or_default()
    }

    pub fn kms_id(&self) -> &str {
        self.kms_id.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Doc {
    pub instances: Vec<Instance>,
}

/// The document root is either a bare list of instances or a mapping
/// with an `Instances:` key; both forms are in use.
#[derive(Deserialize)]
#[serde(untagged)]
enum DocRepr {
    Wrapped {
        #[serde(rename = "Instances")]
        instances: Vec<Instance>,
    },
    Bare(Vec<Instance>),
}

impl Doc {
    /// Parses the YAML document, defaulting each instance's destination
    /// to the source region and its retention to `default_retention`
    /// days. Unknown fields are ignored.
    pub fn parse(bytes: &[u8], source_region: &str, default_retention: i32) -> Result<Doc, CheckError> {
        let repr: DocRepr = serde_yaml::from_slice(bytes)
            .map_err(|err| CheckError::Config(format!("could not parse configuration document: {err}")))?;

        let mut instances = match repr {
            DocRepr::Wrapped { instances } => instances,
            DocRepr::Bare(instances) => instances,
        };

        for instance in &mut instances {
            if instance.retention.is_none() {
                instance.retention = Some(default_retention);
            }
            if instance.destination.as_deref().unwrap_or_default().is_empty() {
                instance.destination = Some(source_region.to_string());
            }
        }

        Ok(Doc { instances })
    }
}
