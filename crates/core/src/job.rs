//! Job message model - what the server hands the worker to run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::id::{RecordId, TimelineId};

/// Name of the endpoint the worker uses to talk back to the server.
pub const SYSTEM_CONNECTION_NAME: &str = "SystemVssConnection";

/// A job request as received from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    /// Job id; also the id of the job's timeline record
    pub job_id: RecordId,

    /// Display name of the job
    pub job_name: String,

    /// Main timeline for this job
    pub timeline: TimelineId,

    /// Execution environment
    pub environment: Option<JobEnvironment>,
}

/// Execution environment carried by a job message.
///
/// Every part is optional on the wire; initialization rejects messages
/// missing any required part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvironment {
    /// Connection back to the server
    pub system_connection: Option<ServiceEndpoint>,

    /// Endpoints available to tasks
    pub endpoints: Option<Vec<ServiceEndpoint>>,

    /// Raw (unexpanded) variables
    pub variables: Option<HashMap<String, String>>,

    /// Hints describing which values must be redacted
    #[serde(default)]
    pub mask_hints: Vec<MaskHint>,
}

/// A service endpoint (connection) available to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpoint {
    /// Endpoint name
    pub name: String,

    /// Endpoint URL
    pub url: String,

    /// Authorization material
    pub authorization: Option<EndpointAuthorization>,

    /// Additional endpoint data
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl ServiceEndpoint {
    /// Create an endpoint without authorization.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            authorization: None,
            data: HashMap::new(),
        }
    }
}

/// Authorization block of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAuthorization {
    /// Scheme, e.g. `OAuth`
    pub scheme: String,

    /// Scheme parameters (tokens etc.)
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// How a mask hint identifies a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskType {
    /// `value` is the name of a variable whose value is secret
    Variable,
    /// `value` is a regular expression matching secret text
    Regex,
}

/// A hint that some text must be redacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskHint {
    /// Hint kind
    #[serde(rename = "type")]
    pub mask_type: MaskType,

    /// Variable name or pattern
    pub value: String,
}
