use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single HTTP header as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// One network transaction, stitched together from the host's phase events.
///
/// Request headers arrive with the headers phase and the response fields with
/// the completion phase, so any of them may still be empty when the record is
/// relayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Milliseconds since the UNIX epoch at which the relay first saw the request.
    pub time_stamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub tab_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<HttpHeader>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HttpHeader>>,
}

// ---------------------------------------------------------------------------
// Host phase payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStartedDetails {
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default = "default_tab_id")]
    pub tab_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
}

/// Tab id the host uses for requests not tied to any tab.
fn default_tab_id() -> i64 {
    -1
}

/// Raw request payload as delivered with the start phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<RawChunk>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<FormData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One upload chunk. Bytes travel base64-encoded; file-backed chunks carry no bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChunk {
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl RawChunk {
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Some(bytes.into()),
            file: None,
        }
    }
}

/// Form fields in the order the host listed them, each with one or more values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData(pub Vec<(String, Vec<String>)>);

impl FormData {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl Serialize for FormData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, values) in &self.0 {
            map.serialize_entry(key, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FormData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FormDataVisitor;

        impl<'de> Visitor<'de> for FormDataVisitor {
            type Value = FormData;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field names to value lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FormData, A::Error> {
                let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, values)) = access.next_entry::<String, Vec<String>>()? {
                    fields.push((key, values));
                }
                Ok(FormData(fields))
            }
        }

        deserializer.deserialize_map(FormDataVisitor)
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersSentDetails {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<HttpHeader>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedDetails {
    pub request_id: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<HttpHeader>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A permission grant or revocation, or the scope of a capability query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub origins: Vec<String>,
}

impl PermissionSet {
    pub fn includes(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

// ---------------------------------------------------------------------------
// Host link (browser shim <-> relay)
// ---------------------------------------------------------------------------

/// Messages the host shim sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    BeforeRequest { details: RequestStartedDetails },
    BeforeSendHeaders { details: HeadersSentDetails },
    Completed { details: CompletedDetails },
    ErrorOccurred { details: ErrorDetails },
    PermissionsAdded(PermissionSet),
    PermissionsRemoved(PermissionSet),
    CapabilityReply {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Commands the relay sends to the host shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    AddListeners {
        filter: RequestFilter,
        phases: Vec<PhaseListener>,
    },
    RemoveListeners,
    Capability {
        id: u64,
        op: CapabilityOp,
        scope: PermissionSet,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseListener {
    pub phase: Phase,
    #[serde(default)]
    pub extra_info_spec: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeRequest,
    BeforeSendHeaders,
    Completed,
    ErrorOccurred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityOp {
    Contains,
    Request,
    Remove,
}

// ---------------------------------------------------------------------------
// Control channel (panel session <-> relay)
// ---------------------------------------------------------------------------

/// Messages a panel session sends to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionRequest {
    CheckPermissions,
    RequestPermissions,
    RemovePermissions,
}

impl SessionRequest {
    pub fn op(self) -> PermissionOp {
        match self {
            SessionRequest::CheckPermissions => PermissionOp::Check,
            SessionRequest::RequestPermissions => PermissionOp::Request,
            SessionRequest::RemovePermissions => PermissionOp::Remove,
        }
    }
}

/// Which session request a `permissions-result` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionOp {
    Check,
    Request,
    Remove,
}

impl PermissionOp {
    pub fn capability_op(self) -> CapabilityOp {
        match self {
            PermissionOp::Check => CapabilityOp::Contains,
            PermissionOp::Request => CapabilityOp::Request,
            PermissionOp::Remove => CapabilityOp::Remove,
        }
    }
}

/// Messages the relay sends to a panel session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    #[serde(rename = "permissions-result")]
    PermissionsResult {
        #[serde(rename = "for")]
        op: PermissionOp,
        result: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "captured_request")]
    CapturedRequest { data: RequestRecord },
}

impl RelayMessage {
    pub fn permissions_result(op: PermissionOp, outcome: Result<bool, String>) -> Self {
        match outcome {
            Ok(result) => RelayMessage::PermissionsResult {
                op,
                result,
                error: None,
            },
            Err(error) => RelayMessage::PermissionsResult {
                op,
                result: false,
                error: Some(error),
            },
        }
    }
}
