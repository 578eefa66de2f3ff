use std::fmt;

pub const NO_RESPONSE: &str = "No response";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        TransportError(err.to_string())
    }
}

/// Issues a single GET. `Ok(None)` means the server answered without a body.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<Option<String>, TransportError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        UreqTransport {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UreqTransport")
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str) -> Result<Option<String>, TransportError> {
        let response = self.agent.get(url).call()?;
        // These statuses never carry a body; everything else is shown as-is, even if empty.
        if matches!(response.status(), 204 | 304) {
            return Ok(None);
        }
        let body = response
            .into_string()
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(Some(body))
    }
}

/// Formats a transport outcome the way it is displayed: body text, [`NO_RESPONSE`],
/// or `Error: <message>`. Failures never escape as `Err`.
pub fn fire(transport: &dyn Transport, url: &str) -> String {
    match transport.get(url) {
        Ok(Some(body)) => {
            log::info!("response from {}: {}", url, body);
            body
        }
        Ok(None) => {
            log::info!("empty response from {}", url);
            NO_RESPONSE.to_owned()
        }
        Err(err) => {
            log::warn!("request to {:?} failed: {}", url, err);
            error_text(&err)
        }
    }
}

pub fn error_text(err: &dyn std::error::Error) -> String {
    format!("Error: {}", err)
}
