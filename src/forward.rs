use std::thread;
use std::time::{Duration, Instant};

use json::JsonValue;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forwarded {
    Opened(String),
    Ignored,
    /// Accepted, but no result arrived before the wait ran out.
    Pending,
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("nothing is listening on {0}")]
    Unreachable(String),
    #[error("request to {addr} failed: {message}")]
    Request { addr: String, message: String },
    #[error("unexpected reply from {addr}: {message}")]
    Reply { addr: String, message: String },
}

/// Hands a launch-time trigger to the door-trigger serving `addr` and waits up to
/// `wait` for its result, so the running controller's cooldown applies to it.
pub fn trigger(addr: &str, wait: Duration) -> Result<Forwarded, ForwardError> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .build();
    let base = format!("http://{}", addr);

    let reply = read_json(addr, agent.post(&format!("{}/trigger.json", base)).call())?;
    let seq = match (reply["fired"].as_bool(), reply["request"].as_u64()) {
        (Some(true), Some(seq)) => seq,
        (Some(false), _) => {
            log::info!("forwarded trigger ignored by {}, cooling down", addr);
            return Ok(Forwarded::Ignored);
        }
        _ => return Err(bad_reply(addr, "missing fired/request fields")),
    };
    log::info!("forwarded trigger accepted by {} (request #{})", addr, seq);

    let deadline = Instant::now() + wait;
    loop {
        let status = read_json(addr, agent.get(&format!("{}/status.json", base)).call())?;
        let shown = status["result_request"]
            .as_u64()
            .ok_or_else(|| bad_reply(addr, "missing result_request field"))?;
        if shown >= seq {
            let result = status["result"].as_str().unwrap_or_default();
            return Ok(Forwarded::Opened(result.to_owned()));
        }
        if Instant::now() >= deadline {
            return Ok(Forwarded::Pending);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn read_json(
    addr: &str,
    reply: Result<ureq::Response, ureq::Error>,
) -> Result<JsonValue, ForwardError> {
    let response = reply.map_err(|err| match err.kind() {
        ureq::ErrorKind::ConnectionFailed => ForwardError::Unreachable(addr.to_owned()),
        _ => ForwardError::Request {
            addr: addr.to_owned(),
            message: err.to_string(),
        },
    })?;
    let body = response
        .into_string()
        .map_err(|err| bad_reply(addr, &err.to_string()))?;
    json::parse(&body).map_err(|err| bad_reply(addr, &err.to_string()))
}

fn bad_reply(addr: &str, message: &str) -> ForwardError {
    ForwardError::Reply {
        addr: addr.to_owned(),
        message: message.to_owned(),
    }
}
