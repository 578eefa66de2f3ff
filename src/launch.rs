use std::sync::atomic::{AtomicBool, Ordering};

use url::Url;

use crate::cooldown::{Controller, Request, TriggerSource};

pub const OPEN_DOOR_ACTION: &str = "OPEN_APP_FEATURE";
pub const OPEN_DOOR_HOST: &str = "openMainDoor";
pub const URI_SCHEME: &str = "doortrigger";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchContext {
    pub action: Option<String>,
    pub uri: Option<String>,
}

impl LaunchContext {
    pub fn new(action: Option<String>, uri: Option<String>) -> Self {
        LaunchContext { action, uri }
    }

    pub fn has_open_action(&self) -> bool {
        self.action
            .as_deref()
            .map_or(false, |action| action.contains(OPEN_DOOR_ACTION))
    }

    pub fn has_open_uri(&self) -> bool {
        let uri = match self.uri.as_deref() {
            Some(uri) => uri,
            None => return false,
        };
        match Url::parse(uri) {
            Ok(url) => url
                .host_str()
                .map_or(false, |host| host.eq_ignore_ascii_case(OPEN_DOOR_HOST)),
            Err(err) => {
                log::warn!("ignoring unparseable launch URI {:?}: {}", uri, err);
                false
            }
        }
    }

    pub fn requests_trigger(&self) -> bool {
        self.has_open_action() || self.has_open_uri()
    }
}

/// Launch-time signal, consumed by the first [`ExternalTrigger::dispatch`].
#[derive(Debug)]
pub struct ExternalTrigger {
    pending: AtomicBool,
}

impl ExternalTrigger {
    pub fn new(requested: bool) -> Self {
        ExternalTrigger {
            pending: AtomicBool::new(requested),
        }
    }

    pub fn from_launch(context: &LaunchContext) -> Self {
        let requested = context.requests_trigger();
        if requested {
            log::info!("launched with open-door signal: {:?}", context);
        }
        Self::new(requested)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn dispatch(&self, controller: &Controller) -> Option<Request> {
        if self.pending.swap(false, Ordering::SeqCst) {
            Some(controller.request_trigger(TriggerSource::External))
        } else {
            None
        }
    }
}
