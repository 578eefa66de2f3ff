use std::error::Error;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use json::object;
use tiny_http::{Header, Method, Request, Response};
use url::{Host, Url};

use crate::cooldown::{self, Controller, Status, TriggerSource};

const HTML: &str = include_str!("home.html");

struct Headers {
    json: Header,
    html: Header,
    home: Header,
}

pub struct Server {
    server: tiny_http::Server,
    headers: Headers,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new<A>(addr: A) -> Result<Server, Box<dyn Error + Send + Sync + 'static>>
    where
        A: ToSocketAddrs,
    {
        let headers = Headers {
            json: header("Content-type: application/json; charset=utf-8")?,
            html: header("Content-type: text/html; charset=utf-8")?,
            home: header("Location: /")?,
        };
        let server = tiny_http::Server::http(addr)?;
        let local_addr = server.server_addr().to_ip();
        Ok(Server {
            server,
            headers,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn handle_requests(&self, controller: Arc<Controller>) {
        for mut request in self.server.incoming_requests() {
            let method = request.method().clone();
            let url = request.url().to_owned();
            let path = url.split_once('?').map_or(url.as_str(), |(path, _)| path);

            if let Some(reason) = self.rejection(&request) {
                log::warn!("refusing {} {}: {}", method, path, reason);
                let _ = request.respond(Response::from_string("Forbidden").with_status_code(403));
                continue;
            }

            let response = match (&method, path) {
                (Method::Get, "/") => {
                    let status = controller.status();
                    let url = controller.settings().load().unwrap_or_else(|err| {
                        log::warn!("unable to load settings for display: {}", err);
                        String::new()
                    });
                    Response::from_string(render_home(&status, &url))
                        .with_header(self.headers.html.clone())
                }
                (Method::Get, "/status.json") => {
                    let body = status_json(&controller.status());
                    Response::from_string(body).with_header(self.headers.json.clone())
                }
                (Method::Post, "/trigger") => {
                    controller.request_trigger(TriggerSource::Button);
                    self.redirect_home()
                }
                (Method::Post, "/trigger.json") => {
                    let body = trigger_json(controller.request_trigger(TriggerSource::External));
                    Response::from_string(body).with_header(self.headers.json.clone())
                }
                (Method::Post, "/settings") => {
                    let mut body = String::new();
                    match request.as_reader().read_to_string(&mut body) {
                        Ok(_) => match form_url(&body) {
                            Some(url) => match controller.settings().save(&url) {
                                Ok(()) => self.redirect_home(),
                                Err(err) => {
                                    log::error!("unable to save settings: {}", err);
                                    Response::from_string(err.to_string()).with_status_code(500)
                                }
                            },
                            None => Response::from_string("Missing url field").with_status_code(400),
                        },
                        Err(err) => {
                            log::warn!("unable to read settings form: {}", err);
                            Response::from_string("Bad request").with_status_code(400)
                        }
                    }
                }
                _ => Response::from_string("Not found").with_status_code(404),
            };

            // Ignoring I/O errors that occur here so that we don't take down the process if there
            // is an issue sending the response.
            let _ = request.respond(response);
        }
    }

    pub fn shutdown(&self) {
        self.server.unblock();
    }

    fn redirect_home(&self) -> Response<std::io::Cursor<Vec<u8>>> {
        Response::from_string("")
            .with_status_code(303)
            .with_header(self.headers.home.clone())
    }

    fn rejection(&self, request: &Request) -> Option<&'static str> {
        rejection(
            request.method(),
            header_value(request, "Host"),
            header_value(request, "Origin"),
            header_value(request, "Sec-Fetch-Site"),
            self.local_addr.map(|addr| addr.port()),
        )
    }
}

fn header_value<'a>(request: &'a Request, name: &'static str) -> Option<&'a str> {
    request
        .headers()
        .iter()
        .find(|header| header.field.equiv(name))
        .map(|header| header.value.as_str())
}

/// Why a request must not be served, if it must not.
///
/// Every request needs a `Host` naming an IP literal or `localhost` on our port, which
/// rules out DNS rebinding. Anything that changes state must also come from our own
/// page (or from no page at all), so another site cannot submit a form to it.
fn rejection(
    method: &Method,
    host: Option<&str>,
    origin: Option<&str>,
    fetch_site: Option<&str>,
    port: Option<u16>,
) -> Option<&'static str> {
    let host = match host {
        Some(host) => match authority(&format!("http://{}/", host)) {
            Some((host, host_port)) if is_local_name(&host) => {
                if port.map_or(false, |port| port != host_port) {
                    return Some("Host header names another port");
                }
                Some((host, host_port))
            }
            _ => return Some("Host header is not a local address"),
        },
        None => None,
    };

    if *method == Method::Get || *method == Method::Head {
        return None;
    }

    if let Some(site) = fetch_site {
        if !site.eq_ignore_ascii_case("same-origin") && !site.eq_ignore_ascii_case("none") {
            return Some("cross-site request");
        }
    }
    if let Some(origin) = origin {
        let same = origin.starts_with("http://")
            && host.is_some()
            && authority(origin) == host;
        if !same {
            return Some("Origin does not match Host");
        }
    }
    None
}

fn authority(raw: &str) -> Option<(Host<String>, u16)> {
    let url = Url::parse(raw).ok()?;
    Some((url.host()?.to_owned(), url.port_or_known_default()?))
}

fn is_local_name(host: &Host<String>) -> bool {
    match host {
        Host::Ipv4(_) | Host::Ipv6(_) => true,
        Host::Domain(name) => name.eq_ignore_ascii_case("localhost"),
    }
}

fn header(raw: &str) -> Result<Header, Box<dyn Error + Send + Sync + 'static>> {
    raw.parse::<Header>()
        .map_err(|()| format!("invalid header {:?}", raw).into())
}

fn render_home(status: &Status, url: &str) -> String {
    let (state, label, disabled, refresh) = if status.enabled {
        (String::from("🟢 Ready"), "Open door", "", "30")
    } else {
        let secs = status.cooldown_remaining.as_secs_f64().ceil();
        (format!("⏳ Cooling down ({}s)", secs), "Wait 5s", "disabled", "1")
    };
    HTML.replace("$refresh$", refresh)
        .replace("$status$", &state)
        .replace("$label$", label)
        .replace("$disabled$", disabled)
        .replace("$last$", &escape(&last_triggered(status)))
        .replace("$url$", &escape(url))
        .replace("$result$", &escape(&status.result))
}

fn last_triggered(status: &Status) -> String {
    match status.since_triggered {
        Some(elapsed) => {
            let formatter = timeago::Formatter::new();
            format!("Last opened {}", formatter.convert(elapsed))
        }
        None => String::from("Not opened yet"),
    }
}

fn status_json(status: &Status) -> String {
    let obj = object! {
        enabled: status.enabled,
        cooldown_remaining_secs: status.cooldown_remaining.as_secs_f64(),
        result: status.result.as_str(),
        result_request: status.result_seq,
        last_triggered: status.since_triggered.map(|_| last_triggered(status)),
        secs_since_triggered: status.since_triggered.map(|elapsed| elapsed.as_secs())
    };
    json::stringify_pretty(obj, 2)
}

fn trigger_json(request: cooldown::Request) -> String {
    let obj = match request {
        cooldown::Request::Fired(seq) => object! { fired: true, request: seq },
        cooldown::Request::Ignored => object! { fired: false },
    };
    json::stringify(obj)
}

fn form_url(body: &str) -> Option<String> {
    url::form_urlencoded::parse(body.as_bytes())
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
