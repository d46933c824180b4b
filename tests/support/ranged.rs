//! wiremock fixtures serving a file the way a range-capable server does.

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic file contents.
#[must_use]
pub fn patterned_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 256) % 251) as u8).collect()
}

/// Answers `Range: bytes=a-b` with 206 and the slice, anything else with 200
/// and the whole body.
#[derive(Clone)]
pub struct RangeResponder {
    body: Vec<u8>,
    advertise_ranges: bool,
    honour_ranges: bool,
    delay: Duration,
}

impl RangeResponder {
    #[must_use]
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            advertise_ranges: true,
            honour_ranges: true,
            delay: Duration::ZERO,
        }
    }

    /// Advertises no range support and always serves the whole body.
    #[must_use]
    pub fn ignoring_ranges(mut self) -> Self {
        self.advertise_ranges = false;
        self.honour_ranges = false;
        self
    }

    /// Advertises `Accept-Ranges: bytes` but answers every GET with 200 and
    /// the whole body.
    #[must_use]
    pub fn advertising_unhonoured_ranges(mut self) -> Self {
        self.honour_ranges = false;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Mounts HEAD and GET handlers for `route`.
    pub async fn mount(self, server: &MockServer, route: &str) {
        let accept_ranges = if self.advertise_ranges { "bytes" } else { "none" };
        Mock::given(method("HEAD"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Accept-Ranges", accept_ranges)
                    .insert_header("Content-Length", self.body.len().to_string()),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(self)
            .mount(server)
            .await;
    }
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_range);
        let template = match range {
            Some((start, end)) if self.honour_ranges && start < self.body.len() => {
                let end = end.min(self.body.len() - 1);
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{}", self.body.len()),
                    )
                    .set_body_bytes(self.body[start..=end].to_vec())
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        };
        template.set_delay(self.delay)
    }
}
