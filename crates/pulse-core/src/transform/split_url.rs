//! Splitting browser URLs into their parts.

use serde_json::Value;
use url::Url;

use crate::Event;

/// Adds the parts of each event's `url` as `$`-prefixed data keys.
///
/// | key           | part                                         |
/// |---------------|----------------------------------------------|
/// | `$protocol`   | scheme                                       |
/// | `$domain`     | host without a leading `www.`, plus any port |
/// | `$path`       | path up to the `;` parameters                |
/// | `$params`     | `;` parameters of the last path segment      |
/// | `$options`    | query string                                 |
/// | `$identifier` | fragment                                     |
///
/// Events without a `url` string, or whose URL does not parse as an
/// absolute URL, pass through unchanged.
pub fn split_url_events(events: Vec<Event>) -> Vec<Event> {
    events
        .into_iter()
        .map(|mut event| {
            let parsed = event
                .data
                .get("url")
                .and_then(Value::as_str)
                .and_then(|raw| Url::parse(raw).ok());
            if let Some(url) = parsed {
                for (key, part) in url_parts(&url) {
                    event.data.insert(key.to_string(), Value::String(part));
                }
            }
            event
        })
        .collect()
}

fn url_parts(url: &Url) -> [(&'static str, String); 6] {
    let host = url.host_str().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    let domain = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let (path, params) = split_params(url.path());
    [
        ("$protocol", url.scheme().to_string()),
        ("$domain", domain),
        ("$path", path.to_string()),
        ("$params", params.to_string()),
        ("$options", url.query().unwrap_or_default().to_string()),
        ("$identifier", url.fragment().unwrap_or_default().to_string()),
    ]
}

/// Splits `;params` off the last path segment.
fn split_params(path: &str) -> (&str, &str) {
    let segment = path.rfind('/').map_or(0, |slash| slash + 1);
    match path[segment..].find(';') {
        Some(semi) => (&path[..segment + semi], &path[segment + semi + 1..]),
        None => (path, ""),
    }
}
