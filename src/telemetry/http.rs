use crate::clock::TimeRange;
use crate::telemetry::{
    OwnerInfo, PointSnapshot, Reading, SensorId, SourceError, TelemetrySource, parse_owner,
    parse_points, parse_readings, parse_sensor_ids, unwrap_result,
};
use crate::zones::Unit;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Archive API reached over plain HTTP.
pub struct HttpSource {
    endpoint: String,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.endpoint, path);
        debug!(url = %url, "GET");
        let body = tokio::time::timeout(self.timeout, send_http_get(&url))
            .await
            .map_err(|_| SourceError::Timeout)??;
        let value: Value = serde_json::from_str(&body)?;
        Ok(unwrap_result(value))
    }
}

impl fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSource")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TelemetrySource for HttpSource {
    async fn logs(&self, sensor_id: &str, range: TimeRange) -> Result<Vec<Reading>, SourceError> {
        let path = format!(
            "/api/sensor/{}/{}/{}",
            encode_segment(sensor_id),
            range.start,
            range.end
        );
        Ok(parse_readings(&self.get_json(&path).await?))
    }

    async fn maxima(&self, unit: Unit, range: TimeRange) -> Result<Vec<PointSnapshot>, SourceError> {
        let path = format!(
            "/api/sensor/maxdata/{}/{}/{}",
            unit.key(),
            range.start,
            range.end
        );
        Ok(parse_points(&self.get_json(&path).await?))
    }

    async fn active_sensors(&self, range: TimeRange) -> Result<Vec<SensorId>, SourceError> {
        let path = format!("/api/sensor/sensors/{}/{}", range.start, range.end);
        Ok(parse_sensor_ids(&self.get_json(&path).await?))
    }

    async fn owner(&self, sensor_id: &str) -> Result<Option<OwnerInfo>, SourceError> {
        let path = format!("/api/sensor/owner/{}", encode_segment(sensor_id));
        Ok(parse_owner(&self.get_json(&path).await?))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedUrl {
    host: String,
    port: u16,
    path: String,
}

/// Percent-encode one path segment; ids containing `/` or spaces must stay a
/// single segment upstream.
fn encode_segment(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(char::from(byte));
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

fn parse_http_url(endpoint: &str) -> Result<ParsedUrl, SourceError> {
    let invalid = |reason: &str| SourceError::InvalidUrl(reason.to_string());
    let rest = endpoint
        .strip_prefix("http://")
        .ok_or_else(|| invalid("only http:// supported"))?;
    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, format!("/{path}")),
        None => (rest, "/".to_string()),
    };
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) if !port.is_empty() => {
            (host, port.parse::<u16>().map_err(|_| invalid("invalid port"))?)
        }
        Some((host, _)) => (host, 80),
        None => (authority, 80),
    };
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok(ParsedUrl {
        host: host.to_string(),
        port,
        path,
    })
}

// HTTP/1.0 keeps the response body unchunked.
async fn send_http_get(url: &str) -> Result<String, SourceError> {
    let parsed = parse_http_url(url)?;
    let mut addrs = tokio::net::lookup_host((parsed.host.as_str(), parsed.port))
        .await
        .map_err(|err| SourceError::Dns(err.to_string()))?;
    let addr = addrs
        .next()
        .ok_or_else(|| SourceError::Dns("no addresses resolved".to_string()))?;

    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(SourceError::Connect)?;

    let request = format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
        parsed.path, parsed.host
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(SourceError::Io)?;

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .await
        .map_err(SourceError::Io)?;
    let response = String::from_utf8_lossy(&raw);

    split_response(&response)
}

fn split_response(response: &str) -> Result<String, SourceError> {
    let malformed = |reason: &str| SourceError::Http(0, reason.to_string());
    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| malformed("invalid http response"))?;
    let status: u16 = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| malformed("missing status code"))?
        .parse()
        .map_err(|_| malformed("invalid status code"))?;
    if status >= 400 {
        return Err(SourceError::Http(status, body.trim().to_string()));
    }
    Ok(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_and_path() -> Result<(), SourceError> {
        let parsed = parse_http_url("http://example.org:8081/api/sensor/x/1/2")?;
        assert_eq!(
            parsed,
            ParsedUrl {
                host: "example.org".to_string(),
                port: 8081,
                path: "/api/sensor/x/1/2".to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn defaults_port_and_path() -> Result<(), SourceError> {
        let parsed = parse_http_url("http://example.org")?;
        assert_eq!(parsed.port, 80);
        assert_eq!(parsed.path, "/");
        Ok(())
    }

    #[test]
    fn rejects_https_and_bad_port() {
        assert!(matches!(
            parse_http_url("https://example.org"),
            Err(SourceError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_http_url("http://example.org:99999/"),
            Err(SourceError::InvalidUrl(_))
        ));
    }

    #[test]
    fn error_status_is_surfaced() {
        let result = split_response("HTTP/1.0 503 Service Unavailable\r\n\r\nbusy\n");
        assert!(matches!(result, Err(SourceError::Http(503, body)) if body == "busy"));
    }

    #[test]
    fn body_is_returned_on_success() -> Result<(), SourceError> {
        let body = split_response("HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n[1]")?;
        assert_eq!(body, "[1]");
        Ok(())
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let source = HttpSource::new("http://host/", DEFAULT_TIMEOUT);
        assert_eq!(source.endpoint, "http://host");
    }

    #[test]
    fn sensor_ids_are_encoded_as_one_segment() {
        assert_eq!(encode_segment("abc-1.2_x~"), "abc-1.2_x~");
        assert_eq!(encode_segment("a/b c"), "a%2Fb%20c");
        assert_eq!(encode_segment("ü"), "%C3%BC");
    }

    #[test]
    fn missing_host_is_rejected() {
        assert!(matches!(
            parse_http_url("http://:8080/x"),
            Err(SourceError::InvalidUrl(_))
        ));
    }
}
