use super::{FilterError, MAX_FORM_BODY_BYTES};
use http::{HeaderMap, Uri};
use std::net::IpAddr;
use tracing::warn;

/// User-Agent substrings that identify automation, scanners and raw HTTP
/// tooling. Matched case-insensitively. Coarse by design: false positives on
/// legitimate scripted clients are accepted collateral.
const USER_AGENT_DENYLIST: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scraper",
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "go-http-client",
    "java/",
    "libwww-perl",
    "scrapy",
    "nikto",
    "sqlmap",
    "nmap",
    "masscan",
    "zgrab",
];

/// Client-address headers only trusted infrastructure should ever set.
/// A public address in any of them means someone is trying to spoof their
/// source through the gateway.
const TRUST_HEADERS: &[&str] = &["x-forwarded-for", "x-real-ip", "x-client-ip"];

/// Parameter names associated with shell/code injection probing.
const PARAM_DENYLIST: &[&str] = &["eval", "exec", "system", "shell", "cmd"];

/// Heuristic pre-auth request filter. Stateless; every check is a pure
/// predicate over the inbound request.
pub struct TrafficFilter;

impl TrafficFilter {
    pub fn new() -> Self {
        Self
    }

    /// Inspect headers and query string. Runs before authentication on every
    /// proxied request.
    pub fn inspect(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        source: IpAddr,
    ) -> Result<(), FilterError> {
        self.check_user_agent(headers)
            .and_then(|_| self.check_trust_headers(headers))
            .and_then(|_| self.check_form_length(headers))
            .and_then(|_| self.check_query_params(uri))
            .map_err(|err| {
                warn!(source = %source, reason = %err, "request blocked by traffic filter");
                err
            })
    }

    /// Inspect a collected form-urlencoded body for denylisted field names.
    /// Only called for requests whose Content-Type is form-urlencoded.
    pub fn inspect_form_body(&self, body: &[u8], source: IpAddr) -> Result<(), FilterError> {
        for (key, _) in url::form_urlencoded::parse(body) {
            if PARAM_DENYLIST.contains(&key.as_ref()) {
                let err = FilterError::BlockedParameter(key.into_owned());
                warn!(source = %source, reason = %err, "request blocked by traffic filter");
                return Err(err);
            }
        }
        Ok(())
    }

    fn check_user_agent(&self, headers: &HeaderMap) -> Result<(), FilterError> {
        let agent = headers
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let lowered = agent.to_ascii_lowercase();

        for token in USER_AGENT_DENYLIST {
            if lowered.contains(token) {
                return Err(FilterError::SuspiciousUserAgent(agent.to_string()));
            }
        }
        Ok(())
    }

    fn check_trust_headers(&self, headers: &HeaderMap) -> Result<(), FilterError> {
        for &header in TRUST_HEADERS {
            // A header may be sent more than once; every instance counts.
            for value in headers.get_all(header) {
                let Ok(value) = value.to_str() else {
                    return Err(FilterError::SpoofedClientHeader { header });
                };

                // x-forwarded-for may carry a comma-separated chain.
                for entry in value.split(',') {
                    if !is_private_or_loopback(entry.trim()) {
                        return Err(FilterError::SpoofedClientHeader { header });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_form_length(&self, headers: &HeaderMap) -> Result<(), FilterError> {
        let is_form = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if !is_form {
            return Ok(());
        }

        let declared = headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        if declared > MAX_FORM_BODY_BYTES {
            return Err(FilterError::OversizedFormBody { declared });
        }
        Ok(())
    }

    fn check_query_params(&self, uri: &Uri) -> Result<(), FilterError> {
        let Some(query) = uri.query() else {
            return Ok(());
        };

        for (key, _) in url::form_urlencoded::parse(query.as_bytes()) {
            if PARAM_DENYLIST.contains(&key.as_ref()) {
                return Err(FilterError::BlockedParameter(key.into_owned()));
            }
        }
        Ok(())
    }
}

impl Default for TrafficFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn is_private_or_loopback(value: &str) -> bool {
    let Ok(addr) = value.parse::<IpAddr>() else {
        return false;
    };

    match addr {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
        }
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
    use std::net::Ipv4Addr;

    fn source() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    fn headers_with(name: http::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, value.parse().unwrap());
        headers
    }

    #[test]
    fn browser_user_agent_passes() {
        let filter = TrafficFilter::new();
        let headers = headers_with(
            USER_AGENT,
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
        );
        assert!(filter
            .inspect(&headers, &Uri::from_static("/api/v1/users/me"), source())
            .is_ok());
    }

    #[test]
    fn curl_user_agent_is_blocked() {
        let filter = TrafficFilter::new();
        let headers = headers_with(USER_AGENT, "curl/7.64.1");
        let result = filter.inspect(&headers, &Uri::from_static("/"), source());
        assert!(matches!(result, Err(FilterError::SuspiciousUserAgent(_))));
    }

    #[test]
    fn denylist_match_is_case_insensitive() {
        let filter = TrafficFilter::new();
        let headers = headers_with(USER_AGENT, "GoogleBot/2.1");
        let result = filter.inspect(&headers, &Uri::from_static("/"), source());
        assert!(matches!(result, Err(FilterError::SuspiciousUserAgent(_))));
    }

    #[test]
    fn missing_user_agent_passes() {
        let filter = TrafficFilter::new();
        assert!(filter
            .inspect(&HeaderMap::new(), &Uri::from_static("/"), source())
            .is_ok());
    }

    #[test]
    fn public_forwarded_for_is_spoofing() {
        let filter = TrafficFilter::new();
        let headers = headers_with("x-forwarded-for".parse().unwrap(), "203.0.113.9");
        let result = filter.inspect(&headers, &Uri::from_static("/"), source());
        assert!(matches!(
            result,
            Err(FilterError::SpoofedClientHeader {
                header: "x-forwarded-for"
            })
        ));
    }

    #[test]
    fn private_forwarded_chain_passes() {
        let filter = TrafficFilter::new();
        let headers = headers_with(
            "x-forwarded-for".parse().unwrap(),
            "10.0.4.2, 172.20.0.1, 192.168.1.5",
        );
        assert!(filter
            .inspect(&headers, &Uri::from_static("/"), source())
            .is_ok());
    }

    #[test]
    fn every_forwarded_for_instance_is_checked() {
        let filter = TrafficFilter::new();
        let mut headers = HeaderMap::new();
        headers.append("x-forwarded-for", "10.0.0.1".parse().unwrap());
        headers.append("x-forwarded-for", "203.0.113.9".parse().unwrap());

        let result = filter.inspect(&headers, &Uri::from_static("/"), source());
        assert!(matches!(
            result,
            Err(FilterError::SpoofedClientHeader {
                header: "x-forwarded-for"
            })
        ));
    }

    #[test]
    fn unparseable_real_ip_is_spoofing() {
        let filter = TrafficFilter::new();
        let headers = headers_with("x-real-ip".parse().unwrap(), "not-an-address");
        let result = filter.inspect(&headers, &Uri::from_static("/"), source());
        assert!(matches!(result, Err(FilterError::SpoofedClientHeader { .. })));
    }

    #[test]
    fn oversized_form_body_is_rejected() {
        let filter = TrafficFilter::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        headers.insert(CONTENT_LENGTH, "2000000".parse().unwrap());

        let result = filter.inspect(&headers, &Uri::from_static("/"), source());
        assert!(matches!(
            result,
            Err(FilterError::OversizedFormBody { declared: 2_000_000 })
        ));
        assert!(result.unwrap_err().is_payload_too_large());
    }

    #[test]
    fn large_json_body_is_not_subject_to_form_limit() {
        let filter = TrafficFilter::new();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(CONTENT_LENGTH, "2000000".parse().unwrap());

        assert!(filter
            .inspect(&headers, &Uri::from_static("/"), source())
            .is_ok());
    }

    #[test]
    fn denylisted_query_key_is_blocked() {
        let filter = TrafficFilter::new();
        let uri = Uri::from_static("/api/v1/search?q=hello&cmd=rm");
        let result = filter.inspect(&HeaderMap::new(), &uri, source());
        assert!(matches!(result, Err(FilterError::BlockedParameter(key)) if key == "cmd"));
    }

    #[test]
    fn denylist_requires_exact_key_match() {
        let filter = TrafficFilter::new();
        let uri = Uri::from_static("/api/v1/search?command=list&evaluate=true");
        assert!(filter.inspect(&HeaderMap::new(), &uri, source()).is_ok());
    }

    #[test]
    fn denylisted_form_field_is_blocked() {
        let filter = TrafficFilter::new();
        let result = filter.inspect_form_body(b"name=alice&shell=%2Fbin%2Fsh", source());
        assert!(matches!(result, Err(FilterError::BlockedParameter(key)) if key == "shell"));

        assert!(filter.inspect_form_body(b"name=alice&title=ok", source()).is_ok());
    }
}
