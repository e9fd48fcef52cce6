//! WHOIS/RDAP resolver lens
//!
//! Answers "who owns this address" from two HTTP sources:
//!
//! - an IP info API for the BGP origin (ASN, announced prefix, AS country)
//! - the RDAP `ip` endpoint of a registry (or an RDAP bootstrap redirector)
//!   for the registered network object
//!
//! The two are merged into one [`WhoisResponse`]. The coordinator only talks
//! to the [`WhoisResolver`] trait, so tests and other deployments can plug in
//! their own source.

mod types;

pub use types::{LookupOptions, ResolveError, WhoisEntity, WhoisNetwork, WhoisResponse};

use ipnet::{Ipv4Subnets, Ipv6Subnets};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::net::IpAddr;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Default RDAP service (bootstrap redirector)
pub const DEFAULT_RDAP_URL: &str = "https://rdap.org";

/// Default BGP origin lookup API
pub const DEFAULT_ASN_API_URL: &str = "https://api.bgpkit.com/v3/utils/ip";

/// Placeholder reported when the announced prefix is unknown
pub const UNKNOWN_CIDR: &str = "NA";

/// Source of WHOIS data for a single address
pub trait WhoisResolver: Send + Sync {
    fn lookup(&self, addr: IpAddr, options: &LookupOptions) -> Result<WhoisResponse, ResolveError>;
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct OriginInfo {
    #[serde(default, alias = "location")]
    country: Option<String>,
    #[serde(default, alias = "network")]
    asn: Option<OriginRoute>,
}

#[derive(Debug, Deserialize)]
struct OriginRoute {
    asn: i64,
    prefix: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RdapNetwork {
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, rename = "startAddress")]
    start_address: Option<String>,
    #[serde(default, rename = "endAddress")]
    end_address: Option<String>,
    #[serde(default)]
    cidr0_cidrs: Vec<Cidr0Cidr>,
    #[serde(default)]
    entities: Vec<RdapEntity>,
}

/// Prefix entry of the `cidr0` RDAP extension
#[derive(Debug, Deserialize)]
struct Cidr0Cidr {
    #[serde(default)]
    v4prefix: Option<String>,
    #[serde(default)]
    v6prefix: Option<String>,
    length: u8,
}

#[derive(Debug, Deserialize)]
struct RdapEntity {
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    entities: Vec<RdapEntity>,
}

// =============================================================================
// Response shaping
// =============================================================================

fn build_response(
    addr: IpAddr,
    origin: Option<OriginInfo>,
    network: Option<RdapNetwork>,
    depth: u8,
) -> WhoisResponse {
    let mut response = WhoisResponse {
        asn_cidr: Some(UNKNOWN_CIDR.to_string()),
        ..Default::default()
    };
    response
        .extra
        .insert("query".to_string(), Value::String(addr.to_string()));

    let mut origin_country = None;
    if let Some(origin) = origin {
        origin_country = origin.country;
        if let Some(route) = origin.asn {
            response.asn = Some(route.asn.to_string());
            response.asn_cidr = Some(route.prefix);
            response.asn_description = route.name;
            response.asn_country_code = route.country;
        }
    }

    let network = network.map(|n| to_whois_network(n, depth));
    if response.asn_country_code.is_none() {
        response.asn_country_code = origin_country
            .or_else(|| network.as_ref().and_then(|n| n.country.clone()));
    }
    response.network = network;
    response
}

fn to_whois_network(network: RdapNetwork, depth: u8) -> WhoisNetwork {
    let mut cidrs: Vec<String> = network
        .cidr0_cidrs
        .iter()
        .filter_map(|c| {
            c.v4prefix
                .as_ref()
                .or(c.v6prefix.as_ref())
                .map(|prefix| format!("{}/{}", prefix, c.length))
        })
        .collect();
    if cidrs.is_empty() {
        if let (Some(start), Some(end)) = (&network.start_address, &network.end_address) {
            cidrs = range_cidrs(start, end);
        }
    }

    let mut entities = Vec::new();
    collect_entities(&network.entities, depth, &mut entities);

    WhoisNetwork {
        handle: network.handle,
        name: network.name,
        cidr: (!cidrs.is_empty()).then(|| cidrs.join(", ")),
        country: network.country,
        start_address: network.start_address,
        end_address: network.end_address,
        entities,
    }
}

/// Smallest set of networks covering `start..=end`
fn range_cidrs(start: &str, end: &str) -> Vec<String> {
    match (start.parse::<IpAddr>(), end.parse::<IpAddr>()) {
        (Ok(IpAddr::V4(start)), Ok(IpAddr::V4(end))) => Ipv4Subnets::new(start, end, 0)
            .map(|n| n.to_string())
            .collect(),
        (Ok(IpAddr::V6(start)), Ok(IpAddr::V6(end))) => Ipv6Subnets::new(start, end, 0)
            .map(|n| n.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn collect_entities(entities: &[RdapEntity], depth: u8, out: &mut Vec<WhoisEntity>) {
    if depth == 0 {
        return;
    }
    for entity in entities {
        if let Some(handle) = &entity.handle {
            out.push(WhoisEntity {
                handle: handle.clone(),
                roles: entity.roles.clone(),
            });
        }
        collect_entities(&entity.entities, depth - 1, out);
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// HTTP resolver backed by an RDAP service and an IP info API
///
/// # Example
///
/// ```rust,ignore
/// use cidrcache::lens::rdap::{LookupOptions, RdapResolver, WhoisResolver};
/// use std::time::Duration;
///
/// let resolver = RdapResolver::new(
///     "https://rdap.org",
///     "https://api.bgpkit.com/v3/utils/ip",
///     Duration::from_secs(5),
/// );
/// let response = resolver.lookup("8.8.8.8".parse()?, &LookupOptions::default())?;
/// println!("{:?} {:?}", response.asn_country_code, response.asn_cidr);
/// ```
pub struct RdapResolver {
    agent: ureq::Agent,
    rdap_url: String,
    asn_api_url: String,
}

impl RdapResolver {
    /// Create a resolver; `timeout` bounds every HTTP request
    pub fn new(rdap_url: &str, asn_api_url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            rdap_url: rdap_url.trim_end_matches('/').to_string(),
            asn_api_url: asn_api_url.to_string(),
        }
    }

    fn lookup_origin(
        &self,
        addr: IpAddr,
        options: &LookupOptions,
    ) -> Result<OriginInfo, ResolveError> {
        let url = format!("{}?ip={}", self.asn_api_url, addr);
        self.get_json(&url, options)
    }

    fn lookup_network(
        &self,
        addr: IpAddr,
        options: &LookupOptions,
    ) -> Result<RdapNetwork, ResolveError> {
        let url = format!("{}/ip/{}", self.rdap_url, addr);
        self.get_json(&url, options)
    }

    /// GET `url` and decode the JSON body, retrying transient failures
    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &LookupOptions,
    ) -> Result<T, ResolveError> {
        let mut attempt = 0;
        loop {
            let result = self
                .agent
                .get(url)
                .header("Accept", "application/rdap+json, application/json")
                .call()
                .and_then(|mut resp| resp.body_mut().read_json::<T>());

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => classify_error(url, &e),
            };

            if attempt >= options.retry_count || !err.is_retryable() {
                return Err(err);
            }
            attempt += 1;

            if err.is_rate_limited() {
                debug!(
                    "rate limited by {}, waiting {:?} before retry {}",
                    url, options.rate_limit_timeout, attempt
                );
                thread::sleep(options.rate_limit_timeout);
            } else {
                debug!("retrying {} after error: {}", url, err);
            }
        }
    }
}

impl WhoisResolver for RdapResolver {
    fn lookup(&self, addr: IpAddr, options: &LookupOptions) -> Result<WhoisResponse, ResolveError> {
        let origin = match self.lookup_origin(addr, options) {
            Ok(origin) => Some(origin),
            Err(e) => {
                debug!("origin lookup for {} failed: {}", addr, e);
                None
            }
        };

        let network = match self.lookup_network(addr, options) {
            Ok(network) => Some(network),
            // The origin data alone is still a usable answer
            Err(e) if origin.is_some() => {
                warn!("RDAP lookup for {} failed: {}", addr, e);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(build_response(addr, origin, network, options.depth))
    }
}

fn classify_error(url: &str, e: &ureq::Error) -> ResolveError {
    match e {
        ureq::Error::StatusCode(status) => ResolveError::Http {
            status: *status,
            url: url.to_string(),
        },
        ureq::Error::Timeout(_) => ResolveError::Timeout(format!("{}: {}", url, e)),
        ureq::Error::Json(_) => ResolveError::InvalidResponse(e.to_string()),
        _ => ResolveError::Transport(e.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RDAP_GOOGLE: &str = r#"{
        "objectClassName": "ip network",
        "handle": "NET-8-8-8-0-2",
        "name": "GOGL",
        "startAddress": "8.8.8.0",
        "endAddress": "8.8.8.255",
        "cidr0_cidrs": [{"v4prefix": "8.8.8.0", "length": 24}],
        "entities": [
            {
                "handle": "GOGL",
                "roles": ["registrant"],
                "entities": [{"handle": "ABUSE5250-ARIN", "roles": ["abuse"]}]
            }
        ]
    }"#;

    const ORIGIN_GOOGLE: &str = r#"{
        "ip": "8.8.8.8",
        "country": "US",
        "asn": {"asn": 15169, "prefix": "8.8.8.0/24", "rpki": "valid", "name": "GOOGLE", "country": "US"}
    }"#;

    fn addr() -> IpAddr {
        "8.8.8.8".parse().unwrap()
    }

    #[test]
    fn test_build_response_merges_sources() {
        let origin: OriginInfo = serde_json::from_str(ORIGIN_GOOGLE).unwrap();
        let network: RdapNetwork = serde_json::from_str(RDAP_GOOGLE).unwrap();
        let response = build_response(addr(), Some(origin), Some(network), 1);

        assert_eq!(response.asn.as_deref(), Some("15169"));
        assert_eq!(response.asn_cidr.as_deref(), Some("8.8.8.0/24"));
        assert_eq!(response.asn_country_code.as_deref(), Some("US"));
        assert_eq!(response.asn_description.as_deref(), Some("GOOGLE"));
        assert_eq!(response.extra["query"], "8.8.8.8");

        let network = response.network.unwrap();
        assert_eq!(network.handle.as_deref(), Some("NET-8-8-8-0-2"));
        assert_eq!(network.cidr.as_deref(), Some("8.8.8.0/24"));
        assert_eq!(
            network.entities,
            vec![WhoisEntity {
                handle: "GOGL".to_string(),
                roles: vec!["registrant".to_string()]
            }]
        );
    }

    #[test]
    fn test_build_response_without_origin() {
        let network: RdapNetwork = serde_json::from_str(
            r#"{"handle": "X", "country": "DE", "startAddress": "10.0.0.0", "endAddress": "10.0.1.255"}"#,
        )
        .unwrap();
        let response = build_response(addr(), None, Some(network), 0);

        assert_eq!(response.asn_cidr.as_deref(), Some(UNKNOWN_CIDR));
        assert_eq!(response.asn, None);
        // Country falls back to the registry's
        assert_eq!(response.asn_country_code.as_deref(), Some("DE"));
        // Range converted to networks when cidr0 is absent
        assert_eq!(
            response.network.unwrap().cidr.as_deref(),
            Some("10.0.0.0/23")
        );
    }

    #[test]
    fn test_entity_depth() {
        let network: RdapNetwork = serde_json::from_str(RDAP_GOOGLE).unwrap();
        assert!(to_whois_network(network, 0).entities.is_empty());

        let network: RdapNetwork = serde_json::from_str(RDAP_GOOGLE).unwrap();
        let handles: Vec<String> = to_whois_network(network, 2)
            .entities
            .into_iter()
            .map(|e| e.handle)
            .collect();
        assert_eq!(handles, vec!["GOGL", "ABUSE5250-ARIN"]);
    }

    #[test]
    fn test_range_cidrs() {
        assert_eq!(
            range_cidrs("192.0.2.0", "192.0.2.127"),
            vec!["192.0.2.0/25"]
        );
        assert_eq!(
            range_cidrs("10.0.0.0", "10.0.2.255"),
            vec!["10.0.0.0/23", "10.0.2.0/24"]
        );
        assert_eq!(range_cidrs("2001:db8::", "2001:db8::ffff"), vec!["2001:db8::/112"]);
        assert!(range_cidrs("10.0.0.0", "2001:db8::").is_empty());
        assert!(range_cidrs("garbage", "10.0.0.1").is_empty());
    }

    #[test]
    fn test_retryable_errors() {
        let http = |status| ResolveError::Http {
            status,
            url: "u".to_string(),
        };
        assert!(http(429).is_retryable());
        assert!(http(429).is_rate_limited());
        assert!(http(503).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(ResolveError::Timeout("t".into()).is_retryable());
        assert!(ResolveError::Transport("t".into()).is_retryable());
        assert!(!ResolveError::InvalidResponse("x".into()).is_retryable());
    }

    fn options(retry_count: u32) -> LookupOptions {
        LookupOptions {
            depth: 1,
            retry_count,
            rate_limit_timeout: Duration::from_millis(10),
        }
    }

    fn resolver_for(server: &MockServer) -> RdapResolver {
        RdapResolver::new(
            &server.uri(),
            &format!("{}/origin", server.uri()),
            Duration::from_secs(5),
        )
    }

    /// Run the blocking lookup off the async runtime
    async fn lookup_blocking(
        resolver: RdapResolver,
        retry_count: u32,
    ) -> Result<WhoisResponse, ResolveError> {
        tokio::task::spawn_blocking(move || resolver.lookup(addr(), &options(retry_count)))
            .await
            .unwrap()
    }

    async fn requested_paths(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|req| req.url.path().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_lookup_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/ip/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RDAP_GOOGLE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/origin"))
            .and(query_param("ip", "8.8.8.8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ORIGIN_GOOGLE))
            .mount(&server)
            .await;

        let response = lookup_blocking(resolver_for(&server), 0).await.unwrap();

        assert_eq!(response.asn_country_code.as_deref(), Some("US"));
        assert_eq!(response.asn_cidr.as_deref(), Some("8.8.8.0/24"));
        assert_eq!(response.network.unwrap().name.as_deref(), Some("GOGL"));
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/ip/"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/ip/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RDAP_GOOGLE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/origin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = lookup_blocking(resolver_for(&server), 1).await.unwrap();

        // Origin failed, so the country comes from the RDAP record (none here)
        assert_eq!(response.asn_cidr.as_deref(), Some(UNKNOWN_CIDR));
        assert_eq!(response.network.unwrap().cidr.as_deref(), Some("8.8.8.0/24"));

        let paths = requested_paths(&server).await;
        assert_eq!(paths.iter().filter(|p| p.starts_with("/ip/")).count(), 2);
        // 404 is not retried
        assert_eq!(paths.iter().filter(|p| *p == "/origin").count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_fails_when_both_sources_fail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        match lookup_blocking(resolver_for(&server), 3).await {
            Err(ResolveError::Http { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected HTTP error, got {:?}", other),
        }
        assert_eq!(requested_paths(&server).await.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        assert!(matches!(
            lookup_blocking(resolver_for(&server), 1).await,
            Err(ResolveError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{}", port);
        let resolver = RdapResolver::new(&url, &url, Duration::from_secs(2));

        assert!(resolver.lookup(addr(), &options(1)).is_err());
    }
}
