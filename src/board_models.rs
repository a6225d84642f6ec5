// Data model and fetching for the bus arrival board
//
// Upstream API: https://arrivelah2.busrouter.sg/?id=<stopId>
// Returns { "services": [ { "no": "151", "next": { "time": "..." },
//                            "subsequent": {...}, "next2": {...} } ] }

use crate::board_config::StopConfig;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Data Structures
// ============================================================================

/// Bus route identifier, stored trimmed and uppercased.
///
/// Ordering is natural: the numeric prefix compares as a number, then the
/// suffix. Services without a numeric prefix sort after all numbered ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceNumber(String);

impl ServiceNumber {
    pub fn new(raw: &str) -> Self {
        ServiceNumber(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn natural_key(&self) -> (Option<u64>, &str) {
        let split = self
            .0
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.0.len());

        if split == 0 {
            return (None, &self.0);
        }

        match self.0[..split].parse::<u64>() {
            Ok(number) => (Some(number), &self.0[split..]),
            Err(_) => (None, &self.0),
        }
    }
}

impl Ord for ServiceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        let natural = match (self.natural_key(), other.natural_key()) {
            ((Some(a), suffix_a), (Some(b), suffix_b)) => {
                a.cmp(&b).then_with(|| suffix_a.cmp(suffix_b))
            }
            ((Some(_), _), (None, _)) => Ordering::Less,
            ((None, _), (Some(_), _)) => Ordering::Greater,
            ((None, a), (None, b)) => a.cmp(b),
        };

        // "0151" and "151" are naturally equal but not Eq
        natural.then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for ServiceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ServiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Next and subsequent arrival for one service at one stop.
///
/// Timestamps are kept as the upstream ISO-8601 strings and parsed when formatted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArrivalEntry {
    pub next: Option<String>,
    pub subsequent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawService {
    pub service: ServiceNumber,
    pub next: Option<String>,
    pub subsequent: Option<String>,
}

/// Arrivals for every configured stop, as of one refresh cycle.
/// Always rebuilt as a whole, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct StopSnapshot {
    pub stops: HashMap<String, BTreeMap<ServiceNumber, ArrivalEntry>>,
    pub fetched_at: DateTime<Utc>,
}

impl StopSnapshot {
    pub fn from_results<I>(results: I, fetched_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (String, Vec<RawService>)>,
    {
        let mut stops: HashMap<String, BTreeMap<ServiceNumber, ArrivalEntry>> = HashMap::new();

        for (stop_id, services) in results {
            let entries = stops.entry(stop_id).or_default();
            for raw in services {
                // First listing of a service wins
                entries.entry(raw.service).or_insert(ArrivalEntry {
                    next: raw.next,
                    subsequent: raw.subsequent,
                });
            }
        }

        StopSnapshot { stops, fetched_at }
    }

    pub fn services_at(&self, stop_id: &str) -> Option<&BTreeMap<ServiceNumber, ArrivalEntry>> {
        self.stops.get(stop_id)
    }

    pub fn entry(&self, stop_id: &str, service: &ServiceNumber) -> Option<&ArrivalEntry> {
        self.stops.get(stop_id).and_then(|services| services.get(service))
    }

    pub fn service_count(&self, stop_id: &str) -> usize {
        self.stops.get(stop_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Union of service numbers across the configured stops, in natural order.
    /// Snapshot entries for stops that are not configured are ignored.
    pub fn service_union(&self, stops: &[StopConfig]) -> BTreeSet<ServiceNumber> {
        stops
            .iter()
            .filter_map(|stop| self.services_at(&stop.id))
            .flat_map(|services| services.keys().cloned())
            .collect()
    }
}

// ============================================================================
// Upstream payload
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    services: Vec<UpstreamService>,
}

#[derive(Debug, Deserialize)]
struct UpstreamService {
    no: String,
    next: Option<UpstreamArrival>,
    subsequent: Option<UpstreamArrival>,
    next2: Option<UpstreamArrival>,
}

#[derive(Debug, Deserialize)]
struct UpstreamArrival {
    time: Option<String>,
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum BoardError {
    NetworkError(String),
    ParseError(String),
    ConfigError(String),
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardError::NetworkError(e) => write!(f, "Network error: {}", e),
            BoardError::ParseError(e) => write!(f, "Parse error: {}", e),
            BoardError::ConfigError(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for BoardError {}

pub type Result<T> = std::result::Result<T, BoardError>;

// ============================================================================
// Fetching
// ============================================================================

/// Anything that can produce the current services for a stop.
///
/// Failures are absorbed by the implementation: "fetch failed" and
/// "no data" both come back as an empty list.
pub trait ArrivalSource {
    async fn fetch(&self, stop_id: &str) -> Vec<RawService>;
}

pub struct BoardModels {
    client: Client,
    base_url: String,
}

impl BoardModels {
    pub const REQUEST_TIMEOUT_SECS: u64 = 15;

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BoardError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(BoardModels {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Fetch and parse the services for one stop, surfacing every failure.
    pub async fn fetch_services(&self, stop_id: &str) -> Result<Vec<RawService>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("id", stop_id)])
            .send()
            .await
            .map_err(|e| {
                BoardError::NetworkError(format!("Failed to fetch stop {}: {}", stop_id, e))
            })?;

        if !response.status().is_success() {
            return Err(BoardError::NetworkError(format!(
                "API returned error for stop {}: {}",
                stop_id,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BoardError::NetworkError(format!("Failed to read response: {}", e)))?;

        Self::parse_services(&body)
    }

    pub fn parse_services(body: &str) -> Result<Vec<RawService>> {
        let payload: UpstreamResponse = serde_json::from_str(body)
            .map_err(|e| BoardError::ParseError(format!("Invalid JSON response: {}", e)))?;

        let services = payload
            .services
            .into_iter()
            .filter_map(|svc| {
                let service = ServiceNumber::new(&svc.no);
                if service.is_empty() {
                    return None;
                }

                let subsequent = svc.subsequent.or(svc.next2);
                Some(RawService {
                    service,
                    next: svc.next.and_then(|a| a.time),
                    subsequent: subsequent.and_then(|a| a.time),
                })
            })
            .collect();

        Ok(services)
    }
}

impl ArrivalSource for BoardModels {
    async fn fetch(&self, stop_id: &str) -> Vec<RawService> {
        match self.fetch_services(stop_id).await {
            Ok(services) => {
                debug!("Stop {}: {} services", stop_id, services.len());
                services
            }
            Err(e) => {
                warn!("Could not fetch arrivals for stop {} ({})", stop_id, e);
                Vec::new()
            }
        }
    }
}

/// Fetch every configured stop at once and build the snapshot
/// only after all of them have answered.
pub async fn fetch_snapshot<S: ArrivalSource>(source: &S, stops: &[StopConfig]) -> StopSnapshot {
    let fetches = stops.iter().map(|stop| async move {
        let services = source.fetch(&stop.id).await;
        (stop.id.clone(), services)
    });

    let results = join_all(fetches).await;
    StopSnapshot::from_results(results, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve every connection on a local port with one canned HTTP response.
    async fn serve_canned(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/", addr)
    }

    fn stop(label: &str, id: &str) -> StopConfig {
        StopConfig {
            label: label.to_string(),
            id: id.to_string(),
        }
    }

    fn raw(no: &str, next: Option<&str>) -> RawService {
        RawService {
            service: ServiceNumber::new(no),
            next: next.map(String::from),
            subsequent: None,
        }
    }

    struct FakeSource {
        services: HashMap<String, Vec<RawService>>,
        calls: Mutex<Vec<String>>,
    }

    impl ArrivalSource for FakeSource {
        async fn fetch(&self, stop_id: &str) -> Vec<RawService> {
            self.calls.lock().unwrap().push(stop_id.to_string());
            self.services.get(stop_id).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn service_numbers_compare_case_insensitively() {
        assert_eq!(ServiceNumber::new("151a"), ServiceNumber::new(" 151A "));
        assert_eq!(ServiceNumber::new("nr1").as_str(), "NR1");
    }

    #[test]
    fn service_numbers_sort_naturally() {
        let mut services: Vec<ServiceNumber> = ["154", "CT18", "151A", "14", "151", "2", "NR1"]
            .iter()
            .map(|s| ServiceNumber::new(s))
            .collect();
        services.sort();

        let order: Vec<&str> = services.iter().map(|s| s.as_str()).collect();
        assert_eq!(order, vec!["2", "14", "151", "151A", "154", "CT18", "NR1"]);
    }

    #[test]
    fn parse_services_reads_upstream_payload() {
        let body = r#"{"services":[
            {"no":"151","operator":"SBST",
             "next":{"time":"2024-05-01T08:02:00+08:00","duration_ms":120000},
             "subsequent":{"time":"2024-05-01T08:10:00+08:00"}},
            {"no":"154","next":{"time":"2024-05-01T08:05:00+08:00"},
             "next2":{"time":"2024-05-01T08:15:00+08:00"}},
            {"no":"52","next":null},
            {"no":"  "}
        ]}"#;

        let services = BoardModels::parse_services(body).unwrap();
        assert_eq!(services.len(), 3);

        assert_eq!(services[0].service, ServiceNumber::new("151"));
        assert_eq!(services[0].next.as_deref(), Some("2024-05-01T08:02:00+08:00"));
        assert_eq!(services[0].subsequent.as_deref(), Some("2024-05-01T08:10:00+08:00"));

        // next2 stands in for a missing subsequent
        assert_eq!(services[1].subsequent.as_deref(), Some("2024-05-01T08:15:00+08:00"));

        assert_eq!(services[2].next, None);
        assert_eq!(services[2].subsequent, None);
    }

    #[test]
    fn parse_services_rejects_malformed_body() {
        assert!(matches!(
            BoardModels::parse_services("<html>502 Bad Gateway</html>"),
            Err(BoardError::ParseError(_))
        ));
        assert!(BoardModels::parse_services(r#"{"error":"no stop"}"#).is_err());
    }

    #[test]
    fn snapshot_keeps_first_listing_of_a_service() {
        let now = Utc::now();
        let snapshot = StopSnapshot::from_results(
            vec![(
                "51099".to_string(),
                vec![raw("151", Some("first")), raw("151", Some("second"))],
            )],
            now,
        );

        let entry = snapshot.entry("51099", &ServiceNumber::new("151")).unwrap();
        assert_eq!(entry.next.as_deref(), Some("first"));
        assert_eq!(snapshot.service_count("51099"), 1);
    }

    #[test]
    fn service_union_ignores_unconfigured_stops() {
        let snapshot = StopSnapshot::from_results(
            vec![
                ("51099".to_string(), vec![raw("151", None), raw("154", None)]),
                ("51091".to_string(), vec![raw("151", None), raw("52", None)]),
                ("99999".to_string(), vec![raw("999", None)]),
            ],
            Utc::now(),
        );

        let union = snapshot.service_union(&[stop("college", "51099"), stop("opposite", "51091")]);
        let names: Vec<&str> = union.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["52", "151", "154"]);
    }

    #[tokio::test]
    async fn fetch_snapshot_queries_every_stop() {
        let mut services = HashMap::new();
        services.insert("51099".to_string(), vec![raw("151", None)]);
        let source = FakeSource {
            services,
            calls: Mutex::new(Vec::new()),
        };

        let stops = [stop("college", "51099"), stop("opposite", "51091")];
        let snapshot = fetch_snapshot(&source, &stops).await;

        let mut calls = source.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["51091", "51099"]);
        assert_eq!(snapshot.service_count("51099"), 1);
        // A stop with nothing to report is still present, just empty
        assert_eq!(snapshot.services_at("51091").map(|s| s.len()), Some(0));
    }

    #[tokio::test]
    async fn fetch_returns_empty_on_connection_failure() {
        let models = BoardModels::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();

        assert!(models.fetch_services("51099").await.is_err());
        assert!(models.fetch("51099").await.is_empty());
    }

    #[tokio::test]
    async fn server_error_status_is_a_network_error() {
        let base_url =
            serve_canned("500 Internal Server Error", r#"{"services":[{"no":"151"}]}"#).await;
        let models = BoardModels::new(&base_url, Duration::from_secs(2)).unwrap();

        assert!(matches!(
            models.fetch_services("51099").await,
            Err(BoardError::NetworkError(_))
        ));
        assert!(models.fetch("51099").await.is_empty());
    }

    #[tokio::test]
    async fn unreadable_body_is_a_parse_error() {
        let base_url = serve_canned("200 OK", "<html>maintenance</html>").await;
        let models = BoardModels::new(&base_url, Duration::from_secs(2)).unwrap();

        assert!(matches!(
            models.fetch_services("51099").await,
            Err(BoardError::ParseError(_))
        ));
        assert!(models.fetch("51099").await.is_empty());
    }

    #[tokio::test]
    async fn successful_response_is_parsed() {
        let base_url = serve_canned("200 OK", r#"{"services":[{"no":"151"}]}"#).await;
        let models = BoardModels::new(&base_url, Duration::from_secs(2)).unwrap();

        let services = models.fetch("51099").await;
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].service.as_str(), "151");
        assert_eq!(services[0].next, None);
    }
}
