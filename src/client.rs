use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CONNECTION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};
use crate::geometry::{CommunityIndex, CommunityLookup, FeatureSource, GeoJsonSource};
use crate::output::OutputName;
use crate::request::{QuerySpec, RequestDescriptor, plan};
use crate::sources::{is_http_url, source_to_base_url};
use crate::spatial::{QueryTarget, SpatialTargetResolver};
use crate::table::{AssembleOptions, Assembled, HourFilter, ObservationRow, assemble};
use crate::url_builder::{PAGE_ROW_COUNT, descriptor_url};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Named source (`"bcws"`) or an explicit `http(s)` base URL.
    pub source: String,
    pub page_row_count: u32,
    pub user_agent: String,
    /// Sent as the `Cookie` header; the datamart load balancer pins sessions with it.
    pub route_cookie: Option<String>,
    pub verify_tls: bool,
    pub timeout: Option<Duration>,
    /// Point layer with a `Name` property, used for community queries.
    pub communities_path: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            source: "bcws".to_string(),
            page_row_count: PAGE_ROW_COUNT,
            user_agent: "wfwx-datamart-rs/0.1".to_string(),
            route_cookie: Some("ROUTEID=.3".to_string()),
            verify_tls: true,
            timeout: Some(Duration::from_secs(120)),
            communities_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Issues a single GET. Implementations must not retry.
pub trait Transport {
    fn get(&self, url: &Url) -> Result<TransportResponse>;
}

/// `reqwest` blocking transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(opts: &ClientOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&opts.user_agent)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        if let Some(cookie) = &opts.route_cookie {
            headers.insert(COOKIE, header_value(cookie)?);
        }

        let mut builder = HttpClient::builder()
            .default_headers(headers)
            .timeout(opts.timeout);
        if !opts.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            http: builder.build()?,
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> Result<TransportResponse> {
        let resp = self.http.get(url.clone()).send()?;
        let status = resp.status().as_u16();
        let body = resp.text()?;
        Ok(TransportResponse { status, body })
    }
}

fn header_value(s: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(s)
        .map_err(|_| Error::InvalidParameter(format!("invalid header value: {s:?}")))
}

/// Result of a completed download.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Saved {
        path: PathBuf,
        rows: usize,
        /// Number of (spatial term, month window) queries issued.
        queries: usize,
    },
    /// Nothing survived assembly; no file was written.
    NoData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    total_page_count: Option<u32>,
    collection: Option<Vec<ObservationRow>>,
}

#[derive(Debug, Deserialize)]
struct Rejection {
    #[serde(default)]
    messages: Vec<RejectionMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectionMessage {
    #[serde(default)]
    message_template: String,
    #[serde(default)]
    message_arguments: Value,
}

pub struct Client {
    opts: ClientOptions,
    base_url: Url,
    transport: Box<dyn Transport>,
    features: Box<dyn FeatureSource>,
    communities: Option<Box<dyn CommunityLookup>>,
}

impl Client {
    pub fn new(opts: ClientOptions) -> Result<Self> {
        let transport = HttpTransport::new(&opts)?;
        Self::with_transport(opts, transport)
    }

    /// Build a client on top of a custom transport.
    pub fn with_transport(opts: ClientOptions, transport: impl Transport + 'static) -> Result<Self> {
        let base = if is_http_url(&opts.source) {
            opts.source.as_str()
        } else {
            source_to_base_url(&opts.source)
                .ok_or_else(|| Error::InvalidParameter(format!("unknown source: {}", opts.source)))?
        };
        let base_url = Url::parse(base)?;
        if opts.page_row_count == 0 {
            return Err(Error::InvalidParameter("page_row_count must be at least 1".into()));
        }

        Ok(Self {
            opts,
            base_url,
            transport: Box::new(transport),
            features: Box::new(GeoJsonSource),
            communities: None,
        })
    }

    pub fn with_feature_source(mut self, features: impl FeatureSource + 'static) -> Self {
        self.features = Box::new(features);
        self
    }

    /// Use `lookup` for community queries instead of loading `communities_path`.
    pub fn with_community_lookup(mut self, lookup: impl CommunityLookup + 'static) -> Self {
        self.communities = Some(Box::new(lookup));
        self
    }

    pub fn default_client() -> Result<Self> {
        Self::new(ClientOptions::default())
    }

    pub fn options(&self) -> &ClientOptions {
        &self.opts
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetch every page of one descriptor, in page order.
    ///
    /// Page 1 also reports the page count; a count of zero yields no rows.
    pub fn fetch(&self, descriptor: &RequestDescriptor) -> Result<Vec<ObservationRow>> {
        let (total, mut rows) = self.fetch_page(&descriptor.with_page(1))?;
        debug!("{} {}: {total} page(s)", descriptor.data_type, descriptor.spatial_term);
        for page in 2..=total {
            let (_, more) = self.fetch_page(&descriptor.with_page(page))?;
            rows.extend(more);
        }
        Ok(rows)
    }

    /// Fetch all descriptors sequentially, concatenating rows in plan order.
    pub fn fetch_all(&self, descriptors: &[RequestDescriptor]) -> Result<Vec<ObservationRow>> {
        let mut rows = Vec::new();
        for (i, d) in descriptors.iter().enumerate() {
            debug!("request {}/{}", i + 1, descriptors.len());
            rows.extend(self.fetch(d)?);
        }
        Ok(rows)
    }

    fn fetch_page(&self, descriptor: &RequestDescriptor) -> Result<(u32, Vec<ObservationRow>)> {
        let url = descriptor_url(&self.base_url, descriptor, self.opts.page_row_count)?;
        debug!("GET {url}");
        let resp = self.transport.get(&url)?;
        if resp.status >= 400 {
            return Err(rejection(&url, &resp.body));
        }

        let page: Page = serde_json::from_str(&resp.body)?;
        let total = page.total_page_count.ok_or_else(|| {
            Error::UnexpectedResponse(format!("totalPageCount missing in response to {url}"))
        })?;
        if total == 0 {
            return Ok((0, Vec::new()));
        }
        let rows = page.collection.ok_or_else(|| {
            Error::UnexpectedResponse(format!("collection missing in response to {url}"))
        })?;
        Ok((total, rows))
    }

    /// Run a complete download and write the resulting CSV under `spec.out_path`.
    pub fn download(&self, spec: &QuerySpec) -> Result<DownloadOutcome> {
        info!("verifying input parameters");
        spec.validate()?;
        let range = spec.date_range()?;
        let target = spec.target()?;

        info!("generating weather date list");
        let windows = spec.windows(&range);
        debug!("{} month window(s) between {} and {}", windows.len(), range.start(), range.end());

        fs::create_dir_all(&spec.out_path)?;

        let loaded;
        let lookup = match self.communities.as_deref() {
            Some(l) => Some(l),
            None if matches!(target, QueryTarget::Communities { .. }) => {
                loaded = self.load_communities()?;
                Some(&loaded as &dyn CommunityLookup)
            }
            None => None,
        };
        let mut resolver = SpatialTargetResolver::new(&*self.features);
        if let Some(l) = lookup {
            resolver = resolver.with_communities(l);
        }
        let resolved = resolver.resolve(&target, &spec.out_path)?;

        info!("generating request URLs");
        let descriptors = plan(spec.data_type, &resolved.terms, &windows);
        debug!(
            "{} spatial term(s) x {} window(s) = {} queries",
            resolved.terms.len(),
            windows.len(),
            descriptors.len()
        );

        info!("processing data request");
        let rows = self.fetch_all(&descriptors)?;

        let hours = spec.filter_hours.then(|| HourFilter::from_range(&range));
        let table = match assemble(rows, &AssembleOptions::default().with_hours(hours)) {
            Assembled::Table(t) => t,
            Assembled::NoData => {
                warn!("no data found for the requested parameters");
                return Ok(DownloadOutcome::NoData);
            }
        };

        let name = OutputName {
            data_type: spec.data_type,
            origin: &resolved.origin,
            range: &range,
            season: spec.effective_season(&range),
            hours,
        };
        let path = name.path_in(&spec.out_path);
        table.save(&path)?;
        info!("data saved to {}", path.display());

        Ok(DownloadOutcome::Saved {
            path,
            rows: table.len(),
            queries: descriptors.len(),
        })
    }

    fn load_communities(&self) -> Result<CommunityIndex> {
        let path = self.opts.communities_path.as_ref().ok_or_else(|| {
            Error::InvalidParameter(
                "community queries need ClientOptions::communities_path or a community lookup"
                    .into(),
            )
        })?;
        let index = CommunityIndex::open(&*self.features, path)?;
        debug!("loaded {} communities from {}", index.len(), path.display());
        Ok(index)
    }
}

/// Upstream rejection, surfaced verbatim. Falls back to the raw body when it
/// carries no structured message.
fn rejection(url: &Url, body: &str) -> Error {
    let first = serde_json::from_str::<Rejection>(body)
        .ok()
        .and_then(|r| r.messages.into_iter().next());
    let (template, arguments) = match first {
        Some(m) => {
            let arguments = match m.message_arguments {
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (m.message_template, arguments)
        }
        None => (body.trim().to_string(), String::new()),
    };
    Error::InvalidQuery {
        url: url.to_string(),
        template,
        arguments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.test/v1/dailies?stationName=X").unwrap()
    }

    #[test]
    fn rejection_uses_first_message() {
        let body = r#"{"messages":[
            {"messageTemplate":"Station {0} not found","messageArguments":["X"]},
            {"messageTemplate":"ignored"}
        ]}"#;
        match rejection(&url(), body) {
            Error::InvalidQuery {
                url,
                template,
                arguments,
            } => {
                assert_eq!(url, "https://example.test/v1/dailies?stationName=X");
                assert_eq!(template, "Station {0} not found");
                assert_eq!(arguments, r#"["X"]"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejection_falls_back_to_body() {
        match rejection(&url(), "Bad Gateway\n") {
            Error::InvalidQuery {
                template, arguments, ..
            } => {
                assert_eq!(template, "Bad Gateway");
                assert_eq!(arguments, "");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    struct NoNetwork;

    impl Transport for NoNetwork {
        fn get(&self, url: &Url) -> Result<TransportResponse> {
            panic!("unexpected request to {url}");
        }
    }

    #[test]
    fn named_and_explicit_sources() {
        let c = Client::with_transport(ClientOptions::default(), NoNetwork).unwrap();
        assert_eq!(
            c.base_url().as_str(),
            "https://bcwsapi.nrs.gov.bc.ca/wfwx-datamart-api/v1"
        );

        let opts = ClientOptions {
            source: "http://localhost:8080/api".into(),
            ..ClientOptions::default()
        };
        let c = Client::with_transport(opts, NoNetwork).unwrap();
        assert_eq!(c.base_url().as_str(), "http://localhost:8080/api");

        let opts = ClientOptions {
            source: "nowhere".into(),
            ..ClientOptions::default()
        };
        assert!(matches!(
            Client::with_transport(opts, NoNetwork),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn invalid_spec_fails_before_any_request() {
        let c = Client::with_transport(ClientOptions::default(), NoNetwork).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let spec = QuerySpec::new(
            dir.path(),
            crate::request::DataType::Hourlies,
            "2021060500".parse().unwrap(),
            "2021060100".parse().unwrap(),
            crate::request::QueryMethod::Station,
        )
        .names(["KNIFE"]);
        assert!(matches!(c.download(&spec), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn community_query_without_index_is_rejected() {
        let c = Client::with_transport(ClientOptions::default(), NoNetwork).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let spec = QuerySpec::new(
            dir.path(),
            crate::request::DataType::Dailies,
            "2021060100".parse().unwrap(),
            "2021060523".parse().unwrap(),
            crate::request::QueryMethod::Community,
        )
        .names(["Kamloops"])
        .radius(25.0);
        assert!(matches!(c.download(&spec), Err(Error::InvalidParameter(_))));
    }
}
