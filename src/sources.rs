/// Built-in datamart base URLs.
///
/// If `source` is already an `http(s)` URL, it is used as-is.
pub fn source_to_base_url(source: &str) -> Option<&'static str> {
    match source {
        "bcws" => Some("https://bcwsapi.nrs.gov.bc.ca/wfwx-datamart-api/v1"),
        _ => None,
    }
}

pub fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}
