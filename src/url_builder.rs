use url::Url;

use crate::error::{Error, Result};
use crate::request::RequestDescriptor;

/// Fixed page size requested from the datamart.
pub const PAGE_ROW_COUNT: u32 = 100;

/// Build the GET URL for `descriptor`:
/// `{base}/{data_type}?{spatial}&from=..&to=..[&pageNumber=..&pageRowCount=..]`.
pub fn descriptor_url(base: &Url, descriptor: &RequestDescriptor, page_row_count: u32) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::InvalidParameter(format!("base url cannot take a path: {base}")))?
        .pop_if_empty()
        .push(descriptor.data_type.as_str());

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in descriptor.spatial_term.query_pairs() {
            query.append_pair(k, &v);
        }
        query
            .append_pair("from", &descriptor.window.start.to_string())
            .append_pair("to", &descriptor.window.end.to_string());
        if let Some(page) = descriptor.page {
            query
                .append_pair("pageNumber", &page.to_string())
                .append_pair("pageRowCount", &page_row_count.to_string());
        }
    }

    Ok(url)
}
