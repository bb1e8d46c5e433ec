use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("feature file does not exist at {}", .0.display())]
    MissingResource(PathBuf),

    #[error("feature file is not a point or polygon geometry type: {0}")]
    UnsupportedGeometryKind(String),

    #[error("invalid feature file: {0}")]
    InvalidFeatureFile(String),

    #[error("cannot reproject from EPSG:{0} to EPSG:4326")]
    UnsupportedCrs(u32),

    #[error("search URL is invalid: {url}\nerror message: {template}\nthe arguments you provided: {arguments}")]
    InvalidQuery {
        url: String,
        template: String,
        arguments: String,
    },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
