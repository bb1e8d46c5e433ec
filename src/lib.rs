#![forbid(unsafe_code)]

//! Rust client for the BC Wildfire Service weather datamart.
//!
//! A download is described by a [`QuerySpec`]: a data type (`dailies` or
//! `hourlies`), a date range in `YYYYMMDDHH`, and a spatial target (station
//! names, communities within a radius, or a point/polygon feature file).
//! The range is split into calendar-month windows, one query is issued per
//! spatial term and window, every page of each query is fetched in order,
//! and the rows are de-duplicated, sorted and written to a single CSV.
//!
//! **Quick start**
//! ```no_run
//! use wfwx_datamart::{Client, ClientOptions, DataType, DownloadOutcome, QueryMethod, QuerySpec};
//!
//! let client = Client::new(ClientOptions::default())?;
//!
//! let spec = QuerySpec::new(
//!     "downloads",
//!     DataType::Dailies,
//!     "2021060100".parse()?,
//!     "2021060523".parse()?,
//!     QueryMethod::Station,
//! )
//! .names(["KNIFE"]);
//!
//! match client.download(&spec)? {
//!     DownloadOutcome::Saved { path, rows, .. } => println!("{rows} rows in {}", path.display()),
//!     DownloadOutcome::NoData => println!("no data found"),
//! }
//! # Ok::<(), wfwx_datamart::Error>(())
//! ```
//!
//! **Recurring season**
//! ```no_run
//! use wfwx_datamart::{Client, ClientOptions, DataType, QueryMethod, QuerySpec};
//!
//! // June through August of 2020, 2021 and 2022, hourly data between 08 and 18.
//! let spec = QuerySpec::new(
//!     "downloads",
//!     DataType::Hourlies,
//!     "2020010108".parse()?,
//!     "2022123118".parse()?,
//!     QueryMethod::Station,
//! )
//! .names(["KNIFE", "FIVE MILE"])
//! .filter_month_days(true)
//! .season("0601-0831".parse()?)
//! .filter_hours(true);
//!
//! Client::new(ClientOptions::default())?.download(&spec)?;
//! # Ok::<(), wfwx_datamart::Error>(())
//! ```
//!
//! Logging goes through the `log` facade; install any logger to see progress.

mod client;
mod date;
mod error;
mod geometry;
mod output;
mod request;
mod sources;
mod spatial;
mod table;
mod url_builder;

pub use crate::client::{
    Client, ClientOptions, DownloadOutcome, HttpTransport, Transport, TransportResponse,
};
pub use crate::date::{
    AnnualDayWindow, DateRange, DateTimeHour, MonthWindow, split, split_with_season,
};
pub use crate::error::{Error, Result};
pub use crate::geometry::{
    BoundingBox, CommunityIndex, CommunityLookup, Coord, Feature, FeatureLayer, FeatureSource,
    GeoJsonSource, Geometry, GeometryKind,
};
pub use crate::output::OutputName;
pub use crate::request::{DataType, QueryMethod, QuerySpec, RequestDescriptor, plan};
pub use crate::spatial::{
    QueryTarget, ResolvedTargets, SpatialTargetResolver, SpatialTerm, TargetOrigin,
};
pub use crate::table::{
    AssembleOptions, Assembled, HourFilter, ObservationRow, ObservationTable, assemble,
};
pub use crate::url_builder::{PAGE_ROW_COUNT, descriptor_url};
