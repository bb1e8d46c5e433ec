use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use log::warn;
use serde::Deserialize;

use crate::date::{self, AnnualDayWindow, DateRange, DateTimeHour, MonthWindow};
use crate::error::{Error, Result};
use crate::spatial::{QueryTarget, SpatialTerm};

/// Upstream collection to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum DataType {
    Dailies,
    Hourlies,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Dailies => "dailies",
            DataType::Hourlies => "hourlies",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dailies" => Ok(DataType::Dailies),
            "hourlies" => Ok(DataType::Hourlies),
            _ => Err(Error::InvalidParameter(format!("invalid data_type: {s}"))),
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum QueryMethod {
    Station,
    Community,
    Shapefile,
}

impl QueryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMethod::Station => "station",
            QueryMethod::Community => "community",
            QueryMethod::Shapefile => "shapefile",
        }
    }
}

impl fmt::Display for QueryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "station" => Ok(QueryMethod::Station),
            "community" => Ok(QueryMethod::Community),
            "shapefile" => Ok(QueryMethod::Shapefile),
            _ => Err(Error::InvalidParameter(format!("invalid query_method: {s}"))),
        }
    }
}

impl TryFrom<String> for QueryMethod {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// A complete download request as supplied by the caller.
///
/// Build one with [`QuerySpec::new`] and the chained setters, or deserialize
/// it from JSON:
///
/// ```
/// use wfwx_datamart::QuerySpec;
///
/// let spec: QuerySpec = serde_json::from_str(r#"{
///     "out_path": "downloads",
///     "data_type": "hourlies",
///     "start_date": 2021060100,
///     "end_date": "2021083123",
///     "filter_hours": true,
///     "query_method": "station",
///     "query_names": ["KNIFE"]
/// }"#)?;
/// assert_eq!(spec.query_names, vec!["KNIFE"]);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuerySpec {
    pub out_path: PathBuf,
    pub data_type: DataType,
    pub start_date: DateTimeHour,
    pub end_date: DateTimeHour,
    #[serde(default)]
    pub filter_month_days: bool,
    #[serde(default)]
    pub filter_hours: bool,
    /// Explicit recurring season; derived from the start/end dates when absent.
    #[serde(default)]
    pub season: Option<AnnualDayWindow>,
    pub query_method: QueryMethod,
    #[serde(default)]
    pub query_names: Vec<String>,
    #[serde(default)]
    pub shp_path: Option<PathBuf>,
    #[serde(default)]
    pub search_radius: Option<f64>,
}

impl QuerySpec {
    pub fn new(
        out_path: impl Into<PathBuf>,
        data_type: DataType,
        start_date: DateTimeHour,
        end_date: DateTimeHour,
        query_method: QueryMethod,
    ) -> Self {
        Self {
            out_path: out_path.into(),
            data_type,
            start_date,
            end_date,
            filter_month_days: false,
            filter_hours: false,
            season: None,
            query_method,
            query_names: Vec::new(),
            shp_path: None,
            search_radius: None,
        }
    }

    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn shapefile(mut self, path: impl Into<PathBuf>) -> Self {
        self.shp_path = Some(path.into());
        self
    }

    pub fn radius(mut self, km: f64) -> Self {
        self.search_radius = Some(km);
        self
    }

    pub fn filter_month_days(mut self, on: bool) -> Self {
        self.filter_month_days = on;
        self
    }

    pub fn filter_hours(mut self, on: bool) -> Self {
        self.filter_hours = on;
        self
    }

    pub fn season(mut self, season: AnnualDayWindow) -> Self {
        self.season = Some(season);
        self
    }

    /// Check every parameter that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        if let Some(r) = self.search_radius {
            if !r.is_finite() || r <= 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "search_radius must be a positive number of km, got {r}"
                )));
            }
        }

        match self.query_method {
            QueryMethod::Station | QueryMethod::Community if self.query_names.is_empty() => {
                return Err(Error::InvalidParameter(format!(
                    "query_names is required when query_method is {}",
                    self.query_method
                )));
            }
            QueryMethod::Community if self.search_radius.is_none() => {
                return Err(Error::InvalidParameter(
                    "search_radius is required when query_method is community".into(),
                ));
            }
            QueryMethod::Shapefile if self.shp_path.is_none() => {
                return Err(Error::InvalidParameter(
                    "shp_path is required when query_method is shapefile".into(),
                ));
            }
            _ => {}
        }

        if self.season.is_some() && !self.filter_month_days {
            warn!("season is ignored because filter_month_days is off");
        }

        self.date_range().map(|_| ())
    }

    /// The requested range; daily data always spans whole days.
    pub fn date_range(&self) -> Result<DateRange> {
        let (start, end) = match self.data_type {
            DataType::Dailies => (self.start_date.with_hour(0)?, self.end_date.with_hour(23)?),
            DataType::Hourlies => (self.start_date, self.end_date),
        };
        DateRange::new(start, end)
    }

    /// Season applied by the annual filter, if the filter is on.
    pub fn effective_season(&self, range: &DateRange) -> Option<AnnualDayWindow> {
        if !self.filter_month_days {
            return None;
        }
        Some(self.season.unwrap_or_else(|| AnnualDayWindow::from_range(range)))
    }

    pub fn windows(&self, range: &DateRange) -> Vec<MonthWindow> {
        match self.effective_season(range) {
            Some(season) => {
                if season.is_wrapping() {
                    warn!("season {season} wraps the calendar year and matches no dates");
                }
                date::split_with_season(range, &season)
            }
            None => date::split(range, false),
        }
    }

    pub fn target(&self) -> Result<QueryTarget> {
        Ok(match self.query_method {
            QueryMethod::Station => QueryTarget::Stations(self.query_names.clone()),
            QueryMethod::Community => QueryTarget::Communities {
                names: self.query_names.clone(),
                radius_km: self.search_radius.ok_or_else(|| {
                    Error::InvalidParameter("search_radius is required for communities".into())
                })?,
            },
            QueryMethod::Shapefile => QueryTarget::FeatureFile {
                path: self.shp_path.clone().ok_or_else(|| {
                    Error::InvalidParameter("shp_path is required for shapefile".into())
                })?,
                radius_km: self.search_radius,
            },
        })
    }
}

/// One fully specified upstream query.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub data_type: DataType,
    pub spatial_term: SpatialTerm,
    pub window: MonthWindow,
    pub page: Option<u32>,
}

impl RequestDescriptor {
    pub fn with_page(&self, page: u32) -> Self {
        Self {
            page: Some(page),
            ..self.clone()
        }
    }
}

/// Cartesian product of spatial terms (outer) and windows (inner), order preserved.
pub fn plan(
    data_type: DataType,
    terms: &[SpatialTerm],
    windows: &[MonthWindow],
) -> Vec<RequestDescriptor> {
    terms
        .iter()
        .flat_map(|term| {
            windows.iter().map(move |window| RequestDescriptor {
                data_type,
                spatial_term: term.clone(),
                window: *window,
                page: None,
            })
        })
        .collect()
}
