use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::date::{AnnualDayWindow, DateRange};
use crate::request::DataType;
use crate::spatial::TargetOrigin;
use crate::table::HourFilter;

const MULTIPLE_STATIONS: &str = "MultipleStations";
const MULTIPLE_COMMUNITIES: &str = "MultipleCommunities";

/// Everything that shapes an output file name.
#[derive(Debug, Clone)]
pub struct OutputName<'a> {
    pub data_type: DataType,
    pub origin: &'a TargetOrigin,
    pub range: &'a DateRange,
    pub season: Option<AnnualDayWindow>,
    pub hours: Option<HourFilter>,
}

impl OutputName<'_> {
    /// `{data_type}_{label}[_{r}kmBuffer]_{start}_to_{end}[_annual{MMDD-MMDD}][_hoursHH-HH].csv`
    pub fn file_name(&self) -> String {
        let mut name = format!("{}_{}", self.data_type, label(self.origin));
        if let Some(r) = radius(self.origin) {
            name.push_str(&format!("_{r}kmBuffer"));
        }
        name.push_str(&format!("_{}_to_{}", self.range.start(), self.range.end()));
        if let Some(season) = self.season {
            name.push_str(&format!("_annual{season}"));
        }
        if let Some(h) = self.hours {
            name.push_str(&format!("_hours{:02}-{:02}", h.first, h.last));
        }
        name.push_str(".csv");
        name
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

fn label(origin: &TargetOrigin) -> String {
    match origin {
        TargetOrigin::Stations(names) => single_or(names, MULTIPLE_STATIONS),
        TargetOrigin::Communities { names, .. } => single_or(names, MULTIPLE_COMMUNITIES),
        TargetOrigin::Points { stem, .. } => format!("{stem}_points"),
        TargetOrigin::Polygons { stem } => format!("{stem}_bbox"),
    }
}

fn radius(origin: &TargetOrigin) -> Option<f64> {
    match origin {
        TargetOrigin::Communities { radius_km, .. } | TargetOrigin::Points { radius_km, .. } => {
            Some(*radius_km)
        }
        _ => None,
    }
}

/// A lone name is used as-is with spaces turned into underscores. Names that
/// already contain an underscore, and name lists, carry a digest of the raw
/// names so distinct queries never share a file.
fn single_or(names: &[String], many: &str) -> String {
    match names {
        [one] if !one.contains('_') => one.replace(' ', "_"),
        [one] => format!("{}-{}", one.replace(' ', "_"), digest(names)),
        _ => format!("{many}-{}-{}", names.len(), digest(names)),
    }
}

fn digest(names: &[String]) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    let hex = format!("{:x}", hasher.finalize());
    hex[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(start.parse().unwrap(), end.parse().unwrap()).unwrap()
    }

    fn name(data_type: DataType, origin: &TargetOrigin, range: &DateRange) -> String {
        OutputName {
            data_type,
            origin,
            range,
            season: None,
            hours: None,
        }
        .file_name()
    }

    #[test]
    fn single_station() {
        let r = range("2021060100", "2021060523");
        let origin = TargetOrigin::Stations(vec!["KNIFE".into()]);
        assert_eq!(
            name(DataType::Dailies, &origin, &r),
            "dailies_KNIFE_2021060100_to_2021060523.csv"
        );
    }

    #[test]
    fn spaces_become_underscores() {
        let r = range("2021060100", "2021060523");
        let origin = TargetOrigin::Stations(vec!["FIVE MILE".into()]);
        assert_eq!(
            name(DataType::Hourlies, &origin, &r),
            "hourlies_FIVE_MILE_2021060100_to_2021060523.csv"
        );
    }

    fn multi_label(file_name: &str, prefix: &str) -> String {
        let rest = file_name.strip_prefix(prefix).unwrap();
        rest[..rest.find("_2021").unwrap()].to_string()
    }

    #[test]
    fn several_names_use_sentinel_with_digest() {
        let r = range("2021060100", "2021060523");
        let stations = TargetOrigin::Stations(vec!["KNIFE".into(), "FIVE MILE".into()]);
        let n = name(DataType::Dailies, &stations, &r);
        assert!(n.starts_with("dailies_MultipleStations-2-"), "{n}");
        assert!(n.ends_with("_2021060100_to_2021060523.csv"), "{n}");
        let tag = multi_label(&n, "dailies_MultipleStations-2-");
        assert_eq!(tag.len(), 8);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable across calls.
        assert_eq!(n, name(DataType::Dailies, &stations, &r));

        let communities = TargetOrigin::Communities {
            names: vec!["Kamloops".into(), "Merritt".into()],
            radius_km: 25.0,
        };
        let n = name(DataType::Dailies, &communities, &r);
        assert!(n.starts_with("dailies_MultipleCommunities-2-"), "{n}");
        assert!(n.ends_with("_25kmBuffer_2021060100_to_2021060523.csv"), "{n}");
    }

    #[test]
    fn distinct_queries_never_share_a_name() {
        let r = range("2021060100", "2021060523");
        let names_of = |xs: &[&str]| {
            let origin = TargetOrigin::Stations(xs.iter().map(|s| s.to_string()).collect());
            name(DataType::Dailies, &origin, &r)
        };
        assert_ne!(names_of(&["A", "B"]), names_of(&["C", "D"]));
        assert_ne!(names_of(&["A", "B"]), names_of(&["A", "B", "C"]));
        assert_ne!(names_of(&["AB"]), names_of(&["A", "B"]));
        assert_ne!(names_of(&["FIVE MILE"]), names_of(&["FIVE_MILE"]));
        assert_eq!(
            names_of(&["FIVE MILE"]),
            "dailies_FIVE_MILE_2021060100_to_2021060523.csv"
        );
    }

    #[test]
    fn community_carries_buffer() {
        let r = range("2021060100", "2021060523");
        let origin = TargetOrigin::Communities {
            names: vec!["100 Mile House".into()],
            radius_km: 12.5,
        };
        assert_eq!(
            name(DataType::Hourlies, &origin, &r),
            "hourlies_100_Mile_House_12.5kmBuffer_2021060100_to_2021060523.csv"
        );
    }

    #[test]
    fn feature_files() {
        let r = range("2021060100", "2021060523");
        let points = TargetOrigin::Points {
            stem: "fire_camps".into(),
            radius_km: 10.0,
        };
        assert_eq!(
            name(DataType::Dailies, &points, &r),
            "dailies_fire_camps_points_10kmBuffer_2021060100_to_2021060523.csv"
        );
        let polygons = TargetOrigin::Polygons {
            stem: "zones".into(),
        };
        assert_eq!(
            name(DataType::Dailies, &polygons, &r),
            "dailies_zones_bbox_2021060100_to_2021060523.csv"
        );
    }

    #[test]
    fn filters_add_suffixes() {
        let r = range("2020010108", "2022123118");
        let origin = TargetOrigin::Stations(vec!["KNIFE".into()]);
        let n = OutputName {
            data_type: DataType::Hourlies,
            origin: &origin,
            range: &r,
            season: Some(AnnualDayWindow::new(6, 1, 8, 31).unwrap()),
            hours: Some(HourFilter::from_range(&r)),
        };
        assert_eq!(
            n.file_name(),
            "hourlies_KNIFE_2020010108_to_2022123118_annual0601-0831_hours08-18.csv"
        );
        assert_eq!(n.path_in(Path::new("out")), Path::new("out").join(n.file_name()));
    }
}
