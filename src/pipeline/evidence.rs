//! On-disk plate crops named `plate_<PLATE>_<YYYYMMDD>_<HHMMSS>.jpg`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, NaiveDateTime};
use image::{imageops, ImageFormat, RgbImage};
use serde::Serialize;

use crate::{error::EvidenceError, plate::BoundingBox};

const PREFIX: &str = "plate_";
const SUFFIX: &str = ".jpg";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceImage {
    pub file_name: String,
    pub path: PathBuf,
    pub plate: String,
    pub captured_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct EvidenceStore {
    dir: PathBuf,
}

impl EvidenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Second granularity: a second capture of the same plate within one
    /// second overwrites the first.
    pub fn file_name(plate: &str, captured_at: DateTime<Local>) -> String {
        format!(
            "{PREFIX}{plate}_{}{SUFFIX}",
            captured_at.format(STAMP_FORMAT)
        )
    }

    pub fn parse_file_name(name: &str) -> Option<(String, NaiveDateTime)> {
        let stem = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
        let mut parts = stem.rsplitn(3, '_');
        let time = parts.next()?;
        let date = parts.next()?;
        let plate = parts.next()?;

        let digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
        if plate.is_empty() || !digits(date, 8) || !digits(time, 6) {
            return None;
        }

        let captured_at =
            NaiveDateTime::parse_from_str(&format!("{date}_{time}"), STAMP_FORMAT).ok()?;
        Some((plate.to_string(), captured_at))
    }

    /// Crops `bbox` out of `frame` and writes it as JPEG.
    pub fn save_crop(
        &self,
        frame: &RgbImage,
        bbox: BoundingBox,
        plate: &str,
        captured_at: DateTime<Local>,
    ) -> Result<PathBuf, EvidenceError> {
        let (width, height) = frame.dimensions();
        if !bbox.fits_within(width, height) {
            return Err(EvidenceError::OutOfBounds(bbox.as_tuple()));
        }

        let crop = imageops::crop_imm(frame, bbox.x as u32, bbox.y as u32, bbox.width, bbox.height)
            .to_image();

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(plate, captured_at));
        crop.save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|source| EvidenceError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Every well-named image, newest first. A missing directory is empty.
    pub fn list(&self) -> Result<Vec<EvidenceImage>, EvidenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some((plate, captured_at)) = Self::parse_file_name(&file_name) {
                images.push(EvidenceImage {
                    path: entry.path(),
                    file_name,
                    plate,
                    captured_at,
                });
            }
        }

        images.sort_by(|a, b| {
            b.captured_at
                .cmp(&a.captured_at)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 4, 2, h, m, s).earliest().unwrap()
    }

    #[test]
    fn file_name_round_trips_through_parser() {
        let name = EvidenceStore::file_name("AB123CD", at(9, 5, 7));
        assert_eq!(name, "plate_AB123CD_20260402_090507.jpg");

        let (plate, captured_at) = EvidenceStore::parse_file_name(&name).unwrap();
        assert_eq!(plate, "AB123CD");
        assert_eq!(captured_at, at(9, 5, 7).naive_local());
    }

    #[test]
    fn foreign_names_are_skipped() {
        for name in [
            "notes.txt",
            "plate_AB123CD.jpg",
            "plate__20260402_090507.jpg",
            "plate_AB123CD_2026042_090507.jpg",
            "plate_AB123CD_20261340_090507.jpg",
            "plate_AB123CD_20260402_090507.png",
        ] {
            assert!(EvidenceStore::parse_file_name(name).is_none(), "{name}");
        }
    }

    #[test]
    fn list_orders_newest_first_and_ignores_strays() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path().join("plates"));
        assert!(store.list().unwrap().is_empty());

        let frame = RgbImage::new(100, 50);
        let bbox = BoundingBox::new(10, 10, 30, 10);
        store.save_crop(&frame, bbox, "AB123CD", at(8, 0, 0)).unwrap();
        store.save_crop(&frame, bbox, "EF456GH", at(9, 0, 0)).unwrap();
        fs::write(store.dir().join("readme.md"), "x").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].plate, "EF456GH");
        assert_eq!(listed[1].plate, "AB123CD");
    }

    #[test]
    fn same_second_capture_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        let frame = RgbImage::new(100, 50);
        let bbox = BoundingBox::new(0, 0, 20, 10);

        let first = store.save_crop(&frame, bbox, "AB123CD", at(10, 0, 0)).unwrap();
        let second = store.save_crop(&frame, bbox, "AB123CD", at(10, 0, 0)).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn out_of_bounds_crop_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        let err = store
            .save_crop(&RgbImage::new(10, 10), BoundingBox::new(5, 5, 10, 10), "AB123CD", at(1, 0, 0))
            .unwrap_err();
        assert!(matches!(err, EvidenceError::OutOfBounds(_)));
    }
}
