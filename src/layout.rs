//! Image directory layout.
//!
//! ```text
//! <images_root>/<sample_id>/<plate_id>/snaps/               single shots and snap stacks
//! <images_root>/<sample_id>/<plate_id>/<timestamp>/         one plate run
//! <images_root>/<sample_id>/<plate_id>/<timestamp>/rawimages/
//! ```
//!
//! Directories are created on demand.

use ami_core::PlateConfig;
use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Timestamp used in run directory and snapshot names, e.g. `Oct-18-2026_03:45PM`.
pub const TIMESTAMP_FORMAT: &str = "%b-%d-%Y_%I:%M%p";

/// Format `when` for use in a file name.
pub fn timestamp<Tz: TimeZone>(when: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    when.format(TIMESTAMP_FORMAT).to_string()
}

/// Current local time formatted for a file name.
pub fn timestamp_now() -> String {
    timestamp(&chrono::Local::now())
}

/// Directories of one plate run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirs {
    /// `<plate>/<timestamp>`
    pub root: PathBuf,
    /// `<plate>/<timestamp>/rawimages`
    pub raw: PathBuf,
}

/// Where images of one plate go.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    plate_dir: PathBuf,
}

impl ImageLayout {
    /// Layout for `plate` under `images_root`.
    pub fn new(images_root: impl AsRef<Path>, plate: &PlateConfig) -> Self {
        Self {
            plate_dir: images_root
                .as_ref()
                .join(&plate.sample_id)
                .join(&plate.plate_id),
        }
    }

    /// `<images_root>/<sample_id>/<plate_id>`
    pub fn plate_dir(&self) -> &Path {
        &self.plate_dir
    }

    /// Create and return the snapshot directory.
    pub async fn snaps_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.plate_dir.join("snaps");
        create(&dir).await?;
        Ok(dir)
    }

    /// Create and return the directories of a run started at `stamp`.
    pub async fn run_dirs(&self, stamp: &str) -> std::io::Result<RunDirs> {
        let root = self.plate_dir.join(stamp);
        let raw = root.join("rawimages");
        create(&raw).await?;
        Ok(RunDirs { root, raw })
    }
}

async fn create(dir: &Path) -> std::io::Result<()> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::create_dir_all(dir).await?;
        tracing::info!(dir = %dir.display(), "created image directory");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn timestamp_format() {
        let when = Utc.with_ymd_and_hms(2026, 10, 18, 15, 45, 12).unwrap();
        assert_eq!(timestamp(&when), "Oct-18-2026_03:45PM");
        let morning = Utc.with_ymd_and_hms(2026, 1, 2, 0, 5, 0).unwrap();
        assert_eq!(timestamp(&morning), "Jan-02-2026_12:05AM");
    }

    #[tokio::test]
    async fn directories_are_created_on_demand() {
        let root = tempfile::tempdir().unwrap();
        let mut plate = PlateConfig::new(12, 8, 1);
        plate.sample_id = "lysozyme".to_string();
        plate.plate_id = "p7".to_string();
        let layout = ImageLayout::new(root.path(), &plate);

        let snaps = layout.snaps_dir().await.unwrap();
        assert_eq!(snaps, root.path().join("lysozyme/p7/snaps"));
        assert!(snaps.is_dir());

        let run = layout.run_dirs("Oct-18-2026_03:45PM").await.unwrap();
        assert!(run.raw.is_dir());
        assert_eq!(run.raw.parent(), Some(run.root.as_path()));
        // Existing directories are reused.
        assert_eq!(layout.run_dirs("Oct-18-2026_03:45PM").await.unwrap(), run);
    }
}
