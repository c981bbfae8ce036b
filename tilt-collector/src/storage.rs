//! Local TSV archive.
//!
//! Every reading is appended to two archives, one per sensor category, laid
//! out as `<base>/<CATEGORY>/<station>/<year>-<month>-<day>.tsv` with one
//! file per station per day. A file gets its descriptive header block on
//! first write only. The header labels and directory names are kept exactly
//! as the downstream analysis tooling expects them.
//!
//! Two links can decode readings for the same station, so appends to one
//! file path are serialized through a per-path lock; archives for different
//! paths never wait on each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::reading::Reading;

#[derive(Clone, Copy)]
enum Category {
    Inclinometer,
    Pluviometer,
}

impl Category {
    fn dir_name(self) -> &'static str {
        match self {
            Category::Inclinometer => "INCLINOMETRIA",
            Category::Pluviometer => "PLUVIOMETRIA",
        }
    }

    fn header(self, reading: &Reading) -> String {
        match self {
            Category::Inclinometer => format!(
                "TIPO:INCLINOMETRIA\n\
                 NOMBRE:{}\n\
                 IDENTIFICADOR:{}\n\
                 FECHA\tTIEMPO\tX RADIAL\tY TANGENCIAL\tTEMPERATURA\tBATERIA\n\
                 \t\tmicro radianes\tmicro radianes\tgrados centigrados\tvoltios\n",
                reading.station_name, reading.station_number
            ),
            Category::Pluviometer => format!(
                "TIPO:PLUVIOMETRIA\n\
                 NOMBRE:{}\n\
                 IDENTIFICADOR:{}\n\
                 FECHA\tTIEMPO\tNIVEL\tBATERIA\n\
                 \t\tmilimetros\tvoltios\n",
                reading.station_name, reading.station_number
            ),
        }
    }

    fn row(self, reading: &Reading, now: OffsetDateTime) -> String {
        let stamp = format!(
            "{:02}/{:02}/{}\t{:02}:{:02}:{:02}",
            now.day(),
            now.month() as u8,
            now.year(),
            now.hour(),
            now.minute(),
            now.second()
        );
        match self {
            Category::Inclinometer => {
                let incl = &reading.inclinometer;
                format!(
                    "{stamp}\t{}\t{}\t{}\t{}\n",
                    incl.radial, incl.tangential, incl.temperature, incl.voltage
                )
            }
            Category::Pluviometer => {
                let pluvio = &reading.pluviometer;
                format!("{stamp}\t{}\t{}\n", pluvio.rain_level, pluvio.voltage)
            }
        }
    }
}

pub struct TsvStore {
    base_dir: PathBuf,
    locks: parking_lot::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl TsvStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Append one reading to both category archives.
    pub async fn store(&self, reading: &Reading) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        self.append(reading, Category::Inclinometer, now).await?;
        self.append(reading, Category::Pluviometer, now).await?;
        Ok(())
    }

    async fn append(
        &self,
        reading: &Reading,
        category: Category,
        now: OffsetDateTime,
    ) -> Result<()> {
        let dir = self
            .base_dir
            .join(category.dir_name())
            .join(&reading.station_name);
        fs::create_dir_all(&dir).await?;

        // Unpadded month and day, matching the historical archive layout.
        let file = dir.join(format!(
            "{}-{}-{}.tsv",
            now.year(),
            now.month() as u8,
            now.day()
        ));

        let lock = self.file_lock(&file);
        let _guard = lock.lock().await;

        let mut text = String::new();
        if !file.exists() {
            text.push_str(&category.header(reading));
        }
        text.push_str(&category.row(reading, now));

        let mut archive = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&file)
            .await?;
        archive.write_all(text.as_bytes()).await?;
        Ok(())
    }

    fn file_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{Inclinometer, Pluviometer};

    fn create_reading() -> Reading {
        Reading {
            station_type: 3,
            station_number: 2,
            network_id: 7,
            station_name: "BILBAO".to_string(),
            inclinometer: Inclinometer {
                radial: -45.0,
                tangential: 98.2,
                temperature: 9.4,
                voltage: 12.0,
            },
            pluviometer: Pluviometer {
                rain_level: 0.0,
                voltage: 12.0,
            },
        }
    }

    async fn read_archive(base: &Path, category: &str) -> String {
        let dir = base.join(category).join("BILBAO");
        let mut entries = fs::read_dir(&dir).await.unwrap();
        let file = entries.next_entry().await.unwrap().unwrap().path();
        fs::read_to_string(&file).await.unwrap()
    }

    #[tokio::test]
    async fn should_write_header_block_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = TsvStore::new(dir.path().to_path_buf());

        store.store(&create_reading()).await.unwrap();

        let incl = read_archive(dir.path(), "INCLINOMETRIA").await;
        assert!(incl.starts_with("TIPO:INCLINOMETRIA\nNOMBRE:BILBAO\nIDENTIFICADOR:2\n"));
        assert!(incl.contains("X RADIAL\tY TANGENCIAL\tTEMPERATURA\tBATERIA"));
        assert!(incl.contains("micro radianes"));

        let pluvio = read_archive(dir.path(), "PLUVIOMETRIA").await;
        assert!(pluvio.starts_with("TIPO:PLUVIOMETRIA\n"));
        assert!(pluvio.contains("NIVEL\tBATERIA"));
    }

    #[tokio::test]
    async fn should_append_rows_without_repeating_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = TsvStore::new(dir.path().to_path_buf());

        store.store(&create_reading()).await.unwrap();
        store.store(&create_reading()).await.unwrap();

        let incl = read_archive(dir.path(), "INCLINOMETRIA").await;
        assert_eq!(incl.matches("TIPO:INCLINOMETRIA").count(), 1);
        assert_eq!(incl.matches("\t-45\t98.2\t9.4\t12\n").count(), 2);
    }

    #[tokio::test]
    async fn should_segregate_archives_by_station() {
        let dir = tempfile::tempdir().unwrap();
        let store = TsvStore::new(dir.path().to_path_buf());

        let mut other = create_reading();
        other.station_number = 42;
        other.station_name = "Unknown_42".to_string();

        store.store(&create_reading()).await.unwrap();
        store.store(&other).await.unwrap();

        assert!(dir.path().join("INCLINOMETRIA").join("BILBAO").exists());
        assert!(dir.path().join("INCLINOMETRIA").join("Unknown_42").exists());
    }
}
