use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::StationStore;
use crate::{
    common::{
        errors::{RadioError, RadioResult},
        types::{GuildId, StationId},
    },
    protocol::{LastPlayed, Station},
};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    #[serde(default)]
    stations: Vec<Station>,
    #[serde(default)]
    guilds: Vec<GuildRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuildRecord {
    guild_id: GuildId,
    last_station_id: StationId,
    last_playing: bool,
}

struct StoreData {
    stations: HashMap<StationId, Station>,
    guilds: HashMap<GuildId, LastPlayed>,
}

impl StoreData {
    fn to_file(&self) -> StoreFile {
        let mut stations: Vec<Station> = self.stations.values().cloned().collect();
        stations.sort_by_key(|s| s.id);
        let mut guilds: Vec<GuildRecord> = self
            .guilds
            .iter()
            .map(|(guild, last)| GuildRecord {
                guild_id: *guild,
                last_station_id: last.station_id,
                last_playing: last.was_playing,
            })
            .collect();
        guilds.sort_by_key(|g| g.guild_id);
        StoreFile { stations, guilds }
    }
}

/// JSON document store. The whole document is kept in memory and rewritten
/// through a temp file + rename on every update.
pub struct JsonStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonStore {
    pub async fn open(path: impl AsRef<Path>) -> RadioResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match tokio::fs::read(&path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => StoreFile::default(),
            Ok(raw) => serde_json::from_slice::<StoreFile>(&raw)
                .map_err(|e| RadioError::Storage(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Store {} does not exist yet, starting empty", path.display());
                StoreFile::default()
            }
            Err(e) => return Err(storage_err(&path, e)),
        };

        info!(
            "Loaded {} stations and {} guild records from {}",
            file.stations.len(),
            file.guilds.len(),
            path.display()
        );

        let data = StoreData {
            stations: file.stations.into_iter().map(|s| (s.id, s)).collect(),
            guilds: file
                .guilds
                .into_iter()
                .map(|g| {
                    (
                        g.guild_id,
                        LastPlayed {
                            station_id: g.last_station_id,
                            was_playing: g.last_playing,
                        },
                    )
                })
                .collect(),
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    async fn persist(&self, data: &StoreData) -> RadioResult<()> {
        let body = serde_json::to_vec_pretty(&data.to_file())
            .map_err(|e| RadioError::Storage(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err(parent, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| storage_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_err(&self.path, e))?;
        debug!("Wrote store {}", self.path.display());
        Ok(())
    }
}

fn storage_err(path: &Path, e: std::io::Error) -> RadioError {
    RadioError::Storage(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl StationStore for JsonStore {
    async fn get_last_station(&self, guild: GuildId) -> RadioResult<Option<LastPlayed>> {
        Ok(self.data.lock().await.guilds.get(&guild).copied())
    }

    async fn set_last_station(
        &self,
        guild: GuildId,
        station: StationId,
        was_playing: bool,
    ) -> RadioResult<()> {
        let mut data = self.data.lock().await;
        let record = LastPlayed {
            station_id: station,
            was_playing,
        };
        if data.guilds.insert(guild, record) == Some(record) {
            return Ok(());
        }
        self.persist(&data).await
    }

    async fn get_station(&self, id: StationId) -> RadioResult<Option<Station>> {
        Ok(self.data.lock().await.stations.get(&id).cloned())
    }

    async fn list_stations(&self) -> RadioResult<Vec<Station>> {
        Ok(self.data.lock().await.to_file().stations)
    }
}
