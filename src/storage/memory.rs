use async_trait::async_trait;
use dashmap::DashMap;

use super::StationStore;
use crate::{
    common::{
        errors::RadioResult,
        types::{GuildId, StationId},
    },
    protocol::{LastPlayed, Station},
};

/// Process-local store; nothing survives a restart of the binary.
#[derive(Default)]
pub struct MemoryStore {
    stations: DashMap<StationId, Station>,
    last_played: DashMap<GuildId, LastPlayed>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stations(stations: impl IntoIterator<Item = Station>) -> Self {
        let store = Self::new();
        for station in stations {
            store.stations.insert(station.id, station);
        }
        store
    }
}

#[async_trait]
impl StationStore for MemoryStore {
    async fn get_last_station(&self, guild: GuildId) -> RadioResult<Option<LastPlayed>> {
        Ok(self.last_played.get(&guild).map(|r| *r))
    }

    async fn set_last_station(
        &self,
        guild: GuildId,
        station: StationId,
        was_playing: bool,
    ) -> RadioResult<()> {
        self.last_played.insert(
            guild,
            LastPlayed {
                station_id: station,
                was_playing,
            },
        );
        Ok(())
    }

    async fn get_station(&self, id: StationId) -> RadioResult<Option<Station>> {
        Ok(self.stations.get(&id).map(|s| s.clone()))
    }

    async fn list_stations(&self) -> RadioResult<Vec<Station>> {
        let mut stations: Vec<Station> = self.stations.iter().map(|s| s.clone()).collect();
        stations.sort_by_key(|s| s.id);
        Ok(stations)
    }
}
