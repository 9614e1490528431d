use async_trait::async_trait;

use crate::{
    common::{
        errors::RadioResult,
        types::{GuildId, StationId},
    },
    protocol::{LastPlayed, Station},
};

pub mod json;
pub mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

/// Durable record of stations and of what each guild last played.
#[async_trait]
pub trait StationStore: Send + Sync {
    async fn get_last_station(&self, guild: GuildId) -> RadioResult<Option<LastPlayed>>;

    async fn set_last_station(
        &self,
        guild: GuildId,
        station: StationId,
        was_playing: bool,
    ) -> RadioResult<()>;

    async fn get_station(&self, id: StationId) -> RadioResult<Option<Station>>;

    async fn list_stations(&self) -> RadioResult<Vec<Station>>;
}
