//! World and zone metadata files, stored as readable JSON.

use kstring::KString;
use serde::{Deserialize, Serialize};
use strata_schemas::region::DEFAULT_ZONE_ID;

use crate::error::PersistenceResult;
use crate::persistence::{paths, PersistenceContext};

/// Contents of `<root>/worldInfo.json`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldInfo {
    /// The zone loaded when none is specified.
    pub default_zone_id: KString,
    /// Human-readable world name.
    pub world_display_name: String,
    /// Seed shared by the world's zones.
    pub world_seed: i64,
    /// Creation timestamp, milliseconds since the Unix epoch.
    pub world_created_epoch_millis: i64,
    /// Last-played timestamp, milliseconds since the Unix epoch.
    pub last_played_epoch_millis: i64,
    /// Simulation tick counter at the last save.
    pub world_tick: u64,
}

impl Default for WorldInfo {
    fn default() -> Self {
        Self {
            default_zone_id: KString::from_static(DEFAULT_ZONE_ID),
            world_display_name: String::new(),
            world_seed: 0,
            world_created_epoch_millis: 0,
            last_played_epoch_millis: 0,
            world_tick: 0,
        }
    }
}

/// Contents of `<root>/zones/<zone>/zoneInfo.json`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoneInfo {
    /// The zone's namespaced ID.
    pub zone_id: KString,
    /// Zone generation seed.
    pub seed: i64,
    /// Height players respawn at when no spawn point applies.
    pub respawn_height: i32,
    /// World-space spawn point.
    pub spawn_point: [i32; 3],
}

impl Default for ZoneInfo {
    fn default() -> Self {
        Self {
            zone_id: KString::from_static(DEFAULT_ZONE_ID),
            seed: 0,
            respawn_height: 0,
            spawn_point: [0, 0, 0],
        }
    }
}

/// Writes `worldInfo.json` atomically.
pub fn save_world_info(ctx: &PersistenceContext, info: &WorldInfo) -> PersistenceResult<()> {
    let bytes = serde_json::to_vec_pretty(info)?;
    let path = paths::world_info_path(&ctx.root_path);
    ctx.storage.write_all_atomic(&path, &bytes)?;
    Ok(())
}

/// Reads `worldInfo.json`.
pub fn load_world_info(ctx: &PersistenceContext) -> PersistenceResult<WorldInfo> {
    let path = paths::world_info_path(&ctx.root_path);
    let bytes = ctx.storage.read_all(&path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Writes a zone's `zoneInfo.json` atomically.
pub fn save_zone_info(ctx: &PersistenceContext, info: &ZoneInfo) -> PersistenceResult<()> {
    let bytes = serde_json::to_vec_pretty(info)?;
    let path = paths::zone_info_path(&ctx.root_path, &info.zone_id);
    ctx.storage.write_all_atomic(&path, &bytes)?;
    Ok(())
}

/// Reads a zone's `zoneInfo.json`.
pub fn load_zone_info(ctx: &PersistenceContext, zone_id: &str) -> PersistenceResult<ZoneInfo> {
    let path = paths::zone_info_path(&ctx.root_path, zone_id);
    let bytes = ctx.storage.read_all(&path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Resolves the zone a context addresses: an explicit override wins, then the
/// world metadata's default, then the engine default.
pub fn resolve_zone_id(ctx: &PersistenceContext) -> KString {
    if let Some(zone) = &ctx.zone_id {
        return zone.clone();
    }
    if let Ok(info) = load_world_info(ctx) {
        if !info.default_zone_id.is_empty() {
            return info.default_zone_id;
        }
    }
    KString::from_static(DEFAULT_ZONE_ID)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::*;
    use crate::storage::MemoryBackend;

    fn context() -> PersistenceContext {
        PersistenceContext::new(Arc::new(MemoryBackend::new()), "saves/world_1")
    }

    #[test]
    fn world_info_round_trip() {
        let ctx = context();
        let info = WorldInfo {
            default_zone_id: KString::from_static("strata:overworld"),
            world_display_name: "Test World".to_string(),
            world_seed: 42,
            ..WorldInfo::default()
        };
        save_world_info(&ctx, &info).unwrap();
        assert_eq!(load_world_info(&ctx).unwrap(), info);
    }

    #[test]
    fn zone_resolution_order() {
        let ctx = context();
        assert_eq!(resolve_zone_id(&ctx), DEFAULT_ZONE_ID);

        save_world_info(
            &ctx,
            &WorldInfo {
                default_zone_id: KString::from_static("strata:overworld"),
                ..WorldInfo::default()
            },
        )
        .unwrap();
        assert_eq!(resolve_zone_id(&ctx), "strata:overworld");

        let pinned = ctx.with_zone("strata:nether");
        assert_eq!(resolve_zone_id(&pinned), "strata:nether");
    }

    #[test]
    fn missing_json_fields_take_defaults() {
        let ctx = context();
        ctx.storage
            .write_all_atomic(
                &paths::world_info_path(&ctx.root_path),
                br#"{"defaultZoneId": "strata:default", "worldDisplayName": "Old"}"#,
            )
            .unwrap();
        let info = load_world_info(&ctx).unwrap();
        assert_eq!(info.world_display_name, "Old");
        assert_eq!(info.world_seed, 0);
    }
}
