//! Storage path layout of a persisted world.
//!
//! ```text
//! <root>/worldInfo.json
//! <root>/zones/<zone>/zoneInfo.json
//! <root>/zones/<zone>/regions/region_<x>_<y>_<z>.bin
//! <root>/zones/<zone>/entities/entityRegion_<x>_<y>_<z>.bin
//! ```
//!
//! Zone IDs are normalized by replacing `:` with `/` when forming paths.

use strata_schemas::region::{normalize_zone_id, RegionKey};

fn join(base: &str, suffix: &str) -> String {
    if base.is_empty() {
        return suffix.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{suffix}")
    } else {
        format!("{base}/{suffix}")
    }
}

/// Path of the world metadata file.
pub fn world_info_path(root: &str) -> String {
    join(root, "worldInfo.json")
}

/// Root directory of one zone.
pub fn zone_root(root: &str, zone_id: &str) -> String {
    join(&join(root, "zones"), &normalize_zone_id(zone_id))
}

/// Path of a zone's metadata file.
pub fn zone_info_path(root: &str, zone_id: &str) -> String {
    join(&zone_root(root, zone_id), "zoneInfo.json")
}

/// Directory holding a zone's chunk region files.
pub fn region_dir(root: &str, zone_id: &str) -> String {
    join(&zone_root(root, zone_id), "regions")
}

/// Path of one chunk region file.
pub fn region_path(root: &str, key: &RegionKey) -> String {
    join(
        &region_dir(root, &key.zone),
        &format!("region_{}_{}_{}.bin", key.x, key.y, key.z),
    )
}

/// Directory holding a zone's entity region files.
pub fn entity_region_dir(root: &str, zone_id: &str) -> String {
    join(&zone_root(root, zone_id), "entities")
}

/// Path of one entity region file. The payload is opaque to the core.
pub fn entity_region_path(root: &str, key: &RegionKey) -> String {
    join(
        &entity_region_dir(root, &key.zone),
        &format!("entityRegion_{}_{}_{}.bin", key.x, key.y, key.z),
    )
}

/// Parses a `region_<x>_<y>_<z>.bin` file name back into region coordinates.
pub fn parse_region_file_name(name: &str) -> Option<(i32, i32, i32)> {
    let stem = name.strip_prefix("region_")?.strip_suffix(".bin")?;
    let mut parts = stem.split('_');
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((x, y, z))
}
