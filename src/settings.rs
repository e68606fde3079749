use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::constants::*;
use crate::error::SettingsError;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    pub terrain: TerrainSettings,
    pub grass: GrassSettings,
    pub camera: CameraSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TerrainSettings {
    /// Chunks per side of the square grid
    pub chunk_dimension: u32,
    /// World-space edge length of one chunk
    pub chunk_size: f32,
    /// Quads per side of the patch mesh
    pub tessellation: u32,
    pub height_displacement: f32,
    pub heightmap_resolution: u32,
    pub seed: u32,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            chunk_dimension: DEFAULT_CHUNK_DIMENSION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            tessellation: DEFAULT_TESSELLATION,
            height_displacement: DEFAULT_HEIGHT_DISPLACEMENT,
            heightmap_resolution: DEFAULT_HEIGHTMAP_RESOLUTION,
            seed: DEFAULT_TERRAIN_SEED,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GrassSettings {
    pub enabled: bool,
    pub per_chunk: u32,
    /// Horizontal distance beyond which blades use the LOD mesh
    pub lod_distance: f32,
    pub blade_height: f32,
    pub blade_width: f32,
    pub seed: u64,
}

impl Default for GrassSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            per_chunk: DEFAULT_GRASS_PER_CHUNK,
            lod_distance: DEFAULT_GRASS_LOD_DISTANCE,
            blade_height: DEFAULT_BLADE_HEIGHT,
            blade_width: DEFAULT_BLADE_WIDTH,
            seed: DEFAULT_GRASS_SEED,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CameraSettings {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov_y_degrees: DEFAULT_FOV_Y_DEGREES,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
        }
    }
}

fn out_of_range(msg: String) -> SettingsError {
    SettingsError::OutOfRange(msg)
}

impl Settings {
    /// Checks every value against the compile-time capacities.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let t = &self.terrain;
        let chunks = t.chunk_dimension as usize * t.chunk_dimension as usize;
        if t.chunk_dimension == 0 || chunks > MAX_CHUNKS {
            return Err(out_of_range(format!(
                "chunk_dimension {} gives {} chunks (1..={})",
                t.chunk_dimension, chunks, MAX_CHUNKS
            )));
        }
        if !(t.chunk_size > 0.0) {
            return Err(out_of_range(format!("chunk_size {} must be positive", t.chunk_size)));
        }
        if t.tessellation == 0 {
            return Err(out_of_range("tessellation must be at least 1".into()));
        }
        if !(t.height_displacement >= 0.0) {
            return Err(out_of_range(format!(
                "height_displacement {} must not be negative",
                t.height_displacement
            )));
        }
        if t.heightmap_resolution < 2 {
            return Err(out_of_range(format!(
                "heightmap_resolution {} must be at least 2",
                t.heightmap_resolution
            )));
        }

        let g = &self.grass;
        if g.per_chunk as usize > MAX_GRASS_PER_CHUNK {
            return Err(out_of_range(format!(
                "grass per_chunk {} exceeds {}",
                g.per_chunk, MAX_GRASS_PER_CHUNK
            )));
        }
        // every blade of every chunk may land in the same partition
        let demand = chunks as u64 * g.per_chunk as u64;
        if demand > GRASS_PARTITION_CAPACITY as u64 {
            return Err(out_of_range(format!(
                "{} chunks of {} blades need {} slots, a grass partition holds {}",
                chunks, g.per_chunk, demand, GRASS_PARTITION_CAPACITY
            )));
        }
        if !(g.lod_distance >= 0.0) {
            return Err(out_of_range(format!("lod_distance {} must not be negative", g.lod_distance)));
        }
        if !(g.blade_height > 0.0 && g.blade_width > 0.0) {
            return Err(out_of_range("blade size must be positive".into()));
        }

        let c = &self.camera;
        if !(c.near > 0.0 && c.far > c.near) {
            return Err(out_of_range(format!("camera planes near {} far {}", c.near, c.far)));
        }
        if !(c.fov_y_degrees > 0.0 && c.fov_y_degrees < 180.0) {
            return Err(out_of_range(format!("fov {} must be in (0, 180)", c.fov_y_degrees)));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        tracing::info!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Loads and validates settings from `path`.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let settings: Settings = bincode::deserialize_from(&mut reader)?;
        settings.validate()?;
        tracing::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Falls back to defaults when the file is missing.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        match Self::load(path) {
            Err(SettingsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("No settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn too_many_chunks_are_rejected() {
        let mut settings = Settings::default();
        settings.terrain.chunk_dimension = 33;
        assert!(matches!(settings.validate(), Err(SettingsError::OutOfRange(_))));
        settings.terrain.chunk_dimension = 32;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn grass_cap_is_enforced() {
        let mut settings = Settings::default();
        settings.grass.per_chunk = MAX_GRASS_PER_CHUNK as u32 + 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn grass_must_fit_one_partition_when_every_chunk_is_visible() {
        let mut settings = Settings::default();
        settings.terrain.chunk_dimension = 32;
        settings.grass.per_chunk = MAX_GRASS_PER_CHUNK as u32;
        assert!(matches!(settings.validate(), Err(SettingsError::OutOfRange(_))));

        settings.grass.per_chunk = (GRASS_PARTITION_CAPACITY / 1024) as u32;
        assert!(settings.validate().is_ok());
        settings.grass.per_chunk += 1;
        assert!(settings.validate().is_err());

        settings.terrain.chunk_dimension = 8;
        settings.grass.per_chunk = MAX_GRASS_PER_CHUNK as u32;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn nan_chunk_size_is_rejected() {
        let mut settings = Settings::default();
        settings.terrain.chunk_size = f32::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_persist_through_bincode() {
        let path = std::env::temp_dir().join(format!("terracull-settings-{}.bin", std::process::id()));
        let mut settings = Settings::default();
        settings.terrain.chunk_dimension = 4;
        settings.grass.enabled = false;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("terracull-settings-does-not-exist.bin");
        let loaded = Settings::load_or_default(&path).unwrap();
        assert_eq!(loaded, Settings::default());
    }
}
