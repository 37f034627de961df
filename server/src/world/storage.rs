//! World persistence: sectors and metadata as named chunks.

use crate::client_context::WorldChunks;
use crate::error::{Result, ServerError};
use crate::world::sectors::{Sector, SectorId, SECTOR_SIZE};
use skyward_core::serialization::{DataReader, DataWriter};
use skyward_core::types::compression::{compress, decompress, MEDIUM_COMPRESSION};
use skyward_core::types::liquid::LiquidStore;
use skyward_core::types::tile::ServerTile;
use skyward_core::types::versioning::VersionedJson;
use skyward_core::math::Vec2I;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const WORLD_METADATA_KIND: &str = "WorldMetadata";
pub const WORLD_METADATA_VERSION: u32 = 1;

const METADATA_CHUNK: &str = "metadata";

/// Chunk-keyed world storage. Sectors serialize under `sector:x:y`, world
/// metadata under `metadata`; the whole map round-trips through one
/// compressed file and through in-memory [`WorldChunks`] for ship worlds.
pub struct WorldStorage {
    path: Option<PathBuf>,
    chunks: WorldChunks,
    dirty: bool,
}

impl WorldStorage {
    /// Fresh in-memory storage (temp worlds, tests).
    pub fn memory() -> WorldStorage {
        WorldStorage {
            path: None,
            chunks: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Opens or creates file-backed storage.
    pub fn open(path: impl AsRef<Path>) -> Result<WorldStorage> {
        let path = path.as_ref().to_path_buf();
        let chunks = if path.exists() {
            read_chunks_file(&path)?
        } else {
            BTreeMap::new()
        };
        Ok(WorldStorage {
            path: Some(path),
            chunks,
            dirty: false,
        })
    }

    /// Builds storage from an in-memory chunk map (client ship worlds).
    pub fn from_chunks(chunks: WorldChunks) -> WorldStorage {
        WorldStorage {
            path: None,
            chunks,
            dirty: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn metadata(&self) -> Result<Option<VersionedJson>> {
        match self.chunks.get(METADATA_CHUNK) {
            Some(bytes) => {
                let text = String::from_utf8(bytes.clone())
                    .map_err(|e| ServerError::storage(format!("bad metadata encoding: {e}")))?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    pub fn set_metadata(&mut self, metadata: &VersionedJson) -> Result<()> {
        self.chunks.insert(
            METADATA_CHUNK.to_string(),
            serde_json::to_string(metadata)?.into_bytes(),
        );
        self.dirty = true;
        Ok(())
    }

    fn sector_chunk_name(sector: SectorId) -> String {
        format!("sector:{}:{}", sector.x(), sector.y())
    }

    pub fn store_sector(&mut self, id: SectorId, sector: &Sector) -> Result<()> {
        self.chunks
            .insert(Self::sector_chunk_name(id), sector_to_bytes(sector)?);
        self.dirty = true;
        Ok(())
    }

    pub fn load_sector(&self, id: SectorId) -> Result<Option<Sector>> {
        match self.chunks.get(&Self::sector_chunk_name(id)) {
            Some(bytes) => Ok(Some(sector_from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_sector(&self, id: SectorId) -> bool {
        self.chunks.contains_key(&Self::sector_chunk_name(id))
    }

    /// A copy of the full chunk map, used to carry ship worlds inside the
    /// owning client context.
    pub fn read_chunks(&self) -> WorldChunks {
        self.chunks.clone()
    }

    /// Writes the backing file if there is one and anything changed.
    pub fn sync(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            if self.dirty {
                write_chunks_file(path, &self.chunks)?;
                self.dirty = false;
            }
        }
        Ok(())
    }
}

fn write_chunks_file(path: &Path, chunks: &WorldChunks) -> Result<()> {
    let mut writer = DataWriter::new();
    writer.write_vlq_u(chunks.len() as u64);
    for (name, data) in chunks {
        writer.write_string(name);
        writer.write_byte_array(data);
    }
    let compressed = compress(&writer.into_bytes(), MEDIUM_COMPRESSION)?;
    std::fs::write(path, compressed)?;
    Ok(())
}

fn read_chunks_file(path: &Path) -> Result<WorldChunks> {
    let compressed = std::fs::read(path)?;
    let raw = decompress(&compressed)?;
    let mut reader = DataReader::new(&raw);
    let count = reader.read_vlq_u()?;
    let mut chunks = BTreeMap::new();
    for _ in 0..count {
        let name = reader.read_string()?;
        let data = reader.read_byte_array()?;
        chunks.insert(name, data);
    }
    Ok(chunks)
}

fn sector_to_bytes(sector: &Sector) -> Result<Vec<u8>> {
    let mut writer = DataWriter::new();
    writer.write_bool(sector.generated);
    for tile in &sector.tiles {
        write_tile(&mut writer, tile);
    }
    compress(&writer.into_bytes(), MEDIUM_COMPRESSION).map_err(Into::into)
}

fn sector_from_bytes(bytes: &[u8]) -> Result<Sector> {
    let raw = decompress(bytes)?;
    let mut reader = DataReader::new(&raw);
    let generated = reader.read_bool()?;
    let mut tiles = Vec::with_capacity((SECTOR_SIZE * SECTOR_SIZE) as usize);
    for _ in 0..SECTOR_SIZE * SECTOR_SIZE {
        tiles.push(read_tile(&mut reader)?);
    }
    Ok(Sector {
        tiles,
        last_touched: 0,
        generated,
    })
}

fn write_tile(writer: &mut DataWriter, tile: &ServerTile) {
    for layer in [&tile.foreground, &tile.background] {
        writer.write_u16(layer.material);
        writer.write_u8(layer.hue_shift);
        writer.write_u8(layer.color_variant);
        writer.write_u16(layer.material_mod);
        writer.write_u8(layer.mod_hue_shift);
    }
    writer.write_u8(tile.liquid.liquid);
    writer.write_f32(tile.liquid.level);
    writer.write_f32(tile.liquid.pressure);
    writer.write_bool(tile.liquid.source);
    writer.write_u8(tile.collision as u8);
    writer.write_u16(tile.dungeon_id);
    writer.write_u8(tile.block_biome_index);
    writer.write_u8(tile.environment_biome_index);
}

fn read_tile(reader: &mut DataReader) -> Result<ServerTile> {
    let mut tile = ServerTile::new();
    for layer in [&mut tile.foreground, &mut tile.background] {
        layer.material = reader.read_u16()?;
        layer.hue_shift = reader.read_u8()?;
        layer.color_variant = reader.read_u8()?;
        layer.material_mod = reader.read_u16()?;
        layer.mod_hue_shift = reader.read_u8()?;
    }
    tile.liquid = LiquidStore::new(
        reader.read_u8()?,
        reader.read_f32()?,
        reader.read_f32()?,
        reader.read_bool()?,
    );
    let collision = reader.read_u8()?;
    tile.update_collision(collision_kind_from_u8(collision)?);
    tile.dungeon_id = reader.read_u16()?;
    tile.block_biome_index = reader.read_u8()?;
    tile.environment_biome_index = reader.read_u8()?;
    Ok(tile)
}

fn collision_kind_from_u8(v: u8) -> Result<skyward_core::types::collision::CollisionKind> {
    use skyward_core::types::collision::CollisionKind;
    Ok(match v {
        0 => CollisionKind::Null,
        1 => CollisionKind::None,
        2 => CollisionKind::Platform,
        3 => CollisionKind::Climbable,
        4 => CollisionKind::Dynamic,
        5 => CollisionKind::Slippery,
        6 => CollisionKind::Block,
        _ => return Err(ServerError::storage(format!("bad collision kind {v}"))),
    })
}

/// Storage file base name for a sector id, used in log lines.
pub fn sector_name(id: SectorId) -> String {
    format!("{}_{}", id.x(), id.y())
}

/// Convenience for tests and callers constructing sector ids.
pub fn sector_id(x: i32, y: i32) -> SectorId {
    Vec2I::new(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyward_core::types::collision::CollisionKind;

    fn test_sector() -> Sector {
        let mut sector = Sector {
            tiles: vec![ServerTile::new(); (SECTOR_SIZE * SECTOR_SIZE) as usize],
            last_touched: 7,
            generated: true,
        };
        let tile = &mut sector.tiles[10];
        tile.foreground.material = 42;
        tile.foreground.hue_shift = 3;
        tile.update_collision(CollisionKind::Block);
        tile.dungeon_id = 9;
        tile.liquid = LiquidStore::filled(2, 0.75);
        sector
    }

    #[test]
    fn sector_round_trip() {
        let sector = test_sector();
        let bytes = sector_to_bytes(&sector).unwrap();
        let back = sector_from_bytes(&bytes).unwrap();
        assert!(back.generated);
        assert_eq!(back.tiles[10], sector.tiles[10]);
        assert_eq!(back.tiles[11], sector.tiles[11]);
    }

    #[test]
    fn file_round_trip() {
        let dir = std::env::temp_dir().join(format!("skyward-storage-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.world");

        let mut storage = WorldStorage::open(&path).unwrap();
        storage.store_sector(sector_id(1, 2), &test_sector()).unwrap();
        storage
            .set_metadata(&VersionedJson::new(
                WORLD_METADATA_KIND,
                WORLD_METADATA_VERSION,
                serde_json::json!({"seed": 99}),
            ))
            .unwrap();
        storage.sync().unwrap();

        let reloaded = WorldStorage::open(&path).unwrap();
        assert!(reloaded.has_sector(sector_id(1, 2)));
        assert!(!reloaded.has_sector(sector_id(0, 0)));
        let metadata = reloaded.metadata().unwrap().unwrap();
        assert_eq!(metadata.content["seed"], 99);
        let sector = reloaded.load_sector(sector_id(1, 2)).unwrap().unwrap();
        assert_eq!(sector.tiles[10].foreground.material, 42);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn chunks_round_trip_in_memory() {
        let mut storage = WorldStorage::memory();
        storage.store_sector(sector_id(3, 4), &test_sector()).unwrap();
        let chunks = storage.read_chunks();

        let reloaded = WorldStorage::from_chunks(chunks);
        assert!(reloaded.has_sector(sector_id(3, 4)));
    }
}
