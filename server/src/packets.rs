//! The wire protocol: a closed set of packet kinds framed as
//! `type: u8, size: signed VLQ, body`. A negative size marks a compressed
//! body. Rich payloads are carried as JSON documents inside the body.

use crate::client_context::{ShipUpgrades, SystemLocation, WorldChunks};
use crate::error::{Result, ServerError};
use crate::warping::WarpAction;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use skyward_core::math::{Vec2F, Vec2I, Vec3I};
use skyward_core::serialization::{DataReader, DataWriter};
use skyward_core::types::celestial::{CelestialBaseInformation, CelestialCoordinate};
use skyward_core::types::game::ConnectionId;
use skyward_core::types::liquid::LiquidNetUpdate;
use skyward_core::types::tile::{NetTile, TileLayer};
use skyward_core::types::uuid::Uuid;

/// Current wire protocol version; mismatches are rejected in the handshake.
pub const PROTOCOL_VERSION: u32 = 12;

/// Largest accepted packet body.
pub const MAX_PACKET_SIZE: usize = 64 << 20;

/// Per-connection protocol compatibility, negotiated at connect time and
/// used as part of the net-state cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetCompatibilityRules {
    pub version: u32,
    pub legacy: bool,
}

/// Negotiated stream compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    #[default]
    None,
    Zstd,
}

/// Packet kind discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    ProtocolRequest = 0,
    ProtocolResponse = 1,
    ServerDisconnect = 2,
    ConnectSuccess = 3,
    ConnectFailure = 4,
    HandshakeChallenge = 5,
    ChatReceive = 6,
    UniverseTimeUpdate = 7,
    CelestialResponse = 8,
    ClientConnect = 9,
    ClientDisconnectRequest = 10,
    HandshakeResponse = 11,
    PlayerWarp = 12,
    FlyShip = 13,
    ChatSend = 14,
    CelestialRequest = 15,
    ClientContextUpdate = 16,
    WorldStart = 17,
    WorldStop = 18,
    TileArrayUpdate = 19,
    TileUpdate = 20,
    LiquidUpdate = 21,
    TileDamageUpdate = 22,
    EntityCreate = 23,
    EntityUpdate = 24,
    EntityDestroy = 25,
    Pause = 26,
    ServerInfo = 27,
    PlayerWarpResult = 28,
    PlanetTypeUpdate = 29,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Result<PacketType> {
        use PacketType::*;
        Ok(match value {
            0 => ProtocolRequest,
            1 => ProtocolResponse,
            2 => ServerDisconnect,
            3 => ConnectSuccess,
            4 => ConnectFailure,
            5 => HandshakeChallenge,
            6 => ChatReceive,
            7 => UniverseTimeUpdate,
            8 => CelestialResponse,
            9 => ClientConnect,
            10 => ClientDisconnectRequest,
            11 => HandshakeResponse,
            12 => PlayerWarp,
            13 => FlyShip,
            14 => ChatSend,
            15 => CelestialRequest,
            16 => ClientContextUpdate,
            17 => WorldStart,
            18 => WorldStop,
            19 => TileArrayUpdate,
            20 => TileUpdate,
            21 => LiquidUpdate,
            22 => TileDamageUpdate,
            23 => EntityCreate,
            24 => EntityUpdate,
            25 => EntityDestroy,
            26 => Pause,
            27 => ServerInfo,
            28 => PlayerWarpResult,
            29 => PlanetTypeUpdate,
            _ => return Err(ServerError::protocol(format!("unknown packet type {value}"))),
        })
    }
}

/// Chat routing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatSendMode {
    Broadcast,
    Local,
    Party,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub mode: ChatSendMode,
    pub from_connection: ConnectionId,
    pub from_nick: String,
    pub text: String,
}

/// One client-side celestial data request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CelestialRequest {
    Chunk { chunk: Vec2I },
    System { system: Vec3I },
}

/// The closed packet sum. Every packet the core sends or dispatches on is
/// a variant here; unknown kinds never construct a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    ProtocolRequest {
        protocol_version: u32,
    },
    ProtocolResponse {
        allowed: bool,
        info: Json,
    },
    ServerDisconnect {
        reason: String,
    },
    ConnectSuccess {
        client_id: ConnectionId,
        universe_uuid: Uuid,
        celestial_information: CelestialBaseInformation,
    },
    ConnectFailure {
        reason: String,
    },
    HandshakeChallenge {
        salt: Vec<u8>,
    },
    HandshakeResponse {
        pass_hash: Vec<u8>,
    },
    ChatReceive {
        message: ChatMessage,
    },
    ChatSend {
        text: String,
        mode: ChatSendMode,
    },
    UniverseTimeUpdate {
        universe_time: f64,
    },
    CelestialRequest {
        requests: Vec<CelestialRequest>,
    },
    CelestialResponse {
        responses: Json,
    },
    ClientConnect {
        assets_digest: Vec<u8>,
        allow_assets_mismatch: bool,
        account: String,
        player_uuid: Uuid,
        player_name: String,
        player_species: String,
        ship_species: String,
        ship_chunks: WorldChunks,
        ship_upgrades: ShipUpgrades,
        intro_complete: bool,
        info: Json,
    },
    ClientDisconnectRequest,
    PlayerWarp {
        action: WarpAction,
        deploy: bool,
    },
    PlayerWarpResult {
        success: bool,
        action: WarpAction,
        warp_action_invalid: bool,
    },
    FlyShip {
        system: Vec3I,
        location: SystemLocation,
        settings: Json,
    },
    ClientContextUpdate {
        update: Json,
    },
    WorldStart {
        template_data: Json,
        sky_data: Vec<u8>,
        weather_data: Vec<u8>,
        player_start: Vec2F,
        player_respawn: Vec2F,
        respawn_in_world: bool,
        world_properties: Json,
        client_id: ConnectionId,
    },
    WorldStop {
        reason: String,
    },
    TileArrayUpdate {
        min: Vec2I,
        width: u32,
        height: u32,
        tiles: Vec<NetTile>,
    },
    TileUpdate {
        position: Vec2I,
        tile: NetTile,
    },
    LiquidUpdate {
        position: Vec2I,
        liquid: LiquidNetUpdate,
    },
    TileDamageUpdate {
        position: Vec2I,
        layer: TileLayer,
        damage: f32,
    },
    EntityCreate {
        entity_type: u8,
        entity_id: i32,
        store_data: Vec<u8>,
        first_net_state: Vec<u8>,
    },
    EntityUpdate {
        entity_id: i32,
        version: u64,
        delta: Vec<u8>,
    },
    EntityDestroy {
        entity_id: i32,
        death: bool,
        final_net_state: Vec<u8>,
    },
    Pause {
        paused: bool,
        timescale: f32,
    },
    ServerInfo {
        players: u16,
        max_players: u16,
    },
    PlanetTypeUpdate {
        coordinate: CelestialCoordinate,
        planet_type: String,
    },
}

fn write_json<T: Serialize>(writer: &mut DataWriter, value: &T) -> Result<()> {
    writer.write_string(&serde_json::to_string(value)?);
    Ok(())
}

fn read_json<T: DeserializeOwned>(reader: &mut DataReader) -> Result<T> {
    let text = reader.read_string()?;
    Ok(serde_json::from_str(&text)?)
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ProtocolRequest { .. } => PacketType::ProtocolRequest,
            Packet::ProtocolResponse { .. } => PacketType::ProtocolResponse,
            Packet::ServerDisconnect { .. } => PacketType::ServerDisconnect,
            Packet::ConnectSuccess { .. } => PacketType::ConnectSuccess,
            Packet::ConnectFailure { .. } => PacketType::ConnectFailure,
            Packet::HandshakeChallenge { .. } => PacketType::HandshakeChallenge,
            Packet::HandshakeResponse { .. } => PacketType::HandshakeResponse,
            Packet::ChatReceive { .. } => PacketType::ChatReceive,
            Packet::ChatSend { .. } => PacketType::ChatSend,
            Packet::UniverseTimeUpdate { .. } => PacketType::UniverseTimeUpdate,
            Packet::CelestialRequest { .. } => PacketType::CelestialRequest,
            Packet::CelestialResponse { .. } => PacketType::CelestialResponse,
            Packet::ClientConnect { .. } => PacketType::ClientConnect,
            Packet::ClientDisconnectRequest => PacketType::ClientDisconnectRequest,
            Packet::PlayerWarp { .. } => PacketType::PlayerWarp,
            Packet::PlayerWarpResult { .. } => PacketType::PlayerWarpResult,
            Packet::FlyShip { .. } => PacketType::FlyShip,
            Packet::ClientContextUpdate { .. } => PacketType::ClientContextUpdate,
            Packet::WorldStart { .. } => PacketType::WorldStart,
            Packet::WorldStop { .. } => PacketType::WorldStop,
            Packet::TileArrayUpdate { .. } => PacketType::TileArrayUpdate,
            Packet::TileUpdate { .. } => PacketType::TileUpdate,
            Packet::LiquidUpdate { .. } => PacketType::LiquidUpdate,
            Packet::TileDamageUpdate { .. } => PacketType::TileDamageUpdate,
            Packet::EntityCreate { .. } => PacketType::EntityCreate,
            Packet::EntityUpdate { .. } => PacketType::EntityUpdate,
            Packet::EntityDestroy { .. } => PacketType::EntityDestroy,
            Packet::Pause { .. } => PacketType::Pause,
            Packet::ServerInfo { .. } => PacketType::ServerInfo,
            Packet::PlanetTypeUpdate { .. } => PacketType::PlanetTypeUpdate,
        }
    }

    pub fn write_body(&self, writer: &mut DataWriter) -> Result<()> {
        match self {
            Packet::ProtocolRequest { protocol_version } => writer.write_u32(*protocol_version),
            Packet::ProtocolResponse { allowed, info } => {
                writer.write_bool(*allowed);
                write_json(writer, info)?;
            }
            Packet::ServerDisconnect { reason } => writer.write_string(reason),
            Packet::ConnectSuccess {
                client_id,
                universe_uuid,
                celestial_information,
            } => {
                writer.write_u16(*client_id);
                writer.write_bytes(universe_uuid.as_bytes());
                write_json(writer, celestial_information)?;
            }
            Packet::ConnectFailure { reason } => writer.write_string(reason),
            Packet::HandshakeChallenge { salt } => writer.write_byte_array(salt),
            Packet::HandshakeResponse { pass_hash } => writer.write_byte_array(pass_hash),
            Packet::ChatReceive { message } => write_json(writer, message)?,
            Packet::ChatSend { text, mode } => {
                writer.write_string(text);
                write_json(writer, mode)?;
            }
            Packet::UniverseTimeUpdate { universe_time } => writer.write_f64(*universe_time),
            Packet::CelestialRequest { requests } => write_json(writer, requests)?,
            Packet::CelestialResponse { responses } => write_json(writer, responses)?,
            Packet::ClientConnect {
                assets_digest,
                allow_assets_mismatch,
                account,
                player_uuid,
                player_name,
                player_species,
                ship_species,
                ship_chunks,
                ship_upgrades,
                intro_complete,
                info,
            } => {
                writer.write_byte_array(assets_digest);
                writer.write_bool(*allow_assets_mismatch);
                writer.write_string(account);
                writer.write_bytes(player_uuid.as_bytes());
                writer.write_string(player_name);
                writer.write_string(player_species);
                writer.write_string(ship_species);
                write_json(writer, ship_chunks)?;
                write_json(writer, ship_upgrades)?;
                writer.write_bool(*intro_complete);
                write_json(writer, info)?;
            }
            Packet::ClientDisconnectRequest => {}
            Packet::PlayerWarp { action, deploy } => {
                write_json(writer, action)?;
                writer.write_bool(*deploy);
            }
            Packet::PlayerWarpResult {
                success,
                action,
                warp_action_invalid,
            } => {
                writer.write_bool(*success);
                write_json(writer, action)?;
                writer.write_bool(*warp_action_invalid);
            }
            Packet::FlyShip {
                system,
                location,
                settings,
            } => {
                writer.write_i32(system.x());
                writer.write_i32(system.y());
                writer.write_i32(system.z());
                write_json(writer, location)?;
                write_json(writer, settings)?;
            }
            Packet::ClientContextUpdate { update } => write_json(writer, update)?,
            Packet::WorldStart {
                template_data,
                sky_data,
                weather_data,
                player_start,
                player_respawn,
                respawn_in_world,
                world_properties,
                client_id,
            } => {
                write_json(writer, template_data)?;
                writer.write_byte_array(sky_data);
                writer.write_byte_array(weather_data);
                writer.write_f32(player_start.x());
                writer.write_f32(player_start.y());
                writer.write_f32(player_respawn.x());
                writer.write_f32(player_respawn.y());
                writer.write_bool(*respawn_in_world);
                write_json(writer, world_properties)?;
                writer.write_u16(*client_id);
            }
            Packet::WorldStop { reason } => writer.write_string(reason),
            Packet::TileArrayUpdate {
                min,
                width,
                height,
                tiles,
            } => {
                writer.write_i32(min.x());
                writer.write_i32(min.y());
                writer.write_u32(*width);
                writer.write_u32(*height);
                for tile in tiles {
                    writer.write(tile);
                }
            }
            Packet::TileUpdate { position, tile } => {
                writer.write_i32(position.x());
                writer.write_i32(position.y());
                writer.write(tile);
            }
            Packet::LiquidUpdate { position, liquid } => {
                writer.write_i32(position.x());
                writer.write_i32(position.y());
                writer.write_u8(liquid.liquid);
                writer.write_u8(liquid.level);
            }
            Packet::TileDamageUpdate {
                position,
                layer,
                damage,
            } => {
                writer.write_i32(position.x());
                writer.write_i32(position.y());
                writer.write_u8(matches!(layer, TileLayer::Background) as u8);
                writer.write_f32(*damage);
            }
            Packet::EntityCreate {
                entity_type,
                entity_id,
                store_data,
                first_net_state,
            } => {
                writer.write_u8(*entity_type);
                writer.write_i32(*entity_id);
                writer.write_byte_array(store_data);
                writer.write_byte_array(first_net_state);
            }
            Packet::EntityUpdate {
                entity_id,
                version,
                delta,
            } => {
                writer.write_i32(*entity_id);
                writer.write_u64(*version);
                writer.write_byte_array(delta);
            }
            Packet::EntityDestroy {
                entity_id,
                death,
                final_net_state,
            } => {
                writer.write_i32(*entity_id);
                writer.write_bool(*death);
                writer.write_byte_array(final_net_state);
            }
            Packet::Pause { paused, timescale } => {
                writer.write_bool(*paused);
                writer.write_f32(*timescale);
            }
            Packet::ServerInfo {
                players,
                max_players,
            } => {
                writer.write_u16(*players);
                writer.write_u16(*max_players);
            }
            Packet::PlanetTypeUpdate {
                coordinate,
                planet_type,
            } => {
                write_json(writer, coordinate)?;
                writer.write_string(planet_type);
            }
        }
        Ok(())
    }

    pub fn read_body(packet_type: PacketType, reader: &mut DataReader) -> Result<Packet> {
        Ok(match packet_type {
            PacketType::ProtocolRequest => Packet::ProtocolRequest {
                protocol_version: reader.read_u32()?,
            },
            PacketType::ProtocolResponse => Packet::ProtocolResponse {
                allowed: reader.read_bool()?,
                info: read_json(reader)?,
            },
            PacketType::ServerDisconnect => Packet::ServerDisconnect {
                reason: reader.read_string()?,
            },
            PacketType::ConnectSuccess => Packet::ConnectSuccess {
                client_id: reader.read_u16()?,
                universe_uuid: read_uuid(reader)?,
                celestial_information: read_json(reader)?,
            },
            PacketType::ConnectFailure => Packet::ConnectFailure {
                reason: reader.read_string()?,
            },
            PacketType::HandshakeChallenge => Packet::HandshakeChallenge {
                salt: reader.read_byte_array()?,
            },
            PacketType::HandshakeResponse => Packet::HandshakeResponse {
                pass_hash: reader.read_byte_array()?,
            },
            PacketType::ChatReceive => Packet::ChatReceive {
                message: read_json(reader)?,
            },
            PacketType::ChatSend => Packet::ChatSend {
                text: reader.read_string()?,
                mode: read_json(reader)?,
            },
            PacketType::UniverseTimeUpdate => Packet::UniverseTimeUpdate {
                universe_time: reader.read_f64()?,
            },
            PacketType::CelestialRequest => Packet::CelestialRequest {
                requests: read_json(reader)?,
            },
            PacketType::CelestialResponse => Packet::CelestialResponse {
                responses: read_json(reader)?,
            },
            PacketType::ClientConnect => Packet::ClientConnect {
                assets_digest: reader.read_byte_array()?,
                allow_assets_mismatch: reader.read_bool()?,
                account: reader.read_string()?,
                player_uuid: read_uuid(reader)?,
                player_name: reader.read_string()?,
                player_species: reader.read_string()?,
                ship_species: reader.read_string()?,
                ship_chunks: read_json(reader)?,
                ship_upgrades: read_json(reader)?,
                intro_complete: reader.read_bool()?,
                info: read_json(reader)?,
            },
            PacketType::ClientDisconnectRequest => Packet::ClientDisconnectRequest,
            PacketType::PlayerWarp => Packet::PlayerWarp {
                action: read_json(reader)?,
                deploy: reader.read_bool()?,
            },
            PacketType::PlayerWarpResult => Packet::PlayerWarpResult {
                success: reader.read_bool()?,
                action: read_json(reader)?,
                warp_action_invalid: reader.read_bool()?,
            },
            PacketType::FlyShip => Packet::FlyShip {
                system: Vec3I::new(reader.read_i32()?, reader.read_i32()?, reader.read_i32()?),
                location: read_json(reader)?,
                settings: read_json(reader)?,
            },
            PacketType::ClientContextUpdate => Packet::ClientContextUpdate {
                update: read_json(reader)?,
            },
            PacketType::WorldStart => Packet::WorldStart {
                template_data: read_json(reader)?,
                sky_data: reader.read_byte_array()?,
                weather_data: reader.read_byte_array()?,
                player_start: Vec2F::new(reader.read_f32()?, reader.read_f32()?),
                player_respawn: Vec2F::new(reader.read_f32()?, reader.read_f32()?),
                respawn_in_world: reader.read_bool()?,
                world_properties: read_json(reader)?,
                client_id: reader.read_u16()?,
            },
            PacketType::WorldStop => Packet::WorldStop {
                reason: reader.read_string()?,
            },
            PacketType::TileArrayUpdate => {
                let min = Vec2I::new(reader.read_i32()?, reader.read_i32()?);
                let width = reader.read_u32()?;
                let height = reader.read_u32()?;
                let count = (width as u64 * height as u64) as usize;
                let mut tiles = Vec::with_capacity(count.min(65536));
                for _ in 0..count {
                    tiles.push(reader.read()?);
                }
                Packet::TileArrayUpdate {
                    min,
                    width,
                    height,
                    tiles,
                }
            }
            PacketType::TileUpdate => Packet::TileUpdate {
                position: Vec2I::new(reader.read_i32()?, reader.read_i32()?),
                tile: reader.read()?,
            },
            PacketType::LiquidUpdate => Packet::LiquidUpdate {
                position: Vec2I::new(reader.read_i32()?, reader.read_i32()?),
                liquid: LiquidNetUpdate {
                    liquid: reader.read_u8()?,
                    level: reader.read_u8()?,
                },
            },
            PacketType::TileDamageUpdate => Packet::TileDamageUpdate {
                position: Vec2I::new(reader.read_i32()?, reader.read_i32()?),
                layer: if reader.read_u8()? == 1 {
                    TileLayer::Background
                } else {
                    TileLayer::Foreground
                },
                damage: reader.read_f32()?,
            },
            PacketType::EntityCreate => Packet::EntityCreate {
                entity_type: reader.read_u8()?,
                entity_id: reader.read_i32()?,
                store_data: reader.read_byte_array()?,
                first_net_state: reader.read_byte_array()?,
            },
            PacketType::EntityUpdate => Packet::EntityUpdate {
                entity_id: reader.read_i32()?,
                version: reader.read_u64()?,
                delta: reader.read_byte_array()?,
            },
            PacketType::EntityDestroy => Packet::EntityDestroy {
                entity_id: reader.read_i32()?,
                death: reader.read_bool()?,
                final_net_state: reader.read_byte_array()?,
            },
            PacketType::Pause => Packet::Pause {
                paused: reader.read_bool()?,
                timescale: reader.read_f32()?,
            },
            PacketType::ServerInfo => Packet::ServerInfo {
                players: reader.read_u16()?,
                max_players: reader.read_u16()?,
            },
            PacketType::PlanetTypeUpdate => Packet::PlanetTypeUpdate {
                coordinate: read_json(reader)?,
                planet_type: reader.read_string()?,
            },
        })
    }
}

fn read_uuid(reader: &mut DataReader) -> Result<Uuid> {
    let bytes = reader.read_bytes(16)?;
    let mut data = [0u8; 16];
    data.copy_from_slice(&bytes);
    Ok(Uuid::from_bytes(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: Packet) {
        let mut writer = DataWriter::new();
        packet.write_body(&mut writer).unwrap();
        let bytes = writer.into_bytes();
        let mut reader = DataReader::new(&bytes);
        let back = Packet::read_body(packet.packet_type(), &mut reader).unwrap();
        assert_eq!(packet, back);
        assert!(reader.at_end());
    }

    #[test]
    fn handshake_packets_round_trip() {
        round_trip(Packet::ProtocolRequest {
            protocol_version: PROTOCOL_VERSION,
        });
        round_trip(Packet::ProtocolResponse {
            allowed: true,
            info: serde_json::json!({"compression": "zstd", "openProtocolVersion": 1}),
        });
        round_trip(Packet::HandshakeChallenge {
            salt: vec![1, 2, 3, 4],
        });
        round_trip(Packet::ConnectFailure {
            reason: "You are banned: x".into(),
        });
    }

    #[test]
    fn world_packets_round_trip() {
        round_trip(Packet::TileUpdate {
            position: Vec2I::new(10, -3),
            tile: NetTile::default(),
        });
        round_trip(Packet::EntityUpdate {
            entity_id: 77,
            version: 12,
            delta: vec![9, 9, 9],
        });
        round_trip(Packet::Pause {
            paused: true,
            timescale: 0.5,
        });
    }

    #[test]
    fn warp_packets_round_trip() {
        round_trip(Packet::PlayerWarp {
            action: WarpAction::own_ship(),
            deploy: false,
        });
        round_trip(Packet::PlayerWarpResult {
            success: true,
            action: WarpAction::own_ship(),
            warp_action_invalid: false,
        });
    }

    #[test]
    fn unknown_packet_type_is_rejected() {
        assert!(PacketType::from_u8(200).is_err());
    }
}
