//! Paint operations applied per tile, keyed by generation phase.

use crate::error::{Result, ServerError};
use crate::world::dungeon::writer::DungeonGeneratorWriter;
use serde_json::Value as Json;
use skyward_core::math::Vec2I;
use skyward_core::types::game::Direction;
use skyward_core::types::liquid::LiquidStore;
use skyward_core::types::material::{
    MaterialColorVariant, MaterialHue, MaterialId, ModId, EMPTY_MATERIAL_ID, NO_MOD_ID,
};
use skyward_core::types::random::static_random_u64;
use skyward_core::types::tile::DungeonId;

/// Generation phases, applied over every placed tile in this fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Clear,
    Wall,
    Mods,
    Object,
    BiomeTrees,
    BiomeItems,
    Wire,
    Item,
    Npc,
    DungeonId,
}

impl Phase {
    pub const ORDER: [Phase; 10] = [
        Phase::Clear,
        Phase::Wall,
        Phase::Mods,
        Phase::Object,
        Phase::BiomeTrees,
        Phase::BiomeItems,
        Phase::Wire,
        Phase::Item,
        Phase::Npc,
        Phase::DungeonId,
    ];
}

/// The closed set of brushes.
#[derive(Debug, Clone, PartialEq)]
pub enum Brush {
    Clear,
    Front {
        material: MaterialId,
        hue_shift: MaterialHue,
        color_variant: MaterialColorVariant,
        material_mod: Option<(ModId, MaterialHue)>,
    },
    Back {
        material: MaterialId,
        hue_shift: MaterialHue,
        color_variant: MaterialColorVariant,
        material_mod: Option<(ModId, MaterialHue)>,
    },
    Object {
        name: String,
        direction: Direction,
        parameters: Json,
    },
    Vehicle {
        name: String,
        parameters: Json,
    },
    BiomeItems,
    BiomeTree,
    Item {
        descriptor: Json,
    },
    Npc {
        definition: Json,
    },
    Stagehand {
        definition: Json,
    },
    Liquid {
        liquid: u8,
        quantity: f32,
        source: bool,
    },
    Wire {
        group: String,
        part_local: bool,
    },
    DungeonId {
        dungeon_id: DungeonId,
    },
    PlayerStart,
    /// Picks one sub-brush deterministically from the world seed.
    Random {
        brushes: Vec<Brush>,
        seed: u64,
    },
    /// Placeholder for an asset that no longer exists; painting it
    /// reports a structured warning instead of failing generation.
    Invalid {
        name_hint: Option<String>,
    },
}

impl Brush {
    /// Parses one brush entry `["brushName", {args...}]`.
    pub fn parse(config: &Json) -> Result<Brush> {
        let entries = config
            .as_array()
            .ok_or_else(|| ServerError::Dungeon("brush must be an array".into()))?;
        let name = entries
            .first()
            .and_then(Json::as_str)
            .ok_or_else(|| ServerError::Dungeon("brush missing name".into()))?;
        let args = entries.get(1).cloned().unwrap_or(Json::Null);

        let material_args = |args: &Json| -> (MaterialId, MaterialHue, MaterialColorVariant) {
            (
                args.get("material")
                    .and_then(Json::as_u64)
                    .unwrap_or(EMPTY_MATERIAL_ID as u64) as MaterialId,
                args.get("hueShift").and_then(Json::as_u64).unwrap_or(0) as MaterialHue,
                args.get("colorVariant").and_then(Json::as_u64).unwrap_or(0)
                    as MaterialColorVariant,
            )
        };
        let mod_args = |args: &Json| -> Option<(ModId, MaterialHue)> {
            let mod_id = args.get("mod").and_then(Json::as_u64)? as ModId;
            let hue = args.get("modHueShift").and_then(Json::as_u64).unwrap_or(0) as MaterialHue;
            (mod_id != NO_MOD_ID).then_some((mod_id, hue))
        };

        Ok(match name {
            "clear" => Brush::Clear,
            "front" => {
                let (material, hue_shift, color_variant) = material_args(&args);
                Brush::Front {
                    material,
                    hue_shift,
                    color_variant,
                    material_mod: mod_args(&args),
                }
            }
            "back" => {
                let (material, hue_shift, color_variant) = material_args(&args);
                Brush::Back {
                    material,
                    hue_shift,
                    color_variant,
                    material_mod: mod_args(&args),
                }
            }
            "object" => Brush::Object {
                name: args
                    .get("name")
                    .and_then(Json::as_str)
                    .ok_or_else(|| ServerError::Dungeon("object brush missing name".into()))?
                    .to_string(),
                direction: args
                    .get("direction")
                    .and_then(Json::as_str)
                    .and_then(Direction::from_name)
                    .unwrap_or(Direction::Left),
                parameters: args.get("parameters").cloned().unwrap_or(Json::Null),
            },
            "vehicle" => Brush::Vehicle {
                name: args
                    .get("name")
                    .and_then(Json::as_str)
                    .ok_or_else(|| ServerError::Dungeon("vehicle brush missing name".into()))?
                    .to_string(),
                parameters: args.get("parameters").cloned().unwrap_or(Json::Null),
            },
            "biomeitems" => Brush::BiomeItems,
            "biometree" => Brush::BiomeTree,
            "item" => Brush::Item { descriptor: args },
            "npc" => Brush::Npc { definition: args },
            "stagehand" => Brush::Stagehand { definition: args },
            "liquid" => Brush::Liquid {
                liquid: args.get("liquid").and_then(Json::as_u64).unwrap_or(0) as u8,
                quantity: args
                    .get("quantity")
                    .and_then(Json::as_f64)
                    .unwrap_or(1.0) as f32,
                source: args
                    .get("source")
                    .and_then(Json::as_bool)
                    .unwrap_or(false),
            },
            "wire" => Brush::Wire {
                group: args
                    .get("group")
                    .and_then(Json::as_str)
                    .unwrap_or_default()
                    .to_string(),
                part_local: args
                    .get("local")
                    .and_then(Json::as_bool)
                    .unwrap_or(false),
            },
            "dungeonid" => Brush::DungeonId {
                dungeon_id: args.as_u64().or_else(|| args.get("id").and_then(Json::as_u64)).unwrap_or(0)
                    as DungeonId,
            },
            "playerstart" => Brush::PlayerStart,
            "random" => {
                let brushes = args
                    .get("brushes")
                    .and_then(Json::as_array)
                    .map(|list| list.iter().map(Brush::parse).collect::<Result<Vec<_>>>())
                    .transpose()?
                    .unwrap_or_default();
                Brush::Random {
                    brushes,
                    seed: args.get("seed").and_then(Json::as_u64).unwrap_or(0),
                }
            }
            "invalid" => Brush::Invalid {
                name_hint: args
                    .get("nameHint")
                    .and_then(Json::as_str)
                    .map(str::to_string),
            },
            _ => Brush::Invalid {
                name_hint: Some(name.to_string()),
            },
        })
    }

    pub fn read_brushes(config: &Json) -> Result<Vec<Brush>> {
        config
            .as_array()
            .map(|list| list.iter().map(Brush::parse).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Applies this brush at `position` if it participates in `phase`.
    pub fn paint(&self, position: Vec2I, phase: Phase, writer: &mut DungeonGeneratorWriter) {
        match self {
            Brush::Clear => {
                if phase == Phase::Clear {
                    writer.set_foreground_material(position, EMPTY_MATERIAL_ID, 0, 0);
                    writer.set_background_material(position, EMPTY_MATERIAL_ID, 0, 0);
                }
            }
            Brush::Front {
                material,
                hue_shift,
                color_variant,
                material_mod,
            } => {
                if phase == Phase::Wall {
                    writer.set_foreground_material(position, *material, *hue_shift, *color_variant);
                }
                if phase == Phase::Mods {
                    if let Some((mod_id, mod_hue)) = material_mod {
                        writer.set_foreground_mod(position, *mod_id, *mod_hue);
                    }
                }
            }
            Brush::Back {
                material,
                hue_shift,
                color_variant,
                material_mod,
            } => {
                if phase == Phase::Wall {
                    writer.set_background_material(position, *material, *hue_shift, *color_variant);
                }
                if phase == Phase::Mods {
                    if let Some((mod_id, mod_hue)) = material_mod {
                        writer.set_background_mod(position, *mod_id, *mod_hue);
                    }
                }
            }
            Brush::Object {
                name,
                direction,
                parameters,
            } => {
                if phase == Phase::Object {
                    writer.place_object(position, name, *direction, parameters);
                }
            }
            Brush::Vehicle { name, parameters } => {
                if phase == Phase::Object {
                    writer.place_vehicle(position.to_f32(), name, parameters);
                }
            }
            Brush::BiomeItems => {
                if phase == Phase::BiomeItems {
                    writer.place_surface_biome_items(position);
                }
            }
            Brush::BiomeTree => {
                if phase == Phase::BiomeTrees {
                    writer.place_biome_tree(position);
                }
            }
            Brush::Item { descriptor } => {
                if phase == Phase::Item {
                    writer.add_drop(position.to_f32(), descriptor);
                }
            }
            Brush::Npc { definition } => {
                if phase == Phase::Npc {
                    writer.spawn_npc(position.to_f32(), definition);
                }
            }
            Brush::Stagehand { definition } => {
                if phase == Phase::Npc {
                    writer.spawn_stagehand(position.to_f32(), definition);
                }
            }
            Brush::Liquid {
                liquid,
                quantity,
                source,
            } => {
                if phase == Phase::Wall {
                    writer.request_liquid(
                        position,
                        LiquidStore::new(*liquid, (*quantity).clamp(0.0, 1.0), 0.0, *source),
                    );
                }
            }
            Brush::Wire { group, part_local } => {
                if phase == Phase::Wire {
                    writer.request_wire(position, group, *part_local);
                }
            }
            Brush::DungeonId { dungeon_id } => {
                if phase == Phase::DungeonId {
                    writer.set_dungeon_id(position, *dungeon_id);
                }
            }
            Brush::PlayerStart => {
                if phase == Phase::Object {
                    writer.set_player_start(position.to_f32());
                }
            }
            Brush::Random { brushes, seed } => {
                if brushes.is_empty() {
                    return;
                }
                let pick = static_random_u64(
                    *seed,
                    &[&(position.x() as usize), &(position.y() as usize)],
                ) as usize
                    % brushes.len();
                brushes[pick].paint(position, phase, writer);
            }
            Brush::Invalid { name_hint } => {
                if phase == Phase::Clear {
                    writer.report_invalid_brush(position, name_hint.as_deref());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_material_brushes() {
        let brush = Brush::parse(&json!(["front", {"material": 12, "hueShift": 30}])).unwrap();
        assert_eq!(
            brush,
            Brush::Front {
                material: 12,
                hue_shift: 30,
                color_variant: 0,
                material_mod: None,
            }
        );
    }

    #[test]
    fn unknown_brush_becomes_invalid() {
        let brush = Brush::parse(&json!(["launchpad", {}])).unwrap();
        assert_eq!(
            brush,
            Brush::Invalid {
                name_hint: Some("launchpad".into())
            }
        );
    }

    #[test]
    fn random_brush_is_deterministic() {
        let brush = Brush::parse(&json!([
            "random",
            {"seed": 9, "brushes": [["clear"], ["front", {"material": 1}]]}
        ]))
        .unwrap();
        let Brush::Random { brushes, seed } = &brush else {
            panic!("expected random brush");
        };
        assert_eq!(brushes.len(), 2);
        let pick_a = static_random_u64(*seed, &[&10usize, &20usize]) as usize % brushes.len();
        let pick_b = static_random_u64(*seed, &[&10usize, &20usize]) as usize % brushes.len();
        assert_eq!(pick_a, pick_b);
    }

    #[test]
    fn phase_order_is_fixed() {
        assert_eq!(Phase::ORDER.first(), Some(&Phase::Clear));
        assert_eq!(Phase::ORDER.last(), Some(&Phase::DungeonId));
        assert_eq!(Phase::ORDER.len(), 10);
    }
}
