//! Tile-local placement rules.
//!
//! A rule attached to a tile also constrains the part it belongs to; part
//! level queries fold over every tile rule.

use crate::error::{Result, ServerError};
use crate::world::dungeon::writer::DungeonGeneratorWriter;
use serde_json::Value as Json;
use skyward_core::math::Vec2I;
use skyward_core::types::tile::TileLayer;
use std::collections::HashMap;

/// The closed set of placement rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    AllowOverdrawing,
    IgnorePartMaximum,
    MaxSpawnCount(i32),
    DoNotConnectToPart(Vec<String>),
    DoNotCombineWith(Vec<String>),
    MustContainAir(TileLayer),
    MustContainSolid(TileLayer),
    MustContainLiquid,
    MustNotContainLiquid,
}

impl Rule {
    /// Parses one rule entry of the form `["ruleName", [args...]]`.
    /// Unknown rule names are skipped with a `None` so definitions survive
    /// editor-side additions.
    pub fn parse(config: &Json) -> Result<Option<Rule>> {
        let entries = config
            .as_array()
            .ok_or_else(|| ServerError::Dungeon("rule must be an array".into()))?;
        let name = entries
            .first()
            .and_then(Json::as_str)
            .ok_or_else(|| ServerError::Dungeon("rule missing name".into()))?;
        let args = entries.get(1).and_then(Json::as_array);

        let layer_arg = || match args
            .and_then(|a| a.first())
            .and_then(Json::as_str)
            .unwrap_or("foreground")
        {
            "background" => TileLayer::Background,
            _ => TileLayer::Foreground,
        };

        let string_list = || -> Vec<String> {
            args.map(|a| {
                a.iter()
                    .filter_map(Json::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
        };

        Ok(match name {
            "allowOverdrawing" => Some(Rule::AllowOverdrawing),
            "ignorePartMaximum" => Some(Rule::IgnorePartMaximum),
            "maxSpawnCount" => {
                let count = args
                    .and_then(|a| a.first())
                    .and_then(Json::as_i64)
                    .ok_or_else(|| ServerError::Dungeon("maxSpawnCount needs a count".into()))?;
                Some(Rule::MaxSpawnCount(count as i32))
            }
            "doNotConnectToPart" => Some(Rule::DoNotConnectToPart(string_list())),
            "doNotCombineWith" => Some(Rule::DoNotCombineWith(string_list())),
            "worldGenMustContainAir" => Some(Rule::MustContainAir(layer_arg())),
            "worldGenMustContainSolid" => Some(Rule::MustContainSolid(layer_arg())),
            "worldGenMustContainLiquid" => Some(Rule::MustContainLiquid),
            "worldGenMustNotContainLiquid" => Some(Rule::MustNotContainLiquid),
            _ => None,
        })
    }

    pub fn read_rules(config: &Json) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        if let Some(entries) = config.as_array() {
            for entry in entries {
                if let Some(rule) = Rule::parse(entry)? {
                    rules.push(rule);
                }
            }
        }
        Ok(rules)
    }

    /// Whether the world state at `position` satisfies this rule.
    pub fn check_tile_can_place(
        &self,
        position: Vec2I,
        writer: &mut DungeonGeneratorWriter,
    ) -> bool {
        match self {
            Rule::MustContainAir(layer) => writer.check_open(position, *layer),
            Rule::MustContainSolid(layer) => writer.check_solid(position, *layer),
            Rule::MustContainLiquid => writer.check_liquid(position),
            Rule::MustNotContainLiquid => !writer.check_liquid(position),
            _ => true,
        }
    }

    pub fn overdrawable(&self) -> bool {
        matches!(self, Rule::AllowOverdrawing)
    }

    pub fn ignore_part_maximum(&self) -> bool {
        matches!(self, Rule::IgnorePartMaximum)
    }

    pub fn allow_spawn_count(&self, current_count: i32) -> bool {
        match self {
            Rule::MaxSpawnCount(max) => current_count < *max,
            _ => true,
        }
    }

    pub fn does_not_connect_to_part(&self, name: &str) -> bool {
        match self {
            Rule::DoNotConnectToPart(names) => names.iter().any(|n| n == name),
            _ => false,
        }
    }

    pub fn check_part_combinations_allowed(&self, placement_counter: &HashMap<String, i32>) -> bool {
        match self {
            Rule::DoNotCombineWith(names) => !names
                .iter()
                .any(|name| placement_counter.get(name).copied().unwrap_or(0) > 0),
            _ => true,
        }
    }

    pub fn requires_open(&self) -> bool {
        matches!(self, Rule::MustContainAir(_))
    }

    pub fn requires_solid(&self) -> bool {
        matches!(self, Rule::MustContainSolid(_))
    }

    pub fn requires_liquid(&self) -> bool {
        matches!(self, Rule::MustContainLiquid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_rules() {
        let rules = Rule::read_rules(&json!([
            ["allowOverdrawing"],
            ["maxSpawnCount", [3]],
            ["doNotConnectToPart", ["tower", "cellar"]],
            ["worldGenMustContainSolid", ["background"]],
            ["someFutureRule", []]
        ]))
        .unwrap();

        assert_eq!(rules.len(), 4, "unknown rules are skipped");
        assert!(rules[0].overdrawable());
        assert!(rules[1].allow_spawn_count(2));
        assert!(!rules[1].allow_spawn_count(3));
        assert!(rules[2].does_not_connect_to_part("tower"));
        assert!(!rules[2].does_not_connect_to_part("keep"));
        assert_eq!(rules[3], Rule::MustContainSolid(TileLayer::Background));
    }

    #[test]
    fn combination_rule_checks_counter() {
        let rule = Rule::DoNotCombineWith(vec!["shrine".into()]);
        let mut counter = HashMap::new();
        assert!(rule.check_part_combinations_allowed(&counter));
        counter.insert("shrine".to_string(), 1);
        assert!(!rule.check_part_combinations_allowed(&counter));
    }

    #[test]
    fn malformed_rule_is_an_error() {
        assert!(Rule::parse(&json!("notAnArray")).is_err());
        assert!(Rule::parse(&json!([["nested"]])).is_err());
    }
}
