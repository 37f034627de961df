//! Dungeon generation benchmark driver.
//!
//! Repeatedly generates a dungeon world's worth of placements and reports
//! timing, for profiling the generator and layout code.

use anyhow::Context;
use clap::Parser;
use log::info;
use serde_json::json;
use skyward_core::math::{Vec2I, Vec2U};
use skyward_core::types::time::monotonic_time;
use skyward_server::world::dungeon::{DungeonDefinition, DungeonGenerator};
use skyward_server::world::server::{WorldServer, WorldServerConfig};
use skyward_server::world::storage::WorldStorage;
use skyward_server::world::template::{TerrestrialParameters, WorldTemplate};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "dungeon-bench", about = "Benchmark dungeon world generation")]
struct Options {
    /// Dungeon definition file to place, or the built-in benchmark
    /// dungeon when omitted.
    #[arg(long = "dungeon-world")]
    dungeon_world: Option<String>,

    /// How many times to generate.
    #[arg(long, default_value_t = 10)]
    repetitions: u32,

    /// Report a running average every n repetitions.
    #[arg(long = "report-every", default_value_t = 1)]
    report_every: u32,
}

fn benchmark_definition() -> serde_json::Value {
    json!({
        "name": "benchmark",
        "maxParts": 32,
        "maxRadius": 200,
        "anchors": ["hall"],
        "parts": [
            {
                "name": "hall",
                "def": {
                    "rows": ["########", "#......>", "#......>", "########"],
                    "legend": {
                        "#": {"brushes": [["front", {"material": 12}]]},
                        ".": {"brushes": [["clear"], ["back", {"material": 13}]]},
                        ">": {
                            "brushes": [["clear"], ["back", {"material": 13}]],
                            "connector": {"value": "hall", "direction": "right"}
                        }
                    }
                }
            },
            {
                "name": "room",
                "rules": [["maxSpawnCount", [24]]],
                "def": {
                    "rows": ["<#######", "<......#", "<......#", "########"],
                    "legend": {
                        "#": {"brushes": [["front", {"material": 14}]]},
                        ".": {"brushes": [["clear"], ["back", {"material": 13}]]},
                        "<": {
                            "brushes": [["clear"], ["back", {"material": 13}]],
                            "connector": {"value": "hall", "direction": "left"}
                        }
                    }
                }
            }
        ]
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let options = Options::parse();

    let definition_json = match &options.dungeon_world {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading dungeon definition {path}"))?;
            serde_json::from_str(&text).context("parsing dungeon definition")?
        }
        None => benchmark_definition(),
    };
    let definition =
        Arc::new(DungeonDefinition::from_json(&definition_json).context("loading definition")?);

    info!(
        "benchmarking dungeon '{}' x{}",
        definition.name(),
        options.repetitions
    );

    let template = WorldTemplate::terrestrial(
        0xbe7c_4a11,
        &TerrestrialParameters {
            size: Vec2U::new(2000, 1000),
            surface_level: 500,
            undersurface_level: 420,
            core_level: 100,
            ..TerrestrialParameters::default()
        },
    );

    let mut total = 0.0f64;
    let mut total_parts = 0usize;
    for repetition in 1..=options.repetitions {
        let mut world = WorldServer::new(
            format!("bench-{repetition}"),
            WorldTemplate::from_store(&template.to_store()?)?,
            WorldStorage::memory(),
            WorldServerConfig::default(),
        )?;
        let mut generator =
            DungeonGenerator::new(definition.clone(), repetition as u64, Some(1000));

        let position = Vec2I::new(400 + (repetition as i32 * 37) % 1200, 480);
        world.signal_region(skyward_core::math::RectI::from_coords(
            position.x() - 220,
            position.y() - 220,
            position.x() + 220,
            position.y() + 220,
        ));

        let started = monotonic_time();
        let placed = generator.generate(&mut world, position, None, true);
        let elapsed = monotonic_time() - started;

        total += elapsed;
        if let Some((rects, _)) = placed {
            total_parts += rects.len();
        }

        if repetition % options.report_every == 0 {
            info!(
                "repetition {repetition}: {elapsed:.4}s (avg {:.4}s, {} parts placed total)",
                total / repetition as f64,
                total_parts
            );
        }
    }

    info!(
        "done: {} repetitions, {:.4}s average",
        options.repetitions,
        total / options.repetitions.max(1) as f64
    );
    Ok(())
}
