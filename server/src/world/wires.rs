//! Wire networks: connected components of typed ports, with signal
//! propagation across each component.

use skyward_core::math::Vec2I;
use std::collections::{HashMap, HashSet};

/// One endpoint: a tile position plus a port index on that tile.
pub type WirePort = (Vec2I, usize);

/// A wire connection between an output port and an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireConnection {
    pub output: WirePort,
    pub input: WirePort,
}

/// Holds the world's wire graph as an edge list and lazily derives the
/// connected components when signals propagate.
#[derive(Default)]
pub struct WireProcessor {
    connections: HashSet<WireConnection>,
    /// Current signal level per output port.
    outputs: HashMap<WirePort, bool>,
    /// Resolved input states from the last propagation.
    inputs: HashMap<WirePort, bool>,
    dirty: bool,
}

impl WireProcessor {
    pub fn new() -> WireProcessor {
        WireProcessor::default()
    }

    pub fn connect(&mut self, output: WirePort, input: WirePort) {
        if self.connections.insert(WireConnection { output, input }) {
            self.dirty = true;
        }
    }

    pub fn disconnect(&mut self, output: WirePort, input: WirePort) {
        if self.connections.remove(&WireConnection { output, input }) {
            self.dirty = true;
        }
    }

    /// Drops every connection touching any port on a tile, used when the
    /// tile or its entity is removed.
    pub fn remove_tile(&mut self, position: Vec2I) {
        let before = self.connections.len();
        self.connections
            .retain(|c| c.output.0 != position && c.input.0 != position);
        if self.connections.len() != before {
            self.dirty = true;
        }
        self.outputs.retain(|port, _| port.0 != position);
    }

    pub fn set_output(&mut self, port: WirePort, state: bool) {
        let previous = self.outputs.insert(port, state);
        if previous != Some(state) {
            self.dirty = true;
        }
    }

    pub fn input_state(&self, port: WirePort) -> bool {
        self.inputs.get(&port).copied().unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Propagates output states to inputs: an input is high when any
    /// output in its connected component is high. Runs only when the
    /// graph or an output changed since the last call; returns the inputs
    /// whose state flipped.
    pub fn propagate(&mut self) -> Vec<(WirePort, bool)> {
        if !self.dirty {
            return Vec::new();
        }
        self.dirty = false;

        // Union ports into components
        let mut parent: HashMap<WirePort, WirePort> = HashMap::new();
        fn find(parent: &mut HashMap<WirePort, WirePort>, port: WirePort) -> WirePort {
            let up = *parent.entry(port).or_insert(port);
            if up == port {
                port
            } else {
                let root = find(parent, up);
                parent.insert(port, root);
                root
            }
        }

        for connection in &self.connections {
            let a = find(&mut parent, connection.output);
            let b = find(&mut parent, connection.input);
            if a != b {
                parent.insert(a, b);
            }
        }

        // A component is high when any of its outputs is high
        let mut component_state: HashMap<WirePort, bool> = HashMap::new();
        for (port, state) in &self.outputs {
            let root = find(&mut parent, *port);
            *component_state.entry(root).or_insert(false) |= *state;
        }

        let mut changed = Vec::new();
        let input_ports: HashSet<WirePort> =
            self.connections.iter().map(|c| c.input).collect();
        for &port in &input_ports {
            let root = find(&mut parent, port);
            let state = component_state.get(&root).copied().unwrap_or(false);
            let previous = self.inputs.insert(port, state);
            if previous != Some(state) {
                changed.push((port, state));
            }
        }
        self.inputs.retain(|port, _| input_ports.contains(port));
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(x: i32, y: i32, index: usize) -> WirePort {
        (Vec2I::new(x, y), index)
    }

    #[test]
    fn signal_reaches_connected_input() {
        let mut wires = WireProcessor::new();
        let switch = port(0, 0, 0);
        let door = port(10, 0, 0);
        wires.connect(switch, door);

        wires.set_output(switch, true);
        let changed = wires.propagate();
        assert_eq!(changed, vec![(door, true)]);
        assert!(wires.input_state(door));

        wires.set_output(switch, false);
        let changed = wires.propagate();
        assert_eq!(changed, vec![(door, false)]);
    }

    #[test]
    fn propagation_is_idempotent_until_dirty() {
        let mut wires = WireProcessor::new();
        wires.connect(port(0, 0, 0), port(1, 1, 0));
        wires.set_output(port(0, 0, 0), true);
        assert_eq!(wires.propagate().len(), 1);
        assert!(wires.propagate().is_empty(), "nothing changed");
    }

    #[test]
    fn any_high_output_in_component_wins() {
        let mut wires = WireProcessor::new();
        let a = port(0, 0, 0);
        let b = port(1, 0, 0);
        let lamp = port(5, 5, 0);
        // Both outputs join the same component through the lamp
        wires.connect(a, lamp);
        wires.connect(b, lamp);

        wires.set_output(a, false);
        wires.set_output(b, true);
        wires.propagate();
        assert!(wires.input_state(lamp));
    }

    #[test]
    fn removing_a_tile_severs_its_wires() {
        let mut wires = WireProcessor::new();
        let switch = port(0, 0, 0);
        let door = port(10, 0, 0);
        wires.connect(switch, door);
        wires.set_output(switch, true);
        wires.propagate();

        wires.remove_tile(Vec2I::new(0, 0));
        let changed = wires.propagate();
        assert_eq!(wires.connection_count(), 0);
        assert!(changed.is_empty());
        assert!(!wires.input_state(door));
    }
}
