/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Static link topology: which nodes exist, how to reach them, and which two
//! nodes share each radio link.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Wireless interface probed on every node unless overridden.
pub const DEFAULT_INTERFACE: &str = "wlan0";

// ── Private YAML deserialization types ────────────────────────────────────────

/// Per-node fields as they appear in the YAML file.
#[derive(Debug, Deserialize)]
pub(super) struct NodeEntry {
    host: String,
    interface: Option<String>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Management address and radio interface for a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub name: String,
    /// Host name or address reachable over the management network.
    pub host: String,
    /// Wireless interface carrying the experiment traffic.
    pub interface: String,
}

/// A physical radio channel shared by exactly two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub access_point: String,
    pub station: String,
}

impl Link {
    /// Returns `true` if `node` is one of the two endpoints.
    pub fn contains(&self, node: &str) -> bool {
        self.access_point == node || self.station == node
    }

    /// The other endpoint of the link, or `None` if `node` is not on it.
    pub fn peer_of(&self, node: &str) -> Option<&str> {
        if node == self.access_point {
            Some(&self.station)
        } else if node == self.station {
            Some(&self.access_point)
        } else {
            None
        }
    }
}

// ── Topology ──────────────────────────────────────────────────────────────────

/// Immutable node → link lookup built once at startup.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: HashMap<String, NodeEndpoint>,
    /// `BTreeMap` so iteration (and therefore logging) is ordered by link name.
    links: BTreeMap<String, Link>,
    /// node name → owning link name.
    owners: HashMap<String, String>,
}

impl Topology {
    /// Build and validate a topology from the raw YAML sections.
    ///
    /// # Errors
    /// * a link does not list exactly two distinct nodes,
    /// * a link references a node missing from `nodes`,
    /// * a node appears in more than one link.
    pub(super) fn build(
        nodes: HashMap<String, NodeEntry>,
        links: BTreeMap<String, Vec<String>>,
    ) -> Result<Self> {
        let nodes: HashMap<String, NodeEndpoint> = nodes
            .into_iter()
            .map(|(name, entry)| {
                let endpoint = NodeEndpoint {
                    name: name.clone(),
                    host: entry.host,
                    interface: entry
                        .interface
                        .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
                };
                (name, endpoint)
            })
            .collect();

        let mut topology = Topology {
            nodes,
            ..Default::default()
        };

        for (name, members) in links {
            let [access_point, station] = members.as_slice() else {
                bail!(
                    "link '{}' must list exactly two nodes [access_point, station], got {}",
                    name,
                    members.len()
                );
            };
            if access_point == station {
                bail!("link '{}' uses node '{}' for both endpoints", name, station);
            }

            for node in [access_point, station] {
                if !topology.nodes.contains_key(node) {
                    bail!("link '{}' references unknown node '{}'", name, node);
                }
                if let Some(other) = topology.owners.insert(node.clone(), name.clone()) {
                    bail!(
                        "node '{}' belongs to both link '{}' and link '{}'",
                        node,
                        other,
                        name
                    );
                }
            }

            debug!(link = %name, ap = %access_point, sta = %station, "link registered");
            topology.links.insert(
                name.clone(),
                Link {
                    name,
                    access_point: access_point.clone(),
                    station: station.clone(),
                },
            );
        }

        let mut unlinked: Vec<&str> = topology
            .nodes
            .keys()
            .filter(|n| !topology.owners.contains_key(*n))
            .map(String::as_str)
            .collect();
        if !unlinked.is_empty() {
            unlinked.sort_unstable();
            warn!(nodes = ?unlinked, "nodes not assigned to any link will never receive workloads");
        }

        Ok(topology)
    }

    /// The link that owns `node`, if any.
    pub fn link_for(&self, node: &str) -> Option<&Link> {
        self.owners.get(node).and_then(|l| self.links.get(l))
    }

    pub fn node(&self, name: &str) -> Option<&NodeEndpoint> {
        self.nodes.get(name)
    }

    /// All links, ordered by name.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
