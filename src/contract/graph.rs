use crate::contract::state::{EscrowRecord, EscrowState};
use crate::ledger::{AppId, AppSnapshot, TxId};
use crate::Result;
use petgraph::Direction;
use petgraph::prelude::EdgeRef;
use petgraph::visit::IntoEdgeReferences;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use serde::Serialize;
use std::collections::HashMap;

/// One point in an escrow's history
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleNode {
    /// `round:txid` of the snapshot
    pub id: String,
    pub round: u64,
    pub txid: TxId,
    pub state: EscrowState,
    pub record: EscrowRecord,
    pub balance: u64,
    /// What the confirmed group did to the application
    pub action: String,
}

impl LifecycleNode {
    pub fn display_short(&self) -> String {
        format!("r{} {} ({} uA)", self.round, self.state, self.balance)
    }
}

/// Edge between consecutive snapshots
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEdge {
    pub action: String,
    pub txid: TxId,
}

/// A directed graph of an escrow's confirmed history.
///
/// Every confirmed group touching the application yields one node; edges link
/// consecutive nodes and carry the action that caused the change.
pub struct LifecycleGraph {
    pub graph: StableGraph<LifecycleNode, LifecycleEdge>,

    /// Node id to graph index
    pub node_index: HashMap<String, NodeIndex>,

    pub app_id: AppId,
}

impl LifecycleGraph {
    pub fn new(app_id: AppId) -> Self {
        Self {
            graph: StableGraph::new(),
            node_index: HashMap::new(),
            app_id,
        }
    }

    pub fn add_node(&mut self, node: LifecycleNode) -> NodeIndex {
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.node_index.insert(id, idx);
        idx
    }

    pub fn add_edge(&mut self, from: &str, to: &str, edge: LifecycleEdge) -> Option<EdgeIndex> {
        let (&from_idx, &to_idx) = (self.node_index.get(from)?, self.node_index.get(to)?);
        Some(self.graph.add_edge(from_idx, to_idx, edge))
    }

    /// Build from snapshots in confirmation order
    pub fn build_from_history(app_id: AppId, history: &[AppSnapshot]) -> Result<Self> {
        let mut graph = Self::new(app_id);
        let mut previous: Option<String> = None;

        for snapshot in history {
            let record = EscrowRecord::from_global_state(&snapshot.global_state)?;
            let holding = snapshot.holdings.get(&record.nft_id).copied();
            let id = format!("{}:{}", snapshot.round, snapshot.txid);
            graph.add_node(LifecycleNode {
                id: id.clone(),
                round: snapshot.round,
                txid: snapshot.txid,
                state: EscrowState::derive(&record, holding, snapshot.deleted),
                record,
                balance: snapshot.balance,
                action: snapshot.action.clone(),
            });

            if let Some(from) = previous.replace(id.clone()) {
                graph.add_edge(
                    &from,
                    &id,
                    LifecycleEdge {
                        action: snapshot.action.clone(),
                        txid: snapshot.txid,
                    },
                );
            }
        }

        Ok(graph)
    }

    /// Nodes in confirmation order
    pub fn nodes(&self) -> Vec<&LifecycleNode> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Nodes with no incoming edges
    pub fn find_initial_states(&self) -> Vec<&LifecycleNode> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Nodes with no outgoing edges
    pub fn find_terminal_states(&self) -> Vec<&LifecycleNode> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Outgoing).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// The most recent state, if any history exists
    pub fn current_state(&self) -> Option<EscrowState> {
        self.find_terminal_states().first().map(|node| node.state)
    }

    /// Actions taken out of a node
    pub fn outgoing_actions(&self, id: &str) -> Vec<&LifecycleEdge> {
        match self.node_index.get(id) {
            Some(&idx) => self
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .filter_map(|edge| self.graph.edge_weight(edge.id()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Render as Graphviz DOT
    pub fn to_dot(&self) -> String {
        let mut dot = format!("digraph Escrow{} {{\n", self.app_id);
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box, style=filled];\n\n");

        for idx in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(idx) {
                dot.push_str(&format!(
                    "  \"{}\" [label=\"{}\", fillcolor=\"{}\"];\n",
                    node.id.replace(':', "_"),
                    node.display_short(),
                    node.state.color()
                ));
            }
        }

        dot.push('\n');

        for node in self.find_initial_states() {
            let id = node.id.replace(':', "_");
            dot.push_str(&format!("  \"start_{}\" [shape=point];\n", id));
            dot.push_str(&format!(
                "  \"start_{}\" -> \"{}\" [label=\"{}\"];\n",
                id, id, node.action
            ));
        }

        for edge in self.graph.edge_references() {
            if let (Some(from), Some(to)) = (
                self.graph.node_weight(edge.source()),
                self.graph.node_weight(edge.target()),
            ) {
                dot.push_str(&format!(
                    "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                    from.id.replace(':', "_"),
                    to.id.replace(':', "_"),
                    edge.weight().action
                ));
            }
        }

        dot.push_str("}\n");
        dot
    }

    /// Write the DOT rendering to `{app_id}.{timestamp}.graph.dot` and return the file name
    pub fn export_dot(&self) -> Result<String> {
        let filename = format!(
            "{}.{}.graph.dot",
            self.app_id,
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        );
        std::fs::write(&filename, self.to_dot())?;
        Ok(filename)
    }

    pub fn stats(&self) -> GraphStats {
        let mut sales = 0;
        let mut listings = 0;
        for edge in self.graph.edge_references() {
            let from = self.graph.node_weight(edge.source()).map(|n| n.state);
            let to = self.graph.node_weight(edge.target()).map(|n| n.state);
            if to == Some(EscrowState::Sold) && from != to {
                sales += 1;
            }
            if matches!(to, Some(EscrowState::AwaitingDeposit | EscrowState::HoldingAsset))
                && matches!(from, Some(EscrowState::Uninitialized | EscrowState::Sold))
            {
                listings += 1;
            }
        }
        GraphStats {
            total_states: self.graph.node_count(),
            total_transitions: self.graph.edge_count(),
            listings,
            sales,
            relisted: listings > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub total_states: usize,
    pub total_transitions: usize,
    pub listings: usize,
    pub sales: usize,
    pub relisted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SaleStatus;
    use crate::contract::escrow::{NFT_ID_KEY, PRICE_KEY, SELLER_KEY, STATUS_KEY};
    use crate::ledger::{AssetId, GlobalState, StateValue};
    use std::collections::BTreeMap;

    fn snapshot(round: u64, action: &str, status: u64, holding: Option<u64>) -> AppSnapshot {
        let mut global_state = GlobalState::new();
        let mut holdings = BTreeMap::new();
        if status != 0 {
            global_state.insert(SELLER_KEY, StateValue::Bytes(vec![1u8; 32]));
            global_state.insert(NFT_ID_KEY, StateValue::Uint(5));
            global_state.insert(PRICE_KEY, StateValue::Uint(100));
            global_state.insert(STATUS_KEY, StateValue::Uint(status));
        }
        if let Some(amount) = holding {
            holdings.insert(AssetId(5), amount);
        }
        AppSnapshot {
            round,
            txid: TxId([round as u8; 32]),
            action: action.to_string(),
            global_state,
            balance: 203_000,
            holdings,
            deleted: false,
        }
    }

    fn sale_history() -> Vec<AppSnapshot> {
        let listed = SaleStatus::Listed.as_uint();
        let sold = SaleStatus::Sold.as_uint();
        vec![
            snapshot(1, "create", 0, None),
            snapshot(2, "pay", 0, None),
            snapshot(3, "setup", listed, Some(0)),
            snapshot(3, "axfer", listed, Some(1)),
            snapshot(4, "buy", sold, None),
        ]
    }

    #[test]
    fn test_empty_graph() {
        let graph = LifecycleGraph::build_from_history(AppId(1), &[]).unwrap();
        assert_eq!(graph.graph.node_count(), 0);
        assert_eq!(graph.current_state(), None);
    }

    #[test]
    fn test_build_linear_history() {
        let mut history = sale_history();
        history[3].txid = TxId([9; 32]);
        let graph = LifecycleGraph::build_from_history(AppId(1), &history).unwrap();

        assert_eq!(graph.graph.node_count(), 5);
        assert_eq!(graph.graph.edge_count(), 4);
        let initial = graph.find_initial_states();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].state, EscrowState::Uninitialized);
        assert_eq!(initial[0].action, "create");
        assert_eq!(graph.current_state(), Some(EscrowState::Sold));

        let first = &initial[0].id;
        let actions = graph.outgoing_actions(first);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, "pay");
    }

    #[test]
    fn test_stats_and_dot() {
        let mut history = sale_history();
        history[3].txid = TxId([9; 32]);
        let mut deleted = snapshot(5, "delete", SaleStatus::Sold.as_uint(), None);
        deleted.deleted = true;
        history.push(deleted);

        let graph = LifecycleGraph::build_from_history(AppId(1), &history).unwrap();
        let stats = graph.stats();
        assert_eq!(stats.total_states, 6);
        assert_eq!(stats.listings, 1);
        assert_eq!(stats.sales, 1);
        assert!(!stats.relisted);
        assert_eq!(graph.current_state(), Some(EscrowState::Deleted));

        let dot = graph.to_dot();
        assert!(dot.contains("digraph Escrow1"));
        assert_eq!(dot.matches("[shape=point]").count(), 1);
        assert!(dot.contains("\"start_1_0101"));
        assert!(dot.contains("label=\"create\""));
        assert!(dot.contains("label=\"buy\""));
        assert!(dot.contains("lightgreen"));
    }
}
