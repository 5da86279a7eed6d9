//! Output formatting module
//!
//! This module renders demo reports, application state, balances and
//! lifecycle history as JSON or text tables.

use serde::Serialize;
use serde_json::json;

use crate::client::{Balances, DemoReport, Role};
use crate::contract::{EscrowRecord, LifecycleGraph};
use crate::ledger::{Address, AppId, GlobalState};
use crate::Result;

/// Output any serializable value as pretty JSON
pub fn output_json(w: &mut impl std::io::Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *w, value)?;
    writeln!(w)?; // Add trailing newline
    Ok(())
}

fn format_balances(balances: &Balances) -> String {
    balances
        .iter()
        .map(|(id, amount)| {
            if *id == 0 {
                format!("{} uA", amount)
            } else {
                format!("asset {}: {}", id, amount)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_address(address: Option<Address>) -> String {
    address.map(|a| a.short()).unwrap_or_else(|| "-".to_string())
}

/// Output the result of a demo run as text
pub fn output_demo_table(w: &mut impl std::io::Write, report: &DemoReport) -> Result<()> {
    writeln!(w, "NFT Escrow - Demo Results")?;
    writeln!(w, "{}", "=".repeat(80))?;
    writeln!(w)?;

    writeln!(w, "Escrow:")?;
    writeln!(w, "  Application: {}", report.app_id)?;
    writeln!(w, "  Address:     {}", report.escrow_address)?;
    writeln!(w, "  State:       {}", report.state)?;
    writeln!(w, "  NFT:         {}", report.nft_id)?;
    writeln!(w, "  Price:       {} uA", report.price)?;
    writeln!(w, "  Seller:      {}", format_address(report.record.seller))?;
    writeln!(w, "  Buyer:       {}", format_address(report.record.buyer))?;
    writeln!(w, "  Last block:  {}", report.last_block.to_rfc3339())?;
    writeln!(w)?;

    writeln!(w, "Balances:")?;
    writeln!(w, "{:-<80}", "")?;
    for (holder, balances) in &report.balances {
        writeln!(w, "{:<10} {}", holder, format_balances(balances))?;
    }
    writeln!(w)?;
    Ok(())
}

/// Output an application's global state, with the escrow view when it parses as one
pub fn output_state_table(
    w: &mut impl std::io::Write,
    app_id: AppId,
    state: &GlobalState,
) -> Result<()> {
    writeln!(w, "Application {} ({})", app_id, app_id.address())?;
    writeln!(w, "{:-<80}", "")?;
    if state.is_empty() {
        writeln!(w, "(no global state)")?;
    }
    for (key, value) in state.iter() {
        writeln!(w, "{:<16} {}", String::from_utf8_lossy(key), value)?;
    }

    if let Ok(record) = EscrowRecord::from_global_state(state)
        && let Some(status) = record.status
    {
        writeln!(w)?;
        writeln!(w, "Sale: {:?}, {} uA, NFT {}", status, record.price, record.nft_id)?;
    }
    writeln!(w)?;
    Ok(())
}

/// Output role accounts and their balances
pub fn output_accounts_table(
    w: &mut impl std::io::Write,
    accounts: &[(Role, Address, Balances)],
) -> Result<()> {
    writeln!(w, "{:<8} {:<66} Balances", "Role", "Address")?;
    writeln!(w, "{:-<100}", "")?;
    for (role, address, balances) in accounts {
        writeln!(w, "{:<8} {:<66} {}", role, address, format_balances(balances))?;
    }
    writeln!(w)?;
    Ok(())
}

/// Output role accounts as JSON
pub fn output_accounts_json(
    w: &mut impl std::io::Write,
    accounts: &[(Role, Address, Balances)],
) -> Result<()> {
    let value: Vec<_> = accounts
        .iter()
        .map(|(role, address, balances)| {
            json!({
                "role": role,
                "address": address,
                "balances": balances,
            })
        })
        .collect();
    output_json(w, &value)
}

/// Output an escrow's lifecycle history as text
pub fn output_history_table(w: &mut impl std::io::Write, graph: &LifecycleGraph) -> Result<()> {
    let stats = graph.stats();
    writeln!(w, "Escrow {} lifecycle", graph.app_id)?;
    writeln!(w, "{}", "=".repeat(80))?;
    writeln!(w)?;
    writeln!(w, "Summary:")?;
    writeln!(w, "  States:      {}", stats.total_states)?;
    writeln!(w, "  Transitions: {}", stats.total_transitions)?;
    writeln!(w, "  Listings:    {}", stats.listings)?;
    writeln!(w, "  Sales:       {}", stats.sales)?;
    for node in graph.find_initial_states() {
        writeln!(w, "  Started:     round {} by {}", node.round, node.action)?;
    }
    writeln!(w)?;

    writeln!(
        w,
        "{:>6} {:<16} {:<18} {:>12} {:<10} {:<10}",
        "Round", "TX", "State", "Balance", "Action", "Next"
    )?;
    writeln!(w, "{:-<80}", "")?;
    for node in graph.nodes() {
        let tx = node.txid.to_string();
        let next = graph
            .outgoing_actions(&node.id)
            .first()
            .map(|edge| format!("-> {}", edge.action))
            .unwrap_or_default();
        writeln!(
            w,
            "{:>6} {:<16} {:<18} {:>12} {:<10} {:<10}",
            node.round,
            format!("{}...", &tx[..11]),
            node.state.to_string(),
            node.balance,
            node.action,
            next
        )?;
    }
    writeln!(w)?;
    Ok(())
}

/// Output an escrow's lifecycle history as JSON
pub fn output_history_json(w: &mut impl std::io::Write, graph: &LifecycleGraph) -> Result<()> {
    let value = json!({
        "app_id": graph.app_id,
        "summary": graph.stats(),
        "states": graph.nodes(),
        "current": graph.current_state(),
    });
    output_json(w, &value)
}
