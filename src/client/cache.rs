//! Memoized program compilation

use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::contract::{CompiledProgram, Program};
use crate::ledger::Node;
use crate::Result;

/// Compiled bytecode per program, filled on first use
#[derive(Debug, Default)]
pub struct ProgramCache {
    compiled: Mutex<HashMap<Program, CompiledProgram>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_compile(
        &self,
        node: &dyn Node,
        program: Program,
    ) -> Result<CompiledProgram> {
        let mut compiled = self.compiled.lock().await;
        if let Some(hit) = compiled.get(&program) {
            tracing::debug!("Program cache hit for {}", program.name());
            return Ok(hit.clone());
        }
        let fresh = node.compile(&program).await?;
        tracing::debug!("Compiled {} program, hash {}", program.name(), fresh.hash);
        compiled.insert(program, fresh.clone());
        Ok(fresh)
    }

    pub async fn len(&self) -> usize {
        self.compiled.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
