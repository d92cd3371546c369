use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use bluegreen_core_types::{
    AliasRecord, BlueGreenError, ErrorKind, GenerationName, GenerationRecord, HeapUsage,
};

use crate::control::ControlPlane;

#[derive(Debug, Default)]
struct MemoryState {
    generations: BTreeMap<String, String>,
    aliases: BTreeMap<String, String>,
    heap: Option<HeapUsage>,
    unreachable: bool,
    failing_drops: HashSet<String>,
    dropped: Vec<String>,
}

/// Control plane kept entirely in memory; useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<MemoryState>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_generation(&self, name: &str, status: &str) {
        self.state
            .lock()
            .generations
            .insert(name.to_string(), status.to_string());
    }

    pub fn point_alias(&self, alias: &str, target: &str) {
        self.state
            .lock()
            .aliases
            .insert(alias.to_string(), target.to_string());
    }

    pub fn set_heap(&self, heap: Option<HeapUsage>) {
        self.state.lock().heap = heap;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Make every drop of `name` fail.
    pub fn fail_drops_of(&self, name: &str) {
        self.state.lock().failing_drops.insert(name.to_string());
    }

    pub fn generation_names(&self) -> Vec<String> {
        self.state.lock().generations.keys().cloned().collect()
    }

    pub fn alias_target(&self, alias: &str) -> Option<String> {
        self.state.lock().aliases.get(alias).cloned()
    }

    /// Generations dropped so far, in order.
    pub fn dropped(&self) -> Vec<String> {
        self.state.lock().dropped.clone()
    }

    fn guard(&self) -> Result<parking_lot::MutexGuard<'_, MemoryState>, BlueGreenError> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(BlueGreenError::transport("connection refused"));
        }
        Ok(state)
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn ping(&self) -> Result<(), BlueGreenError> {
        self.guard().map(|_| ())
    }

    async fn list_generations(&self) -> Result<Vec<GenerationRecord>, BlueGreenError> {
        let state = self.guard()?;
        Ok(state
            .generations
            .iter()
            .map(|(name, status)| GenerationRecord::new(name.clone(), status.clone()))
            .collect())
    }

    async fn list_aliases(&self) -> Result<Vec<AliasRecord>, BlueGreenError> {
        let state = self.guard()?;
        Ok(state
            .aliases
            .iter()
            .map(|(name, target)| AliasRecord::new(name.clone(), target.clone()))
            .collect())
    }

    async fn create_alias(
        &self,
        alias: &str,
        target: &GenerationName,
    ) -> Result<(), BlueGreenError> {
        let mut state = self.guard()?;
        if state.aliases.contains_key(alias) {
            return Err(BlueGreenError::new(ErrorKind::AlreadyExists)
                .with_hint(format!("alias {alias} already exists")));
        }
        if !state.generations.contains_key(target.as_str()) {
            return Err(BlueGreenError::not_found(format!(
                "database {target} does not exist"
            )));
        }
        state
            .aliases
            .insert(alias.to_string(), target.as_str().to_string());
        Ok(())
    }

    async fn drop_alias(&self, alias: &str) -> Result<(), BlueGreenError> {
        let mut state = self.guard()?;
        match state.aliases.remove(alias) {
            Some(_) => Ok(()),
            None => Err(BlueGreenError::not_found(format!(
                "alias {alias} does not exist"
            ))),
        }
    }

    async fn drop_generation(&self, name: &GenerationName) -> Result<(), BlueGreenError> {
        let mut state = self.guard()?;
        if state.failing_drops.contains(name.as_str()) {
            return Err(BlueGreenError::new(ErrorKind::Internal)
                .with_hint(format!("failed to drop {name}")));
        }
        if state.generations.remove(name.as_str()).is_some() {
            state.dropped.push(name.as_str().to_string());
        }
        Ok(())
    }

    async fn heap_usage(&self) -> Result<Option<HeapUsage>, BlueGreenError> {
        Ok(self.guard()?.heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn alias_lifecycle() {
        let control = InMemoryControlPlane::new();
        control.add_generation("acme-100", "online");
        let target = GenerationName::from("acme-100");

        control.create_alias("acme", &target).await.unwrap();
        let dup = control.create_alias("acme", &target).await.unwrap_err();
        assert_eq!(dup.kind, ErrorKind::AlreadyExists);

        control.drop_alias("acme").await.unwrap();
        assert!(control.drop_alias("acme").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn drop_generation_is_idempotent() {
        let control = InMemoryControlPlane::new();
        control.add_generation("acme-100", "online");
        let name = GenerationName::from("acme-100");
        control.drop_generation(&name).await.unwrap();
        control.drop_generation(&name).await.unwrap();
        assert_eq!(control.dropped(), vec!["acme-100".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_fails_every_call() {
        let control = InMemoryControlPlane::new();
        control.set_reachable(false);
        assert_eq!(control.ping().await.unwrap_err().kind, ErrorKind::Transport);
        assert!(control.list_generations().await.is_err());
    }
}
