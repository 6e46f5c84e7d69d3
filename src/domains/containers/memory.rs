use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{ContainerRuntime, ContainerSpec, ContainerState};
use crate::errors::{DevtoolError, DevtoolResult};

#[derive(Debug, Clone)]
pub struct MemoryContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub running: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    containers: BTreeMap<String, MemoryContainer>,
    fail_create: Option<String>,
    fail_start: Option<String>,
    created_total: usize,
}

/// Engine-less runtime used by tests and dry runs. Supports fault injection
/// and simulating containers removed behind the orchestrator's back.
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    inner: Mutex<Inner>,
    delay: Option<Duration>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation sleeps for `delay` first, to widen race windows in tests.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            inner: Mutex::default(),
            delay: Some(delay),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn fail_next_create(&self, message: &str) {
        self.lock().fail_create = Some(message.to_string());
    }

    pub fn fail_next_start(&self, message: &str) {
        self.lock().fail_start = Some(message.to_string());
    }

    /// Drop a container as if someone ran `docker rm -f` by hand.
    pub fn remove_externally(&self, container_id: &str) -> bool {
        self.lock().containers.remove(container_id).is_some()
    }

    pub fn containers(&self) -> Vec<MemoryContainer> {
        self.lock().containers.values().cloned().collect()
    }

    pub fn running_count(&self) -> usize {
        self.lock().containers.values().filter(|c| c.running).count()
    }

    pub fn created_total(&self) -> usize {
        self.lock().created_total
    }

    fn resolve<'a>(inner: &'a mut Inner, container: &str) -> Option<&'a mut MemoryContainer> {
        if inner.containers.contains_key(container) {
            return inner.containers.get_mut(container);
        }
        inner
            .containers
            .values_mut()
            .find(|c| c.spec.name == container)
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    fn engine_name(&self) -> &str {
        "memory"
    }

    async fn create(&self, spec: &ContainerSpec) -> DevtoolResult<String> {
        self.pause().await;
        let mut inner = self.lock();
        if let Some(message) = inner.fail_create.take() {
            return Err(DevtoolError::ContainerCreate {
                session_id: spec.session_id.clone(),
                message,
            });
        }
        if inner.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(DevtoolError::ContainerCreate {
                session_id: spec.session_id.clone(),
                message: format!("container name '{}' is already in use", spec.name),
            });
        }

        inner.next_id += 1;
        inner.created_total += 1;
        let id = format!("mem-{:04}", inner.next_id);
        inner.containers.insert(
            id.clone(),
            MemoryContainer {
                id: id.clone(),
                spec: spec.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> DevtoolResult<()> {
        self.pause().await;
        let mut inner = self.lock();
        if let Some(message) = inner.fail_start.take() {
            return Err(DevtoolError::container(container_id, "start", message));
        }
        let container = Self::resolve(&mut inner, container_id).ok_or_else(|| {
            DevtoolError::container(container_id, "start", "container does not exist")
        })?;
        container.running = true;
        Ok(())
    }

    async fn stop(&self, container_id: &str) -> DevtoolResult<()> {
        self.pause().await;
        let mut inner = self.lock();
        let container = Self::resolve(&mut inner, container_id).ok_or_else(|| {
            DevtoolError::container(container_id, "stop", "container does not exist")
        })?;
        container.running = false;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> DevtoolResult<()> {
        self.pause().await;
        let mut inner = self.lock();
        let Some(container) = Self::resolve(&mut inner, container_id) else {
            return Ok(());
        };
        if container.running {
            return Err(DevtoolError::container(
                container_id,
                "remove",
                "container is running; stop it first",
            ));
        }
        let id = container.id.clone();
        inner.containers.remove(&id);
        Ok(())
    }

    async fn state(&self, container: &str) -> DevtoolResult<ContainerState> {
        let mut inner = self.lock();
        Ok(match Self::resolve(&mut inner, container) {
            Some(c) if c.running => ContainerState::Running,
            Some(_) => ContainerState::Stopped,
            None => ContainerState::Missing,
        })
    }

    async fn info(&self) -> DevtoolResult<String> {
        Ok("in-memory runtime".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> ContainerSpec {
        ContainerSpec::new(id, "devtool/base:latest")
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let runtime = InMemoryRuntime::new();
        let id = runtime.create(&spec("a")).await.unwrap();

        runtime.start(&id).await.unwrap();
        runtime.start(&id).await.unwrap();
        assert_eq!(runtime.state(&id).await.unwrap(), ContainerState::Running);

        runtime.stop(&id).await.unwrap();
        runtime.stop(&id).await.unwrap();
        assert_eq!(runtime.state(&id).await.unwrap(), ContainerState::Stopped);
    }

    #[tokio::test]
    async fn remove_requires_stopped_container() {
        let runtime = InMemoryRuntime::new();
        let id = runtime.create(&spec("a")).await.unwrap();
        runtime.start(&id).await.unwrap();

        assert!(runtime.remove(&id).await.is_err());
        runtime.stop(&id).await.unwrap();
        runtime.remove(&id).await.unwrap();
        assert!(!runtime.is_alive(&id).await.unwrap());
    }

    #[tokio::test]
    async fn state_resolves_by_name() {
        let runtime = InMemoryRuntime::new();
        runtime.create(&spec("a")).await.unwrap();
        assert_eq!(
            runtime.state("devtool-a").await.unwrap(),
            ContainerState::Stopped
        );
    }

    #[tokio::test]
    async fn injected_create_failure_is_one_shot() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_next_create("image missing");
        assert_eq!(
            runtime.create(&spec("a")).await.unwrap_err().kind(),
            "container-create"
        );
        assert!(runtime.create(&spec("a")).await.is_ok());
    }
}
