//! Recording fake of [`ContainerRuntime`] for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::auth::RegistryCredentials;
use crate::error::RuntimeError;
use crate::runtime::{
    ArchiveUpload, ContainerRuntime, ContainerSnapshot, CreateRequest, ExecOutput,
    NetworkEndpoint,
};

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    next_id: usize,
    create_results: VecDeque<Result<String, RuntimeError>>,
    created: Vec<CreateRequest>,
    requests: HashMap<String, CreateRequest>,
    started: HashSet<String>,
    snapshots: HashMap<String, ContainerSnapshot>,
    inspect_count: usize,
    gateways: HashMap<String, Vec<Option<String>>>,
    exec_results: VecDeque<Result<ExecOutput, RuntimeError>>,
    logs: Vec<u8>,
    uploads: Vec<(String, Vec<u8>, ArchiveUpload)>,
    pulls: Vec<(String, String, Option<RegistryCredentials>)>,
    fail_start: bool,
    fail_stop: bool,
    fail_upload: bool,
    fail_pull: bool,
}

/// Scriptable in-memory runtime that records every call.
#[derive(Default)]
pub(crate) struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub(crate) fn created(&self) -> Vec<CreateRequest> {
        self.state().created.clone()
    }

    pub(crate) fn uploads(&self) -> Vec<(String, Vec<u8>, ArchiveUpload)> {
        self.state().uploads.clone()
    }

    pub(crate) fn pulls(&self) -> Vec<(String, String, Option<RegistryCredentials>)> {
        self.state().pulls.clone()
    }

    pub(crate) fn inspect_count(&self) -> usize {
        self.state().inspect_count
    }

    /// Queues the outcome of the next create call.
    pub(crate) fn script_create(&self, result: Result<String, RuntimeError>) {
        self.state().create_results.push_back(result);
    }

    /// Queues the outcome of the next exec call.
    pub(crate) fn script_exec(&self, result: Result<ExecOutput, RuntimeError>) {
        self.state().exec_results.push_back(result);
    }

    pub(crate) fn set_gateways(&self, network: &str, gateways: Vec<Option<String>>) {
        self.state().gateways.insert(network.to_string(), gateways);
    }

    pub(crate) fn set_snapshot(&self, id: &str, snapshot: ContainerSnapshot) {
        self.state().snapshots.insert(id.to_string(), snapshot);
    }

    pub(crate) fn set_logs(&self, logs: &[u8]) {
        self.state().logs = logs.to_vec();
    }

    pub(crate) fn fail_start(&self) {
        self.state().fail_start = true;
    }

    pub(crate) fn fail_stop(&self) {
        self.state().fail_stop = true;
    }

    pub(crate) fn fail_upload(&self) {
        self.state().fail_upload = true;
    }

    pub(crate) fn fail_pull(&self) {
        self.state().fail_pull = true;
    }
}

fn snapshot_from_request(id: &str, request: &CreateRequest, running: bool) -> ContainerSnapshot {
    let host = request.host_config.clone().unwrap_or_default();
    let mut networks = HashMap::new();
    networks.insert(
        host.network_mode.clone().unwrap_or_else(|| "bridge".to_string()),
        NetworkEndpoint {
            network_id: format!("net-{id}"),
            ip_address: "172.17.0.2".to_string(),
            gateway: "172.17.0.1".to_string(),
        },
    );
    ContainerSnapshot {
        id: id.to_string(),
        name: request.name.clone().unwrap_or_else(|| id.to_string()),
        labels: request.labels.clone(),
        running,
        status: if running { "running" } else { "created" }.to_string(),
        exit_code: None,
        health: None,
        entrypoint: request.entrypoint.clone(),
        has_healthcheck: request.healthcheck.is_some(),
        privileged: host.privileged,
        ports: host.port_bindings,
        networks,
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("create:{}", request.image));
        let result = match state.create_results.pop_front() {
            Some(result) => result,
            None => {
                state.next_id += 1;
                Ok(format!("container-{}", state.next_id))
            }
        };
        if let Ok(id) = &result {
            state.created.push(request.clone());
            state.requests.insert(id.clone(), request.clone());
        }
        result
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("start:{id}"));
        if state.fail_start {
            return Err(RuntimeError::Api {
                status_code: 500,
                message: "cannot start".to_string(),
            });
        }
        state.started.insert(id.to_string());
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("stop:{id}"));
        if state.fail_stop {
            return Err(RuntimeError::Transport("stop failed".to_string()));
        }
        state.started.remove(id);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("remove:{id}"));
        state.requests.remove(id);
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("restart:{id}"));
        state.started.insert(id.to_string());
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("inspect:{id}"));
        state.inspect_count += 1;
        if let Some(snapshot) = state.snapshots.get(id) {
            return Ok(snapshot.clone());
        }
        match state.requests.get(id) {
            Some(request) => Ok(snapshot_from_request(id, request, state.started.contains(id))),
            None => Err(RuntimeError::NotFound(format!("No such container: {id}"))),
        }
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("exec:{id}:{}", cmd.join(" ")));
        state.exec_results.pop_front().unwrap_or_else(|| {
            Ok(ExecOutput {
                exec_id: format!("exec-{id}"),
                output: Vec::new(),
                exit_code: Some(0),
            })
        })
    }

    async fn logs(&self, id: &str) -> Result<Vec<u8>, RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("logs:{id}"));
        Ok(state.logs.clone())
    }

    async fn network_gateways(&self, network: &str) -> Result<Vec<Option<String>>, RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("network:{network}"));
        state
            .gateways
            .get(network)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("network {network} not found")))
    }

    async fn pull_image(
        &self,
        name: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("pull:{name}:{tag}"));
        state
            .pulls
            .push((name.to_string(), tag.to_string(), credentials.cloned()));
        if state.fail_pull {
            return Err(RuntimeError::Api {
                status_code: 500,
                message: "pull denied".to_string(),
            });
        }
        Ok(())
    }

    async fn put_archive(
        &self,
        id: &str,
        archive: Vec<u8>,
        options: &ArchiveUpload,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(format!("upload:{id}"));
        if state.fail_upload {
            return Err(RuntimeError::Api {
                status_code: 500,
                message: "disk full".to_string(),
            });
        }
        state
            .uploads
            .push((id.to_string(), archive, options.clone()));
        Ok(())
    }
}
