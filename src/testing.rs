/// In-memory cluster used by unit tests
///
/// `MockCluster` hands out `MockServer`s through its connector. Every server
/// shares the cluster's scripted state, so tests can flip reachability, pulse
/// liveness and topologies while sessions are running.
use crate::core::{Connector, DatabaseTopology, DuplexChannel, Options, ServerAddress, ServerRpc, SessionType};
use crate::error::{DriverError, DriverResult};
use crate::protocol::{Request, RequestId, RequestKind, Response, ResponsePart, SessionId, SessionOpened};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type Chunks = VecDeque<Vec<ResponsePart>>;
type ResponseSender = mpsc::UnboundedSender<DriverResult<Response>>;

#[derive(Default)]
struct ClusterState {
    members: Vec<ServerAddress>,
    unreachable: Mutex<HashSet<ServerAddress>>,
    topologies: Mutex<HashMap<String, DatabaseTopology>>,
    open_errors: Mutex<HashMap<ServerAddress, VecDeque<DriverError>>>,
    stream_errors: Mutex<HashMap<ServerAddress, VecDeque<DriverError>>>,
    opened_on: Mutex<Vec<ServerAddress>>,
    pulse_dead: AtomicBool,
    connects: AtomicUsize,
    topology_calls: AtomicUsize,
    session_opens: AtomicUsize,
    session_closes: AtomicUsize,
    pulses: AtomicUsize,
    stream: ScriptedStream,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

#[derive(Clone)]
pub struct MockCluster {
    state: Arc<ClusterState>,
}

impl MockCluster {
    pub fn with_servers(addresses: &[&str]) -> Self {
        let state = ClusterState {
            members: addresses.iter().map(|address| address.to_string()).collect(),
            ..Default::default()
        };
        Self { state: Arc::new(state) }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            state: Arc::clone(&self.state),
        })
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut unreachable = lock(&self.state.unreachable);
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.to_string());
        }
    }

    pub fn set_topology(&self, topology: DatabaseTopology) {
        lock(&self.state.topologies).insert(topology.name.clone(), topology);
    }

    pub fn set_pulse_alive(&self, alive: bool) {
        self.state.pulse_dead.store(!alive, Ordering::SeqCst);
    }

    /// Fail the next session open on `address` with `error`
    pub fn fail_session_open(&self, address: &str, error: DriverError) {
        lock(&self.state.open_errors)
            .entry(address.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fail the next transaction stream requested from `address` with `error`
    pub fn fail_transaction_stream(&self, address: &str, error: DriverError) {
        lock(&self.state.stream_errors)
            .entry(address.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn stream(&self) -> &ScriptedStream {
        &self.state.stream
    }

    /// Addresses sessions were opened on, in order
    pub fn sessions_opened_on(&self) -> Vec<ServerAddress> {
        lock(&self.state.opened_on).clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn topology_call_count(&self) -> usize {
        self.state.topology_calls.load(Ordering::SeqCst)
    }

    pub fn session_open_count(&self) -> usize {
        self.state.session_opens.load(Ordering::SeqCst)
    }

    pub fn session_close_count(&self) -> usize {
        self.state.session_closes.load(Ordering::SeqCst)
    }

    pub fn pulse_count(&self) -> usize {
        self.state.pulses.load(Ordering::SeqCst)
    }
}

struct MockConnector {
    state: Arc<ClusterState>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str) -> DriverResult<Arc<dyn ServerRpc>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let server = MockServer {
            address: address.to_string(),
            state: Arc::clone(&self.state),
        };
        server.check_reachable()?;
        Ok(Arc::new(server))
    }
}

pub struct MockServer {
    address: ServerAddress,
    state: Arc<ClusterState>,
}

impl MockServer {
    fn check_reachable(&self) -> DriverResult<()> {
        let known = self.state.members.contains(&self.address);
        if !known || lock(&self.state.unreachable).contains(&self.address) {
            return Err(DriverError::unable_to_connect(self.address.clone(), "connection refused"));
        }
        Ok(())
    }

    fn pop_error(&self, errors: &Mutex<HashMap<ServerAddress, VecDeque<DriverError>>>) -> Option<DriverError> {
        lock(errors).get_mut(&self.address).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl ServerRpc for MockServer {
    async fn cluster_members(&self) -> DriverResult<HashSet<ServerAddress>> {
        self.check_reachable()?;
        Ok(self.state.members.iter().cloned().collect())
    }

    async fn database_topology(&self, database: &str) -> DriverResult<DatabaseTopology> {
        self.state.topology_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        lock(&self.state.topologies)
            .get(database)
            .cloned()
            .ok_or_else(|| DriverError::server(format!("database '{}' does not exist", database)))
    }

    async fn session_open(
        &self,
        _database: &str,
        _session_type: SessionType,
        _options: &Options,
    ) -> DriverResult<SessionOpened> {
        self.check_reachable()?;
        if let Some(error) = self.pop_error(&self.state.open_errors) {
            return Err(error);
        }
        let sequence = self.state.session_opens.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.opened_on).push(self.address.clone());
        Ok(SessionOpened {
            session_id: SessionId::new(format!("{}/{}", self.address, sequence)),
            server_duration_millis: 0,
        })
    }

    async fn session_pulse(&self, _session_id: &SessionId) -> DriverResult<bool> {
        self.state.pulses.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(!self.state.pulse_dead.load(Ordering::SeqCst))
    }

    async fn session_close(&self, _session_id: &SessionId) -> DriverResult<()> {
        self.check_reachable()?;
        self.state.session_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn transaction_stream(&self) -> DriverResult<DuplexChannel> {
        self.check_reachable()?;
        if let Some(error) = self.pop_error(&self.state.stream_errors) {
            return Err(error);
        }
        Ok(self.state.stream.channel())
    }
}

#[derive(Default)]
struct StreamState {
    scripts: HashMap<Bytes, Chunks>,
    held: HashSet<Bytes>,
    hold_opens: bool,
    continuations: HashMap<RequestId, Chunks>,
    requests: Vec<Request>,
    open_errors: VecDeque<DriverError>,
    senders: Vec<ResponseSender>,
}

/// Server side of transaction streams.
///
/// Operations are echoed back as a single answer unless a script is
/// registered for their payload; scripted answers are sent one chunk at a
/// time, the next chunk on each `StreamContinue`.
#[derive(Clone, Default)]
pub struct ScriptedStream {
    state: Arc<Mutex<StreamState>>,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, payload: &str, chunks: Vec<Vec<ResponsePart>>) {
        let key = Bytes::copy_from_slice(payload.as_bytes());
        lock(&self.state).scripts.insert(key, chunks.into());
    }

    /// Never answer operations with this payload
    pub fn hold(&self, payload: &str) {
        lock(&self.state).held.insert(Bytes::copy_from_slice(payload.as_bytes()));
    }

    /// Never answer transaction opens
    pub fn hold_opens(&self) {
        lock(&self.state).hold_opens = true;
    }

    /// Answer the next transaction open by failing the stream with `error`
    pub fn fail_next_open(&self, error: DriverError) {
        lock(&self.state).open_errors.push_back(error);
    }

    /// Fail every live stream with `error`
    pub fn fail(&self, error: DriverError) {
        let senders = std::mem::take(&mut lock(&self.state).senders);
        for sender in senders {
            let _ = sender.send(Err(error.clone()));
        }
    }

    /// Send every live stream an answer to `request_id`, which nobody asked for
    pub fn answer_unrequested(&self, request_id: RequestId) {
        let state = lock(&self.state);
        for sender in &state.senders {
            let _ = sender.send(Ok(Response::new(request_id, ResponsePart::Answer(Bytes::new()))));
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        lock(&self.state).requests.clone()
    }

    pub fn stream_continue_count(&self) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|request| request.is_stream_continue())
            .count()
    }

    pub fn channel(&self) -> DuplexChannel {
        let (requests, mut incoming) = mpsc::unbounded_channel::<Vec<Request>>();
        let (outgoing, responses) = mpsc::unbounded_channel();
        lock(&self.state).senders.push(outgoing.clone());

        let script = self.clone();
        tokio::spawn(async move {
            while let Some(batch) = incoming.recv().await {
                for request in batch {
                    script.handle(request, &outgoing);
                }
            }
        });

        let responses = stream::unfold(responses, |mut receiver| async move {
            receiver.recv().await.map(|frame| (frame, receiver))
        })
        .boxed();
        DuplexChannel { requests, responses }
    }

    fn handle(&self, request: Request, outgoing: &ResponseSender) {
        let mut state = lock(&self.state);
        state.requests.push(request.clone());
        let id = request.request_id;
        let answer = |part: ResponsePart| {
            let _ = outgoing.send(Ok(Response::new(id, part)));
        };

        match request.kind {
            RequestKind::Open { .. } if state.hold_opens => {}
            RequestKind::Open { .. } => match state.open_errors.pop_front() {
                Some(error) => {
                    let _ = outgoing.send(Err(error));
                }
                None => answer(ResponsePart::Answer(Bytes::new())),
            },
            RequestKind::Commit | RequestKind::Rollback => answer(ResponsePart::Answer(Bytes::new())),
            RequestKind::StreamContinue => {
                let chunk = state
                    .continuations
                    .get_mut(&id)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_default();
                for part in chunk {
                    answer(part);
                }
            }
            RequestKind::Operation(payload) => {
                if state.held.contains(&payload) {
                    return;
                }
                match state.scripts.get(&payload).cloned() {
                    Some(mut chunks) => {
                        for part in chunks.pop_front().unwrap_or_default() {
                            answer(part);
                        }
                        state.continuations.insert(id, chunks);
                    }
                    None => answer(ResponsePart::Answer(payload)),
                }
            }
        }
    }
}
