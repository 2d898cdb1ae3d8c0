use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use warden_agent::ipc::{CreateResult, InvokeCall, MechanismHandler};
use warden_agent::{
    Agent, AgentService, AgentState, CreateOptions, InterruptListener, LocalConnector,
};
use warden_core::id::AgentIndex;
use warden_core::types::{ItemFlags, ItemStore, MechanismResult};
use warden_policy::Mechanism;

const TIMEOUT: Duration = Duration::from_secs(5);

fn options() -> CreateOptions {
    CreateOptions::new(AgentService::Regular)
}

fn create(connector: &LocalConnector, plugin: &str, param: &str) -> Arc<Agent> {
    Agent::create(&Mechanism::new(plugin, param, false), connector, &options(), None)
        .expect("agent should be created")
}

struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
    interrupted: Sender<()>,
}

impl MechanismHandler for Gate {
    fn invoke(&mut self, _call: &mut InvokeCall) -> MechanismResult {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        MechanismResult::Allow
    }

    fn interrupt(&mut self) {
        let _ = self.interrupted.send(());
    }
}

struct GateControl {
    entered: Receiver<()>,
    release: Sender<()>,
    interrupted: Receiver<()>,
}

fn register_gate(connector: &LocalConnector, mechanism: &str) -> GateControl {
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let (interrupted_tx, interrupted_rx) = unbounded();
    connector.register(mechanism, move || {
        Box::new(Gate {
            entered: entered_tx.clone(),
            release: release_rx.clone(),
            interrupted: interrupted_tx.clone(),
        }) as Box<dyn MechanismHandler>
    });
    GateControl {
        entered: entered_rx,
        release: release_tx,
        interrupted: interrupted_rx,
    }
}

#[test]
fn test_run_returns_hints_and_context() {
    let connector = LocalConnector::new();
    connector.register_fn("test:password", |call| {
        assert_eq!(call.immutable_hints.get_int("client-pid"), 42);
        call.hints.set_string("reason", "none");
        call.context.set_string("username", "alice");
        call.context.set_data("password", b"hunter2");
        call.context.set_flags("password", ItemFlags::SENSITIVE);
        MechanismResult::Allow
    });

    let agent = create(&connector, "test", "password");
    assert_eq!(agent.state(), AgentState::Created);

    let mut immutable = ItemStore::new();
    immutable.set_int("client-pid", 42);
    let result = agent.run(&ItemStore::new(), &ItemStore::new(), &immutable);

    assert_eq!(result, MechanismResult::Allow);
    assert_eq!(agent.state(), AgentState::Active);
    assert_eq!(agent.hints().get_string("reason"), Some("none"));
    let context = agent.context();
    assert_eq!(context.get_string("username"), Some("alice"));
    assert_eq!(context.get_data("password"), Some(&b"hunter2"[..]));
    assert_eq!(connector.invocations("test:password"), 1);
}

#[test]
fn test_unknown_mechanism_is_not_created() {
    let connector = LocalConnector::new();
    let agent = Agent::create(
        &Mechanism::new("missing", "mech", false),
        &connector,
        &options(),
        None,
    );
    assert!(agent.is_none());
}

#[test]
fn test_run_on_dead_agent_is_noop() {
    let connector = LocalConnector::new();
    connector.register_fn("test:deny", |_| MechanismResult::Deny);
    let agent = create(&connector, "test", "deny");

    assert_eq!(
        agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new()),
        MechanismResult::Deny
    );
    agent.destroy();
    assert_eq!(agent.state(), AgentState::Dead);

    assert_eq!(
        agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new()),
        MechanismResult::Deny
    );
    assert_eq!(connector.invocations("test:deny"), 1);
}

#[test]
fn test_interrupt_on_active_defers_next_run() {
    let connector = LocalConnector::new();
    connector.register_fn("test:allow", |_| MechanismResult::Allow);
    let agent = create(&connector, "test", "allow");
    agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new());

    agent.notify_interrupt();
    assert_eq!(agent.state(), AgentState::MechInterrupting);

    // Skipped while the interrupt is pending.
    agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new());
    assert_eq!(connector.invocations("test:allow"), 1);

    agent.clear_interrupt();
    assert_eq!(agent.state(), AgentState::Active);
    agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new());
    assert_eq!(connector.invocations("test:allow"), 2);
}

#[test]
fn test_interrupt_on_current_is_forwarded() {
    let connector = LocalConnector::new();
    let gate = register_gate(&connector, "test:gate");
    let agent = create(&connector, "test", "gate");

    let runner = {
        let agent = Arc::clone(&agent);
        thread::spawn(move || agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new()))
    };
    gate.entered.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(agent.state(), AgentState::Current);

    agent.notify_interrupt();
    assert_eq!(agent.state(), AgentState::Interrupting);

    // Clearing does not touch an in-flight interrupt.
    agent.clear_interrupt();
    assert_eq!(agent.state(), AgentState::Interrupting);

    gate.release.send(()).unwrap();
    assert_eq!(runner.join().unwrap(), MechanismResult::Allow);
    gate.interrupted.recv_timeout(TIMEOUT).unwrap();
}

#[test]
fn test_destroy_releases_blocked_run() {
    let connector = LocalConnector::new();
    let gate = register_gate(&connector, "test:gate");
    let agent = create(&connector, "test", "gate");

    let runner = {
        let agent = Arc::clone(&agent);
        thread::spawn(move || agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new()))
    };
    gate.entered.recv_timeout(TIMEOUT).unwrap();

    agent.destroy();
    assert_eq!(runner.join().unwrap(), MechanismResult::Undefined);
    assert_eq!(agent.state(), AgentState::Dead);
    drop(gate);
}

#[test]
fn test_deactivate_returns_to_active() {
    let connector = LocalConnector::new();
    connector.register_fn("test:allow", |_| MechanismResult::Allow);
    let agent = create(&connector, "test", "allow");
    agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new());

    agent.deactivate().unwrap();
    assert_eq!(agent.state(), AgentState::Active);
}

struct Flaky {
    remaining: Arc<AtomicUsize>,
}

impl MechanismHandler for Flaky {
    fn create(&mut self) -> CreateResult {
        if self.remaining.load(Ordering::SeqCst) == 0 {
            CreateResult::Success
        } else {
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            CreateResult::ConnectionInterrupted
        }
    }

    fn invoke(&mut self, _call: &mut InvokeCall) -> MechanismResult {
        MechanismResult::Allow
    }
}

fn register_flaky(connector: &LocalConnector, failures: usize) {
    let remaining = Arc::new(AtomicUsize::new(failures));
    connector.register("test:flaky", move || {
        Box::new(Flaky {
            remaining: Arc::clone(&remaining),
        }) as Box<dyn MechanismHandler>
    });
}

#[test]
fn test_first_mechanism_retries_interrupted_create() {
    let connector = LocalConnector::new();
    register_flaky(&connector, 2);
    let mut options = options();
    options.first = true;

    let agent = Agent::create(
        &Mechanism::new("test", "flaky", false),
        &connector,
        &options,
        None,
    );
    assert_eq!(agent.map(|a| a.state()), Some(AgentState::Created));

    // Later mechanisms give up on the first interruption.
    let connector = LocalConnector::new();
    register_flaky(&connector, 1);
    let agent = Agent::create(
        &Mechanism::new("test", "flaky", false),
        &connector,
        &CreateOptions::new(AgentService::Regular),
        None,
    );
    assert!(agent.is_none());
}

#[test]
fn test_create_retries_are_bounded() {
    let connector = LocalConnector::new();
    register_flaky(&connector, 100);
    let mut options = options();
    options.first = true;
    options.retry_limit = 3;

    let agent = Agent::create(
        &Mechanism::new("test", "flaky", false),
        &connector,
        &options,
        None,
    );
    assert!(agent.is_none());
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<AgentIndex>>,
}

impl InterruptListener for Recorder {
    fn agent_interrupted(&self, agent: AgentIndex) {
        self.seen.lock().push(agent);
    }
}

#[test]
fn test_agent_requested_interrupt_reaches_listener() {
    let connector = LocalConnector::new();
    connector.register_fn("test:watcher", |_| MechanismResult::Allow);
    let recorder = Arc::new(Recorder::default());
    let weak = Arc::downgrade(&recorder);
    let listener: Weak<dyn InterruptListener> = weak;

    let agent = Agent::create(
        &Mechanism::new("test", "watcher", false),
        &connector,
        &options(),
        Some(listener),
    )
    .unwrap();
    agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new());

    assert_eq!(connector.request_interrupt("test:watcher"), 1);
    assert_eq!(agent.state(), AgentState::Interrupting);
    assert_eq!(recorder.seen.lock().as_slice(), &[agent.index()]);

    // A rerun leaves the interrupting state behind.
    agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new());
    assert_eq!(agent.state(), AgentState::Active);
}

#[test]
fn test_interrupt_requests_to_dead_agents_are_dropped() {
    let connector = LocalConnector::new();
    let gate = register_gate(&connector, "test:gate");
    let (done_tx, done_rx) = bounded(1);
    let agent = create(&connector, "test", "gate");

    let runner = {
        let agent = Arc::clone(&agent);
        thread::spawn(move || {
            let result = agent.run(&ItemStore::new(), &ItemStore::new(), &ItemStore::new());
            let _ = done_tx.send(());
            result
        })
    };
    gate.entered.recv_timeout(TIMEOUT).unwrap();
    agent.destroy();
    done_rx.recv_timeout(TIMEOUT).unwrap();

    // The local worker is still inside the handler, so the connection is
    // live, but the agent ignores it.
    assert_eq!(connector.request_interrupt("test:gate"), 0);
    assert_eq!(agent.state(), AgentState::Dead);
    gate.release.send(()).unwrap();
    assert_eq!(runner.join().unwrap(), MechanismResult::Undefined);
}
