//! Two-node loopback demo.
//!
//! Spins up two complete router instances on one Embassy executor thread
//! and joins them with an in-memory "cable": each node's transmit queue is
//! drained through the CSMA drive loop into the other node's receive
//! queue. A scripted client on node 100 then messages a user homed on
//! node 200, which exercises directory lookup, route learning and
//! delivery end-to-end without any radio hardware.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::Context;
use embassy_executor::{Executor, Spawner};
use embassy_time::{Duration, Timer};
use env_logger::Builder;
use log::{LevelFilter, debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;

use loramesh_router::config::RouterConfig;
use loramesh_router::ports::{ClientBridge, OfflineInbox, RadioPort};
use loramesh_router::radio::{CsmaConfig, RadioDriver, drive_transmits};
use loramesh_router::router::{RouterState, router_task};
use loramesh_router::types::{
    Notification, OfflineMessage, RadioFrame, RxFrameQueue, RxFrameQueueSender, SendRequest,
    SendRequestQueue, SendRequestQueueSender, TxFrameQueue, TxFrameQueueReceiver, UserId,
};

/// One end of the in-memory cable: "transmitting" delivers the frame
/// straight into the peer's receive queue.
struct CableRadio {
    peer_rx: RxFrameQueueSender,
}

impl RadioDriver for CableRadio {
    fn is_channel_free(&mut self) -> bool {
        true
    }

    fn transmit(&mut self, frame: &[u8]) -> bool {
        match RadioFrame::from_slice(frame) {
            Ok(frame) => self.peer_rx.try_send(frame).is_ok(),
            Err(_) => false,
        }
    }
}

/// Minimal client bridge hosting exactly one always-online user.
struct DemoBridge {
    label: &'static str,
    user: UserId,
    announced: AtomicBool,
    inbox: OfflineInbox,
}

impl DemoBridge {
    fn new(label: &'static str, user: UserId, inbox_cap: usize) -> Self {
        Self {
            label,
            user,
            announced: AtomicBool::new(false),
            inbox: OfflineInbox::new(inbox_cap),
        }
    }
}

impl ClientBridge for DemoBridge {
    fn notify(&self, event: Notification) {
        match event {
            Notification::UserData {
                from_user,
                to_user,
                data,
                ..
            } => info!(
                "[{}] user {} received from user {}: {:?}",
                self.label,
                to_user,
                from_user,
                String::from_utf8_lossy(&data)
            ),
            other => info!("[{}] {:?}", self.label, other),
        }
    }

    fn set_gateway_state(&self, online: bool) {
        debug!("[{}] gateway reachable: {online}", self.label);
    }

    fn knows_user(&self, user: UserId) -> bool {
        user == self.user
    }

    fn is_online(&self, user: UserId) -> bool {
        user == self.user
    }

    fn queue_offline(&self, user: UserId, msg: OfflineMessage) {
        debug!("[{}] message for absent user {user} spooled", self.label);
        if let Err(err) = self.inbox.push(user, msg) {
            debug!("[{}] {err}, oldest message dropped", self.label);
        }
    }

    fn pop_inbox(&self, user: UserId) -> Vec<OfflineMessage> {
        self.inbox.pop_all(user)
    }

    fn forget_user(&self, user: UserId) {
        debug!("[{}] forgot user {user}", self.label);
    }

    fn take_user_diff(&self) -> (Vec<UserId>, Vec<UserId>) {
        if self.announced.swap(true, Ordering::Relaxed) {
            (Vec::new(), Vec::new())
        } else {
            (vec![self.user], Vec::new())
        }
    }
}

#[embassy_executor::task(pool_size = 2)]
async fn cable_task(driver: CableRadio, tx_frames: TxFrameQueueReceiver, csma: CsmaConfig) {
    drive_transmits(driver, tx_frames, csma, StdRng::from_entropy()).await
}

/// Scripted client: once both nodes have announced themselves, user 1 on
/// node 100 greets user 2 on node 200.
#[embassy_executor::task]
async fn demo_script_task(requests: SendRequestQueueSender) {
    Timer::after(Duration::from_secs(2)).await;
    info!("user 1 sends a greeting to user 2 (directory lookup + discovery)");
    requests
        .send(SendRequest::UserMessage {
            from_user: 1,
            to_user: 2,
            data: b"hello over the mesh".to_vec(),
            flags: 0,
        })
        .await;
}

struct NodeChannels {
    rx: &'static RxFrameQueue,
    tx: &'static TxFrameQueue,
    requests: &'static SendRequestQueue,
}

fn leak_channels() -> NodeChannels {
    // INTENTIONAL LEAK: Box::leak gives the channels the 'static lifetime
    // the Embassy tasks require; they live until process exit.
    NodeChannels {
        rx: Box::leak(Box::new(RxFrameQueue::new())),
        tx: Box::leak(Box::new(TxFrameQueue::new())),
        requests: Box::leak(Box::new(SendRequestQueue::new())),
    }
}

fn embassy_init(spawner: Spawner, config: RouterConfig, network_key: [u8; 16]) {
    let node_a = leak_channels();
    let node_b = leak_channels();

    let state_a = RouterState::new(
        100,
        config.clone(),
        network_key,
        RadioPort::new(node_a.tx.sender()),
        Arc::new(DemoBridge::new("node-100", 1, config.offline_inbox_cap)),
        None,
        None,
    );
    let state_b = RouterState::new(
        200,
        config.clone(),
        network_key,
        RadioPort::new(node_b.tx.sender()),
        Arc::new(DemoBridge::new("node-200", 2, config.offline_inbox_cap)),
        None,
        None,
    );

    let _ = spawner.spawn(router_task(state_a, node_a.rx.receiver(), node_a.requests.receiver()));
    let _ = spawner.spawn(router_task(state_b, node_b.rx.receiver(), node_b.requests.receiver()));
    let _ = spawner.spawn(cable_task(
        CableRadio {
            peer_rx: node_b.rx.sender(),
        },
        node_a.tx.receiver(),
        config.csma.clone(),
    ));
    let _ = spawner.spawn(cable_task(
        CableRadio {
            peer_rx: node_a.rx.sender(),
        },
        node_b.tx.receiver(),
        config.csma.clone(),
    ));
    let _ = spawner.spawn(demo_script_task(node_a.requests.sender()));
}

fn main() -> anyhow::Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("loramesh_router"), LevelFilter::Debug)
        .init();

    let config_path = Path::new("config.toml");
    let config = if config_path.exists() {
        info!("loading {}", config_path.display());
        RouterConfig::load(config_path)?
    } else {
        info!("no config.toml found, using defaults");
        RouterConfig::default()
    };
    let network_key = config
        .parse_network_key()
        .context("invalid network key in configuration")?;

    info!("starting two-node loopback mesh");

    let embassy_handle = thread::Builder::new()
        .name("embassy-executor".to_string())
        .spawn(move || {
            // INTENTIONAL LEAK: the executor must outlive every task it
            // runs; it is reclaimed on process exit.
            let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
            executor.run(|spawner| embassy_init(spawner, config, network_key));
        })
        .expect("failed to spawn embassy thread");

    embassy_handle
        .join()
        .map_err(|_| anyhow::anyhow!("executor thread panicked"))?;
    Ok(())
}
