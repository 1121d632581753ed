//! # Summary
//!
//! This module implements the deterministic simulated network and timer
//! service the roles run against. A single virtual clock drives a heap of
//! pending events — message deliveries and timer fires — executed one at
//! a time to completion, so every node is single-threaded cooperative and
//! no handler ever observes concurrent mutation. All randomness (delivery
//! delay jitter, probabilistic loss) comes from one seeded RNG: the same
//! seed replays the same schedule.

use std::cmp;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hashbrown::{HashMap as Map, HashSet as Set};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::message::Message;
use crate::node::{Address, Node};
use crate::state;

/// Cancellable handle to a scheduled callback. Dropping the handle does
/// not cancel the timer; only `cancel` does.
pub struct Timer {
    cancelled: Arc<AtomicBool>,
}

impl Timer {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// A handle to nothing, for when the network is already gone.
    pub(crate) fn inert() -> Self {
        Timer {
            cancelled: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// Cheaply cloneable handle to a simulated network.
#[derive(Derivative)]
#[derivative(Clone(bound = ""))]
pub struct Network<S: state::State>(pub(crate) Arc<RwLock<Core<S>>>);

pub(crate) struct Core<S: state::State> {
    now: Duration,
    seq: u64,
    queue: BinaryHeap<Entry<S>>,
    nodes: Map<Address, Node<S>>,
    rng: StdRng,
    min_delay: Duration,
    max_delay: Duration,
    drop_rate: f64,
    partitioned: Set<Address>,
    filter: Option<Filter<S>>,
}

type Filter<S> = Box<dyn FnMut(Address, Address, &Message<S>) -> bool>;

struct Entry<S: state::State> {
    due: Duration,
    seq: u64,
    event: Event<S>,
}

enum Event<S: state::State> {
    Deliver {
        src: Address,
        dst: Address,
        message: Message<S>,
    },
    Timer {
        owner: Address,
        cancelled: Arc<AtomicBool>,
        callback: Box<dyn FnOnce()>,
    },
}

// BinaryHeap is a max-heap; reverse the (due, seq) key so the earliest
// event surfaces first and ties break in scheduling order.
impl<S: state::State> Ord for Entry<S> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl<S: state::State> PartialOrd for Entry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: state::State> PartialEq for Entry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<S: state::State> Eq for Entry<S> {}

impl<S: state::State> Network<S> {
    pub fn new(seed: u64) -> Self {
        Network(Arc::new(RwLock::new(Core {
            now: Duration::ZERO,
            seq: 0,
            queue: BinaryHeap::new(),
            nodes: Map::default(),
            rng: StdRng::seed_from_u64(seed),
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            drop_rate: 0.0,
            partitioned: Set::default(),
            filter: None,
        })))
    }

    /// Create and attach a node at the given address.
    pub fn node(&self, address: Address) -> Node<S> {
        let node = Node::new(address, Arc::downgrade(&self.0));
        self.0.write().nodes.insert(address, node.clone());
        node
    }

    pub fn now(&self) -> Duration {
        self.0.read().now
    }

    /// Probability in [0, 1] that any given message is silently lost.
    pub fn set_drop_rate(&self, rate: f64) {
        self.0.write().drop_rate = rate;
    }

    /// Bounds for the uniform per-message delivery delay.
    pub fn set_delay(&self, min: Duration, max: Duration) {
        let mut core = self.0.write();
        core.min_delay = min;
        core.max_delay = max;
    }

    /// Install a loss predicate consulted for every message before the
    /// random drop roll; returning true drops that message. The closure
    /// must not call back into the network.
    pub fn set_filter(&self, filter: impl FnMut(Address, Address, &Message<S>) -> bool + 'static) {
        self.0.write().filter = Some(Box::new(filter));
    }

    pub fn clear_filter(&self) {
        self.0.write().filter = None;
    }

    /// Cut a node off: messages to and from it are dropped at delivery
    /// time, in-flight traffic included. Its local timers keep firing.
    pub fn partition(&self, address: Address) {
        self.0.write().partitioned.insert(address);
    }

    pub fn heal(&self, address: Address) {
        self.0.write().partitioned.remove(&address);
    }

    /// Enqueue a message for each destination, subject to the loss
    /// filter, the drop rate, and a random per-destination delay.
    pub fn send(&self, src: Address, destinations: &[Address], message: Message<S>) {
        let mut core = self.0.write();
        for &dst in destinations {
            if let Some(filter) = core.filter.as_mut() {
                if filter(src, dst, &message) {
                    trace!("dropping {:?} from {} to {}: filtered", message.kind(), src, dst);
                    continue;
                }
            }
            if core.drop_rate > 0.0 {
                let drop_rate = core.drop_rate;
                if core.rng.gen_bool(drop_rate) {
                    trace!("dropping {:?} from {} to {}: loss", message.kind(), src, dst);
                    continue;
                }
            }
            let delay = core.random_delay();
            let due = core.now + delay;
            let event = Event::Deliver {
                src,
                dst,
                message: message.clone(),
            };
            core.push(due, event);
        }
    }

    /// Schedule a callback to run after `delay` of virtual time.
    pub fn set_timer(
        &self,
        owner: Address,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) -> Timer {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut core = self.0.write();
        let due = core.now + delay;
        let event = Event::Timer {
            owner,
            cancelled: cancelled.clone(),
            callback: Box::new(callback),
        };
        core.push(due, event);
        Timer { cancelled }
    }

    /// Advance the virtual clock by `duration`, executing every event
    /// that falls due — including events those events schedule.
    pub fn run_for(&self, duration: Duration) {
        let deadline = self.0.read().now + duration;
        loop {
            let entry = {
                let mut core = self.0.write();
                let due = core.queue.peek().map(|entry| entry.due);
                match due {
                    Some(due) if due <= deadline => {
                        core.now = due;
                        core.queue.pop()
                    }
                    _ => {
                        core.now = deadline;
                        return;
                    }
                }
            };
            match entry.map(|entry| entry.event) {
                Some(Event::Deliver { src, dst, message }) => self.deliver(src, dst, message),
                Some(Event::Timer { owner, cancelled, callback }) => {
                    if !cancelled.load(Ordering::SeqCst) {
                        trace!("firing timer for node {}", owner);
                        callback();
                    }
                }
                None => return,
            }
        }
    }

    fn deliver(&self, src: Address, dst: Address, message: Message<S>) {
        let node = {
            let core = self.0.read();
            if core.partitioned.contains(&src) || core.partitioned.contains(&dst) {
                trace!("dropping {:?} from {} to {}: partitioned", message.kind(), src, dst);
                return;
            }
            core.nodes.get(&dst).cloned()
        };
        if let Some(node) = node {
            node.deliver(src, message);
        }
    }
}

impl<S: state::State> Core<S> {
    fn push(&mut self, due: Duration, event: Event<S>) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Entry { due, seq, event });
    }

    fn random_delay(&mut self) -> Duration {
        let min = self.min_delay.as_micros() as u64;
        let max = self.max_delay.as_micros() as u64;
        Duration::from_micros(self.rng.gen_range(min..=max))
    }
}
