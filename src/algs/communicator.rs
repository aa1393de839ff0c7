//! Thin façade over serial, intra-process, or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange code calls
//! `.wait()` on every handle before it trusts that a buffer is ready, and it
//! drains every handle even when an earlier one failed.
//!
//! Ordering: messages between one (sender, receiver) pair under one tag are
//! delivered in the order they were sent. Nothing else is ordered.

use crate::comm_error::CommError;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Non-blocking point-to-point interface of a fixed-size process group.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Start sending `buf` to `peer` under `tag`. The bytes are copied or pinned
    /// by the backend; `buf` may be reused once this returns.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;

    /// Post a receive from `peer` under `tag`, expecting `max_len` bytes.
    ///
    /// Backends hand back the whole message as sent, even when its length
    /// differs from `max_len`; callers check lengths themselves.
    fn irecv(&self, peer: usize, tag: u16, max_len: usize) -> Self::RecvHandle;

    /// Rank of this process within the group.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// `true` for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data.
    ///
    /// Receive handles return `None` on a delivery failure. Send handles carry
    /// no data and always return `None`.
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Channel identifier distinguishing one exchange's messages from another's.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    /// Largest tag every MPI implementation must accept (`MPI_TAG_UB >= 32767`).
    pub const MAX: u16 = i16::MAX as u16;

    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `k` channels above this one, or `None` past [`CommTag::MAX`].
    pub const fn checked_offset(self, k: u16) -> Option<Self> {
        match self.0.checked_add(k) {
            Some(t) if t <= Self::MAX => Some(Self(t)),
            _ => None,
        }
    }
}

/// The three channels a plan occupies, derived from one base tag.
///
/// A plan built on base tag `t` uses `t`, `t + 1` and `t + 2`; plans that may
/// be in flight at the same time need base tags at least
/// [`PlanCommTags::SPAN`] apart. Tags never wrap: bases above
/// [`PlanCommTags::MAX_BASE`] are rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCommTags {
    /// Count handshake during plan construction.
    pub counts: CommTag,
    /// Payload flowing in the plan's forward direction.
    pub forward: CommTag,
    /// Payload flowing back along the plan.
    pub reverse: CommTag,
}

impl PlanCommTags {
    pub const SPAN: u16 = 3;
    pub const MAX_BASE: u16 = CommTag::MAX - (Self::SPAN - 1);

    pub fn from_base(base: CommTag) -> Result<Self, CommError> {
        match (base.checked_offset(1), base.checked_offset(2)) {
            (Some(forward), Some(reverse)) => Ok(Self {
                counts: base,
                forward,
                reverse,
            }),
            _ => Err(CommError::InvalidTag {
                base: base.as_u16(),
                max: Self::MAX_BASE,
            }),
        }
    }

    /// Same channels with the payload directions exchanged.
    pub const fn swapped(self) -> Self {
        Self {
            counts: self.counts,
            forward: self.reverse,
            reverse: self.forward,
        }
    }
}

/// Compile-time no-op comm for pure serial use: rank 0 of a group of one.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _max_len: usize) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Shared by every member of one in-process group.
#[derive(Default)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
    lock: Mutex<()>,
    ready: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        self.slots.entry(key).or_default().push_back(data);
        let _guard = self.lock.lock();
        self.ready.notify_all();
    }

    // A drained queue is removed under the same shard lock, so `slots` only
    // holds keys with undelivered messages.
    fn try_take(&self, key: &Key) -> Option<Bytes> {
        match self.slots.entry(*key) {
            Entry::Occupied(mut slot) => {
                let bytes = slot.get_mut().pop_front();
                if slot.get().is_empty() {
                    slot.remove();
                }
                bytes
            }
            Entry::Vacant(_) => None,
        }
    }

    // Checking under `lock` pairs with `post` notifying under `lock`, so a
    // message posted between the check and the wait still wakes us.
    fn take_blocking(&self, key: Key) -> Bytes {
        let mut guard = self.lock.lock();
        loop {
            if let Some(bytes) = self.try_take(&key) {
                return bytes;
            }
            self.ready.wait(&mut guard);
        }
    }
}

/// Receive handle of [`RayonComm`]; the message is claimed at `wait`.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        Some(self.mailbox.take_blocking(self.key).to_vec())
    }
}

/// In-process group member. Every rank runs on its own thread and all members
/// created by one [`RayonComm::world`] call share a private mailbox.
///
/// Receives return the message exactly as sent; callers validate lengths.
#[derive(Clone)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl fmt::Debug for RayonComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl RayonComm {
    /// Create the `size` members of a fresh in-process group, indexed by rank.
    pub fn world(size: usize) -> Vec<RayonComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| RayonComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Run `f` once per rank of a fresh group of `size`, all ranks concurrently,
    /// and return the results indexed by rank.
    ///
    /// Each rank gets a dedicated thread, so `f` may block on peers.
    #[cfg(feature = "rayon")]
    pub fn run_world<F, R>(size: usize, f: F) -> Result<Vec<R>, CommError>
    where
        F: Fn(RayonComm) -> R + Sync,
        R: Send,
    {
        if size == 0 {
            return Err(CommError::GroupSetup("group size must be positive".into()));
        }
        let comms = Self::world(size);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("rank-{i}"))
            .build()
            .map_err(|e| CommError::GroupSetup(e.to_string()))?;
        Ok(pool.broadcast(|ctx| f(comms[ctx.index()].clone())))
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _max_len: usize) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::comm_error::CommError;
    use mpi::Tag;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::request::{Request, StaticScope};
    use mpi::topology::{Communicator as _, SimpleCommunicator};
    use std::sync::Arc;

    /// World communicator of an MPI job.
    pub struct MpiComm {
        world: Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
        // Dropping the universe finalizes MPI, so it lives as long as the comm.
        _universe: Option<Universe>,
    }

    // MPI is driven from one thread of control per process; the handle is never
    // used concurrently.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialize MPI and wrap `MPI_COMM_WORLD`.
        pub fn new() -> Result<Self, CommError> {
            let universe = mpi::initialize()
                .ok_or_else(|| CommError::GroupSetup("MPI was already initialized".into()))?;
            let world = universe.world();
            Ok(Self::with_universe(world, Some(universe)))
        }

        /// Wrap a communicator of an MPI environment initialized elsewhere.
        pub fn from_world(world: SimpleCommunicator) -> Self {
            Self::with_universe(world, None)
        }

        fn with_universe(world: SimpleCommunicator, universe: Option<Universe>) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                world: Arc::new(world),
                rank,
                size,
                _universe: universe,
            }
        }
    }

    /// Pending MPI operation.
    ///
    /// Sends are immediate and own a heap copy of the payload until `wait`.
    /// Receives are matched at `wait` against the pending message, so it is taken
    /// whole whatever its size and the caller decides whether it fits.
    pub enum MpiHandle {
        Send {
            request: Request<'static, [u8], StaticScope>,
            buf: *mut [u8],
        },
        Recv {
            world: Arc<SimpleCommunicator>,
            peer: i32,
            tag: Tag,
        },
    }

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            match self {
                MpiHandle::Send { request, buf } => {
                    let _ = request.wait();
                    // SAFETY: `buf` came from `Box::leak` and the request that
                    // borrowed it has completed.
                    drop(unsafe { Box::from_raw(buf) });
                    None
                }
                MpiHandle::Recv { world, peer, tag } => {
                    let (data, _status) = world.process_at_rank(peer).receive_vec_with_tag::<u8>(tag);
                    Some(data)
                }
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: the slice stays alive until `MpiHandle::wait` reclaims it.
            let data: &'static [u8] = unsafe { &*ptr };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as Tag);
            MpiHandle::Send { request, buf: ptr }
        }

        // Sends are all immediate, so deferring the matching receive to
        // `wait` cannot deadlock the exchange.
        fn irecv(&self, peer: usize, tag: u16, _max_len: usize) -> MpiHandle {
            MpiHandle::Recv {
                world: Arc::clone(&self.world),
                peer: peer as i32,
                tag: tag as Tag,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiHandle};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let world = RayonComm::world(2);
        let (comm0, comm1) = (&world[0], &world[1]);

        // On rank 1: post the receive for data from peer 0 with tag 7
        let recv_handle = comm1.irecv(0, 7, 4);

        // On rank 0: send the 4 bytes [1,2,3,4] to peer 1 with tag 7
        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        assert!(send_handle.wait().is_none());

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn delivered_mail_leaves_no_slots_behind() {
        let world = RayonComm::world(2);
        for tag in 0..16u16 {
            world[0].isend(1, tag, &[tag as u8]);
            world[0].isend(1, tag, &[tag as u8 + 1]);
        }
        assert_eq!(world[1].mailbox.slots.len(), 16);
        for tag in 0..16u16 {
            assert_eq!(world[1].irecv(0, tag, 1).wait().unwrap(), vec![tag as u8]);
            assert_eq!(world[1].irecv(0, tag, 1).wait().unwrap(), vec![tag as u8 + 1]);
        }
        assert!(world[1].mailbox.slots.is_empty());
    }

    #[test]
    fn separate_worlds_do_not_share_mail() {
        let a = RayonComm::world(2);
        let b = RayonComm::world(2);
        a[0].isend(1, 3, &[9]);
        b[0].isend(1, 3, &[7]);
        assert_eq!(b[1].irecv(0, 3, 1).wait().unwrap(), vec![7]);
        assert_eq!(a[1].irecv(0, 3, 1).wait().unwrap(), vec![9]);
    }

    #[test]
    fn plan_tags_are_distinct_and_swappable() {
        let tags = PlanCommTags::from_base(CommTag::new(10)).unwrap();
        assert_eq!(tags.counts.as_u16(), 10);
        assert_eq!(tags.forward.as_u16(), 11);
        assert_eq!(tags.reverse.as_u16(), 12);
        let sw = tags.swapped();
        assert_eq!(sw.forward, tags.reverse);
        assert_eq!(sw.reverse, tags.forward);
        assert_eq!(sw.counts, tags.counts);
    }

    #[test]
    fn tag_offset_never_wraps() {
        assert_eq!(CommTag::new(u16::MAX).checked_offset(1), None);
        assert_eq!(CommTag::new(CommTag::MAX).checked_offset(1), None);
        assert_eq!(CommTag::new(5).checked_offset(2), Some(CommTag::new(7)));
        assert!(PlanCommTags::from_base(CommTag::new(0xFFFF)).is_err());
        assert!(PlanCommTags::from_base(CommTag::new(PlanCommTags::MAX_BASE)).is_ok());
    }

    #[test]
    fn no_comm_is_group_of_one() {
        let c = NoComm;
        assert!(c.is_no_comm());
        assert_eq!(c.rank(), 0);
        assert_eq!(c.size(), 1);
        assert!(c.irecv(0, 1, 8).wait().is_none());
    }
}
