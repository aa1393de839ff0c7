//! Plan construction: tally, handshake, offsets, send order.

use super::count_exchange::exchange_send_counts;
use super::{CommPlan, Destination, exclusive_prefix};
use crate::algs::communicator::{CommTag, Communicator, PlanCommTags};
use crate::comm_error::CommError;
use crate::config::ExchangeConfig;
use crate::debug_invariants::DebugInvariants;
use itertools::Itertools;

/// Builds [`CommPlan`]s on one communicator and channel.
///
/// Construction is collective: every rank of the group must call
/// [`PlanBuilder::build`] with the same tag, or the handshake blocks. A rank
/// whose destination list is rejected returns before the handshake, which
/// leaves its peers waiting; recovering from that is up to the caller.
#[derive(Clone, Debug)]
pub struct PlanBuilder<'a, C> {
    comm: &'a C,
    base: CommTag,
    config: ExchangeConfig,
}

impl<'a, C> PlanBuilder<'a, C>
where
    C: Communicator,
{
    /// Plans built here occupy `tag`, `tag + 1` and `tag + 2`; `build` fails
    /// with [`CommError::InvalidTag`] if those leave [`PlanCommTags::MAX_BASE`].
    pub fn new(comm: &'a C, tag: CommTag) -> Self {
        Self {
            comm,
            base: tag,
            config: ExchangeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build a plan from raw ranks, where [`Destination::RETAIN_SENTINEL`]
    /// marks retained elements.
    pub fn build_from_raw(&self, proclist: &[i32]) -> Result<CommPlan, CommError> {
        let n = self.comm.size();
        let dests = proclist
            .iter()
            .enumerate()
            .map(|(i, &raw)| Destination::from_raw(raw, i, n))
            .collect::<Result<Vec<_>, _>>()?;
        self.build(&dests)
    }

    pub fn build(&self, dests: &[Destination]) -> Result<CommPlan, CommError> {
        let me = self.comm.rank();
        let n = self.comm.size();
        if n == 0 || me >= n {
            return Err(CommError::InvalidGroup { rank: me, size: n });
        }
        if self.config.element_width == 0 {
            return Err(CommError::InvalidElementWidth);
        }
        let tags = PlanCommTags::from_base(self.base)?;

        // 1) bucket every element: peers 0..n, retained elements in bucket n
        let retain_bucket = n;
        let mut buckets = Vec::with_capacity(dests.len());
        let mut send_counts = vec![0usize; n];
        let mut n_retain = 0usize;
        for (index, &dest) in dests.iter().enumerate() {
            let bucket = match dest {
                Destination::Retain => retain_bucket,
                Destination::Rank(p) if p == me => retain_bucket,
                Destination::Rank(p) if p < n => p,
                Destination::Rank(p) => {
                    return Err(CommError::InvalidDestination {
                        index,
                        value: p as i64,
                        n_ranks: n,
                    });
                }
            };
            if bucket == retain_bucket {
                n_retain += 1;
            } else {
                send_counts[bucket] += 1;
            }
            buckets.push(bucket);
        }

        // 2) learn receive counts from every peer
        let recv_counts = exchange_send_counts(self.comm, tags.counts, &send_counts)?;

        // 3) stable counting sort of local indices by bucket
        let mut cursor = exclusive_prefix(&send_counts);
        let mut send_order = vec![0usize; dests.len()];
        for (i, &b) in buckets.iter().enumerate() {
            send_order[cursor[b]] = i;
            cursor[b] += 1;
        }

        let plan = CommPlan::from_parts(
            me,
            n,
            tags,
            send_counts,
            recv_counts,
            send_order,
            n_retain,
            self.config.element_width,
        );
        if self.config.check_invariants {
            plan.validate_invariants()?;
        } else {
            plan.debug_assert_invariants();
        }
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "[rank {me}] plan on tag {}: send [{}] recv [{}] retain {}",
                tags.counts.as_u16(),
                plan.send_counts().iter().join(","),
                plan.recv_counts().iter().join(","),
                n_retain
            );
        }
        Ok(plan)
    }
}

/// Collective plan construction with default configuration.
pub fn build<C: Communicator>(
    comm: &C,
    tag: CommTag,
    dests: &[Destination],
) -> Result<CommPlan, CommError> {
    PlanBuilder::new(comm, tag).build(dests)
}

/// [`build`] for raw rank lists using `-1` as the retain sentinel.
pub fn build_from_raw<C: Communicator>(
    comm: &C,
    tag: CommTag,
    proclist: &[i32],
) -> Result<CommPlan, CommError> {
    PlanBuilder::new(comm, tag).build_from_raw(proclist)
}
