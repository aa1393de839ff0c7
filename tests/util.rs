#![allow(dead_code)]
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use unstructured_comm::algs::communicator::RayonComm;
use unstructured_comm::algs::plan::Destination;

/// Run `f` on every rank of a fresh in-process group of `n`.
pub fn run<F, R>(n: usize, f: F) -> Vec<R>
where
    F: Fn(RayonComm) -> R + Sync,
    R: Send,
{
    RayonComm::run_world(n, f).expect("in-process group")
}

/// Reproducible random destination list for `rank` (about one in five retained).
pub fn random_destinations(rank: usize, n_ranks: usize, len: usize, seed: u64) -> Vec<Destination> {
    let mut rng = SmallRng::seed_from_u64(seed ^ ((rank as u64) << 32));
    (0..len)
        .map(|_| {
            if rng.gen_ratio(1, 5) {
                Destination::Retain
            } else {
                Destination::Rank(rng.gen_range(0..n_ranks))
            }
        })
        .collect()
}

/// Globally unique value for element `i` of `rank`.
pub fn gid(rank: usize, i: usize) -> u32 {
    (rank as u32) * 1_000 + i as u32
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
