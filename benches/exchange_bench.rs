use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use unstructured_comm::algs::communicator::{CommTag, Communicator, RayonComm};
use unstructured_comm::algs::exchange::Exchanger;
use unstructured_comm::algs::plan::{Destination, build};

const RANKS: usize = 4;

fn destinations(rank: usize, len: usize) -> Vec<Destination> {
    let mut rng = SmallRng::seed_from_u64(rank as u64 + 1);
    (0..len)
        .map(|_| Destination::Rank(rng.gen_range(0..RANKS)))
        .collect()
}

// Rebuilding the plan for every payload vs. building once and exchanging.
fn bench_build_vs_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("redistribute");
    for &len in &[1_000usize, 20_000] {
        group.bench_with_input(BenchmarkId::new("build_each_time", len), &len, |b, &len| {
            b.iter(|| {
                RayonComm::run_world(RANKS, |comm| {
                    let dests = destinations(comm.rank(), len);
                    let plan = build(&comm, CommTag::new(1), &dests).unwrap();
                    let xs = vec![1.0f64; plan.n_local()];
                    Exchanger::new(&comm).forward_typed(&plan, &xs).unwrap().len()
                })
                .unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("reuse_plan_x8", len), &len, |b, &len| {
            b.iter(|| {
                RayonComm::run_world(RANKS, |comm| {
                    let dests = destinations(comm.rank(), len);
                    let plan = build(&comm, CommTag::new(1), &dests).unwrap();
                    let xs = vec![1.0f64; plan.n_local()];
                    let mut ex = Exchanger::new(&comm);
                    (0..8)
                        .map(|_| ex.forward_typed(&plan, &xs).unwrap().len())
                        .sum::<usize>()
                })
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_vs_reuse);
criterion_main!(benches);
