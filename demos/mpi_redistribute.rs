// demos/mpi_redistribute.rs
// cargo mpirun -n 4 --features mpi-support --example mpi_redistribute
//
// Every rank picks a few random local objects and a random destination for
// each of them (objects destined for the own rank are retained). One plan is
// built and then used twice: once for `f64` values and once for `u32` global
// ids, without rebuilding anything in between.

fn main() {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use unstructured_comm::prelude::*;

    let comm = match MpiComm::new() {
        Ok(comm) => comm,
        Err(e) => {
            eprintln!("MPI initialization failed: {e}");
            return;
        }
    };
    let rank = comm.rank();
    let size = comm.size();

    const N_OBJECTS: usize = 1 << 10;
    let mut rng = SmallRng::seed_from_u64(0x5EED + rank as u64);
    let x: Vec<f64> = (0..N_OBJECTS).map(|_| rng.r#gen::<f64>()).collect();
    let gids: Vec<u32> = (0..N_OBJECTS).map(|i| (rank * N_OBJECTS + i) as u32).collect();

    let nsend = rng.gen_range(1..=10);
    let object_ids: Vec<usize> = (0..nsend).map(|_| rng.gen_range(0..N_OBJECTS)).collect();
    let proclist: Vec<i32> = (0..nsend)
        .map(|_| match rng.gen_range(0..size) {
            p if p == rank => Destination::RETAIN_SENTINEL,
            p => p as i32,
        })
        .collect();

    let mut plan = match build_from_raw(&comm, CommTag::new(0), &proclist) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("[rank {rank}] plan construction failed: {e}");
            return;
        }
    };
    let mut ex = Exchanger::new(&comm);

    // doubles
    let senddata: Vec<f64> = object_ids.iter().map(|&i| x[i]).collect();
    let packed = plan.pack_typed(&senddata).expect("send buffer matches plan");
    let recv = ex.forward_typed(&plan, &packed).expect("f64 exchange");
    println!("[rank {rank}] sent {senddata:?} to {proclist:?}");
    println!("[rank {rank}] received {recv:?}");

    // unsigned ints through the same plan
    plan.set_element_width(4).expect("positive width");
    let senddata: Vec<u32> = object_ids.iter().map(|&i| gids[i]).collect();
    let packed = plan.pack(bytemuck::cast_slice(&senddata), 4).expect("send buffer matches plan");
    let recv = ex.forward(&plan, &packed).expect("u32 exchange");
    let recv: Vec<u32> = recv
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    println!("[rank {rank}] sent {senddata:?} to {proclist:?}");
    println!("[rank {rank}] received {recv:?}");
    println!("[rank {rank}] traffic {:?}", ex.total_stats());
}
