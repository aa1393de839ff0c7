mod util;
use util::*;

use unstructured_comm::algs::communicator::{CommTag, Communicator};
use unstructured_comm::algs::plan::{CommPlan, Destination, PlanBuilder, build, build_from_raw};
use unstructured_comm::config::ExchangeConfig;
use unstructured_comm::DebugInvariants;

/// Raw destination lists of the four-rank redistribution scenario.
fn scenario_proclist(rank: usize) -> Vec<i32> {
    match rank {
        0 => vec![1, 2, -1, 3, 1],
        1 => vec![2, 2, 2, 0, 0, 3, -1, -1, -1, -1],
        2 => vec![0, -1, 3, 1],
        _ => vec![-1, 2, 0, 0, 1, 1],
    }
}

#[test]
fn four_rank_scenario_counts() {
    let plans = run(4, |comm| {
        build_from_raw(&comm, CommTag::new(0x100), &scenario_proclist(comm.rank())).unwrap()
    });

    assert_eq!(plans[2].recv_counts()[1], 3);
    assert_eq!(plans[0].recv_counts()[1], 2);
    assert_eq!(plans[3].recv_counts()[1], 1);

    let p1 = &plans[1];
    assert_eq!(p1.send_counts(), &[2, 0, 3, 1]);
    assert_eq!(p1.n_retain(), 4);
    assert_eq!(p1.total_send(), 6);
    // rank 1 receives 2 from rank 0, 1 from rank 2 and 2 from rank 3
    assert_eq!(p1.recv_counts(), &[2, 0, 1, 2]);
    assert_eq!(p1.recv_offsets(), &[0, 2, 2, 3, 5]);
    assert_eq!(p1.total_receive(), 5 + 4);
    assert_eq!(p1.send_order(), &[3, 4, 0, 1, 2, 5, 6, 7, 8, 9]);
}

#[test]
fn cross_process_equality_and_conservation() {
    let n = 5;
    let plans: Vec<CommPlan> = run(n, |comm| {
        let dests = random_destinations(comm.rank(), n, 40, 0xC0FFEE);
        build(&comm, CommTag::new(0x110), &dests).unwrap()
    });

    for p in 0..n {
        for q in 0..n {
            assert_eq!(
                plans[p].send_counts()[q],
                plans[q].recv_counts()[p],
                "rank {p} -> rank {q}"
            );
        }
    }
    let sent: usize = plans.iter().map(CommPlan::total_send).sum();
    let received: usize = plans.iter().map(|p| p.recv_counts().iter().sum::<usize>()).sum();
    assert_eq!(sent, received);
    for plan in &plans {
        plan.validate_invariants().unwrap();
        assert_eq!(plan.total_receive(), plan.recv_counts().iter().sum::<usize>() + plan.n_retain());
    }
}

#[test]
fn send_order_is_stable_grouping() {
    let plans = run(3, |comm| {
        let dests: Vec<Destination> = [2, 0, 2, 1, 0, 2]
            .iter()
            .map(|&p| Destination::Rank(p))
            .collect();
        build(&comm, CommTag::new(0x120), &dests).unwrap()
    });
    // own-rank entries are retained and go last
    assert_eq!(plans[0].send_order(), &[3, 0, 2, 5, 1, 4]);
    assert_eq!(plans[1].send_order(), &[1, 4, 0, 2, 5, 3]);
    assert_eq!(plans[2].send_order(), &[1, 4, 3, 0, 2, 5]);
    assert_eq!(plans[2].n_retain(), 3);
    assert_eq!(plans[2].send_counts()[2], 0);
}

#[test]
fn building_twice_is_deterministic() {
    let first = run(3, |comm| {
        let dests = random_destinations(comm.rank(), 3, 25, 7);
        let a = build(&comm, CommTag::new(0x130), &dests).unwrap();
        let b = build(&comm, CommTag::new(0x130), &dests).unwrap();
        a == b
    });
    assert!(first.into_iter().all(|same| same));
}

#[test]
fn empty_ranks_still_receive() {
    let plans = run(3, |comm| {
        let dests = if comm.rank() == 0 {
            vec![Destination::Rank(1), Destination::Rank(2), Destination::Rank(2)]
        } else {
            Vec::new()
        };
        build(&comm, CommTag::new(0x140), &dests).unwrap()
    });
    assert_eq!(plans[1].recv_counts(), &[1, 0, 0]);
    assert_eq!(plans[2].recv_counts(), &[2, 0, 0]);
    assert_eq!(plans[1].n_local(), 0);
    assert_eq!(plans[2].total_receive(), 2);
}

#[test]
fn config_sets_initial_width() {
    let widths = run(2, |comm| {
        PlanBuilder::new(&comm, CommTag::new(0x150))
            .with_config(ExchangeConfig::default().with_element_width(4).with_check_invariants(true))
            .build(&[Destination::Rank(1 - comm.rank())])
            .unwrap()
            .element_width()
    });
    assert_eq!(widths, vec![4, 4]);
}

#[test]
fn summary_serializes() {
    let summaries = run(2, |comm| {
        build(&comm, CommTag::new(0x160), &[Destination::Rank(1), Destination::Retain])
            .unwrap()
            .summary()
    });
    let json = serde_json::to_string(&summaries[0]).unwrap();
    let back: unstructured_comm::algs::plan::PlanSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(back, summaries[0]);
    assert_eq!(summaries[1].recv_counts, vec![1, 0]);
    assert_eq!(summaries[0].n_retain, 1);
    assert_eq!(summaries[1].n_retain, 2);
}
