use crate::mpc::{Bus, Gen};
use std::collections::HashSet;

/// Builds index lists for each type of bus (REF, PV, PQ).
///
/// Indexes are positions in `bus`. Generators with "out-of-service" status
/// are treated as PQ buses with zero generation (regardless of Pg/Qg values
/// in gen). Isolated buses appear in none of the lists.
pub fn bus_types(bus: &[Bus], gen: &[Gen]) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    // Buses with generators that are ON.
    let bus_gen_status = gen
        .iter()
        .filter(|g| g.is_on())
        .map(|g| g.gen_bus)
        .collect::<HashSet<usize>>();

    // Positions of slack, PV and PQ buses.
    let refbus = bus
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_ref() && bus_gen_status.contains(&b.bus_i))
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();
    let pv = bus
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_pv() && bus_gen_status.contains(&b.bus_i))
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();
    let pq = bus
        .iter()
        .enumerate()
        .filter(|(_, b)| !b.is_isolated())
        .filter(|(_, b)| b.is_pq() || !bus_gen_status.contains(&b.bus_i))
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();

    (refbus, pv, pq)
}
