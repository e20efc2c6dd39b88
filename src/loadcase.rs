use crate::idx;
use crate::mpc::{Branch, Bus, BusType, Gen, MPC};
use anyhow::{format_err, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// MATPOWER case in JSON form, as written by `savecase` + `jsonencode`.
#[derive(Serialize, Deserialize)]
struct MPCase {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "baseMVA")]
    base_mva: f64,
    bus: Vec<Vec<f64>>,
    gen: Vec<Vec<f64>>,
    branch: Vec<Vec<f64>>,
}

/// Reads a MATPOWER case from a JSON file.
pub fn load_case(case_path: &Path) -> Result<MPC> {
    let file = File::open(case_path)
        .map_err(|err| format_err!("unable to open case {}: {}", case_path.display(), err))?;
    let mpcase: MPCase = serde_json::from_reader(BufReader::new(file))?;

    let default_name = case_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("case")
        .to_string();

    let mut mpc = case_from_matrices(mpcase)?;
    if mpc.name.is_empty() {
        mpc.name = default_name;
    }
    Ok(mpc)
}

/// Parses a MATPOWER case from a JSON string.
pub fn parse_case(json: &str) -> Result<MPC> {
    let mpcase: MPCase = serde_json::from_str(json)?;
    case_from_matrices(mpcase)
}

fn case_from_matrices(mpcase: MPCase) -> Result<MPC> {
    let bus = mpcase
        .bus
        .iter()
        .enumerate()
        .map(|(i, row)| {
            check_cols("bus", i, row, idx::BUS_COLS)?;
            array_to_bus(row)
        })
        .collect::<Result<Vec<Bus>>>()?;
    let gen = mpcase
        .gen
        .iter()
        .enumerate()
        .map(|(i, row)| {
            check_cols("gen", i, row, idx::GEN_COLS)?;
            Ok(array_to_gen(row))
        })
        .collect::<Result<Vec<Gen>>>()?;
    let branch = mpcase
        .branch
        .iter()
        .enumerate()
        .map(|(i, row)| {
            check_cols("branch", i, row, idx::BRANCH_COLS)?;
            Ok(array_to_branch(row))
        })
        .collect::<Result<Vec<Branch>>>()?;

    Ok(MPC {
        name: mpcase.name.unwrap_or_default(),
        base_mva: mpcase.base_mva,
        bus,
        gen,
        branch,
        ..Default::default()
    })
}

fn check_cols(table: &str, row: usize, a: &[f64], min: usize) -> Result<()> {
    if a.len() < min {
        return Err(format_err!(
            "{} row {} has {} columns, at least {} required",
            table,
            row,
            a.len(),
            min
        ));
    }
    Ok(())
}

fn array_to_bus(a: &[f64]) -> Result<Bus> {
    let bus_type = match a[idx::BUS_TYPE] as usize {
        idx::PQ => BusType::PQ,
        idx::PV => BusType::PV,
        idx::REF => BusType::REF,
        idx::NONE => BusType::NONE,
        t => return Err(format_err!("bus {}: invalid bus type {}", a[idx::BUS_I], t)),
    };
    Ok(Bus {
        bus_i: a[idx::BUS_I] as usize,
        bus_type,

        pd: a[idx::PD],
        qd: a[idx::QD],
        gs: a[idx::GS],
        bs: a[idx::BS],

        area: a[idx::BUS_AREA] as usize,

        vm: a[idx::VM],
        va: a[idx::VA],

        base_kv: a[idx::BASE_KV],

        vmax: a[idx::VMAX],
        vmin: a[idx::VMIN],
    })
}

fn array_to_gen(a: &[f64]) -> Gen {
    Gen {
        gen_bus: a[idx::GEN_BUS] as usize,

        pg: a[idx::PG],
        qg: a[idx::QG],

        qmax: a[idx::QMAX],
        qmin: a[idx::QMIN],

        vg: a[idx::VG],

        mbase: a[idx::MBASE],
        status: a[idx::GEN_STATUS] > 0.0,

        pmax: a[idx::PMAX],
        pmin: a[idx::PMIN],
    }
}

fn array_to_branch(a: &[f64]) -> Branch {
    Branch {
        f_bus: a[idx::F_BUS] as usize,
        t_bus: a[idx::T_BUS] as usize,

        r: a[idx::BR_R],
        x: a[idx::BR_X],
        b: a[idx::BR_B],

        rate_a: a[idx::RATE_A],

        tap: a[idx::TAP],
        shift: a[idx::SHIFT],

        status: a[idx::BR_STATUS] != 0.0,
    }
}

/// Builds a radial test network of `nb` buses numbered from 1.
///
/// Consecutive buses are joined by identical branches of impedance `z` (p.u.).
/// The first source bus is the reference bus, any further source buses are
/// PV buses with a generator each. Every sink bus carries a 10 MW / 5 MVAr
/// load.
pub fn radial_case(nb: usize, sources: &[usize], sinks: &[usize], z: Complex64) -> MPC {
    let mut mpc = MPC {
        name: format!("radial{}", nb),
        ..Default::default()
    };

    for i in 1..=nb {
        let bus_type = match sources.iter().position(|&s| s == i) {
            Some(0) => BusType::REF,
            Some(_) => BusType::PV,
            None => BusType::PQ,
        };
        let (pd, qd) = if sinks.contains(&i) {
            (10.0, 5.0)
        } else {
            (0.0, 0.0)
        };
        mpc.bus.push(Bus {
            bus_i: i,
            bus_type,
            pd,
            qd,
            base_kv: 20.0,
            ..Default::default()
        });
    }
    for &s in sources.iter().filter(|&&s| s >= 1 && s <= nb) {
        mpc.gen.push(Gen {
            gen_bus: s,
            mbase: mpc.base_mva,
            ..Default::default()
        });
    }
    for i in 1..nb {
        mpc.branch.push(Branch {
            f_bus: i,
            t_bus: i + 1,
            r: z.re,
            x: z.im,
            ..Default::default()
        });
    }
    mpc
}
