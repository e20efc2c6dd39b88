// Column indices of the MATPOWER case matrices.

// Bus //

// define bus types
pub(crate) const PQ: usize = 1;
pub(crate) const PV: usize = 2;
pub(crate) const REF: usize = 3;
pub(crate) const NONE: usize = 4;

// define the indices
pub(crate) const BUS_I: usize = 0; // bus number (1 to 29997)
pub(crate) const BUS_TYPE: usize = 1; // bus type
pub(crate) const PD: usize = 2; // Pd, real power demand (MW)
pub(crate) const QD: usize = 3; // Qd, reactive power demand (MVAr)
pub(crate) const GS: usize = 4; // Gs, shunt conductance (MW at V = 1.0 p.u.)
pub(crate) const BS: usize = 5; // Bs, shunt susceptance (MVAr at V = 1.0 p.u.)
pub(crate) const BUS_AREA: usize = 6; // area number, 1-100
pub(crate) const VM: usize = 7; // Vm, voltage magnitude (p.u.)
pub(crate) const VA: usize = 8; // Va, voltage angle (degrees)
pub(crate) const BASE_KV: usize = 9; // baseKV, base voltage (kV)
pub(crate) const VMAX: usize = 11; // maxVm, maximum voltage magnitude (p.u.)
pub(crate) const VMIN: usize = 12; // minVm, minimum voltage magnitude (p.u.)

pub(crate) const BUS_COLS: usize = 13;

// Gen //

pub(crate) const GEN_BUS: usize = 0; // bus number
pub(crate) const PG: usize = 1; // Pg, real power output (MW)
pub(crate) const QG: usize = 2; // Qg, reactive power output (MVAr)
pub(crate) const QMAX: usize = 3; // Qmax, maximum reactive power output at Pmin (MVAr)
pub(crate) const QMIN: usize = 4; // Qmin, minimum reactive power output at Pmin (MVAr)
pub(crate) const VG: usize = 5; // Vg, voltage magnitude setpoint (p.u.)
pub(crate) const MBASE: usize = 6; // mBase, total MVA base of this machine, defaults to baseMVA
pub(crate) const GEN_STATUS: usize = 7; // status, 1 - machine in service, 0 - machine out of service
pub(crate) const PMAX: usize = 8; // Pmax, maximum real power output (MW)
pub(crate) const PMIN: usize = 9; // Pmin, minimum real power output (MW)

pub(crate) const GEN_COLS: usize = 10;

// Branch //

pub(crate) const F_BUS: usize = 0; // f, from bus number
pub(crate) const T_BUS: usize = 1; // t, to bus number
pub(crate) const BR_R: usize = 2; // r, resistance (p.u.)
pub(crate) const BR_X: usize = 3; // x, reactance (p.u.)
pub(crate) const BR_B: usize = 4; // b, total line charging susceptance (p.u.)
pub(crate) const RATE_A: usize = 5; // rateA, MVA rating A (long term rating)
pub(crate) const TAP: usize = 8; // ratio, transformer off nominal turns ratio
pub(crate) const SHIFT: usize = 9; // angle, transformer phase shift angle (degrees)
pub(crate) const BR_STATUS: usize = 10; // initial branch status, 1 - in service, 0 - out of service

pub(crate) const BRANCH_COLS: usize = 11;
