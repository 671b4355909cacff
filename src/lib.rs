#![allow(dead_code, non_snake_case, non_upper_case_globals)]

//! Core engine for assembling and evolving the hierarchical equations of
//! motion (HEOM) describing an open quantum system coupled to bosonic and/or
//! fermionic baths.
//!
//! The engine builds a large sparse superoperator over a hierarchy of
//! auxiliary density operators (ADOs), then propagates or solves it:
//! - [`hierarchy`]: enumeration of ADO multi-indices and the index bijection;
//! - [`bath`] and [`corr`]: exponential bath expansion terms and generators
//!   for standard correlation functions;
//! - [`superop`]: lifts of system-space operators onto the vectorized
//!   (Liouville) space;
//! - [`heom`]: assembly of the HEOM generator, including Lindblad
//!   dissipators;
//! - [`ado`]: the flattened ADO state vector and reduced-state extraction;
//! - [`evolve`]: propagator-exponential and ODE time evolution;
//! - [`steady`]: the stationary-state solve under a trace constraint;
//! - [`checkpoint`]: a keyed on-disk store for ADO trajectories.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeomError {
    /// Returned when a bath or bath list contains no expansion terms.
    #[error("empty bath term list")]
    EmptyBath,

    /// Returned when an operator that should be square is not.
    #[error("expected a square matrix, got {0}x{1}")]
    NonSquare(usize, usize),

    /// Returned when an operator dimension disagrees with the system
    /// dimension.
    #[error("dimension mismatch: expected {expected}x{expected}, got {got}x{got}")]
    DimMismatch { expected: usize, got: usize },

    /// Returned when a fermionic hierarchy is requested without a definite
    /// parity.
    #[error("invalid parity {0:?}: a fermionic hierarchy must be even or odd")]
    InvalidParity(crate::heom::Parity),

    /// Returned when an ADO vector's length disagrees with a generator's.
    #[error("ado length mismatch: expected {expected}, got {got}")]
    AdoLenMismatch { expected: usize, got: usize },

    /// Returned when an ADO vector's parity disagrees with a generator's.
    #[error("ado parity mismatch: generator is {matrix:?}, vector is {ado:?}")]
    AdoParityMismatch {
        matrix: crate::heom::Parity,
        ado: crate::heom::Parity,
    },

    /// Returned when a list of time points is empty or not strictly
    /// increasing.
    #[error("invalid time list: must be non-empty and strictly increasing")]
    BadTimeList,

    /// Returned when the propagator's Taylor series fails to meet its
    /// threshold within the iteration cap.
    #[error("matrix exponential failed to converge after {terms} terms \
        (last term magnitude {last:.3e})")]
    ExpmDiverged { terms: usize, last: f64 },

    /// Returned when the ODE integrator exhausts its step budget.
    #[error("ode integration exceeded {max_steps} steps")]
    OdeMaxSteps { max_steps: usize },

    /// Returned when the steady-state residual exceeds tolerance.
    #[error("steady-state solve left residual {residual:.3e} > {tol:.3e}")]
    SolverResidual { residual: f64, tol: f64 },

    /// Returned when the bundled dense solver fails.
    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    /// Returned when a checkpoint sink already exists on disk.
    #[error("checkpoint file already exists: {0}")]
    CheckpointExists(std::path::PathBuf),

    /// Returned when a checkpoint key is written twice.
    #[error("checkpoint key already written: \"{0}\"")]
    DuplicateKey(String),

    /// Returned when a checkpoint file cannot be parsed back.
    #[error("malformed checkpoint data: {0}")]
    BadCheckpoint(String),

    /// I/O error from the checkpoint sink.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
pub type HeomResult<T> = Result<T, HeomError>;

pub mod sparse;
pub mod hierarchy;
pub mod superop;
pub mod bath;
pub mod corr;
pub mod heom;
pub mod ado;
pub mod evolve;
pub mod steady;
pub mod checkpoint;

pub use bath::{ BosonBath, FermionBath, ExpTerm, TermKind };
pub use hierarchy::Hierarchy;
pub use heom::{
    HeomMatrix,
    Parity,
    make_heom_boson,
    make_heom_fermion,
    make_heom_boson_fermion,
};
pub use ado::AdoVector;
pub use evolve::{
    evolve,
    evolve_ode,
    DriveFn,
    Initial,
    OdeOpts,
    PropOpts,
    Propagator,
};
pub use steady::{ steady_state, DenseLu, LinearSolver, SteadyOpts };
pub use checkpoint::{ CheckpointReader, CheckpointWriter };
