//! # layered-attest-core
//!
//! Layered attestation APB: collects evidence across trust domains and ships
//! it to an appraiser as a signed contract.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   LayeredAttestationApb                       │
//! │   place args → ResolvedPlaces → MeasurementSpec → graph       │
//! │                          │                                    │
//! │                          ▼                                    │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ SpecEvaluator ──▶ MeasurementDispatcher                 │  │
//! │  │                    │ select_asp                         │  │
//! │  │       ┌────────────┼──────────────┐                     │  │
//! │  │       ▼            ▼              ▼                     │  │
//! │  │  kernel ASP   RemoteChannel   UserspaceMeasurer         │  │
//! │  │               + ContractVerifier                        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                          │                                    │
//! │                          ▼                                    │
//! │  serialize → compress → [encrypt] → create contract → send   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Credentials are staged once per run into an immutable [`Credentials`]
//! value and handed to workers as process arguments.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod apb;
pub mod asp;
pub mod config;
pub mod contract;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod places;
pub mod remote;
pub mod resolver;
pub mod scenario;
pub mod selector;
pub mod spec;
pub mod userspace;

pub use apb::{LayeredAttestationApb, Phase};
pub use asp::{AspInfo, AspRegistry, AspRunner, Capability, ProcessRunner};
pub use config::ApbConfig;
pub use contract::{ContractSwap, ContractVerifier, WorkerContractVerifier};
pub use dispatcher::{Collaborators, MeasurementDispatcher, Strategy};
pub use error::{ApbError, AspError, DispatchError, PipelineError};
pub use pipeline::{run_pipeline, PipelinePlan, PipelineStage};
pub use places::{
    FilePlaceDirectory, KeyValue, PlaceArgs, PlaceDirectory, PlaceInfo, ResolvedPlaces,
    DOMAIN_ZERO_PLACE, TARGET_PLACE,
};
pub use remote::{AspExecuteClient, RemoteChannel};
pub use scenario::{Credentials, Scenario};
pub use selector::{select_asp, SelectionCounter};
pub use spec::{
    DirSpecStore, EvaluationSummary, MeasurementCallbacks, MeasurementInstruction,
    MeasurementSpec, Predicate, SpecEvaluator, SpecStore,
};
pub use userspace::{AspUserspaceMeasurer, UserspaceMeasurer};
