//! Case lifecycle and live tracking for Vetline.
//!
//! [`DispatchEngine`] owns the distress state machine: creation, responses,
//! selection, resolution and cancellation. [`LocationRelay`] carries live
//! positions between the reporter and the selected responder.

pub mod analysis;
pub mod distance;
pub mod engine;
pub mod relay;

pub use analysis::{fallback_analysis, parse_ai_analysis, AI_DISCLAIMER};
pub use distance::{
    DistanceEstimator, DistanceMatrixClient, DistanceProvider, EstimateSource, TravelEstimate,
};
pub use engine::{
    CaseCreated, DispatchEngine, DispatchSettings, NearbyCaseView, NewCaseRequest,
    MIN_DESCRIPTION_CHARS,
};
pub use relay::{LocationRelay, NearbyPoll, PollSnapshot};
