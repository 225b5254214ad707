//! Guided exercise coaching over a stream of body-pose observations.
//!
//! A [`session::SessionController`] walks the segments of a recorded
//! reference motion (starting, transition, holding, ending) and decides on
//! every observed frame whether the user has matched, held or left each
//! pose, counting repetitions across an [`plan::ExercisePlan`].

pub mod comparator;
pub mod config;
pub mod feed;
pub mod feedback;
pub mod path_tracker;
pub mod phases;
pub mod plan;
pub mod pose;
pub mod reference;
pub mod session;
