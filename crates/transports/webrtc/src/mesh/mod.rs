//! The mesh: one connection per remote participant
//!
//! [`MeshCall`] ties the pieces together. It looks up who is already in the
//! conversation, dials each of them as a slave, accepts joiners on its master
//! listener socket, and supervises every resulting connection until it is
//! removed.

pub mod discovery;
pub mod lookup;
pub mod orchestrator;
pub mod registry;
mod supervisor;

pub use discovery::{select_offer_targets, CreatedAt, OpenOffer};
pub use lookup::{HttpParticipantLookup, ParticipantLookup, OPEN_OFFERS_PATH};
pub use orchestrator::MeshCall;
pub use registry::{ConnectionEntry, Registry};
