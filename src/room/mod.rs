pub mod registry;
pub mod state;

pub use registry::{ParticipantRecord, ParticipantRegistry};
pub use state::Room;
