pub mod entities;
pub mod events;
pub mod pipeline;
pub mod ports;
pub mod repositories;
pub mod state_machine;
pub mod value_objects;

pub use entities::*;
pub use events::*;
pub use ports::{Delivery, MessageQueue};
pub use repositories::JobRepository;
pub use state_machine::{is_valid_transition, EventEffect};
pub use value_objects::*;
