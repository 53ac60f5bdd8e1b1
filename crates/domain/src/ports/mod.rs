pub mod messaging;

pub use messaging::{Delivery, MessageQueue};
