// Models module - Database entity representations

pub mod member;
pub mod registration;
pub mod ticket;

pub use member::{Member, MemberType};
pub use registration::Registration;
pub use ticket::Ticket;
