pub mod events;
pub mod models;
pub mod session;

pub use events::*;
pub use models::*;
pub use session::*;
