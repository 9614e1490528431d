pub mod base;
pub mod bot;
pub mod health;
pub mod logging;
pub mod player;
pub mod server;

pub use base::*;
pub use bot::*;
pub use health::*;
pub use logging::*;
pub use player::*;
pub use server::*;
