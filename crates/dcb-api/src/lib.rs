pub mod health;
pub mod server;
pub mod state;

pub use server::run;
pub use state::AppState;
