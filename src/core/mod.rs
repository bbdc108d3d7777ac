pub mod builder;
pub mod catalog;
pub mod identity;
pub mod providers;
pub mod publisher;
pub mod registry;
pub mod scheduler;
pub mod sensor;
pub mod session;
pub mod state;
pub mod transport;
