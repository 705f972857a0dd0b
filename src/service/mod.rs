pub mod device;
pub mod energy;
pub mod hub;
pub mod publisher;
pub mod registry;
pub mod scene;
pub mod scheduler;
pub mod session;
pub mod store;
