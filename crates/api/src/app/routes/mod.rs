pub mod catalog;
pub mod deliveries;
pub mod events;
pub mod orders;
pub mod system;
