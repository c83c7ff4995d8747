pub mod bookings;
pub mod clients;
pub mod core;
pub mod leave;
pub mod pets;
pub mod sessions;
pub mod slots;
pub mod walkers;
