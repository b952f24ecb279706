pub mod google_maps;
pub mod ride_services;

pub use google_maps::GoogleMaps;
pub use ride_services::RideServices;
