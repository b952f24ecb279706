mod driver;
mod place;
mod quote;
mod ride;
mod ride_option;

pub use driver::{DriverIdentity, DriverLocationUpdate, DriverMatch, Vehicle};
pub use place::{Coordinates, Place, PlaceSuggestion};
pub use quote::Quote;
pub use ride::{AppliedCoupon, RideRequest};
pub use ride_option::RideOption;
