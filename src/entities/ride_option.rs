use serde::{Deserialize, Serialize};

/// One entry of the option list returned by the quote service.
///
/// A selected option is preserved by value once chosen; refetching the quote
/// list never invalidates an existing selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RideOption {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub seats: u8,
    pub eta_minutes: u32,
    pub price: f64,
}
