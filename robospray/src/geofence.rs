/// Spray targets read from a GeoJSON catalog.
pub mod catalog;
/// Nearest target lookup over the catalog.
pub mod index;
