/// Great circle distance helpers.
pub mod geodesy;
/// Tracing subscriber set up shared by the binaries.
pub mod logging;
