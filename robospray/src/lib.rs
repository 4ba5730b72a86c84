/**
The robospray control system keeps a field robot's sprayer in step with a
catalog of geofenced targets. Each concern runs as its own task: the
position feed, the spray decision, and one supervised stream per direction
to the bus gateway, so any of them can fail and recover without taking the
others down.
*/

/// Components in the system are created by grouping together
/// devices into a logical unit that performs some function
/// for the overall control system.
pub mod components;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
pub mod error;
/// Geofence catalog and the nearest target index.
pub mod geofence;
/// Message structure for communication into and out of the
/// control system, on the bus and from the operator.
pub mod messages;
/// Development utilities for geodesy, logging and tests.
pub mod utils;
