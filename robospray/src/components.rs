/// Components that are placed on the field robot.
pub mod field_robot {
    /// Components that provide actuation capability.
    pub mod actuating {
        /// Geofence triggered spray decision.
        pub mod auto_spray;
        /// The spray component and its controller.
        pub mod spray;
    }
    pub mod canbus {
        /// Supervised streams to the bus gateway.
        pub mod streaming;
    }
    /// Operator control surface.
    pub mod operator;
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::field_robot::actuating::auto_spray::*;
    pub use crate::components::field_robot::actuating::spray::*;
    pub use crate::components::field_robot::canbus::streaming::*;
}
