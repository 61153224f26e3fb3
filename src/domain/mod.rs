// Domain layer: deployment descriptors and the ports (interfaces) adapters implement.

pub mod model;
pub mod ports;
