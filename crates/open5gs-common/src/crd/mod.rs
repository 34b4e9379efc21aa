//! Custom Resource Definitions served under `net.gradiant.org/v1`

mod open5gs;
mod user;

pub use open5gs::{
    CoreConfiguration, EndpointOverride, ExposureType, NetworkFunction, Open5GS, Open5GSSpec,
    Open5GSStatus, Slice,
};
pub use user::{Open5GSRef, Open5GSUser, Open5GSUserSpec, Open5GSUserStatus};
