//! Services built on top of the client: snapshot storage, sensor rendering
//! and the device probe

pub mod device_info;
pub mod reading_store;
pub mod sensor_registry;

pub use device_info::{probe_device, DeviceInfo};
pub use reading_store::{ReadingStore, Snapshot};
pub use sensor_registry::{
    render_all, RegenerationStep, SensorDescriptor, SensorReading, SensorValue, SENSORS,
};
