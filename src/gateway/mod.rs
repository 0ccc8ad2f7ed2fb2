//! Gateways to external collaborators
//!
//! Read-only sensor/weather facade, the SCADA gate actuator (with its local
//! command log and completion monitor), and the hydraulic gate-level service.

mod hydraulic;
mod scada;
mod sensors;

pub use hydraulic::HydraulicClient;
pub use scada::{Actuator, CommandMonitor, GateActuator};
pub use sensors::{HttpSensorGateway, SensorGateway};
