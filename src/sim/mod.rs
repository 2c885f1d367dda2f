mod sim_vehicle;

pub use sim_vehicle::{SentCommand, SimConfig, SimLink, SimVehicle};
