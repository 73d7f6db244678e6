pub mod control_routes;
pub mod sensor_routes;
