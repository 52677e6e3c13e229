pub const TOPIC_SENSOR_TEMP: &str = "climate/sensor/temperature";
pub const TOPIC_SENSOR_HUMIDITY: &str = "climate/sensor/humidity";
pub const TOPIC_SENSOR_STATUS: &str = "climate/sensor/status";

pub const TOPIC_CONTROLLER_STATE: &str = "climate/controller/state";
