//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for M5600 sensor communication. The
//! sensor places its telemetry characteristics on 16-bit assigned numbers
//! expanded over the Bluetooth base UUID.

use uuid::Uuid;

/// Bluetooth base UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number over the Bluetooth base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Service hosting the telemetry characteristics.
pub const SENSOR_SERVICE_UUID: Uuid = uuid_from_u16(0x180a);

/// Pressure characteristic UUID (Read, Notify).
pub const PRESSURE_CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0x2a3d);
/// Temperature characteristic UUID (Read, Notify).
pub const TEMPERATURE_CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0x2a1f);
/// Battery level characteristic UUID (Read, Notify).
pub const BATTERY_CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0x2a19);

/// Check if a service UUID is the sensor service.
pub fn is_sensor_service(uuid: &Uuid) -> bool {
    *uuid == SENSOR_SERVICE_UUID
}
