//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements         | Connects to              |
//! |------------|--------------------|--------------------------|
//! | `hardware` | GpioPort           | ESP32 GPIO / registers   |
//! |            | PwmPort            | ESP32 LEDC               |
//! | `log_sink` | EventSink          | Serial log output        |
//! |            | NotificationSink   | Serial log output        |
//! | `nvs`      | ConfigPort         | NVS / in-memory store    |
//! |            | KvStore            |                          |
//! | `time`     | —                  | ESP32 system timer, SNTP |

pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod time;
