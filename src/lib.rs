//! # biosense-node
//!
//! Firmware model of a battery-powered biomedical sensor node. The node samples
//! an ECG channel and a pulse oximeter, appends each reading as a text record to
//! a flash region, and streams the stored records over a serial radio link when
//! asked, erasing the region once it has been read out completely.
//!
//! ## Crate Structure
//!
//! - **`storage`**: the append-only [`FlashLog`](storage::FlashLog), its
//!   `Idle -> Reading -> ReadDone` status and the shared [`LogHandle`](storage::LogHandle).
//! - **`flash`**: the [`FlashDevice`](flash::FlashDevice) abstraction with NOR
//!   semantics, a RAM device and a memory-mapped image file.
//! - **`record`**: the record grammar shared by flash and link.
//! - **`sensor`**: peripheral traits, the SpO2 estimate, simulated peripherals and
//!   the [`SampleProducer`](sensor::SampleProducer).
//! - **`retrieval`**: the retrieval task and its halt handshake.
//! - **`supervisor`**: periodic triggers and the event loop that owns every
//!   mutation of the log.
//! - **`events`**: the bounded trigger queue.
//! - **`transport`**: the serial/stdio link.
//! - **`config`**, **`telemetry`**, **`error`**: configuration, diagnostic
//!   console and the crate error type.

pub mod config;
pub mod error;
pub mod events;
pub mod flash;
pub mod record;
pub mod retrieval;
pub mod sensor;
pub mod storage;
pub mod supervisor;
pub mod telemetry;
pub mod transport;

pub use error::{AppResult, LogFull, NodeError};
pub use record::{Record, Tag, Timestamp};
pub use storage::{FlashLog, LogHandle, LogStatus};
pub use supervisor::{Supervisor, SupervisorStats};
