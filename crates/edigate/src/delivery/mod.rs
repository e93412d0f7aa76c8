//! Delivery Queue states, retry timing, the ERP client and the scheduler
//! that ties them together.

pub mod backoff;
pub mod erp;
pub mod scheduler;
pub mod state;

pub use backoff::{next_attempt_at, retry_delay};
pub use erp::{DeliveryOutcome, ErpClient, ErpError, ErpRequest};
pub use scheduler::{DeliveryScheduler, TickReport};
pub use state::DeliveryState;
