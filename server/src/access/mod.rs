pub mod expiry;
pub mod gate;
pub mod key;
pub mod ledger;

pub use gate::{AccessGate, Denial, DenyReason, GateState, Grant};
pub use key::{derive_access_key, AccessKey, AccessKeyPolicy, Clock, ManualClock, SystemClock};
pub use ledger::AccessLedger;
