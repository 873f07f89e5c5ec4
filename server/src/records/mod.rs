//! Clinical record workflows on top of the document store and the encrypted
//! blob store.

pub mod history;
pub mod patients;
pub mod prescriptions;
pub mod routes;
pub mod service;

pub use history::HistoryService;
pub use patients::PatientDirectory;
pub use prescriptions::PrescriptionBook;
pub use service::RecordService;
