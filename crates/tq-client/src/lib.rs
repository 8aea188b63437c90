pub mod completion;
pub mod config;
pub mod directory;
pub mod error;
pub mod observers;
pub mod session;
pub mod store;
pub mod transport;

pub use completion::{CompletionCoordinator, DetailCache};
pub use config::ClientConfig;
pub use directory::{DirectoryError, HttpReportDirectory, ReportDirectory};
pub use error::ClientError;
pub use observers::{Observers, Subscription};
pub use session::Session;
pub use store::{ProgressStore, Transition};
pub use transport::{ConnectionStatus, Transport};
