//! Named services and where they run.

pub mod directory;
pub mod identity;
pub mod launcher;

pub use directory::{BindOutcome, EmbeddedServiceFactory, LaunchPolicy, ServiceDirectory, ServiceEntry};
pub use identity::ServiceIdentity;
pub use launcher::OutOfProcessLauncher;
