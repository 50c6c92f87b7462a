//! External workflow integrations.

pub mod n8n;

pub use n8n::{N8nNotifier, NotifyError, StatusChangeEvent};
