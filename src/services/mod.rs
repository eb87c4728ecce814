//! External collaborators used by the orchestrators
//!
//! The orchestrators see only the [`ServiceLifecycle`] and [`Notifier`]
//! traits; the concrete implementations are picked from settings.

pub mod lifecycle;
pub mod notify;

pub use lifecycle::{
    lifecycle_from_settings, wait_healthy, DockerLifecycle, HealthMap, ServiceHealth,
    ServiceLifecycle, UnmanagedLifecycle,
};
pub use notify::{notifier_from_settings, CommandNotifier, LogNotifier, Notifier};
