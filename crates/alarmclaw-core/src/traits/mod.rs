//! Collaborator traits — the seams the dispatcher is wired through.

pub mod flag_store;
pub mod handler;
pub mod launcher;
pub mod platform;
pub mod power;
pub mod source;
pub mod work_queue;

pub use flag_store::FlagStore;
pub use handler::AlarmHandler;
pub use launcher::{LaunchTargetResolver, Launcher};
pub use platform::Platform;
pub use power::PowerManager;
pub use source::AlarmEventSource;
pub use work_queue::WorkQueue;
