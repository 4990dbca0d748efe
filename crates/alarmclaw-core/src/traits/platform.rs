//! Platform trait — OS version and system-wide signals.

pub trait Platform: Send + Sync {
    /// OS API level.
    fn sdk_version(&self) -> u32;

    /// Fire-and-forget broadcast asking system overlays (dialogs, shades)
    /// to close. Only meaningful on legacy OS versions.
    fn close_system_overlays(&self);
}
