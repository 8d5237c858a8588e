/// Notifications passed between dashboard modules after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The stored task list changed outside the tasks editor; views that
    /// show tasks re-read storage.
    TasksUpdated,
    /// The saved location changed; weather refetches and the clock switches
    /// zone.
    LocationUpdated,
}
