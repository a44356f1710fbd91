use std::fmt::Debug;

/// The process-wide memory facilities of the operating system and allocator.
///
/// This is the only shared, mutated resource the harness measures. Nothing here takes a lock
/// over it; callers keep measurements valid by never running two of them at the same time.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// Gets the contents of the /proc/self/status file, or `None` if the platform has no such
    /// file.
    ///
    /// This is a plaintext file with "key:     value" pairs. Memory figures are given in kB.
    fn get_proc_self_status_contents(&self) -> Option<String>;

    /// Asks the allocator to hand memory it is holding on to but not using back to the operating
    /// system.
    ///
    /// This is the closest thing to a forced collection pass that a process without a garbage
    /// collector has. Where the allocator offers no such facility, this does nothing.
    fn release_free_memory(&self);

    /// Makes every thread started from now on share the allocator's existing heap arenas instead
    /// of reserving a fresh one.
    ///
    /// A new arena reserves tens of megabytes of address space the first time a new thread
    /// allocates, which would otherwise be attributed to that thread. Where the allocator has no
    /// per-thread arenas, this does nothing.
    fn limit_allocator_arenas(&self);
}
