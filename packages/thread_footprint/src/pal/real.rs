use std::fmt::Debug;

use crate::pal::Platform;

/// The real operating system and allocator that the build is targeting.
///
/// You would only use a different platform in unit tests that need to control what memory
/// readings the harness observes.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

// Real platform bindings are excluded from coverage measurement because they are exercised by
// the integration tests running on actual Linux and cannot be observed from unit tests.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Platform for BuildTargetPlatform {
    #[cfg(target_os = "linux")]
    fn get_proc_self_status_contents(&self) -> Option<String> {
        std::fs::read_to_string("/proc/self/status").ok()
    }

    #[cfg(not(target_os = "linux"))]
    fn get_proc_self_status_contents(&self) -> Option<String> {
        None
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn release_free_memory(&self) {
        // SAFETY: No safety requirements. The return value only says whether anything was
        // released, which we have no use for.
        unsafe {
            libc::malloc_trim(0);
        }
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn release_free_memory(&self) {}

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn limit_allocator_arenas(&self) {
        // SAFETY: No safety requirements. glibc only consults the limit when a thread needs an
        // arena, so changing it while other threads allocate is fine. A zero return means the
        // option was rejected, which leaves the default behavior in place.
        let accepted = unsafe { libc::mallopt(libc::M_ARENA_MAX, 1) };

        if accepted == 0 {
            tracing::warn!("allocator rejected the arena limit, thread deltas include new arenas");
        }
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn limit_allocator_arenas(&self) {}
}
